use std::time::Duration;

use uuid::Uuid;

use crate::protocol::ack::AckPolicy;
use crate::protocol::endpoint::Endpoint;

/// The operations a client can ask the broker to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Deliver `payload` over `route`; every channel when `channel` is `None`.
    SendMessage {
        route: String,
        channel: Option<String>,
        payload: Vec<u8>,
    },
    AddRoute {
        route: String,
    },
    AddChannel {
        route: String,
        channel: String,
    },
    AddSubscriber {
        route: String,
        channel: String,
        endpoint: Endpoint,
    },
    RemoveSubscriber {
        route: String,
        channel: String,
        endpoint: Endpoint,
    },
    AddTransformer {
        route: String,
        channel: String,
        endpoint: Endpoint,
    },
    RemoveTransformer {
        route: String,
        channel: String,
        endpoint: Endpoint,
    },
    /// Stop the broker's accept loop.
    Shutdown,
}

impl Command {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::SendMessage { .. } => "send_message",
            Command::AddRoute { .. } => "add_route",
            Command::AddChannel { .. } => "add_channel",
            Command::AddSubscriber { .. } => "add_subscriber",
            Command::RemoveSubscriber { .. } => "remove_subscriber",
            Command::AddTransformer { .. } => "add_transformer",
            Command::RemoveTransformer { .. } => "remove_transformer",
            Command::Shutdown => "shutdown",
        }
    }
}

/// A command plus the tracking information that travels with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Wire protocol version. Version 1 requests get no acknowledgement.
    pub version: u8,
    pub uid: String,
    pub return_address: String,
    pub ack_policy: AckPolicy,
    pub timeout: Option<Duration>,
    pub command: Command,
}

impl Request {
    /// Builds a current-version request with a fresh correlation id.
    pub fn new(return_address: impl Into<String>, command: Command) -> Self {
        Self {
            version: crate::protocol::frame::PROTOCOL_VERSION,
            uid: Uuid::new_v4().to_string(),
            return_address: return_address.into(),
            ack_policy: AckPolicy::default(),
            timeout: None,
            command,
        }
    }

    pub fn expects_ack(&self) -> bool {
        self.version >= crate::protocol::frame::PROTOCOL_VERSION
    }
}
