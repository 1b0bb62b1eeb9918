use std::time::Duration;

use crate::protocol::{AckPolicy, Command, Request};

/// A message addressed to a route on the broker.
///
/// The correlation id is assigned once, at construction, and is echoed back
/// in the broker's acknowledgement.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use mycelia::client::Message;
/// use mycelia::protocol::AckPolicy;
///
/// let msg = Message::new("10.0.0.7", "sensor_updates", r#"{"temp":25}"#)
///     .with_timeout(Duration::from_secs(2))
///     .with_ack_policy(AckPolicy::OnSent);
/// assert!(!msg.uid().is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    uid: String,
    pub return_address: String,
    pub route: String,
    /// Restricts delivery to one channel of the route.
    pub channel: Option<String>,
    pub payload: Vec<u8>,
    /// How long `send_and_get_ack` waits. `None` waits forever.
    pub timeout: Option<Duration>,
    pub ack_policy: AckPolicy,
    /// Milliseconds since the UNIX epoch at construction.
    pub timestamp: i64,
}

impl Message {
    pub fn new(
        return_address: impl Into<String>,
        route: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            uid: uuid::Uuid::new_v4().to_string(),
            return_address: return_address.into(),
            route: route.into(),
            channel: None,
            payload: payload.into(),
            timeout: None,
            ack_policy: AckPolicy::default(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_ack_policy(mut self, policy: AckPolicy) -> Self {
        self.ack_policy = policy;
        self
    }

    /// The request that carries this message to the broker.
    pub fn to_request(&self) -> Request {
        let mut request = Request::new(
            self.return_address.clone(),
            Command::SendMessage {
                route: self.route.clone(),
                channel: self.channel.clone(),
                payload: self.payload.clone(),
            },
        );
        request.uid = self.uid.clone();
        request.ack_policy = self.ack_policy;
        request.timeout = self.timeout;
        request
    }
}
