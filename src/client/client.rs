//! Client side of the broker protocol.
//!
//! Each call opens its own TCP connection to the broker, writes one request
//! and, unless it is fire-and-forget, waits on that connection for the ack
//! whose `uid` matches. Dropping the connection on timeout is what discards
//! any late acknowledgement.

use std::io;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::client::message::Message;
use crate::config::ClientSettings;
use crate::protocol::frame::DEFAULT_MAX_FRAME_LEN;
use crate::protocol::{AckResponse, AckStatus, Command, Packet, Rejection, Request};
use crate::protocol::{read_packet, write_packet};
use crate::utils::{MyceliaError, Result, get_local_ipv4};

/// Sends `message` without waiting for an acknowledgement.
pub async fn send(message: &Message, address: &str, port: u16) -> Result<()> {
    let mut stream = connect(address, port).await?;
    write_packet(&mut stream, &Packet::Request(message.to_request())).await?;
    stream.shutdown().await.map_err(MyceliaError::Connection)?;
    tracing::debug!(uid = message.uid(), route = %message.route, "Message sent");
    Ok(())
}

/// Sends `message` and waits for the broker's acknowledgement, bounded by
/// `message.timeout` when set.
pub async fn send_and_get_ack(message: &Message, address: &str, port: u16) -> Result<AckResponse> {
    request_ack(message.to_request(), message.timeout, address, port).await
}

/// Sends an administrative command and waits for the broker to apply it.
pub async fn process_command(command: Command, address: &str, port: u16) -> Result<AckResponse> {
    let request = Request::new(get_local_ipv4().to_string(), command);
    request_ack(request, None, address, port).await
}

async fn request_ack(
    request: Request,
    timeout: Option<Duration>,
    address: &str,
    port: u16,
) -> Result<AckResponse> {
    let uid = request.uid.clone();
    // A stalled connect counts against the timeout as well.
    let exchange = async {
        let mut stream = connect(address, port).await?;
        write_packet(&mut stream, &Packet::Request(request)).await?;
        await_ack(&mut stream, &uid).await
    };

    let ack = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| {
                tracing::debug!(%uid, ?timeout, "Gave up waiting for ack");
                MyceliaError::AckTimeout {
                    uid: uid.clone(),
                    timeout,
                }
            })??,
        None => exchange.await?,
    };

    match &ack.ack {
        AckStatus::Rejected(Rejection::Registry(e)) => Err(e.clone().into()),
        AckStatus::Rejected(Rejection::Invalid(reason)) => Err(MyceliaError::Rejected(reason.clone())),
        _ => Ok(ack),
    }
}

/// Reads frames until the ack for `uid` arrives. A rejection with an empty
/// uid means the broker could not decode the request at all.
async fn await_ack(stream: &mut TcpStream, uid: &str) -> Result<AckResponse> {
    loop {
        match read_packet(stream, DEFAULT_MAX_FRAME_LEN).await? {
            Some(Packet::Ack(ack)) if ack.uid == uid => return Ok(ack),
            Some(Packet::Ack(ack)) if ack.uid.is_empty() && !ack.ack.is_positive() => {
                return Ok(ack);
            }
            Some(other) => tracing::debug!(?other, "Discarding unrelated frame"),
            None => {
                return Err(MyceliaError::Connection(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "broker closed the connection before acknowledging",
                )));
            }
        }
    }
}

async fn connect(address: &str, port: u16) -> Result<TcpStream> {
    TcpStream::connect((address, port))
        .await
        .map_err(MyceliaError::Connection)
}

/// A client bound to one broker.
///
/// Broker address, return address and default ack timeout are explicit
/// configuration rather than process-wide state.
#[derive(Debug, Clone)]
pub struct Client {
    pub broker_host: String,
    pub broker_port: u16,
    pub return_address: String,
    pub ack_timeout: Option<Duration>,
}

impl Client {
    /// Builds a client from settings, using the local IPv4 address as the
    /// return address.
    pub fn new(settings: &ClientSettings) -> Self {
        Self {
            broker_host: settings.broker_host.clone(),
            broker_port: settings.broker_port,
            return_address: get_local_ipv4().to_string(),
            ack_timeout: settings.ack_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn with_return_address(mut self, return_address: impl Into<String>) -> Self {
        self.return_address = return_address.into();
        self
    }

    /// A message pre-filled with this client's return address and timeout.
    pub fn message(&self, route: impl Into<String>, payload: impl Into<Vec<u8>>) -> Message {
        let message = Message::new(self.return_address.clone(), route, payload);
        match self.ack_timeout {
            Some(timeout) => message.with_timeout(timeout),
            None => message,
        }
    }

    pub async fn send(&self, message: &Message) -> Result<()> {
        send(message, &self.broker_host, self.broker_port).await
    }

    pub async fn send_and_get_ack(&self, message: &Message) -> Result<AckResponse> {
        send_and_get_ack(message, &self.broker_host, self.broker_port).await
    }

    pub async fn process_command(&self, command: Command) -> Result<AckResponse> {
        let request = Request::new(self.return_address.clone(), command);
        request_ack(request, self.ack_timeout, &self.broker_host, self.broker_port).await
    }
}
