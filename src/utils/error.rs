//! The `error` module defines the error types used throughout `mycelia`.
//!
//! Registry errors originate inside the broker and travel back to the caller
//! inside a rejected acknowledgement. Frame errors come from the wire codec.
//! `MyceliaError` is what the public client API returns.

use std::time::Duration;

/// Errors raised by the route registry and subscription table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("route '{0}' already exists")]
    DuplicateRoute(String),

    #[error("channel '{channel}' already exists on route '{route}'")]
    DuplicateChannel { route: String, channel: String },

    #[error("route '{0}' does not exist")]
    UnknownRoute(String),

    #[error("channel '{channel}' does not exist on route '{route}'")]
    UnknownChannel { route: String, channel: String },
}

/// Errors raised while encoding or decoding wire frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame truncated: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    TooLarge { len: usize, max: usize },

    #[error("field '{field}' exceeds {max} bytes")]
    FieldTooLong { field: &'static str, max: usize },

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown object type {0}")]
    UnknownObject(u8),

    #[error("unknown command {command} for object type {object}")]
    UnknownCommand { object: u8, command: u8 },

    #[error("unknown ack policy {0}")]
    UnknownAckPolicy(u8),

    #[error("unknown ack status {0}")]
    UnknownAckStatus(u8),

    #[error("unknown reject code {0}")]
    UnknownRejectCode(u8),

    #[error("field '{0}' is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid endpoint '{0}', expected host:port")]
    InvalidEndpoint(String),

    #[error("{0} trailing bytes after frame body")]
    TrailingBytes(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Top-level error returned by the client API and the binaries.
#[derive(Debug, thiserror::Error)]
pub enum MyceliaError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("connection error: {0}")]
    Connection(#[source] std::io::Error),

    #[error("no acknowledgement for message {uid} within {timeout:?}")]
    AckTimeout { uid: String, timeout: Duration },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("protocol error: {0}")]
    Protocol(FrameError),

    #[error("request rejected by broker: {0}")]
    Rejected(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl From<FrameError> for MyceliaError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(io) => MyceliaError::Connection(io),
            other => MyceliaError::Protocol(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, MyceliaError>;
