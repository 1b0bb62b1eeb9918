//! The `listener` module receives deliveries from the broker.
//!
//! `Listener` binds a local port and passes each payload to a handler;
//! the `payload` helpers decode what arrives.

pub mod payload;
pub mod service;

pub use payload::{Payload, decode_payload, json_payload, parse_json};
pub use service::{Handler, Listener, StopHandle};
