//! The `client` module is what applications use to talk to a broker.
//!
//! It provides the `Message` type, the free functions `send`,
//! `send_and_get_ack` and `process_command`, and a `Client` handle that
//! carries the broker address and defaults from configuration.

#[allow(clippy::module_inception)]
pub mod client;
pub mod message;

pub use client::{Client, process_command, send, send_and_get_ack};
pub use message::Message;
