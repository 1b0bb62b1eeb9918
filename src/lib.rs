//! # Mycelia
//!
//! `mycelia` is a small message broker and the client library that talks to it.
//! Callers send messages to named routes; the broker fans each payload out to
//! the subscriber endpoints registered on the route's channels, optionally
//! passing it through transformer endpoints first, and acknowledges the sender
//! according to the message's ack policy.
//!
//! ## Core Modules
//!
//! - `broker`: routes, channels and subscriptions, delivery, and command processing.
//! - `client`: `Message`, `send`, `send_and_get_ack` and `process_command`.
//! - `config`: Handles loading and managing configuration.
//! - `listener`: a local TCP service that hands received payloads to a handler.
//! - `protocol`: commands, acknowledgements and the binary wire codec.
//! - `transport`: the broker's TCP server.
//! - `utils`: error types, logging and local address discovery.

pub mod broker;
pub mod client;
pub mod config;
pub mod listener;
pub mod protocol;
pub mod transport;
pub mod utils;
