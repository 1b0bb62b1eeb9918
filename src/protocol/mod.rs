//! The `protocol` module defines what travels between clients and the broker.
//!
//! It contains the typed commands and acknowledgements plus the binary
//! length-prefixed codec used to put them on a TCP stream.

pub mod ack;
pub mod command;
pub mod endpoint;
pub mod frame;

pub use ack::{AckPolicy, AckResponse, AckStatus, Rejection};
pub use command::{Command, Request};
pub use endpoint::Endpoint;
pub use frame::{Packet, read_packet, write_packet};
