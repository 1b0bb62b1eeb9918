//! The `utils` module provides utilities shared across the `mycelia` crate:
//! the error types, logging setup and local address discovery.

pub mod error;
pub mod logging;
pub mod net;

pub use error::{FrameError, MyceliaError, RegistryError, Result};
pub use net::get_local_ipv4;
