//! The `transport` module is responsible for the broker's network side.
//!
//! It implements the TCP server that accepts client connections, decodes
//! request frames, hands them to the broker and writes acknowledgements back.

pub mod server;

pub use server::{serve, start_broker_server};

#[cfg(test)]
mod tests;
