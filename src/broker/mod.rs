//! The `broker` module holds the state that lives inside the broker process:
//! routes, channels, subscribers and transformers, plus the engine that
//! processes commands and fans messages out.

pub mod delivery;
pub mod engine;
pub mod registry;
pub mod route;

pub use delivery::{Deliverer, DeliveryReport};
pub use engine::Broker;
pub use registry::{ChannelPlan, RouteRegistry};

#[cfg(test)]
mod tests;
