use std::collections::{HashMap, HashSet};

use crate::protocol::Endpoint;

/// Represents a route in the broker system
/// A route is identified by its name and owns a set of named channels
/// Channels cannot outlive their route, so subscriptions never dangle
#[derive(Debug, Default)]
pub struct Route {
    pub name: String,
    pub channels: HashMap<String, Channel>,
}

impl Route {
    /// Creates a new instance of the Route with the given name
    /// Initializes an empty set of channels
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            channels: HashMap::new(),
        }
    }
}

/// A named partition within a route.
///
/// Holds the subscribers that receive deliveries and the transformers the
/// payload passes through first, in registration order.
#[derive(Debug, Default)]
pub struct Channel {
    pub name: String,
    pub subscribers: HashSet<Endpoint>,
    pub transformers: Vec<Endpoint>,
}

impl Channel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashSet::new(),
            transformers: Vec::new(),
        }
    }

    /// Adds a subscriber to the channel
    /// If the subscriber is already present, it has no effect
    /// Returns whether the subscriber was newly added
    pub fn subscribe(&mut self, endpoint: Endpoint) -> bool {
        self.subscribers.insert(endpoint)
    }

    /// Removes a subscriber from the channel
    /// If the subscriber is not present, it has no effect
    pub fn unsubscribe(&mut self, endpoint: &Endpoint) -> bool {
        self.subscribers.remove(endpoint)
    }

    pub fn add_transformer(&mut self, endpoint: Endpoint) -> bool {
        if self.transformers.contains(&endpoint) {
            return false;
        }
        self.transformers.push(endpoint);
        true
    }

    pub fn remove_transformer(&mut self, endpoint: &Endpoint) -> bool {
        let before = self.transformers.len();
        self.transformers.retain(|t| t != endpoint);
        self.transformers.len() != before
    }
}
