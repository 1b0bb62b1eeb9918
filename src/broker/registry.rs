//! Route registry and subscription table.
//!
//! Routes own channels and channels own their subscribers and transformers,
//! so every registration necessarily points at a live (route, channel) pair.
//! The registry is plain data; the broker wraps it in a lock.

use std::collections::HashMap;
use std::collections::HashSet;

use crate::broker::route::{Channel, Route};
use crate::protocol::Endpoint;
use crate::utils::RegistryError;

/// A snapshot of one channel taken for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPlan {
    pub channel: String,
    pub transformers: Vec<Endpoint>,
    pub subscribers: Vec<Endpoint>,
}

#[derive(Debug, Default)]
pub struct RouteRegistry {
    routes: HashMap<String, Route>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, name: &str) -> Result<(), RegistryError> {
        if self.routes.contains_key(name) {
            return Err(RegistryError::DuplicateRoute(name.to_string()));
        }
        self.routes.insert(name.to_string(), Route::new(name));
        Ok(())
    }

    pub fn route_exists(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    /// Route names in sorted order.
    pub fn routes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn add_channel(&mut self, route: &str, channel: &str) -> Result<(), RegistryError> {
        let owner = self.route_mut(route)?;
        if owner.channels.contains_key(channel) {
            return Err(RegistryError::DuplicateChannel {
                route: route.to_string(),
                channel: channel.to_string(),
            });
        }
        owner
            .channels
            .insert(channel.to_string(), Channel::new(channel));
        Ok(())
    }

    pub fn channel_exists(&self, route: &str, channel: &str) -> bool {
        self.routes
            .get(route)
            .is_some_and(|r| r.channels.contains_key(channel))
    }

    /// Registers `endpoint` on (route, channel). Registering the same
    /// endpoint twice is a no-op; the return value tells whether it was new.
    pub fn add_subscriber(
        &mut self,
        route: &str,
        channel: &str,
        endpoint: Endpoint,
    ) -> Result<bool, RegistryError> {
        Ok(self.channel_mut(route, channel)?.subscribe(endpoint))
    }

    pub fn remove_subscriber(
        &mut self,
        route: &str,
        channel: &str,
        endpoint: &Endpoint,
    ) -> Result<bool, RegistryError> {
        Ok(self.channel_mut(route, channel)?.unsubscribe(endpoint))
    }

    pub fn add_transformer(
        &mut self,
        route: &str,
        channel: &str,
        endpoint: Endpoint,
    ) -> Result<bool, RegistryError> {
        Ok(self.channel_mut(route, channel)?.add_transformer(endpoint))
    }

    pub fn remove_transformer(
        &mut self,
        route: &str,
        channel: &str,
        endpoint: &Endpoint,
    ) -> Result<bool, RegistryError> {
        Ok(self.channel_mut(route, channel)?.remove_transformer(endpoint))
    }

    /// The subscriber set of one (route, channel) pair.
    pub fn resolve(&self, route: &str, channel: &str) -> Result<HashSet<Endpoint>, RegistryError> {
        Ok(self.channel(route, channel)?.subscribers.clone())
    }

    /// Snapshots the channels a message addressed to `route` (and optionally
    /// `channel`) should be delivered over. Without a channel every channel
    /// of the route is included, sorted by name.
    pub fn plan(&self, route: &str, channel: Option<&str>) -> Result<Vec<ChannelPlan>, RegistryError> {
        let plan_of = |c: &Channel| {
            let mut subscribers: Vec<Endpoint> = c.subscribers.iter().cloned().collect();
            subscribers.sort();
            ChannelPlan {
                channel: c.name.clone(),
                transformers: c.transformers.clone(),
                subscribers,
            }
        };

        match channel {
            Some(name) => Ok(vec![plan_of(self.channel(route, name)?)]),
            None => {
                let owner = self
                    .routes
                    .get(route)
                    .ok_or_else(|| RegistryError::UnknownRoute(route.to_string()))?;
                let mut plans: Vec<ChannelPlan> = owner.channels.values().map(plan_of).collect();
                plans.sort_by(|a, b| a.channel.cmp(&b.channel));
                Ok(plans)
            }
        }
    }

    fn route_mut(&mut self, route: &str) -> Result<&mut Route, RegistryError> {
        self.routes
            .get_mut(route)
            .ok_or_else(|| RegistryError::UnknownRoute(route.to_string()))
    }

    fn channel(&self, route: &str, channel: &str) -> Result<&Channel, RegistryError> {
        self.routes
            .get(route)
            .ok_or_else(|| RegistryError::UnknownRoute(route.to_string()))?
            .channels
            .get(channel)
            .ok_or_else(|| RegistryError::UnknownChannel {
                route: route.to_string(),
                channel: channel.to_string(),
            })
    }

    fn channel_mut(&mut self, route: &str, channel: &str) -> Result<&mut Channel, RegistryError> {
        self.route_mut(route)?
            .channels
            .get_mut(channel)
            .ok_or_else(|| RegistryError::UnknownChannel {
                route: route.to_string(),
                channel: channel.to_string(),
            })
    }
}
