//! Broker engine
//!
//! This module contains the broker state and the command processor:
//! - the route registry and subscription table, behind a single lock
//! - applying administrative commands and answering with an ack
//! - delivering messages according to their ack policy
//!
//! Concurrency and usage notes:
//! - The broker is shared as `Arc<Broker>` between connection tasks. The
//!   registry lock is only held to mutate or snapshot in-memory state and is
//!   always released before any network I/O.
//! - `OnSent` messages are delivered on a spawned task after the broker
//!   accepted them; `OnDelivered` messages are delivered before answering.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::broker::delivery::Deliverer;
use crate::broker::registry::RouteRegistry;
use crate::config::BrokerSettings;
use crate::protocol::{AckPolicy, AckResponse, Command, Request};
use crate::utils::RegistryError;

#[derive(Debug)]
pub struct Broker {
    registry: Mutex<RouteRegistry>,
    deliverer: Deliverer,
    shutdown: watch::Sender<bool>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(&BrokerSettings::default())
    }
}

impl Broker {
    pub fn new(settings: &BrokerSettings) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry: Mutex::new(RouteRegistry::new()),
            deliverer: Deliverer::new(settings),
            shutdown,
        }
    }

    /// Locks the registry. A poisoned lock is recovered since every registry
    /// mutation is a single insert or remove.
    pub fn registry(&self) -> MutexGuard<'_, RouteRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receiver that flips to `true` once a shutdown was requested.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Applies a registry command. Commands that do not touch the registry
    /// are accepted without effect.
    pub fn apply(&self, command: &Command) -> Result<(), RegistryError> {
        let mut registry = self.registry();
        match command {
            Command::AddRoute { route } => {
                registry.add_route(route)?;
                tracing::info!(route, "Route added");
            }
            Command::AddChannel { route, channel } => {
                registry.add_channel(route, channel)?;
                tracing::info!(route, channel, "Channel added");
            }
            Command::AddSubscriber {
                route,
                channel,
                endpoint,
            } => {
                if registry.add_subscriber(route, channel, endpoint.clone())? {
                    tracing::info!(route, channel, subscriber = %endpoint, "Subscriber added");
                } else {
                    tracing::debug!(route, channel, subscriber = %endpoint, "Subscriber already registered");
                }
            }
            Command::RemoveSubscriber {
                route,
                channel,
                endpoint,
            } => {
                if registry.remove_subscriber(route, channel, endpoint)? {
                    tracing::info!(route, channel, subscriber = %endpoint, "Subscriber removed");
                }
            }
            Command::AddTransformer {
                route,
                channel,
                endpoint,
            } => {
                if registry.add_transformer(route, channel, endpoint.clone())? {
                    tracing::info!(route, channel, transformer = %endpoint, "Transformer added");
                }
            }
            Command::RemoveTransformer {
                route,
                channel,
                endpoint,
            } => {
                if registry.remove_transformer(route, channel, endpoint)? {
                    tracing::info!(route, channel, transformer = %endpoint, "Transformer removed");
                }
            }
            Command::SendMessage { .. } | Command::Shutdown => {}
        }
        Ok(())
    }

    /// Processes one request and produces the acknowledgement for it.
    pub async fn process(&self, request: Request) -> AckResponse {
        let Request {
            uid,
            return_address,
            ack_policy,
            command,
            ..
        } = request;
        tracing::debug!(%uid, %return_address, command = command.name(), "Processing request");

        match command {
            Command::SendMessage {
                route,
                channel,
                payload,
            } => {
                let planned = self.registry().plan(&route, channel.as_deref());
                let plans = match planned {
                    Ok(plans) => plans,
                    Err(e) => {
                        tracing::warn!(%uid, error = %e, "Rejecting message");
                        return AckResponse::rejected(uid, e);
                    }
                };

                match ack_policy {
                    AckPolicy::OnSent => {
                        let deliverer = self.deliverer.clone();
                        tokio::spawn(async move {
                            deliverer.deliver(&route, &plans, &payload).await;
                        });
                        AckResponse::accepted(uid)
                    }
                    AckPolicy::OnDelivered => {
                        let report = self.deliverer.deliver(&route, &plans, &payload).await;
                        AckResponse::delivered(uid, report.delivered.len(), report.failed.len())
                    }
                }
            }
            Command::Shutdown => {
                tracing::info!(%return_address, "Shutdown requested");
                self.request_shutdown();
                AckResponse::accepted(uid)
            }
            other => match self.apply(&other) {
                Ok(()) => AckResponse::accepted(uid),
                Err(e) => {
                    tracing::warn!(%uid, command = other.name(), error = %e, "Rejecting command");
                    AckResponse::rejected(uid, e)
                }
            },
        }
    }
}
