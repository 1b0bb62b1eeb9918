//! Delivery engine
//!
//! Fans a payload out to the subscribers of one or more channels:
//! - channels are served concurrently
//! - within a channel the transformer chain runs first, in order, and each
//!   reply replaces the payload; a transformer that fails or times out is
//!   skipped
//! - every subscriber is then sent the payload concurrently over its own
//!   TCP connection, so one unreachable subscriber never holds up the rest
//!
//! Nothing here touches the registry; callers pass in a `ChannelPlan`
//! snapshot so no lock is held across network I/O.

use std::io;
use std::time::Duration;

use futures::future::join_all;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::broker::registry::ChannelPlan;
use crate::config::BrokerSettings;
use crate::protocol::Endpoint;

/// Outcome of fanning one message out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub route: String,
    pub delivered: Vec<Endpoint>,
    pub failed: Vec<(Endpoint, String)>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    /// True when the route had nobody to deliver to.
    pub fn is_empty(&self) -> bool {
        self.attempted() == 0
    }
}

#[derive(Debug, Clone)]
pub struct Deliverer {
    connect_timeout: Duration,
    transform_timeout: Duration,
    max_reply_len: usize,
}

impl Deliverer {
    pub fn new(settings: &BrokerSettings) -> Self {
        Self {
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            transform_timeout: Duration::from_millis(settings.transform_timeout_ms),
            max_reply_len: settings.max_frame_len,
        }
    }

    pub async fn deliver(&self, route: &str, plans: &[ChannelPlan], payload: &[u8]) -> DeliveryReport {
        let per_channel = join_all(
            plans
                .iter()
                .map(|plan| self.deliver_channel(route, plan, payload)),
        )
        .await;

        let mut report = DeliveryReport {
            route: route.to_string(),
            ..Default::default()
        };
        for (endpoint, outcome) in per_channel.into_iter().flatten() {
            match outcome {
                Ok(()) => report.delivered.push(endpoint),
                Err(e) => report.failed.push((endpoint, e.to_string())),
            }
        }

        tracing::debug!(
            route,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Delivery finished"
        );
        report
    }

    async fn deliver_channel(
        &self,
        route: &str,
        plan: &ChannelPlan,
        payload: &[u8],
    ) -> Vec<(Endpoint, io::Result<()>)> {
        let payload = self.transform(route, plan, payload).await;

        let sends = plan.subscribers.iter().map(|endpoint| {
            let payload = payload.as_slice();
            async move {
                let outcome = self.push(endpoint, payload).await;
                if let Err(e) = &outcome {
                    tracing::warn!(
                        route,
                        channel = %plan.channel,
                        subscriber = %endpoint,
                        error = %e,
                        "Failed to deliver to subscriber"
                    );
                }
                (endpoint.clone(), outcome)
            }
        });
        join_all(sends).await
    }

    async fn transform(&self, route: &str, plan: &ChannelPlan, payload: &[u8]) -> Vec<u8> {
        let mut current = payload.to_vec();
        for transformer in &plan.transformers {
            match self.exchange(transformer, &current).await {
                Ok(reply) if reply.is_empty() => {
                    tracing::debug!(%transformer, "Transformer returned nothing, keeping payload");
                }
                Ok(reply) => current = reply,
                Err(e) => tracing::warn!(
                    route,
                    channel = %plan.channel,
                    %transformer,
                    error = %e,
                    "Skipping transformer"
                ),
            }
        }
        current
    }

    /// Writes `payload` to `endpoint` and closes the connection.
    pub async fn push(&self, endpoint: &Endpoint, payload: &[u8]) -> io::Result<()> {
        let mut stream = self.connect(endpoint).await?;
        stream.write_all(payload).await?;
        stream.shutdown().await
    }

    /// Writes `payload` to `endpoint` and reads its reply until EOF, all
    /// within the transform timeout. A reply longer than `max_frame_len` is
    /// an error.
    async fn exchange(&self, endpoint: &Endpoint, payload: &[u8]) -> io::Result<Vec<u8>> {
        let round_trip = async {
            let mut stream = self.connect(endpoint).await?;
            stream.write_all(payload).await?;
            stream.shutdown().await?;

            let mut reply = Vec::new();
            (&mut stream)
                .take(self.max_reply_len as u64 + 1)
                .read_to_end(&mut reply)
                .await?;
            if reply.len() > self.max_reply_len {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("transformer reply exceeds {} bytes", self.max_reply_len),
                ));
            }
            Ok::<_, io::Error>(reply)
        };

        tokio::time::timeout(self.transform_timeout, round_trip)
            .await
            .unwrap_or_else(|_| Err(timed_out("transformer reply", self.transform_timeout)))
    }

    async fn connect(&self, endpoint: &Endpoint) -> io::Result<TcpStream> {
        let connect = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
        tokio::time::timeout(self.connect_timeout, connect)
            .await
            .unwrap_or_else(|_| Err(timed_out("connect", self.connect_timeout)))
    }
}

fn timed_out(what: &str, after: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{what} timed out after {after:?}"),
    )
}
