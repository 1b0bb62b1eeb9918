//! Broker TCP server
//!
//! Accepts client connections and turns request frames into broker calls:
//! - one task per connection, capped by `max_connections`
//! - requests on a connection are processed in order; every version 2
//!   request is answered with an ack frame on the same connection
//! - an undecodable frame is answered with an `Invalid` rejection when its
//!   framing was intact, then the connection is closed
//! - the accept loop ends when the broker's shutdown signal flips

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::broker::Broker;
use crate::config::BrokerSettings;
use crate::protocol::{AckResponse, Packet, Rejection, read_packet, write_packet};
use crate::utils::{FrameError, MyceliaError};

/// How long in-flight connections may keep running after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Binds `addr` and serves the broker until shutdown is requested.
pub async fn start_broker_server(
    addr: &str,
    broker: Arc<Broker>,
    settings: BrokerSettings,
) -> Result<(), MyceliaError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(MyceliaError::Connection)?;
    tracing::info!("Broker listening on {addr}");
    serve(listener, broker, settings).await
}

/// Runs the accept loop on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    broker: Arc<Broker>,
    settings: BrokerSettings,
) -> Result<(), MyceliaError> {
    let permits = Arc::new(Semaphore::new(settings.max_connections.max(1)));
    let mut shutdown = broker.shutdown_signal();
    let mut connections = JoinSet::new();

    loop {
        while connections.try_join_next().is_some() {}
        if *shutdown.borrow_and_update() {
            break;
        }

        let permit = tokio::select! {
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown.changed() => continue,
        };

        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
            _ = shutdown.changed() => continue,
        };

        let broker = Arc::clone(&broker);
        let max_frame_len = settings.max_frame_len;
        connections.spawn(async move {
            handle_connection(stream, peer, broker, max_frame_len).await;
            drop(permit);
        });
    }

    tracing::info!(
        open = connections.len(),
        "Broker stopped accepting connections, draining"
    );
    let drain = async { while connections.join_next().await.is_some() {} };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        tracing::warn!("Closing connections still open after {SHUTDOWN_GRACE:?}");
        connections.shutdown().await;
    }
    Ok(())
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    broker: Arc<Broker>,
    max_frame_len: usize,
) {
    tracing::debug!(%peer, "Client connected");

    loop {
        let request = match read_packet(&mut stream, max_frame_len).await {
            Ok(Some(Packet::Request(request))) => request,
            Ok(Some(Packet::Ack(ack))) => {
                tracing::warn!(%peer, uid = %ack.uid, "Ignoring ack sent to broker");
                continue;
            }
            Ok(None) => break,
            Err(FrameError::Io(e)) => {
                tracing::debug!(%peer, error = %e, "Connection read failed");
                break;
            }
            Err(e) => {
                tracing::warn!(%peer, error = %e, "Invalid frame");
                if !matches!(e, FrameError::TooLarge { .. }) {
                    // The request could not be decoded, so there is no uid to echo.
                    let ack = AckResponse::rejected(String::new(), Rejection::Invalid(e.to_string()));
                    let _ = write_packet(&mut stream, &Packet::Ack(ack)).await;
                }
                break;
            }
        };

        let expects_ack = request.expects_ack();
        let ack = broker.process(request).await;

        if expects_ack {
            if let Err(e) = write_packet(&mut stream, &Packet::Ack(ack)).await {
                tracing::debug!(%peer, error = %e, "Failed to write ack");
                break;
            }
        }
    }

    tracing::debug!(%peer, "Client disconnected");
}
