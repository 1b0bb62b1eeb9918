//! Listening service
//!
//! Binds a local address and hands each inbound payload to an injected
//! handler:
//! - one connection carries one payload, read until the peer closes its
//!   write half
//! - the handler runs on the blocking pool, so handlers for different
//!   connections may run at the same time
//! - a `Some` reply is written back before closing, which is how a listener
//!   serves as a transformer

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::config::ClientSettings;
use crate::protocol::frame::DEFAULT_MAX_FRAME_LEN;
use crate::utils::{MyceliaError, Result};

pub type Handler = Arc<dyn Fn(Vec<u8>) -> Option<Vec<u8>> + Send + Sync>;

/// Stops a running listener from another task.
#[derive(Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.send_replace(true);
    }
}

pub struct Listener {
    listener: TcpListener,
    handler: Handler,
    stop: Arc<watch::Sender<bool>>,
    max_payload_len: usize,
}

impl Listener {
    pub async fn bind<F>(addr: &str, handler: F) -> Result<Self>
    where
        F: Fn(Vec<u8>) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(MyceliaError::Connection)?;
        let (stop, _) = watch::channel(false);
        Ok(Self {
            listener,
            handler: Arc::new(handler),
            stop: Arc::new(stop),
            max_payload_len: DEFAULT_MAX_FRAME_LEN,
        })
    }

    /// Binds the configured `listen_host:listen_port`.
    pub async fn from_settings<F>(settings: &ClientSettings, handler: F) -> Result<Self>
    where
        F: Fn(Vec<u8>) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        let addr = format!("{}:{}", settings.listen_host, settings.listen_port);
        Self::bind(&addr, handler).await
    }

    pub fn with_max_payload_len(mut self, max_payload_len: usize) -> Self {
        self.max_payload_len = max_payload_len;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(MyceliaError::Connection)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stop))
    }

    /// Runs the accept loop until `StopHandle::stop` is called.
    pub async fn start(self) -> Result<()> {
        let mut stop = self.stop.subscribe();
        tracing::info!("Listening on {}", self.local_addr()?);

        loop {
            if *stop.borrow_and_update() {
                break;
            }

            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = Arc::clone(&self.handler);
                        tokio::spawn(serve_connection(stream, peer, handler, self.max_payload_len));
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to accept connection"),
                },
                _ = stop.changed() => {}
            }
        }

        tracing::info!("Listener stopped");
        Ok(())
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Handler,
    max_payload_len: usize,
) {
    tracing::debug!(%peer, "Connected");

    let mut payload = Vec::new();
    if let Err(e) = (&mut stream)
        .take(max_payload_len as u64 + 1)
        .read_to_end(&mut payload)
        .await
    {
        tracing::warn!(%peer, error = %e, "Failed to read payload");
        return;
    }
    if payload.len() > max_payload_len {
        tracing::warn!(%peer, max_payload_len, "Payload too large, dropping connection");
        return;
    }
    if payload.is_empty() {
        return;
    }

    let reply = match tokio::task::spawn_blocking(move || handler(payload)).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(%peer, error = %e, "Message handler panicked");
            return;
        }
    };

    if let Some(reply) = reply {
        if let Err(e) = stream.write_all(&reply).await {
            tracing::debug!(%peer, error = %e, "Failed to write reply");
            return;
        }
        let _ = stream.shutdown().await;
    }
}
