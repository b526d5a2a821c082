//! Connection acceptor
//!
//! Handles the TCP accept loop and spawns one task per client.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::capture::{AsciiRenderer, CaptureDevice};
use crate::error::Result;
use crate::registry::{BroadcastHub, HubConfig};
use crate::server::api_key::ApiKey;
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;

/// ASCII stream server
pub struct StreamServer {
    config: ServerConfig,
    hub: Arc<BroadcastHub>,
    api_key: Arc<ApiKey>,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl StreamServer {
    /// Create a server rendering `device` with the default ASCII renderer
    pub fn new(config: ServerConfig, device: Box<dyn CaptureDevice>) -> Self {
        let hub = BroadcastHub::with_config(
            device,
            Box::new(AsciiRenderer::new()),
            HubConfig::default(),
        );
        Self::with_hub(config, Arc::new(hub))
    }

    /// Create a server around an existing hub
    pub fn with_hub(config: ServerConfig, hub: Arc<BroadcastHub>) -> Self {
        let api_key = match config.api_key.clone() {
            Some(key) => {
                if !key.is_well_formed() {
                    tracing::warn!("Configured API key is not a 32 character alphanumeric key");
                }
                key
            }
            None => ApiKey::generate(),
        };

        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            hub,
            api_key: Arc::new(api_key),
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    /// The broadcast hub shared by all sessions
    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// The key clients must present
    pub fn api_key(&self) -> &ApiKey {
        &self.api_key
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "Stream server listening");
        Ok(listener)
    }

    /// Run the server
    ///
    /// This method blocks until the listener fails to bind.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.accept_loop(&listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Accept on an already bound listener until `shutdown` resolves
    ///
    /// Streaming, recording and playback are stopped before returning.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        self.hub.shutdown().await;

        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New connection"
        );

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        let connection = Connection::new(
            session_id,
            socket,
            peer_addr,
            self.config.clone(),
            Arc::clone(&self.hub),
            Arc::clone(&self.api_key),
        );

        tokio::spawn(async move {
            // Held until the connection ends
            let _permit = permit;

            if let Err(e) = connection.run().await {
                tracing::debug!(
                    session_id = session_id,
                    error = %e,
                    "Connection error"
                );
            }

            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{LabelRenderer, ScriptedDevice};

    fn test_hub() -> Arc<BroadcastHub> {
        Arc::new(BroadcastHub::new(
            Box::new(ScriptedDevice::new(Vec::new())),
            Box::new(LabelRenderer::default()),
        ))
    }

    #[test]
    fn test_generated_key() {
        let server = StreamServer::with_hub(ServerConfig::default(), test_hub());
        assert!(server.api_key().is_well_formed());
    }

    #[test]
    fn test_configured_key_is_kept() {
        let config = ServerConfig::default().api_key(ApiKey::new("fixed"));
        let server = StreamServer::with_hub(config, test_hub());
        assert_eq!(server.api_key().as_str(), "fixed");
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let config = ServerConfig::with_addr("127.0.0.1:0".parse().unwrap());
        let server = StreamServer::with_hub(config, test_hub());
        let listener = server.bind().await.unwrap();

        server.serve(listener, async {}).await.unwrap();
        assert!(!server.hub().is_streaming());
    }
}
