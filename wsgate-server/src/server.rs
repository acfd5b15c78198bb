//! WebSocket server implementation
//!
//! This module provides the accept loop that spawns one [`Connection`] actor
//! per accepted socket.

use crate::{
    config::ServerConfig,
    connection::{Connection, ConnectionHandle, ConnectionState},
    handler::{Handler, LoggingHandler, SharedHandler},
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use wsgate_core::error::ConfigError;
use wsgate_core::transport::{Transport, TransportStream};
use wsgate_core::{Error, Result};

/// WebSocket server
pub struct Server {
    config: ServerConfig,
    handler: SharedHandler,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("handler", &"<handler>")
            .finish()
    }
}

impl Server {
    /// Create a new server with the given config and handler
    pub fn new(config: ServerConfig, handler: SharedHandler) -> Self {
        Self { config, handler }
    }

    /// Create a server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind a TCP listener and serve until Ctrl-C
    #[cfg(feature = "tcp-transport")]
    pub async fn serve(self) -> Result<()> {
        self.serve_with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Bind a TCP listener and serve until `shutdown_signal` resolves
    #[cfg(feature = "tcp-transport")]
    pub async fn serve_with_graceful_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let transport = wsgate_transport_tcp::TcpTransport::bind(self.config.bind_address).await?;
        self.serve_on(transport, shutdown_signal).await
    }

    /// Accept connections from `transport` until `shutdown_signal` resolves.
    ///
    /// Once the signal fires, open connections are asked to close and given
    /// up to `shutdown_timeout` to finish.
    pub async fn serve_on<T, F>(self, transport: T, shutdown_signal: F) -> Result<()>
    where
        T: Transport,
        F: Future<Output = ()> + Send,
    {
        let connection_config = self.config.connection_config();
        let slots = Arc::new(Semaphore::new(self.config.max_connections));
        let mut live: Vec<ConnectionHandle> = Vec::new();
        let mut next_id = 0u64;

        info!(addr = %transport.local_addr()?, "WebSocket server listening");
        tokio::pin!(shutdown_signal);

        loop {
            let mut stream = tokio::select! {
                _ = &mut shutdown_signal => break,
                accepted = transport.accept() => match accepted {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let permit = match slots.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(remote = ?stream.remote_addr(), "connection limit reached, rejecting");
                    if let Err(e) = stream.close().await {
                        debug!(error = %e, "error closing rejected stream");
                    }
                    continue;
                }
            };

            next_id += 1;
            debug!(id = next_id, remote = ?stream.remote_addr(), "accepted connection");
            let connection = Connection::new(
                next_id,
                stream,
                self.handler.clone(),
                connection_config.clone(),
            );

            live.retain(|handle| handle.state() != ConnectionState::Closed);
            live.push(connection.handle());

            tokio::spawn(async move {
                #[cfg(feature = "metrics")]
                metrics::gauge!("wsgate_server_active_connections").increment(1.0);

                if let Err(e) = connection.run().await {
                    debug!(error = %e, "connection ended with error");
                }

                #[cfg(feature = "metrics")]
                metrics::gauge!("wsgate_server_active_connections").decrement(1.0);
                drop(permit);
            });
        }

        info!(open = live.len(), "shutting down");
        self.drain(live).await;
        Ok(())
    }

    async fn drain(&self, live: Vec<ConnectionHandle>) {
        for handle in &live {
            // Already closing or closed connections need nothing more
            let _ = handle.send_close();
        }

        let all_closed = async {
            for handle in &live {
                handle.closed().await;
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout, all_closed)
            .await
            .is_err()
        {
            warn!(
                timeout = ?self.config.shutdown_timeout,
                "connections still open after shutdown timeout"
            );
        }
    }
}

/// Server builder
#[derive(Debug, Clone)]
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    /// Create a new server builder
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Start from an existing configuration
    pub fn with_config(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Bind to the given address
    pub fn bind<A: std::net::ToSocketAddrs + std::fmt::Debug>(mut self, addr: A) -> Result<Self> {
        self.config.bind_address = addr.to_socket_addrs()?.next().ok_or_else(|| {
            Error::Config(ConfigError::InvalidValue {
                field: "bind_address".to_string(),
                value: format!("{:?}", addr),
            })
        })?;
        Ok(self)
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Set maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set maximum handshake request size
    pub fn max_handshake_size(mut self, size: usize) -> Self {
        self.config.max_handshake_size = size;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set the socket read size
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size;
        self
    }

    /// Set how long graceful shutdown waits for connections
    pub fn shutdown_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Build the server with the logging handler
    pub fn build(self) -> Result<Server> {
        self.build_with_handler(LoggingHandler::new())
    }

    /// Build the server with a custom handler
    pub fn build_with_handler<H>(self, handler: H) -> Result<Server>
    where
        H: Handler,
    {
        self.build_with_shared_handler(Arc::new(handler))
    }

    /// Build the server with a handler shared with other code
    pub fn build_with_shared_handler(self, handler: SharedHandler) -> Result<Server> {
        // Validate configuration
        self.config.validate()?;

        Ok(Server::new(self.config, handler))
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
