//! Server configuration
//!
//! This module provides configuration options for the WebSocket server.

use std::net::SocketAddr;
use std::time::Duration;
use wsgate_core::error::{ConfigError, Error};
use wsgate_core::protocol::constants::{
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_HANDSHAKE_SIZE,
    DEFAULT_READ_CHUNK_SIZE,
};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub bind_address: SocketAddr,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Maximum frame payload size in bytes
    pub max_frame_size: usize,
    /// Maximum size of the handshake request head in bytes
    pub max_handshake_size: usize,
    /// Handshake timeout
    pub handshake_timeout: Duration,
    /// Bytes requested per socket read
    pub read_chunk_size: usize,
    /// How long graceful shutdown waits for open connections to close
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 10_000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_handshake_size: DEFAULT_MAX_HANDSHAKE_SIZE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> wsgate_core::Result<()> {
        let positive = [
            ("max_connections", self.max_connections),
            ("max_frame_size", self.max_frame_size),
            ("max_handshake_size", self.max_handshake_size),
            ("read_chunk_size", self.read_chunk_size),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(Error::Config(ConfigError::Validation(format!(
                    "{} must be greater than 0",
                    field
                ))));
            }
        }

        if self.handshake_timeout.is_zero() {
            return Err(Error::Config(ConfigError::Validation(
                "handshake_timeout must be non-zero".to_string(),
            )));
        }

        Ok(())
    }

    /// Settings each connection actor needs
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            handshake_timeout: self.handshake_timeout,
            max_handshake_size: self.max_handshake_size,
            max_frame_size: self.max_frame_size,
            read_chunk_size: self.read_chunk_size,
        }
    }
}

/// Static per-connection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Time allowed for the client to send its request head
    pub handshake_timeout: Duration,
    /// Upper bound on the request head
    pub max_handshake_size: usize,
    /// Largest accepted frame payload
    pub max_frame_size: usize,
    /// Bytes requested per socket read
    pub read_chunk_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ServerConfig::default().connection_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_connections, 10_000);
        assert_eq!(config.bind_address.port(), 8080);
        assert_eq!(config.max_handshake_size, 8192);
    }

    #[test]
    fn test_server_config_validation() {
        let mut config = ServerConfig::default();
        config.max_connections = 0;
        assert!(config.validate().is_err());

        config.max_connections = 1000;
        config.max_frame_size = 0;
        assert!(config.validate().is_err());

        config.max_frame_size = 1024;
        config.handshake_timeout = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Validation(_))));
    }

    #[test]
    fn test_connection_config_projection() {
        let config = ServerConfig {
            max_frame_size: 64,
            read_chunk_size: 16,
            ..ServerConfig::default()
        };
        let conn = config.connection_config();
        assert_eq!(conn.max_frame_size, 64);
        assert_eq!(conn.read_chunk_size, 16);
        assert_eq!(conn.handshake_timeout, config.handshake_timeout);
        assert_eq!(ConnectionConfig::default().max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    }
}
