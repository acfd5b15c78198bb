//! WebSocket connection handlers
//!
//! A [`Handler`] receives notifications from connection actors. Notifications
//! for one connection arrive in order and are awaited before the next frame is
//! dispatched. Replies go through the [`ConnectionHandle`] passed with each
//! call; its send methods only enqueue, so a handler may reply from inside a
//! notification without blocking its own connection.

use crate::connection::ConnectionHandle;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Trait for handling WebSocket connections
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// The opening handshake completed
    async fn on_open(&self, _conn: &ConnectionHandle) {}

    /// A text frame arrived
    async fn on_text(&self, conn: &ConnectionHandle, payload: Bytes);

    /// A binary frame arrived
    async fn on_binary(&self, conn: &ConnectionHandle, payload: Bytes);

    /// The connection is gone. Called exactly once for every connection
    /// that reached the open state.
    async fn on_close(&self, conn: &ConnectionHandle);
}

/// Shared handler type
pub type SharedHandler = Arc<dyn Handler>;

/// Logs every notification and drops the payload
#[derive(Debug, Clone, Default)]
pub struct LoggingHandler;

impl LoggingHandler {
    /// Create a new logging handler
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Handler for LoggingHandler {
    async fn on_open(&self, conn: &ConnectionHandle) {
        tracing::info!(id = conn.id(), path = conn.path().unwrap_or("/"), "connection opened");
    }

    async fn on_text(&self, conn: &ConnectionHandle, payload: Bytes) {
        tracing::info!(
            id = conn.id(),
            text = %String::from_utf8_lossy(&payload),
            "text message"
        );
    }

    async fn on_binary(&self, conn: &ConnectionHandle, payload: Bytes) {
        tracing::info!(id = conn.id(), len = payload.len(), "binary message");
    }

    async fn on_close(&self, conn: &ConnectionHandle) {
        tracing::info!(id = conn.id(), "connection closed");
    }
}

/// Echo handler implementation
#[derive(Debug, Clone, Default)]
pub struct EchoHandler;

impl EchoHandler {
    /// Create a new echo handler
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Handler for EchoHandler {
    async fn on_text(&self, conn: &ConnectionHandle, payload: Bytes) {
        if let Err(e) = conn.send_text(payload) {
            tracing::debug!(id = conn.id(), error = %e, "echo dropped");
        }
    }

    async fn on_binary(&self, conn: &ConnectionHandle, payload: Bytes) {
        if let Err(e) = conn.send_binary(payload) {
            tracing::debug!(id = conn.id(), error = %e, "echo dropped");
        }
    }

    async fn on_close(&self, _conn: &ConnectionHandle) {}
}
