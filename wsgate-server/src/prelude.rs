//! Prelude module with common imports
//!
//! This module re-exports the most commonly used types and traits
//! from the wsgate-server crate for ergonomic imports.

// Server types
pub use crate::config::{ConnectionConfig, ServerConfig};
pub use crate::connection::{Connection, ConnectionHandle, ConnectionState};
pub use crate::handler::{EchoHandler, Handler, LoggingHandler, SharedHandler};
pub use crate::server::{Server, ServerBuilder};

// Re-export core types
pub use wsgate_core::prelude::*;
