//! wsgate Server
//!
//! RFC 6455 WebSocket server endpoint: one actor per accepted connection runs
//! the opening handshake and the framing protocol, and reports decoded
//! messages to a [`Handler`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wsgate_server::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> wsgate_core::Result<()> {
//!     let server = Server::builder()
//!         .bind("0.0.0.0:8080")?
//!         .max_connections(10_000)
//!         .build_with_handler(EchoHandler::new())?;
//!
//!     server.serve().await?;
//!
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

// Public modules
pub mod config;
pub mod connection;
pub mod handler;
pub mod logging;
pub mod server;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use config::{ConnectionConfig, ServerConfig};
pub use connection::{Connection, ConnectionHandle, ConnectionState};
pub use handler::{EchoHandler, Handler, LoggingHandler, SharedHandler};
pub use server::{Server, ServerBuilder};
