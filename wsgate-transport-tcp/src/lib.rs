//! TCP Transport for wsgate
//!
//! Plain TCP listener and stream types implementing the core
//! [`Transport`](wsgate_core::Transport) and
//! [`TransportStream`](wsgate_core::TransportStream) traits.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod tcp;

// Re-export TCP transport types
pub use tcp::{TcpStream, TcpTransport};

/// Prelude module
pub mod prelude {
    pub use crate::tcp::{TcpStream, TcpTransport};
    pub use wsgate_core::transport::{Transport, TransportStream};
}
