//! # wsgate Core
//!
//! Socket-free building blocks of the wsgate WebSocket server endpoint:
//!
//! - Error taxonomy shared by every layer
//! - The masking engine (XOR with a cycling 4-byte key)
//! - Frame encoding and decoding, including an incremental parser
//! - The HTTP/1.1 opening handshake (request reader, validation, 101 response)
//! - Protocol constants and the transport stream abstraction

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

// Core modules
pub mod error;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod protocol;
pub mod transport;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use error::{Error, Result};
pub use frame::{decode, encode, Frame, FrameParser, LengthEncoding};
pub use handshake::{HandshakeHeaders, HandshakeProcessor};
pub use mask::apply_mask;
pub use protocol::Opcode;
pub use transport::{Transport, TransportStream};
