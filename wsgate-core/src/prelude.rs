//! Prelude module for wsgate Core
//!
//! This module re-exports commonly used types and traits to make them
//! easily accessible for users of the library.

pub use crate::error::{Error, FrameError, HandshakeError, Result};
pub use crate::frame::{decode, encode, Frame, FrameParser, LengthEncoding};
pub use crate::handshake::{compute_accept_key, HandshakeHeaders, HandshakeProcessor};
pub use crate::mask::{apply_mask, apply_mask_in_place};
pub use crate::protocol::Opcode;
pub use crate::transport::{Transport, TransportStream};

// Re-export commonly used external dependencies
pub use bytes::{Bytes, BytesMut};

#[cfg(feature = "tokio-runtime")]
pub use crate::transport::IoStream;
#[cfg(feature = "tokio-runtime")]
pub use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
