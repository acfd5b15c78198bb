//! Error types for wsgate
//!
//! This module defines the error taxonomy used throughout the workspace.
//! Protocol-level failures (handshake, malformed frame, transport) terminate
//! the connection they occur on; send-time failures only fail the request.

#![allow(missing_docs)]

use crate::handshake::HandshakeHeaders;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for wsgate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for wsgate operations
#[derive(Error, Debug)]
pub enum Error {
    /// The opening handshake was malformed or rejected
    #[error("Handshake failed: {0}")]
    HandshakeFailed(#[from] HandshakeError),

    /// A frame could not be decoded
    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),

    /// Encode requested for a payload longer than a 64-bit extended length allows
    #[error("Unrepresentable payload length: {len} bytes")]
    UnrepresentableLength { len: usize },

    /// The peer closed the underlying stream
    #[error("Transport closed by peer")]
    TransportClosed,

    /// The underlying stream failed
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// An operation did not finish in time
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Send attempted while the connection is shutting down
    #[error("Connection is closing")]
    ConnectionClosing,

    /// Operation attempted on a closed connection
    #[error("Connection closed")]
    ConnectionClosed,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// True when a frame decode stopped only because more bytes are needed.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Error::MalformedFrame(FrameError::Incomplete { .. }))
    }

    /// True for errors that end the connection they occurred on.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Error::HandshakeFailed(_)
                | Error::MalformedFrame(_)
                | Error::TransportClosed
                | Error::Transport(_)
                | Error::Timeout(_)
        )
    }
}

/// Frame decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer ends before the frame does
    #[error("Incomplete frame: need {needed} bytes, have {have}")]
    Incomplete { needed: usize, have: usize },

    /// Opcode outside the six defined values
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// RSV1, RSV2 or RSV3 set without a negotiated extension
    #[error("Reserved bits set in frame")]
    ReservedBitsSet,

    /// Client frame arrived without a masking key
    #[error("Client frame is not masked")]
    Unmasked,

    /// 64-bit length with the most significant bit set
    #[error("Invalid 64-bit payload length: {0}")]
    InvalidLength(u64),

    /// Frame larger than the configured maximum
    #[error("Frame too large: {size} bytes (max: {max})")]
    TooLarge { size: u64, max: usize },

    /// Control frame with FIN cleared
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload above 125 bytes
    #[error("Control frame payload too large: {0} bytes")]
    ControlFrameTooLarge(usize),
}

/// Opening handshake failure, with whatever had been read for diagnostics
#[derive(Error, Debug, Clone)]
#[error("{kind}")]
pub struct HandshakeError {
    /// What went wrong
    pub kind: HandshakeErrorKind,
    /// Request line and headers accumulated before the failure
    pub headers: HandshakeHeaders,
    /// The offending input line, if the failure came from one
    pub input: Option<String>,
}

impl HandshakeError {
    /// Create an error carrying the headers read so far
    pub fn new(kind: HandshakeErrorKind, headers: HandshakeHeaders) -> Self {
        Self {
            kind,
            headers,
            input: None,
        }
    }

    /// Attach the offending input
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }
}

/// Handshake failure reasons
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeErrorKind {
    /// First line is not `METHOD PATH VERSION`
    #[error("Malformed request line")]
    MalformedRequestLine,

    /// Header line without a `:` separator or with an empty name
    #[error("Malformed header line")]
    MalformedHeader,

    /// Request head exceeded the size bound
    #[error("Handshake request exceeds {max} bytes")]
    TooLarge { max: usize },

    /// Stream ended before the blank line
    #[error("Handshake request ended before the end of headers")]
    Incomplete,

    /// Upgrade requests must be GET
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// Required header absent
    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    /// Required header present with the wrong value
    #[error("Invalid header value for {header}: {value}")]
    InvalidHeaderValue { header: &'static str, value: String },
}

/// Configuration errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}
