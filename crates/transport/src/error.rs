//! Error types for transports.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors raised by transport implementations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to reach the remote endpoint.
    #[error("Failed to connect to {addr}: {source}")]
    ConnectFailed {
        /// The endpoint we tried to reach.
        addr: SocketAddr,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Failed to bind a local endpoint.
    #[error("Failed to bind {addr}: {source}")]
    BindFailed {
        /// The endpoint we tried to bind.
        addr: SocketAddr,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// No peer arrived within the accept timeout.
    #[error("No connection accepted within {0:?}")]
    AcceptTimeout(Duration),

    /// A connect, send or receive did not complete in time.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The peer closed the connection before a full frame arrived.
    #[error("Connection closed by peer")]
    Closed,

    /// The handle was used out of order or after it was closed.
    #[error("Invalid connection state: {0}")]
    InvalidState(&'static str),

    /// Frame exceeds the configured maximum.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Size of the frame.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The connectionless rendezvous failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether this error only signals that the accept timeout elapsed.
    #[must_use]
    pub const fn is_accept_timeout(&self) -> bool {
        matches!(self, Self::AcceptTimeout(_))
    }

    /// Whether the frame was refused for its size; resending it cannot help.
    #[must_use]
    pub const fn is_frame_too_large(&self) -> bool {
        matches!(self, Self::FrameTooLarge { .. })
    }
}
