//! Transport abstraction for one-shot request/response exchanges.
//!
//! A transport moves exactly one framed message in each direction per
//! connection:
//! - the client connects, sends once, then either receives once (which closes
//!   the handle) or disconnects;
//! - the server accepts, receives once, then either sends once (which closes
//!   the handle) or disconnects.
//!
//! Concrete transports (TCP, UDP) live in separate crates.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod framing;

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub use error::{Result, TransportError};
pub use framing::{FrameCodec, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};

/// Configuration shared by transports.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Upper bound for establishing a connection.
    pub connect_timeout: Duration,
    /// Upper bound for a single send or receive.
    pub io_timeout: Duration,
    /// Maximum payload size of one frame.
    pub max_frame_size: usize,
    /// Initial accept timeout of new listeners.
    pub accept_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(30),
            max_frame_size: MAX_FRAME_SIZE,
            accept_timeout: Duration::from_millis(100),
        }
    }
}

impl TransportConfig {
    /// Set the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the send/receive timeout.
    #[must_use]
    pub const fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Set the maximum frame size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Frame codec configured for this transport.
    #[must_use]
    pub const fn codec(&self) -> FrameCodec {
        FrameCodec::new().with_max_frame_size(self.max_frame_size)
    }
}

/// Factory for client and server endpoints of one transport kind.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a client connection to `endpoint`.
    async fn connect(&self, endpoint: SocketAddr) -> Result<Box<dyn ClientConnection>>;

    /// Bind a listener on `endpoint`.
    async fn listen(&self, endpoint: SocketAddr) -> Result<Arc<dyn Listener>>;
}

/// Client half of a single exchange.
#[async_trait]
pub trait ClientConnection: Send {
    /// Remote endpoint.
    fn peer(&self) -> SocketAddr;

    /// Send the request frame. Only valid once, before [`receive`](Self::receive).
    async fn send(&mut self, payload: Bytes) -> Result<()>;

    /// Receive the reply frame and close the connection.
    async fn receive(&mut self) -> Result<Bytes>;

    /// Close without waiting for a reply.
    async fn disconnect(&mut self) -> Result<()>;
}

/// Accepts inbound exchanges.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Locally bound endpoint.
    fn local_addr(&self) -> SocketAddr;

    /// Current accept timeout.
    fn accept_timeout(&self) -> Duration;

    /// Change how long [`accept`](Self::accept) waits for a peer.
    fn set_accept_timeout(&self, timeout: Duration);

    /// Wait for the next peer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AcceptTimeout`] when nobody connects in time.
    async fn accept(&self) -> Result<Box<dyn ServerConnection>>;
}

/// Server half of a single exchange.
#[async_trait]
pub trait ServerConnection: Send {
    /// Remote endpoint.
    fn peer(&self) -> SocketAddr;

    /// Receive the request frame. Only valid once.
    async fn receive(&mut self) -> Result<Bytes>;

    /// Send the reply frame and close the connection.
    async fn send(&mut self, payload: Bytes) -> Result<()>;

    /// Close without replying.
    async fn disconnect(&mut self) -> Result<()>;
}

/// Which half of the exchange a handle drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends first, receives last.
    Client,
    /// Receives first, sends last.
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Halfway,
    Closed,
}

/// Ordering rules of a one-shot exchange, shared by transport implementations.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeState {
    role: Role,
    phase: Phase,
}

impl ExchangeState {
    /// State of a freshly connected client handle.
    #[must_use]
    pub const fn client() -> Self {
        Self {
            role: Role::Client,
            phase: Phase::Open,
        }
    }

    /// State of a freshly accepted server handle.
    #[must_use]
    pub const fn server() -> Self {
        Self {
            role: Role::Server,
            phase: Phase::Open,
        }
    }

    /// Whether the handle has been closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.phase, Phase::Closed)
    }

    /// Validate and record a send.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidState`] if a send is not allowed now.
    pub fn on_send(&mut self) -> Result<()> {
        self.phase = match (self.role, self.phase) {
            (_, Phase::Closed) => return Err(TransportError::InvalidState("send after close")),
            (Role::Client, Phase::Open) => Phase::Halfway,
            (Role::Client, Phase::Halfway) => {
                return Err(TransportError::InvalidState("request already sent"));
            }
            (Role::Server, Phase::Open) => {
                return Err(TransportError::InvalidState("reply before request"));
            }
            (Role::Server, Phase::Halfway) => Phase::Closed,
        };
        Ok(())
    }

    /// Validate and record a receive.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidState`] if a receive is not allowed now.
    pub fn on_receive(&mut self) -> Result<()> {
        self.phase = match (self.role, self.phase) {
            (_, Phase::Closed) => {
                return Err(TransportError::InvalidState("receive after close"));
            }
            (Role::Client, Phase::Open) => {
                return Err(TransportError::InvalidState("receive before send"));
            }
            (Role::Client, Phase::Halfway) => Phase::Closed,
            (Role::Server, Phase::Open) => Phase::Halfway,
            (Role::Server, Phase::Halfway) => {
                return Err(TransportError::InvalidState("request already received"));
            }
        };
        Ok(())
    }

    /// Validate and record an explicit disconnect.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidState`] if the handle is already closed.
    pub fn on_disconnect(&mut self) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::InvalidState("disconnect after close"));
        }
        self.phase = Phase::Closed;
        Ok(())
    }

    /// Mark the handle closed after a failed I/O step.
    pub const fn abort(&mut self) {
        self.phase = Phase::Closed;
    }
}
