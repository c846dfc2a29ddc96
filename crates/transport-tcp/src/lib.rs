//! TCP transport implementation for courier
//!
//! Each exchange runs over its own TCP connection carrying one length-prefixed
//! frame in each direction.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use async_trait::async_trait;
use bytes::Bytes;
use courier_transport::{
    ClientConnection, ExchangeState, FrameCodec, Listener, Result, ServerConnection, Transport,
    TransportConfig, TransportError,
};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info};

/// Connection-oriented transport over TCP streams.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    config: TransportConfig,
}

impl TcpTransport {
    /// Create a TCP transport with the given configuration.
    #[must_use]
    pub const fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, endpoint: SocketAddr) -> Result<Box<dyn ClientConnection>> {
        let stream = timeout(self.config.connect_timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| TransportError::Timeout(self.config.connect_timeout))?
            .map_err(|source| TransportError::ConnectFailed {
                addr: endpoint,
                source,
            })?;
        stream.set_nodelay(true)?;

        debug!("Connected to {}", endpoint);
        Ok(Box::new(TcpConnection::new(
            stream,
            endpoint,
            ExchangeState::client(),
            &self.config,
        )))
    }

    async fn listen(&self, endpoint: SocketAddr) -> Result<Arc<dyn Listener>> {
        let listener = TcpListener::bind(endpoint)
            .await
            .map_err(|source| TransportError::BindFailed {
                addr: endpoint,
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("TCP transport listening on {}", local_addr);

        Ok(Arc::new(TcpAcceptor {
            listener,
            local_addr,
            accept_timeout: RwLock::new(self.config.accept_timeout),
            config: self.config.clone(),
        }))
    }
}

/// Listening socket handing out one [`TcpConnection`] per peer.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    accept_timeout: RwLock<Duration>,
    config: TransportConfig,
}

#[async_trait]
impl Listener for TcpAcceptor {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn accept_timeout(&self) -> Duration {
        *self.accept_timeout.read()
    }

    fn set_accept_timeout(&self, timeout: Duration) {
        *self.accept_timeout.write() = timeout;
    }

    async fn accept(&self) -> Result<Box<dyn ServerConnection>> {
        let wait = self.accept_timeout();
        let (stream, peer) = timeout(wait, self.listener.accept())
            .await
            .map_err(|_| TransportError::AcceptTimeout(wait))??;
        stream.set_nodelay(true)?;

        debug!("Accepted connection from {}", peer);
        Ok(Box::new(TcpConnection::new(
            stream,
            peer,
            ExchangeState::server(),
            &self.config,
        )))
    }
}

/// One end of a single TCP exchange.
#[derive(Debug)]
pub struct TcpConnection {
    framed: Option<Framed<TcpStream, FrameCodec>>,
    peer: SocketAddr,
    state: ExchangeState,
    io_timeout: Duration,
}

impl TcpConnection {
    fn new(
        stream: TcpStream,
        peer: SocketAddr,
        state: ExchangeState,
        config: &TransportConfig,
    ) -> Self {
        Self {
            framed: Some(Framed::new(stream, config.codec())),
            peer,
            state,
            io_timeout: config.io_timeout,
        }
    }

    async fn write_frame(&mut self, payload: Bytes) -> Result<()> {
        let io_timeout = self.io_timeout;
        let framed = self
            .framed
            .as_mut()
            .ok_or(TransportError::InvalidState("connection closed"))?;

        timeout(io_timeout, framed.send(payload))
            .await
            .map_err(|_| TransportError::Timeout(io_timeout))?
    }

    async fn read_frame(&mut self) -> Result<Bytes> {
        let io_timeout = self.io_timeout;
        let framed = self
            .framed
            .as_mut()
            .ok_or(TransportError::InvalidState("connection closed"))?;

        match timeout(io_timeout, framed.next()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout(io_timeout)),
        }
    }

    async fn close(&mut self) {
        if let Some(framed) = self.framed.take() {
            let mut stream = framed.into_inner();
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown of connection to {} failed: {}", self.peer, e);
            }
        }
    }

    async fn send_frame(&mut self, payload: Bytes) -> Result<()> {
        self.state.on_send()?;
        let result = self.write_frame(payload).await;
        if result.is_err() || self.state.is_closed() {
            self.state.abort();
            self.close().await;
        }
        result
    }

    async fn receive_frame(&mut self) -> Result<Bytes> {
        self.state.on_receive()?;
        let result = self.read_frame().await;
        if result.is_err() || self.state.is_closed() {
            self.state.abort();
            self.close().await;
        }
        result
    }

    async fn hang_up(&mut self) -> Result<()> {
        self.state.on_disconnect()?;
        self.close().await;
        Ok(())
    }
}

#[async_trait]
impl ClientConnection for TcpConnection {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn send(&mut self, payload: Bytes) -> Result<()> {
        self.send_frame(payload).await
    }

    async fn receive(&mut self) -> Result<Bytes> {
        self.receive_frame().await
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.hang_up().await
    }
}

#[async_trait]
impl ServerConnection for TcpConnection {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn receive(&mut self) -> Result<Bytes> {
        self.receive_frame().await
    }

    async fn send(&mut self, payload: Bytes) -> Result<()> {
        self.send_frame(payload).await
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.hang_up().await
    }
}
