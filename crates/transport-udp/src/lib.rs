//! UDP transport implementation for courier
//!
//! A client opens an exchange by sending an empty datagram to the listener.
//! The listener answers with an empty datagram from a socket bound just for
//! that peer, and both sides then talk over that socket pair. Frames use the
//! same length prefix as every other transport and are split into datagrams of
//! at most [`DATAGRAM_SIZE`] bytes.
//!
//! Datagrams are not acknowledged, so a frame has to fit into the receive
//! buffer of the peer. Frames are capped at [`MAX_UDP_FRAME_SIZE`] whatever
//! the configuration asks for; a larger frame fails with
//! [`TransportError::FrameTooLarge`] before anything is sent.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod channel;

use async_trait::async_trait;
use bytes::Bytes;
use courier_transport::{
    ClientConnection, ExchangeState, Listener, Result, ServerConnection, Transport,
    TransportConfig, TransportError,
};
use parking_lot::RwLock;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::channel::DatagramChannel;

/// Largest datagram written by this transport.
pub const DATAGRAM_SIZE: usize = 2048;

/// Largest frame carried by this transport.
pub const MAX_UDP_FRAME_SIZE: usize = 64 * 1024;

/// Connectionless transport over UDP sockets.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    config: TransportConfig,
}

impl UdpTransport {
    /// Create a UDP transport with the given configuration.
    ///
    /// `max_frame_size` is lowered to [`MAX_UDP_FRAME_SIZE`] when it is larger.
    #[must_use]
    pub fn new(mut config: TransportConfig) -> Self {
        config.max_frame_size = config.max_frame_size.min(MAX_UDP_FRAME_SIZE);
        Self { config }
    }

    /// Configuration in force.
    #[must_use]
    pub const fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

const fn unspecified_for(addr: &SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

async fn bind(addr: SocketAddr) -> Result<UdpSocket> {
    UdpSocket::bind(addr)
        .await
        .map_err(|source| TransportError::BindFailed { addr, source })
}

#[async_trait]
impl Transport for UdpTransport {
    async fn connect(&self, endpoint: SocketAddr) -> Result<Box<dyn ClientConnection>> {
        let socket = bind(unspecified_for(&endpoint)).await?;
        socket
            .send_to(&[], endpoint)
            .await
            .map_err(|source| TransportError::ConnectFailed {
                addr: endpoint,
                source,
            })?;

        let mut reply = [0u8; DATAGRAM_SIZE];
        let (len, peer) = timeout(self.config.connect_timeout, socket.recv_from(&mut reply))
            .await
            .map_err(|_| TransportError::Timeout(self.config.connect_timeout))?
            .map_err(|source| TransportError::ConnectFailed {
                addr: endpoint,
                source,
            })?;
        if len != 0 {
            return Err(TransportError::Handshake(format!(
                "expected empty reply from {peer}, got {len} bytes"
            )));
        }
        socket.connect(peer).await?;

        debug!("Rendezvous with {} via {}", endpoint, peer);
        Ok(Box::new(UdpConnection::new(
            DatagramChannel::new(socket, peer, &self.config),
            ExchangeState::client(),
        )))
    }

    async fn listen(&self, endpoint: SocketAddr) -> Result<Arc<dyn Listener>> {
        let socket = bind(endpoint).await?;
        let local_addr = socket.local_addr()?;
        info!("UDP transport listening on {}", local_addr);

        Ok(Arc::new(UdpAcceptor {
            socket,
            local_addr,
            accept_timeout: RwLock::new(self.config.accept_timeout),
            config: self.config.clone(),
        }))
    }
}

/// Listening socket that performs the rendezvous for each new peer.
#[derive(Debug)]
pub struct UdpAcceptor {
    socket: UdpSocket,
    local_addr: SocketAddr,
    accept_timeout: RwLock<Duration>,
    config: TransportConfig,
}

#[async_trait]
impl Listener for UdpAcceptor {
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
        let mut datagram = [0u8; DATAGRAM_SIZE];
        let (len, peer) = timeout(wait, self.socket.recv_from(&mut datagram))
            .await
            .map_err(|_| TransportError::AcceptTimeout(wait))??;
        if len != 0 {
            warn!("Ignoring {} byte datagram from {} on listener", len, peer);
            return Err(TransportError::Handshake(format!(
                "expected empty greeting from {peer}, got {len} bytes"
            )));
        }

        let socket = bind(SocketAddr::new(self.local_addr.ip(), 0)).await?;
        socket.connect(peer).await?;
        socket.send(&[]).await?;

        debug!("Accepted rendezvous from {}", peer);
        Ok(Box::new(UdpConnection::new(
            DatagramChannel::new(socket, peer, &self.config),
            ExchangeState::server(),
        )))
    }
}

/// One end of a single UDP exchange.
#[derive(Debug)]
pub struct UdpConnection {
    channel: Option<DatagramChannel>,
    peer: SocketAddr,
    state: ExchangeState,
}

impl UdpConnection {
    fn new(channel: DatagramChannel, state: ExchangeState) -> Self {
        Self {
            peer: channel.peer(),
            channel: Some(channel),
            state,
        }
    }

    fn channel(&mut self) -> Result<&mut DatagramChannel> {
        self.channel
            .as_mut()
            .ok_or(TransportError::InvalidState("connection closed"))
    }

    async fn send_frame(&mut self, payload: Bytes) -> Result<()> {
        self.state.on_send()?;
        let result = self.channel()?.send(payload).await;
        if result.is_err() || self.state.is_closed() {
            self.state.abort();
            self.channel = None;
        }
        result
    }

    async fn receive_frame(&mut self) -> Result<Bytes> {
        self.state.on_receive()?;
        let result = self.channel()?.receive().await;
        if result.is_err() || self.state.is_closed() {
            self.state.abort();
            self.channel = None;
        }
        result
    }

    fn hang_up(&mut self) -> Result<()> {
        self.state.on_disconnect()?;
        self.channel = None;
        Ok(())
    }
}

#[async_trait]
impl ClientConnection for UdpConnection {
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
        self.hang_up()
    }
}

#[async_trait]
impl ServerConnection for UdpConnection {
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
        self.hang_up()
    }
}
