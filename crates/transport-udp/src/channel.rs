//! Length-framed byte stream carried over a connected datagram socket.

use bytes::{Bytes, BytesMut};
use courier_transport::{FrameCodec, Result, TransportConfig, TransportError};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::DATAGRAM_SIZE;

/// Datagrams written before yielding to the runtime.
const BURST: usize = 8;

#[derive(Debug)]
pub(crate) struct DatagramChannel {
    socket: UdpSocket,
    peer: SocketAddr,
    codec: FrameCodec,
    buffer: BytesMut,
    io_timeout: Duration,
}

impl DatagramChannel {
    pub(crate) fn new(socket: UdpSocket, peer: SocketAddr, config: &TransportConfig) -> Self {
        Self {
            socket,
            peer,
            codec: config.codec(),
            buffer: BytesMut::new(),
            io_timeout: config.io_timeout,
        }
    }

    pub(crate) const fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) async fn send(&mut self, payload: Bytes) -> Result<()> {
        let mut encoded = BytesMut::new();
        self.codec.encode(payload, &mut encoded)?;

        for (index, chunk) in encoded.chunks(DATAGRAM_SIZE).enumerate() {
            if index > 0 && index % BURST == 0 {
                tokio::task::yield_now().await;
            }
            timeout(self.io_timeout, self.socket.send(chunk))
                .await
                .map_err(|_| TransportError::Timeout(self.io_timeout))??;
        }
        trace!("Sent {} bytes to {}", encoded.len(), self.peer);

        Ok(())
    }

    pub(crate) async fn receive(&mut self) -> Result<Bytes> {
        let mut datagram = [0u8; DATAGRAM_SIZE];
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buffer)? {
                trace!("Received {} byte frame from {}", frame.len(), self.peer);
                return Ok(frame);
            }

            let len = timeout(self.io_timeout, self.socket.recv(&mut datagram))
                .await
                .map_err(|_| TransportError::Timeout(self.io_timeout))??;
            self.buffer.extend_from_slice(&datagram[..len]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pair() -> (DatagramChannel, DatagramChannel) {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let a_addr = a.local_addr().unwrap();
        let b_addr = b.local_addr().unwrap();
        a.connect(b_addr).await.unwrap();
        b.connect(a_addr).await.unwrap();

        let config = crate::UdpTransport::default().config().clone();
        (
            DatagramChannel::new(a, b_addr, &config),
            DatagramChannel::new(b, a_addr, &config),
        )
    }

    #[tokio::test]
    async fn test_small_frame() {
        let (mut a, mut b) = pair().await;

        a.send(Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(b.receive().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_frame_spanning_many_datagrams() {
        let (mut a, mut b) = pair().await;
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let receiver = tokio::spawn(async move { b.receive().await.unwrap() });
        a.send(Bytes::from(payload.clone())).await.unwrap();

        assert_eq!(receiver.await.unwrap(), Bytes::from(payload));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_refused_before_sending() {
        let (mut a, mut b) = pair().await;
        let limit = a.codec.max_frame_size();

        let err = a.send(Bytes::from(vec![0u8; limit + 1])).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { max, .. } if max == limit));

        // Nothing reached the peer, so the next frame arrives intact
        a.send(Bytes::from_static(b"after")).await.unwrap();
        assert_eq!(b.receive().await.unwrap(), Bytes::from_static(b"after"));
    }
}
