//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::packet::Datagram`] instead of raw bytes and enforces the fixed
//! receive-buffer capacity on both directions.  All protocol logic lives
//! elsewhere; this module owns only byte I/O.

use std::io::ErrorKind;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::packet::{Datagram, PacketError};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The datagram could not be framed or parsed.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),
}

/// I/O errors worth retrying on the next call rather than tearing down the
/// endpoint (e.g. an ICMP port-unreachable reported on a later `recv`).
pub fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    )
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// An async, datagram-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared across the inbound
/// and outbound tasks behind an `Arc`.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    /// Largest datagram accepted in either direction.
    capacity: usize,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr` with a `capacity`-byte receive buffer.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr, capacity: usize) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            capacity,
            inner,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Encode `datagram` and send it to `dest`.
    pub async fn send_to(&self, datagram: &Datagram, dest: SocketAddr) -> Result<(), SocketError> {
        self.send_raw(&datagram.encode(), dest).await
    }

    /// Send pre-encoded bytes (e.g. the rendezvous message) to `dest`.
    pub async fn send_raw(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        if bytes.len() > self.capacity {
            return Err(PacketError::TooLarge {
                len: bytes.len(),
                capacity: self.capacity,
            }
            .into());
        }
        self.inner.send_to(bytes, dest).await?;
        Ok(())
    }

    /// Receive the next datagram as raw bytes.
    ///
    /// A datagram longer than the capacity is rejected with
    /// [`PacketError::TooLarge`] rather than handed back truncated.
    pub async fn recv_raw(&self) -> Result<(Vec<u8>, SocketAddr), SocketError> {
        let (bytes, addr) = self.recv_bounded().await?;
        Ok((bytes?, addr))
    }

    /// Receive the next datagram and decode it.
    ///
    /// The outer `Result` reports transport failures; the inner one reports a
    /// datagram that arrived but was oversized or failed to parse, so the
    /// caller can log it and keep reading.
    pub async fn recv_from(
        &self,
    ) -> Result<(Result<Datagram, PacketError>, SocketAddr), SocketError> {
        let (bytes, addr) = self.recv_bounded().await?;
        Ok((bytes.and_then(|b| Datagram::decode(&b)), addr))
    }

    /// One spare byte past the capacity tells an exact fit from a datagram
    /// the OS would otherwise truncate silently.  `len` in the resulting
    /// `TooLarge` is therefore a lower bound.
    async fn recv_bounded(
        &self,
    ) -> Result<(Result<Vec<u8>, PacketError>, SocketAddr), SocketError> {
        let mut buf = vec![0u8; self.capacity + 1];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        if n > self.capacity {
            return Ok((
                Err(PacketError::TooLarge {
                    len: n,
                    capacity: self.capacity,
                }),
                addr,
            ));
        }
        buf.truncate(n);
        Ok((Ok(buf), addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Ack, Packet};

    async fn loopback(capacity: usize) -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap(), capacity)
            .await
            .expect("bind")
    }

    #[tokio::test]
    async fn datagram_crosses_loopback() {
        let a = loopback(1024).await;
        let b = loopback(1024).await;

        a.send_to(&Datagram::Data(Packet::new(3, b"xyz".to_vec())), b.local_addr)
            .await
            .unwrap();
        let (d, from) = b.recv_from().await.unwrap();
        assert_eq!(d, Ok(Datagram::Data(Packet::new(3, b"xyz".to_vec()))));
        assert_eq!(from, a.local_addr);

        b.send_to(&Datagram::Ack(Ack::new(3)), a.local_addr).await.unwrap();
        let (d, _) = a.recv_from().await.unwrap();
        assert_eq!(d, Ok(Datagram::Ack(Ack::new(3))));
    }

    #[tokio::test]
    async fn malformed_datagram_is_inner_error() {
        let a = loopback(1024).await;
        let b = loopback(1024).await;
        a.send_raw(b"not a packet", b.local_addr).await.unwrap();
        let (d, _) = b.recv_from().await.unwrap();
        assert!(matches!(d, Err(PacketError::Malformed(_))));
    }

    #[tokio::test]
    async fn oversized_datagram_rejected_not_truncated() {
        let small = loopback(8).await;
        let big = loopback(1024).await;

        big.send_raw(b"0:abcdefghij", small.local_addr).await.unwrap();
        let (d, from) = small.recv_from().await.unwrap();
        assert_eq!(d, Err(PacketError::TooLarge { len: 9, capacity: 8 }));
        assert_eq!(from, big.local_addr);

        // An exact fit still decodes.
        big.send_raw(b"0:abcdef", small.local_addr).await.unwrap();
        let (d, _) = small.recv_from().await.unwrap();
        assert_eq!(d, Ok(Datagram::Data(Packet::new(0, b"abcdef".to_vec()))));
    }

    #[tokio::test]
    async fn oversized_raw_receive_is_an_error() {
        let small = loopback(4).await;
        let big = loopback(1024).await;
        big.send_raw(b"Client connected", small.local_addr).await.unwrap();
        let err = small.recv_raw().await.unwrap_err();
        assert!(matches!(
            err,
            SocketError::Packet(PacketError::TooLarge { capacity: 4, .. })
        ));
    }

    #[test]
    fn transient_error_kinds() {
        use std::io::Error;
        assert!(is_transient(&Error::from(ErrorKind::ConnectionReset)));
        assert!(is_transient(&Error::from(ErrorKind::Interrupted)));
        assert!(!is_transient(&Error::from(ErrorKind::AddrInUse)));
    }

    #[tokio::test]
    async fn oversized_send_rejected() {
        let a = loopback(8).await;
        let err = a
            .send_raw(b"0123456789", a.local_addr)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SocketError::Packet(PacketError::TooLarge { len: 10, capacity: 8 })
        ));
    }
}
