//! UDP socket wrapper for STP
//!
//! Sockets are blocking with an optional read timeout. A read that times out
//! reports [`SocketError::TimedOut`] so callers can check for shutdown and
//! read again.

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Socket errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid socket address")]
    InvalidAddress,

    #[error("Socket is not connected to a peer")]
    NotConnected,

    #[error("Read timed out")]
    TimedOut,
}

impl SocketError {
    /// True for a read timeout, which callers treat as "nothing yet"
    pub fn is_timeout(&self) -> bool {
        matches!(self, SocketError::TimedOut)
    }
}

fn map_read_error(err: io::Error) -> SocketError {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => SocketError::TimedOut,
        _ => SocketError::Io(err),
    }
}

/// STP socket
///
/// A bound UDP socket, optionally connected to a single peer.
#[derive(Debug)]
pub struct StpSocket {
    inner: UdpSocket,
    peer: Option<SocketAddr>,
}

impl StpSocket {
    /// Create a socket bound to `addr`
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;

        let inner: UdpSocket = socket.into();
        debug!(local = ?inner.local_addr().ok(), "Socket bound");

        Ok(StpSocket { inner, peer: None })
    }

    /// Create a socket on an ephemeral local port, connected to `peer`
    pub fn connect(peer: SocketAddr) -> Result<Self, SocketError> {
        let local: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let mut socket = StpSocket::bind(local)?;
        socket.inner.connect(peer)?;
        socket.peer = Some(peer);
        Ok(socket)
    }

    /// Bound the time a read may block. `None` blocks indefinitely.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), SocketError> {
        self.inner.set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn read_timeout(&self) -> Result<Option<Duration>, SocketError> {
        Ok(self.inner.read_timeout()?)
    }

    /// Set the send buffer size
    pub fn set_send_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        SockRef::from(&self.inner).set_send_buffer_size(size)?;
        Ok(())
    }

    /// Set the receive buffer size
    pub fn set_recv_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        SockRef::from(&self.inner).set_recv_buffer_size(size)?;
        Ok(())
    }

    /// Get the receive buffer size
    pub fn recv_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(SockRef::from(&self.inner).recv_buffer_size()?)
    }

    /// Get the local address this socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.inner.local_addr()?)
    }

    /// Peer address, if connected
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Send a datagram to the connected peer
    pub fn send(&self, buf: &[u8]) -> Result<usize, SocketError> {
        if self.peer.is_none() {
            return Err(SocketError::NotConnected);
        }
        Ok(self.inner.send(buf)?)
    }

    /// Send a datagram to `target`
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        Ok(self.inner.send_to(buf, target)?)
    }

    /// Receive a datagram and its source address
    ///
    /// Returns [`SocketError::TimedOut`] when the read timeout passes first.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        self.inner.recv_from(buf).map_err(map_read_error)
    }

    /// Receive a datagram from the connected peer
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, SocketError> {
        if self.peer.is_none() {
            return Err(SocketError::NotConnected);
        }
        self.inner.recv(buf).map_err(map_read_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_socket_creation() {
        let socket = StpSocket::bind(loopback()).unwrap();
        let addr = socket.local_addr().unwrap();
        assert!(addr.port() > 0);
        assert!(socket.peer_addr().is_none());
    }

    #[test]
    fn test_socket_buffer_sizes() {
        let socket = StpSocket::bind(loopback()).unwrap();
        socket.set_send_buffer_size(262144).unwrap();
        socket.set_recv_buffer_size(262144).unwrap();

        // May not match exactly due to OS limits
        assert!(socket.recv_buffer_size().unwrap() > 0);
    }

    #[test]
    fn test_connected_send_recv() {
        let receiver = StpSocket::bind(loopback()).unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let sender = StpSocket::connect(receiver.local_addr().unwrap()).unwrap();

        sender.send(b"Hello, STP!").unwrap();

        let mut buf = [0u8; 64];
        let (n, from) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"Hello, STP!");

        // Reply to the learned source address
        receiver.send_to(b"ack", from).unwrap();
        sender.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let n = sender.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ack");
    }

    #[test]
    fn test_read_timeout() {
        let socket = StpSocket::bind(loopback()).unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(30)))
            .unwrap();

        let start = Instant::now();
        let mut buf = [0u8; 16];
        let err = socket.recv_from(&mut buf).unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_send_requires_peer() {
        let socket = StpSocket::bind(loopback()).unwrap();
        assert!(matches!(socket.send(b"x"), Err(SocketError::NotConnected)));
    }
}
