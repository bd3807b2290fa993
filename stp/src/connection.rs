//! Connection state, errors and the datagram link shared by both ends

use std::fmt;
use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use stp_io::{SocketError, StpSocket};
use stp_protocol::{Segment, WindowError};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Largest datagram a link will read
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection
    Closed,
    /// SYN sent, waiting for SYN|ACK
    SynSent,
    /// SYN received and answered, waiting for ACK
    SynReceived,
    /// Handshake complete, data flowing
    Established,
    /// Teardown in progress
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Closed => "CLOSED",
            ConnectionState::SynSent => "SYN-SENT",
            ConnectionState::SynReceived => "SYN-RECEIVED",
            ConnectionState::Established => "ESTABLISHED",
            ConnectionState::Closing => "CLOSING",
        };
        f.write_str(name)
    }
}

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connection is not in the correct state")]
    InvalidState,

    #[error("Connection is closed")]
    Closed,

    #[error("Timed out waiting for {0}")]
    HandshakeTimeout(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("Window error: {0}")]
    Window(WindowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<WindowError> for ConnectionError {
    fn from(err: WindowError) -> Self {
        match err {
            WindowError::Closed => ConnectionError::Closed,
            other => ConnectionError::Window(other),
        }
    }
}

/// A socket paired with the one peer it talks to
pub(crate) struct Link {
    socket: StpSocket,
    peer: SocketAddr,
}

impl Link {
    pub(crate) fn new(socket: StpSocket, peer: SocketAddr) -> Self {
        Link { socket, peer }
    }

    /// Same socket, talking to `peer` instead
    pub(crate) fn with_peer(self, peer: SocketAddr) -> Self {
        Link { peer, ..self }
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.socket.local_addr()
    }

    /// Encode and send one segment to the peer
    pub(crate) fn send(&self, segment: &Segment) -> Result<(), SocketError> {
        let bytes = segment.to_bytes();
        trace!(%segment, peer = %self.peer, "Sending segment");
        if self.socket.peer_addr().is_some() {
            self.socket.send(&bytes)?;
        } else {
            self.socket.send_to(&bytes, self.peer)?;
        }
        Ok(())
    }

    /// Read one segment
    ///
    /// Returns `Ok(None)` when the read timed out or the datagram could not
    /// be decoded. The checksum is not checked here.
    pub(crate) fn recv(
        &self,
        buf: &mut [u8],
    ) -> Result<Option<(Segment, SocketAddr)>, SocketError> {
        let (n, from) = match self.socket.recv_from(buf) {
            Ok(received) => received,
            Err(SocketError::TimedOut) => return Ok(None),
            Err(e) => return Err(e),
        };

        match Segment::from_bytes(&buf[..n]) {
            Ok(segment) => {
                trace!(%segment, %from, "Received segment");
                Ok(Some((segment, from)))
            }
            Err(e) => {
                warn!(%from, error = %e, "Discarding undecodable datagram");
                Ok(None)
            }
        }
    }

    /// Wait until `deadline` for a valid segment that `accept` approves
    ///
    /// Anything else that arrives in the meantime is ignored.
    pub(crate) fn await_segment<F>(
        &self,
        buf: &mut [u8],
        deadline: Instant,
        expecting: &'static str,
        mut accept: F,
    ) -> Result<(Segment, SocketAddr), ConnectionError>
    where
        F: FnMut(&Segment, SocketAddr) -> bool,
    {
        loop {
            if Instant::now() >= deadline {
                return Err(ConnectionError::HandshakeTimeout(expecting));
            }

            let (segment, from) = match self.recv(buf) {
                Ok(Some(received)) => received,
                Ok(None) => continue,
                // Connected UDP sockets surface ICMP errors on read
                Err(SocketError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    debug!(expecting, "Peer unreachable, still waiting");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if !segment.is_valid() {
                warn!(%segment, expecting, "Ignoring corrupted segment");
            } else if accept(&segment, from) {
                return Ok((segment, from));
            } else {
                warn!(%segment, %from, expecting, "Ignoring unexpected segment");
            }
        }
    }
}

/// Spawn a named stage thread
pub(crate) fn spawn_stage<F>(name: &'static str, stage: F) -> Result<JoinHandle<()>, ConnectionError>
where
    F: FnOnce() + Send + 'static,
{
    let handle = thread::Builder::new()
        .name(format!("stp-{}", name))
        .spawn(move || {
            debug!(stage = name, "Stage started");
            stage();
            debug!(stage = name, "Stage stopped");
        })?;
    Ok(handle)
}

/// Join every stage thread, reporting any that panicked
pub(crate) fn join_stages(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let name = handle.thread().name().unwrap_or("stage").to_string();
        if handle.join().is_err() {
            warn!(stage = %name, "Stage panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use stp_protocol::Flags;

    fn link_pair() -> (Link, Link) {
        let a = StpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let b = StpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        a.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        b.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let (a_addr, b_addr) = (a.local_addr().unwrap(), b.local_addr().unwrap());
        (Link::new(a, b_addr), Link::new(b, a_addr))
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::SynSent.to_string(), "SYN-SENT");
        assert_eq!(ConnectionState::Established.to_string(), "ESTABLISHED");
    }

    #[test]
    fn test_window_closed_maps_to_closed() {
        let err: ConnectionError = WindowError::Closed.into();
        assert!(matches!(err, ConnectionError::Closed));
    }

    #[test]
    fn test_send_recv_segment() {
        let (a, b) = link_pair();
        let segment = Segment::data(1, 1, 1000, b"hello");
        a.send(&segment).unwrap();

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let deadline = Instant::now() + Duration::from_secs(2);
        let (received, from) = b
            .await_segment(&mut buf, deadline, "data", |_, _| true)
            .unwrap();
        assert_eq!(received, segment);
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[test]
    fn test_await_skips_unexpected() {
        let (a, b) = link_pair();
        a.send(&Segment::control(0, 0, 0, Flags::ACK)).unwrap();
        a.send(&Segment::data(1, 1, 0, b"x").corrupted()).unwrap();
        a.send(&Segment::control(0, 0, 1000, Flags::SYN)).unwrap();

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let deadline = Instant::now() + Duration::from_secs(2);
        let (syn, _) = b
            .await_segment(&mut buf, deadline, "SYN", |s, _| s.has_flags(Flags::SYN))
            .unwrap();
        assert_eq!(syn.window(), 1000);
    }

    #[test]
    fn test_await_times_out() {
        let (_a, b) = link_pair();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let deadline = Instant::now() + Duration::from_millis(60);
        let result = b.await_segment(&mut buf, deadline, "SYN", |_, _| true);
        assert!(matches!(result, Err(ConnectionError::HandshakeTimeout("SYN"))));
    }
}
