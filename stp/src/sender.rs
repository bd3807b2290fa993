//! STP sending end
//!
//! After the handshake the sender runs five stage threads:
//!
//! - dispatch: takes segments from the dispatch queue, starts RTT samples,
//!   arms the timer and forwards each segment to the emulator
//! - transmit: writes the emulator's output to the socket
//! - ack-receive: reads the socket into the ACK queue
//! - ack-handle: slides the window on new ACKs and fast retransmits on the
//!   third duplicate
//! - timer: runs the retransmission countdown and resends the window base
//!   when it elapses
//!
//! The application's [`Sender::send`] buffers data in the window (blocking
//! while it is full) and enqueues it for dispatch.

use crate::config::SenderConfig;
use crate::connection::{
    join_stages, spawn_stage, ConnectionError, ConnectionState, Link, MAX_DATAGRAM_SIZE,
};
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use stp_io::{SocketError, StpSocket};
use stp_protocol::{
    Countdown, DupAckTracker, Event, EventSink, Flags, Outgoing, Pld, Queue, Retransmit,
    RtoTimer, Segment, SendWindow, Shutdown,
};
use tracing::{debug, info, trace, warn};

/// State shared by the stage threads
struct SenderShared {
    link: Link,
    window: SendWindow,
    timer: RtoTimer,
    pld: Pld,
    /// Segments waiting to go through the emulator, retransmissions included
    dispatch: Queue<Outgoing>,
    /// Emulator output, waiting for the socket
    transmit: Arc<Queue<Segment>>,
    /// ACKs read from the socket
    acks: Queue<Segment>,
    shutdown: Shutdown,
    sink: Arc<dyn EventSink>,
}

impl SenderShared {
    /// Send a control segment directly, bypassing the emulator
    fn send_control(&self, segment: &Segment) -> Result<(), ConnectionError> {
        self.sink.record(Event::sent(), segment);
        self.link.send(segment)?;
        Ok(())
    }

    fn run_dispatch(&self) {
        while let Some(outgoing) = self.dispatch.dequeue_until(&self.shutdown) {
            let segment = &outgoing.segment;
            if self.window.mark_sent(segment) && !self.timer.is_sampling() {
                trace!(seq = segment.seq_no(), "Sampling RTT");
                self.timer.start_sample(segment.seq_no(), segment.data_length());
            }

            self.timer.arm();
            self.pld.forward(outgoing);
        }
    }

    fn run_transmit(&self) {
        while let Some(segment) = self.transmit.dequeue_until(&self.shutdown) {
            if let Err(e) = self.link.send(&segment) {
                warn!(%segment, error = %e, "Failed to transmit segment");
            }
        }
    }

    fn run_ack_receive(&self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        while !self.shutdown.is_triggered() {
            match self.link.recv(&mut buf) {
                Ok(Some((segment, _))) => self.acks.enqueue(segment),
                Ok(None) => {}
                Err(SocketError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    debug!("Peer unreachable");
                }
                Err(e) => warn!(error = %e, "Failed to read from socket"),
            }
        }
    }

    fn run_ack_handle(&self) {
        let mut dup_acks = DupAckTracker::new();

        while let Some(ack) = self.acks.dequeue_until(&self.shutdown) {
            if !ack.is_valid() || !ack.has_flags(Flags::ACK) {
                warn!(segment = %ack, "Ignoring non-ACK segment");
                continue;
            }

            let ack_no = ack.ack_no();
            let send_base = self.window.send_base();

            if ack_no > send_base {
                if let Some(rtt) = self.timer.stop_sample_if_acked(ack_no) {
                    trace!(?rtt, rto = ?self.timer.rto(), "RTT sample taken");
                }
                dup_acks.on_new_ack(ack_no);
                self.timer.cancel();
                self.sink.record(Event::received(), &ack);

                if self.window.slide(ack_no) {
                    self.timer.arm();
                }
            } else {
                self.sink.record(Event::received().duplicate_ack(), &ack);

                // ACKs below the window are stale
                if ack_no == send_base && dup_acks.on_duplicate(ack_no) {
                    self.timer.cancel_sample();
                    match self.window.segment_with_seq(ack_no) {
                        Some(segment) => {
                            debug!(seq = ack_no, "Fast retransmit");
                            self.dispatch
                                .enqueue(Outgoing::retransmission(segment, Retransmit::Fast));
                        }
                        None => debug!(seq = ack_no, "Fast retransmit target already acknowledged"),
                    }
                }
            }
        }
    }

    fn run_timer(&self) {
        while self.timer.wait_armed() {
            if self.timer.start_countdown() != Countdown::Elapsed {
                continue;
            }

            if let Some(base) = self.window.base_segment() {
                debug!(seq = base.seq_no(), rto = ?self.timer.rto(), "Retransmission timeout");
                self.timer.cancel_sample();
                self.dispatch
                    .enqueue(Outgoing::retransmission(base, Retransmit::Timeout));
                self.timer.arm();
            }
        }
    }

    /// Signal every stage to stop
    fn stop(&self) {
        self.shutdown.trigger();
        self.timer.close();
        self.window.close();
        self.pld.close();
    }
}

/// The sending end of an STP connection
pub struct Sender {
    state: RwLock<ConnectionState>,
    shared: Arc<SenderShared>,
    stages: Mutex<Vec<JoinHandle<()>>>,
    config: SenderConfig,
}

impl Sender {
    /// Open a connection over `socket`, which must be connected to the receiver
    ///
    /// Performs the three-way handshake and starts the stage threads.
    pub fn connect(
        socket: StpSocket,
        config: SenderConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ConnectionError> {
        config.validate()?;
        let peer = socket.peer_addr().ok_or(SocketError::NotConnected)?;
        socket.set_read_timeout(Some(config.poll_interval))?;

        let transmit = Arc::new(Queue::new());
        let pld = Pld::new(config.pld.clone(), transmit.clone(), sink.clone())?;
        let shared = Arc::new(SenderShared {
            link: Link::new(socket, peer),
            window: SendWindow::new(config.mws, config.mss),
            timer: RtoTimer::new(config.gamma),
            pld,
            dispatch: Queue::new(),
            transmit,
            acks: Queue::new(),
            shutdown: Shutdown::new(),
            sink,
        });

        let sender = Sender {
            state: RwLock::new(ConnectionState::Closed),
            shared,
            stages: Mutex::new(Vec::new()),
            config,
        };
        sender.handshake()?;
        sender.start_stages()?;
        Ok(sender)
    }

    fn handshake(&self) -> Result<(), ConnectionError> {
        let shared = &self.shared;
        let mws = self.config.mws;
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let deadline = Instant::now() + self.config.handshake_timeout;

        shared.send_control(&Segment::control(0, 0, mws, Flags::SYN))?;
        self.set_state(ConnectionState::SynSent);

        let (syn_ack, _) = shared.link.await_segment(&mut buf, deadline, "SYN|ACK", |s, _| {
            s.has_flags(Flags::SYN | Flags::ACK) && s.ack_no() == 1
        })?;
        shared.sink.record(Event::received(), &syn_ack);

        shared.send_control(&Segment::control(1, 1, mws, Flags::ACK))?;
        self.set_state(ConnectionState::Established);
        info!(peer = %shared.link.peer(), mws, mss = self.config.mss, "Connection established");
        Ok(())
    }

    fn start_stages(&self) -> Result<(), ConnectionError> {
        let mut stages = self.stages.lock();
        let stage_fns: [(&'static str, fn(&SenderShared)); 5] = [
            ("transmit", SenderShared::run_transmit),
            ("dispatch", SenderShared::run_dispatch),
            ("ack-receive", SenderShared::run_ack_receive),
            ("ack-handle", SenderShared::run_ack_handle),
            ("timer", SenderShared::run_timer),
        ];
        for (name, run) in stage_fns {
            let shared = self.shared.clone();
            match spawn_stage(name, move || run(&shared)) {
                Ok(handle) => stages.push(handle),
                Err(e) => {
                    self.shared.stop();
                    join_stages(stages.drain(..).collect());
                    self.set_state(ConnectionState::Closed);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.write();
        if *current != state {
            debug!(from = %*current, to = %state, "Sender state change");
            *current = state;
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.link.peer()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ConnectionError> {
        Ok(self.shared.link.local_addr()?)
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Current retransmission timeout
    pub fn rto(&self) -> Duration {
        self.shared.timer.rto()
    }

    /// Number of unacknowledged segments
    pub fn in_flight(&self) -> usize {
        self.shared.window.in_flight()
    }

    /// Queue `data` for reliable delivery
    ///
    /// The data is split into segments of at most MSS bytes. Blocks while the
    /// window is full. Returns the number of bytes accepted.
    pub fn send(&self, data: &[u8]) -> Result<usize, ConnectionError> {
        if self.state() != ConnectionState::Established {
            return Err(ConnectionError::InvalidState);
        }

        let shared = &self.shared;
        for chunk in data.chunks(self.config.mss as usize) {
            let segment = shared.window.buffer(chunk)?;
            shared.sink.record_payload(chunk.len());
            shared.dispatch.enqueue(Outgoing::new(segment));
        }
        Ok(data.len())
    }

    /// Close the connection
    ///
    /// Waits until every byte has been acknowledged, stops the stages, then
    /// performs the FIN exchange with the receiver.
    pub fn close(&self) -> Result<(), ConnectionError> {
        match self.state() {
            ConnectionState::Established => {}
            ConnectionState::Closed => return Ok(()),
            _ => return Err(ConnectionError::InvalidState),
        }
        self.set_state(ConnectionState::Closing);

        let shared = &self.shared;
        if !shared.window.wait_drained() {
            return Err(ConnectionError::Closed);
        }
        debug!(next_seq = shared.window.next_seq_no(), "Window drained");

        shared.stop();
        join_stages(self.stages.lock().drain(..).collect());

        let result = self.teardown();
        self.set_state(ConnectionState::Closed);
        if result.is_ok() {
            info!(peer = %shared.link.peer(), "Connection closed");
        }
        result
    }

    fn teardown(&self) -> Result<(), ConnectionError> {
        let shared = &self.shared;
        let mws = self.config.mws;
        let fin_seq = shared.window.next_seq_no();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let deadline = Instant::now() + self.config.handshake_timeout;

        shared.send_control(&Segment::control(fin_seq, 1, mws, Flags::FIN))?;

        // The ACK of our FIN and the receiver's FIN may arrive in either order
        let mut fin_acked = false;
        let mut peer_fin = false;
        while !(fin_acked && peer_fin) {
            let (segment, _) = shared.link.await_segment(&mut buf, deadline, "FIN", |s, _| {
                let acks_fin = s.has_flags(Flags::ACK) && s.ack_no() == fin_seq.wrapping_add(1);
                (!fin_acked && acks_fin) || (!peer_fin && s.has_flags(Flags::FIN))
            })?;
            shared.sink.record(Event::received(), &segment);

            if segment.has_flags(Flags::FIN) {
                peer_fin = true;
            } else {
                fin_acked = true;
            }
        }

        shared.send_control(&Segment::control(
            fin_seq.wrapping_add(1),
            2,
            mws,
            Flags::ACK,
        ))
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        if self.state() != ConnectionState::Closed {
            debug!("Sender dropped without close, stopping stages");
        }
        self.shared.stop();
        join_stages(self.stages.lock().drain(..).collect());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stp_protocol::Discard;

    #[test]
    fn test_connect_requires_connected_socket() {
        let socket = StpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let result = Sender::connect(socket, SenderConfig::default(), Arc::new(Discard));
        assert!(matches!(
            result,
            Err(ConnectionError::Socket(SocketError::NotConnected))
        ));
    }

    #[test]
    fn test_connect_times_out_without_receiver() {
        let silent = StpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let socket = StpSocket::connect(silent.local_addr().unwrap()).unwrap();
        let config = SenderConfig {
            handshake_timeout: Duration::from_millis(150),
            ..Default::default()
        };

        let result = Sender::connect(socket, config, Arc::new(Discard));
        assert!(matches!(result, Err(ConnectionError::HandshakeTimeout("SYN|ACK"))));
    }

    #[test]
    fn test_connect_rejects_invalid_config() {
        let socket = StpSocket::connect("127.0.0.1:9".parse().unwrap()).unwrap();
        let config = SenderConfig {
            mss: 0,
            ..Default::default()
        };
        let result = Sender::connect(socket, config, Arc::new(Discard));
        assert!(matches!(result, Err(ConnectionError::InvalidConfig(_))));
    }

    #[test]
    fn test_connect_rejects_mss_beyond_datagram() {
        let socket = StpSocket::connect("127.0.0.1:9".parse().unwrap()).unwrap();
        let config = SenderConfig {
            mws: 140_000,
            mss: 70_000,
            ..Default::default()
        };
        let result = Sender::connect(socket, config, Arc::new(Discard));
        assert!(matches!(result, Err(ConnectionError::InvalidConfig(_))));
    }
}
