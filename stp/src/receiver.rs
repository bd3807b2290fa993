//! STP receiving end
//!
//! After the handshake the receiver runs two stage threads: ingest reads
//! the socket into the incoming queue, and process validates, reorders and
//! acknowledges segments, handing each contiguous run to the application
//! through a one-slot rendezvous.

use crate::config::ReceiverConfig;
use crate::connection::{
    join_stages, spawn_stage, ConnectionError, ConnectionState, Link, MAX_DATAGRAM_SIZE,
};
use bytes::Bytes;
use crossbeam::channel::{self, Receiver as ChannelReceiver, Sender as ChannelSender};
use crossbeam::select;
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use stp_io::StpSocket;
use stp_protocol::window::INITIAL_SEQ_NO;
use stp_protocol::{Event, EventSink, Flags, Insert, Queue, ReorderBuffer, Segment, Shutdown};
use tracing::{debug, info, trace, warn};

/// What the process stage hands to the application
#[derive(Debug)]
enum Chunk {
    Data(Bytes),
    End,
}

/// State shared by the stage threads
struct ReceiverShared {
    link: Link,
    /// Window advertised by the sender in its SYN
    window: u32,
    incoming: Queue<Segment>,
    shutdown: Shutdown,
    sink: Arc<dyn EventSink>,
    /// Mirror of the reorder buffer's base, read at teardown
    recv_base: AtomicU32,
}

impl ReceiverShared {
    fn send_control(&self, event: Event, segment: &Segment) -> Result<(), ConnectionError> {
        self.sink.record(event, segment);
        self.link.send(segment)?;
        Ok(())
    }

    /// Acknowledge everything below `recv_base`
    fn send_ack(&self, recv_base: u32, duplicate: bool) {
        let ack = Segment::control(1, recv_base, 0, Flags::ACK);
        let event = if duplicate {
            Event::sent().duplicate_ack()
        } else {
            Event::sent()
        };
        if let Err(e) = self.send_control(event, &ack) {
            warn!(ack = recv_base, error = %e, "Failed to send ACK");
        }
    }

    /// Hand a chunk to the application. Returns `false` on shutdown.
    fn hand_over(&self, chunks: &ChannelSender<Chunk>, chunk: Chunk) -> bool {
        select! {
            send(chunks, chunk) -> res => res.is_ok(),
            recv(self.shutdown.signal()) -> _ => false,
        }
    }

    fn run_ingest(&self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let peer = self.link.peer();

        while !self.shutdown.is_triggered() {
            match self.link.recv(&mut buf) {
                Ok(Some((segment, from))) if from == peer => self.incoming.enqueue(segment),
                Ok(Some((segment, from))) => {
                    warn!(%segment, %from, "Ignoring segment from unknown peer");
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Failed to read from socket"),
            }
        }
    }

    fn run_process(&self, chunks: ChannelSender<Chunk>) {
        let mut reorder = ReorderBuffer::new(INITIAL_SEQ_NO);

        while let Some(segment) = self.incoming.dequeue_until(&self.shutdown) {
            if !segment.is_valid() {
                trace!(%segment, "Checksum mismatch, dropping");
                self.sink.record(Event::received().corrupted_data(), &segment);
                continue;
            }
            if !segment.is_data() && !segment.has_flags(Flags::FIN) {
                warn!(%segment, "Ignoring unexpected control segment");
                continue;
            }

            match reorder.insert(segment.clone()) {
                Insert::Duplicate => {
                    self.sink.record(Event::received().duplicate_data(), &segment);
                    self.send_ack(reorder.recv_base(), true);
                }
                Insert::Buffered { in_order: false } => {
                    self.sink.record(Event::received(), &segment);
                    self.send_ack(reorder.recv_base(), true);
                }
                Insert::Buffered { in_order: true } => {
                    self.sink.record(Event::received(), &segment);
                    let Some(delivery) = reorder.take_contiguous() else {
                        continue;
                    };
                    trace!(
                        segments = delivery.segments,
                        bytes = delivery.payload.len(),
                        "Delivering contiguous run"
                    );

                    if !delivery.payload.is_empty()
                        && !self.hand_over(&chunks, Chunk::Data(delivery.payload))
                    {
                        break;
                    }
                    self.recv_base.store(reorder.recv_base(), Ordering::Release);
                    self.send_ack(reorder.recv_base(), false);

                    if delivery.fin {
                        debug!(recv_base = reorder.recv_base(), "End of stream");
                        self.hand_over(&chunks, Chunk::End);
                        break;
                    }
                }
            }
        }
    }
}

/// The receiving end of an STP connection
pub struct Receiver {
    state: RwLock<ConnectionState>,
    shared: Arc<ReceiverShared>,
    chunks: ChannelReceiver<Chunk>,
    /// End of stream has been returned to the application
    finished: AtomicBool,
    stages: Mutex<Vec<JoinHandle<()>>>,
    config: ReceiverConfig,
}

impl Receiver {
    /// Wait on `socket` for a sender's SYN and complete the handshake
    pub fn accept(
        socket: StpSocket,
        config: ReceiverConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ConnectionError> {
        config.validate()?;
        socket.set_read_timeout(Some(config.poll_interval))?;
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let deadline = Instant::now() + config.handshake_timeout;

        // The peer is unknown until the SYN arrives
        let local = socket.local_addr()?;
        let listener = Link::new(socket, local);
        let (syn, peer) = listener.await_segment(&mut buf, deadline, "SYN", |s, _| {
            s.has_flags(Flags::SYN) && !s.has_flags(Flags::ACK)
        })?;
        sink.record(Event::received(), &syn);
        debug!(%peer, window = syn.window(), "SYN received");

        let (chunks_tx, chunks_rx) = channel::bounded(0);
        let shared = Arc::new(ReceiverShared {
            link: listener.with_peer(peer),
            window: syn.window(),
            incoming: Queue::new(),
            shutdown: Shutdown::new(),
            sink,
            recv_base: AtomicU32::new(INITIAL_SEQ_NO),
        });
        let receiver = Receiver {
            state: RwLock::new(ConnectionState::SynReceived),
            shared,
            chunks: chunks_rx,
            finished: AtomicBool::new(false),
            stages: Mutex::new(Vec::new()),
            config,
        };

        receiver.handshake(&mut buf, deadline)?;
        receiver.start_stages(chunks_tx)?;
        Ok(receiver)
    }

    fn handshake(&self, buf: &mut [u8], deadline: Instant) -> Result<(), ConnectionError> {
        let shared = &self.shared;
        shared.send_control(
            Event::sent(),
            &Segment::control(0, 1, shared.window, Flags::SYN | Flags::ACK),
        )?;

        let peer = shared.link.peer();
        let (ack, _) = shared.link.await_segment(buf, deadline, "ACK", |s, from| {
            from == peer && s.has_flags(Flags::ACK) && !s.has_flags(Flags::SYN) && s.ack_no() == 1
        })?;
        shared.sink.record(Event::received(), &ack);

        self.set_state(ConnectionState::Established);
        info!(%peer, window = shared.window, "Connection established");
        Ok(())
    }

    fn start_stages(&self, chunks: ChannelSender<Chunk>) -> Result<(), ConnectionError> {
        let mut stages = self.stages.lock();

        let shared = self.shared.clone();
        stages.push(spawn_stage("process", move || shared.run_process(chunks))?);

        let shared = self.shared.clone();
        match spawn_stage("ingest", move || shared.run_ingest()) {
            Ok(handle) => stages.push(handle),
            Err(e) => {
                self.shared.shutdown.trigger();
                join_stages(stages.drain(..).collect());
                self.set_state(ConnectionState::Closed);
                return Err(e);
            }
        }
        Ok(())
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.write();
        if *current != state {
            debug!(from = %*current, to = %state, "Receiver state change");
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

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Window advertised by the sender
    pub fn peer_window(&self) -> u32 {
        self.shared.window
    }

    /// Next expected sequence number
    pub fn recv_base(&self) -> u32 {
        self.shared.recv_base.load(Ordering::Acquire)
    }

    /// Block until the next contiguous run of data arrives
    ///
    /// Returns `None` once the sender has finished the stream (or the
    /// connection was closed).
    pub fn recv(&self) -> Option<Bytes> {
        if self.finished.load(Ordering::Acquire) {
            return None;
        }
        match self.chunks.recv() {
            Ok(Chunk::Data(data)) => Some(data),
            Ok(Chunk::End) | Err(_) => {
                self.finished.store(true, Ordering::Release);
                None
            }
        }
    }

    /// Close the connection
    ///
    /// Stops the stages, sends FIN and waits for the sender to acknowledge it.
    pub fn close(&self) -> Result<(), ConnectionError> {
        match self.state() {
            ConnectionState::Established => {}
            ConnectionState::Closed => return Ok(()),
            _ => return Err(ConnectionError::InvalidState),
        }
        self.set_state(ConnectionState::Closing);

        let shared = &self.shared;
        shared.shutdown.trigger();
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
        let recv_base = self.recv_base();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let deadline = Instant::now() + self.config.handshake_timeout;

        let fin = Segment::control(1, recv_base, shared.window, Flags::FIN);
        shared.send_control(Event::sent(), &fin)?;

        let peer = shared.link.peer();
        let (ack, _) = shared.link.await_segment(&mut buf, deadline, "ACK of FIN", |s, from| {
            from == peer && s.has_flags(Flags::ACK) && s.ack_no() == fin.seq_no().wrapping_add(1)
        })?;
        shared.sink.record(Event::received(), &ack);
        Ok(())
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        if self.state() != ConnectionState::Closed {
            debug!("Receiver dropped without close, stopping stages");
        }
        self.shared.shutdown.trigger();
        join_stages(self.stages.lock().drain(..).collect());
    }
}
