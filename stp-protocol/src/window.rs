//! Sender window: circular buffer of in-flight segments
//!
//! The window keeps every transmitted-but-unacknowledged data segment so it
//! can be retransmitted on timeout or fast retransmit. Slots are reused in
//! rotation; a writer waits for a free slot instead of overwriting one.

use crate::segment::Segment;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Sequence number of the first data byte
pub const INITIAL_SEQ_NO: u32 = 1;

/// Window errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum WindowError {
    #[error("Window is closed")]
    Closed,

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

struct WindowState {
    /// Slot storage (circular)
    slots: Vec<Option<Segment>>,
    /// Slot holding the oldest unacknowledged segment
    base_index: usize,
    /// Number of occupied slots
    occupied: usize,
    /// Lowest unacknowledged sequence number
    send_base: u32,
    /// Next sequence number to assign
    next_seq_no: u32,
    /// Last byte handed to the emulator, retransmissions included
    last_byte_sent: u32,
    closed: bool,
}

impl WindowState {
    fn index(&self, offset: usize) -> usize {
        (self.base_index + offset) % self.slots.len()
    }

    fn buffered(&self) -> impl Iterator<Item = &Segment> + '_ {
        (0..self.occupied).filter_map(move |i| self.slots[self.index(i)].as_ref())
    }
}

/// Sliding send window
pub struct SendWindow {
    state: Mutex<WindowState>,
    /// Signalled whenever slots are freed or the window closes
    changed: Condvar,
    mws: u32,
    mss: u32,
}

impl SendWindow {
    /// Create a window for `mws` bytes split into `mss`-byte segments
    ///
    /// The number of slots is `mws / mss`, at least one.
    pub fn new(mws: u32, mss: u32) -> Self {
        let num_slots = if mss == 0 {
            1
        } else {
            (mws / mss).max(1) as usize
        };

        SendWindow {
            state: Mutex::new(WindowState {
                slots: vec![None; num_slots],
                base_index: 0,
                occupied: 0,
                send_base: INITIAL_SEQ_NO,
                next_seq_no: INITIAL_SEQ_NO,
                last_byte_sent: 0,
                closed: false,
            }),
            changed: Condvar::new(),
            mws,
            mss,
        }
    }

    /// Maximum window size in bytes
    pub fn mws(&self) -> u32 {
        self.mws
    }

    /// Maximum segment size in bytes
    pub fn mss(&self) -> u32 {
        self.mss
    }

    /// Number of segment slots
    pub fn capacity(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Buffer `data` as a new data segment
    ///
    /// Blocks until a slot is free. The window keeps its own copy; the
    /// returned segment is the one to transmit.
    pub fn buffer(&self, data: &[u8]) -> Result<Segment, WindowError> {
        if data.len() > self.mss.max(1) as usize {
            return Err(WindowError::PayloadTooLarge {
                size: data.len(),
                max: self.mss as usize,
            });
        }

        let mut state = self.state.lock();
        while state.occupied == state.slots.len() && !state.closed {
            self.changed.wait(&mut state);
        }
        if state.closed {
            return Err(WindowError::Closed);
        }

        let segment = Segment::data(state.next_seq_no, 1, self.mws, data);
        let copy = segment.duplicate();
        state.next_seq_no = state.next_seq_no.wrapping_add(data.len() as u32);

        let insert_at = state.index(state.occupied);
        state.slots[insert_at] = Some(segment);
        state.occupied += 1;

        Ok(copy)
    }

    /// Slide the window to `ack_no`
    ///
    /// Frees every buffered segment below `ack_no` and returns whether any
    /// unacknowledged segment remains.
    pub fn slide(&self, ack_no: u32) -> bool {
        let mut state = self.state.lock();
        state.send_base = ack_no;

        let acked = state
            .buffered()
            .take_while(|segment| segment.seq_no() < ack_no)
            .count();
        for i in 0..acked {
            let idx = state.index(i);
            state.slots[idx] = None;
        }
        state.base_index = state.index(acked);
        state.occupied -= acked;

        let remaining = state.buffered().any(|segment| segment.seq_no() >= ack_no);
        drop(state);

        self.changed.notify_all();
        remaining
    }

    /// Copy of the buffered segment starting at `seq_no`, if still buffered
    pub fn segment_with_seq(&self, seq_no: u32) -> Option<Segment> {
        let state = self.state.lock();
        let found = state
            .buffered()
            .find(|segment| segment.seq_no() == seq_no)
            .map(Segment::duplicate);
        found
    }

    /// Copy of the oldest buffered segment
    pub fn base_segment(&self) -> Option<Segment> {
        let state = self.state.lock();
        let base = state.buffered().next().map(Segment::duplicate);
        base
    }

    /// Record that `segment` is being handed to the emulator
    ///
    /// Returns `true` when the segment has never been sent before, in which
    /// case `last_byte_sent` moves to its last byte. Retransmissions leave
    /// it unchanged.
    pub fn mark_sent(&self, segment: &Segment) -> bool {
        let mut state = self.state.lock();
        if segment.seq_no() <= state.last_byte_sent {
            return false;
        }
        state.last_byte_sent = segment.end_seq().wrapping_sub(1);
        true
    }

    pub fn send_base(&self) -> u32 {
        self.state.lock().send_base
    }

    pub fn next_seq_no(&self) -> u32 {
        self.state.lock().next_seq_no
    }

    pub fn last_byte_sent(&self) -> u32 {
        self.state.lock().last_byte_sent
    }

    /// Number of buffered (unacknowledged) segments
    pub fn in_flight(&self) -> usize {
        self.state.lock().occupied
    }

    /// True once every assigned byte has been acknowledged
    pub fn is_drained(&self) -> bool {
        let state = self.state.lock();
        state.send_base == state.next_seq_no
    }

    /// Block until the window is drained. Returns `false` if it was closed first.
    pub fn wait_drained(&self) -> bool {
        let mut state = self.state.lock();
        while state.send_base != state.next_seq_no && !state.closed {
            self.changed.wait(&mut state);
        }
        state.send_base == state.next_seq_no
    }

    /// Sequence numbers of the buffered segments, oldest first
    pub fn buffered_seq_nos(&self) -> Vec<u32> {
        let state = self.state.lock();
        state.buffered().map(Segment::seq_no).collect()
    }

    /// Wake every waiter; further `buffer` calls fail
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.changed.notify_all();
    }
}
