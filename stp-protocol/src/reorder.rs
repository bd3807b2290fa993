//! Receiver reorder buffer
//!
//! Holds valid, undelivered segments sorted by sequence number and releases
//! the contiguous run that starts at `recv_base`.

use crate::segment::{Flags, Segment};
use bytes::{Bytes, BytesMut};

/// Outcome of [`ReorderBuffer::insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// Already delivered or already buffered; the segment was discarded
    Duplicate,
    /// Stored. `in_order` is set when the segment starts at `recv_base`.
    Buffered { in_order: bool },
}

/// A contiguous run released to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Concatenated payload of the run
    pub payload: Bytes,
    /// Number of segments in the run
    pub segments: usize,
    /// The run ends with the peer's FIN
    pub fin: bool,
}

/// Sorted buffer of out-of-order segments
#[derive(Debug)]
pub struct ReorderBuffer {
    segments: Vec<Segment>,
    recv_base: u32,
}

impl ReorderBuffer {
    /// Create an empty buffer expecting `recv_base` next
    pub fn new(recv_base: u32) -> Self {
        ReorderBuffer {
            segments: Vec::new(),
            recv_base,
        }
    }

    /// Next expected sequence number
    pub fn recv_base(&self) -> u32 {
        self.recv_base
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Store `segment` unless it is a duplicate
    pub fn insert(&mut self, segment: Segment) -> Insert {
        let seq_no = segment.seq_no();
        if seq_no < self.recv_base {
            return Insert::Duplicate;
        }

        match self.segments.binary_search_by_key(&seq_no, Segment::seq_no) {
            Ok(_) => Insert::Duplicate,
            Err(pos) => {
                self.segments.insert(pos, segment);
                Insert::Buffered {
                    in_order: seq_no == self.recv_base,
                }
            }
        }
    }

    /// Remove and concatenate the run starting at `recv_base`
    ///
    /// Advances `recv_base` past the run, plus one more if it ends with a
    /// FIN. Returns `None` when the head of the buffer is not `recv_base`.
    pub fn take_contiguous(&mut self) -> Option<Delivery> {
        let first = self.segments.first()?;
        if first.seq_no() != self.recv_base {
            return None;
        }

        let mut run = 1;
        while run < self.segments.len()
            && self.segments[run - 1].end_seq() == self.segments[run].seq_no()
            && !self.segments[run - 1].has_flags(Flags::FIN)
        {
            run += 1;
        }

        let taken: Vec<Segment> = self.segments.drain(..run).collect();
        let total: usize = taken.iter().map(|s| s.payload().len()).sum();
        let mut payload = BytesMut::with_capacity(total);
        for segment in &taken {
            payload.extend_from_slice(segment.payload());
        }

        let fin = taken.last().map_or(false, |s| s.has_flags(Flags::FIN));
        let last_end = taken.last().map_or(self.recv_base, Segment::end_seq);
        self.recv_base = if fin { last_end.wrapping_add(1) } else { last_end };

        Some(Delivery {
            payload: payload.freeze(),
            segments: run,
            fin,
        })
    }
}
