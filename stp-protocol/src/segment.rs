//! STP Segment Structures and Serialization
//!
//! Every STP segment carries a fixed 20-byte header followed by an optional
//! payload. The header holds the sequence and acknowledgement numbers, the
//! advertised window, the payload length, the control flags and a one-bit
//! parity checksum. All multi-byte fields are in network byte order.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use thiserror::Error;

/// Size of the STP segment header in bytes
pub const HEADER_SIZE: usize = 20;

/// Header fields (byte offsets into the encoded segment)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeaderField {
    /// Sequence number
    SeqNo = 0,
    /// Acknowledgement number
    AckNo = 4,
    /// Advertised window (bytes)
    Window = 8,
    /// Payload length (bytes)
    DataLength = 12,
    /// Control flags
    Flags = 16,
    /// Parity checksum
    Checksum = 18,
}

impl HeaderField {
    /// Byte offset of the field within the header
    pub fn offset(self) -> usize {
        self as usize
    }
}

/// Segment control flags
///
/// A segment with none of ACK, SYN or FIN set is a pure data segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u16);

impl Flags {
    /// No flags (data segment)
    pub const NONE: Flags = Flags(0);
    /// Acknowledgement
    pub const ACK: Flags = Flags(0x1);
    /// Connection request
    pub const SYN: Flags = Flags(0x2);
    /// Connection teardown
    pub const FIN: Flags = Flags(0x4);

    const CONTROL_MASK: u16 = 0x7;

    /// Build flags from their raw wire value (unknown bits are preserved)
    pub fn from_bits(bits: u16) -> Self {
        Flags(bits)
    }

    /// Raw wire value
    pub fn bits(self) -> u16 {
        self.0
    }

    /// Check whether every flag in `other` is set
    #[inline]
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when none of SYN, FIN or ACK is set
    #[inline]
    pub fn is_data(self) -> bool {
        self.0 & Self::CONTROL_MASK == 0
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.contains(Flags::SYN) {
            f.write_str("S")?;
        }
        if self.contains(Flags::FIN) {
            f.write_str("F")?;
        }
        if self.contains(Flags::ACK) {
            f.write_str("A")?;
        }
        if self.is_data() {
            f.write_str("D")?;
        }
        Ok(())
    }
}

/// Segment parsing errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SegmentError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Malformed segment: declared {declared} payload bytes, only {available} available")]
    Malformed { declared: usize, available: usize },
}

/// An STP segment
///
/// Segments are immutable once built: the payload is copied in and the
/// checksum is computed over the final contents. The only way to obtain a
/// segment whose checksum does not match is [`Segment::corrupted`] or
/// decoding damaged bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    seq_no: u32,
    ack_no: u32,
    window: u32,
    flags: Flags,
    checksum: u16,
    payload: Bytes,
}

impl Segment {
    /// Create a new segment, copying the payload and computing the checksum
    pub fn new(seq_no: u32, ack_no: u32, window: u32, flags: Flags, payload: &[u8]) -> Self {
        let mut segment = Segment {
            seq_no,
            ack_no,
            window,
            flags,
            checksum: 0,
            payload: Bytes::copy_from_slice(payload),
        };
        segment.checksum = segment.compute_checksum();
        segment
    }

    /// Create a control segment (no payload)
    pub fn control(seq_no: u32, ack_no: u32, window: u32, flags: Flags) -> Self {
        Segment::new(seq_no, ack_no, window, flags, &[])
    }

    /// Create a data segment (no flags)
    pub fn data(seq_no: u32, ack_no: u32, window: u32, payload: &[u8]) -> Self {
        Segment::new(seq_no, ack_no, window, Flags::NONE, payload)
    }

    pub fn seq_no(&self) -> u32 {
        self.seq_no
    }

    pub fn ack_no(&self) -> u32 {
        self.ack_no
    }

    /// Advertised window in bytes
    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Check whether every flag in `flags` is set on this segment
    pub fn has_flags(&self, flags: Flags) -> bool {
        self.flags.contains(flags)
    }

    /// True for pure data segments
    pub fn is_data(&self) -> bool {
        self.flags.is_data()
    }

    /// Stored checksum
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload length as carried in the header
    pub fn data_length(&self) -> u32 {
        self.payload.len() as u32
    }

    /// Sequence number of the byte following this segment's payload
    pub fn end_seq(&self) -> u32 {
        self.seq_no.wrapping_add(self.data_length())
    }

    /// Total encoded size (header + payload)
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Recompute the parity checksum
    ///
    /// The accumulator is complemented once for every set bit in the encoded
    /// segment, excluding the checksum field itself, so the result is the
    /// parity of the total one-bit count: `0` when even, `1` when odd. Bit
    /// counts do not depend on byte order, so the header fields are counted
    /// directly.
    pub fn compute_checksum(&self) -> u16 {
        let header_ones = self.seq_no.count_ones()
            + self.ack_no.count_ones()
            + self.window.count_ones()
            + self.data_length().count_ones()
            + self.flags.bits().count_ones();
        let payload_ones: u32 = self.payload.iter().map(|b| b.count_ones()).sum();

        ((header_ones + payload_ones) & 1) as u16
    }

    /// Check the stored checksum against the recomputed one
    pub fn is_valid(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Deep copy, including the payload bytes
    ///
    /// Used whenever one owner keeps a segment while another transmits it.
    pub fn duplicate(&self) -> Segment {
        Segment {
            payload: Bytes::copy_from_slice(&self.payload),
            ..self.clone()
        }
    }

    /// Copy of this segment with a single bit flipped and a stale checksum
    ///
    /// The lowest bit of the first payload byte is flipped. Control segments
    /// have no payload, so the lowest bit of the advertised window is flipped
    /// instead.
    pub fn corrupted(&self) -> Segment {
        let mut corrupted = self.duplicate();
        if self.payload.is_empty() {
            corrupted.window ^= 1;
        } else {
            let mut payload = BytesMut::from(&self.payload[..]);
            payload[0] ^= 1;
            corrupted.payload = payload.freeze();
        }
        corrupted
    }

    /// Serialize the segment (network byte order)
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());
        buf.put_u32(self.seq_no);
        buf.put_u32(self.ack_no);
        buf.put_u32(self.window);
        buf.put_u32(self.data_length());
        buf.put_u16(self.flags.bits());
        buf.put_u16(self.checksum);
        buf.put_slice(&self.payload);
        buf
    }

    /// Parse a segment from a received datagram
    ///
    /// The stored checksum is kept as received; use [`Segment::is_valid`] to
    /// check it. Bytes beyond the declared payload length are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SegmentError> {
        if bytes.len() < HEADER_SIZE {
            return Err(SegmentError::InsufficientData {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..HEADER_SIZE];
        let seq_no = buf.get_u32();
        let ack_no = buf.get_u32();
        let window = buf.get_u32();
        let declared = buf.get_u32() as usize;
        let flags = Flags::from_bits(buf.get_u16());
        let checksum = buf.get_u16();

        let available = bytes.len() - HEADER_SIZE;
        if declared > available {
            return Err(SegmentError::Malformed {
                declared,
                available,
            });
        }

        Ok(Segment {
            seq_no,
            ack_no,
            window,
            flags,
            checksum,
            payload: Bytes::copy_from_slice(&bytes[HEADER_SIZE..HEADER_SIZE + declared]),
        })
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} seq={} ack={} len={} win={}]",
            self.flags,
            self.seq_no,
            self.ack_no,
            self.data_length(),
            self.window
        )
    }
}
