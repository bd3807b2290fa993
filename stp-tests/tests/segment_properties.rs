//! Property-based tests for STP segment serialization and the parity checksum
//!
//! These tests use proptest to generate random segments and check that
//! encoding is lossless and that the checksum catches every single-bit error.

use proptest::prelude::*;
use stp_protocol::{Flags, Segment, HEADER_SIZE};

// Property test strategies

fn flags_strategy() -> impl Strategy<Value = Flags> {
    prop_oneof![
        Just(Flags::NONE),
        Just(Flags::ACK),
        Just(Flags::SYN),
        Just(Flags::FIN),
        Just(Flags::SYN | Flags::ACK),
        Just(Flags::FIN | Flags::ACK),
    ]
}

fn segment_strategy() -> impl Strategy<Value = Segment> {
    (
        any::<u32>(),
        any::<u32>(),
        any::<u32>(),
        flags_strategy(),
        prop::collection::vec(any::<u8>(), 0..=512),
    )
        .prop_map(|(seq, ack, window, flags, payload)| {
            Segment::new(seq, ack, window, flags, &payload)
        })
}

/// Byte range of the payload length field, which cannot be flipped without
/// changing how the rest of the datagram is framed
const LENGTH_FIELD: std::ops::Range<usize> = 12..16;

proptest! {
    #[test]
    fn prop_encode_decode_preserves_segment(segment in segment_strategy()) {
        let bytes = segment.to_bytes();
        prop_assert_eq!(bytes.len(), HEADER_SIZE + segment.payload().len());

        let decoded = Segment::from_bytes(&bytes).unwrap();
        prop_assert!(decoded.is_valid());
        prop_assert_eq!(decoded, segment);
    }

    #[test]
    fn prop_single_bit_flip_detected(
        segment in segment_strategy(),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut bytes = segment.to_bytes().to_vec();
        let candidates: Vec<usize> = (0..bytes.len())
            .filter(|i| !LENGTH_FIELD.contains(i))
            .collect();
        let byte = candidates[position.index(candidates.len())];
        bytes[byte] ^= 1 << bit;

        let decoded = Segment::from_bytes(&bytes).unwrap();
        prop_assert!(!decoded.is_valid());
    }

    #[test]
    fn prop_paired_payload_flips_go_unnoticed(
        payload in prop::collection::vec(any::<u8>(), 2..=256),
        first in any::<prop::sample::Index>(),
        second in any::<prop::sample::Index>(),
    ) {
        let segment = Segment::data(1, 1, 1000, &payload);
        let mut bytes = segment.to_bytes().to_vec();

        // Two distinct bits: parity is unchanged
        let bits = payload.len() * 8;
        let a = first.index(bits);
        let mut b = second.index(bits);
        if a == b {
            b = (b + 1) % bits;
        }
        bytes[HEADER_SIZE + a / 8] ^= 1 << (a % 8);
        bytes[HEADER_SIZE + b / 8] ^= 1 << (b % 8);

        let decoded = Segment::from_bytes(&bytes).unwrap();
        prop_assert!(decoded.is_valid());
        prop_assert_ne!(decoded.payload(), segment.payload());
    }

    #[test]
    fn prop_corrupted_copy_is_invalid(segment in segment_strategy()) {
        let corrupted = segment.corrupted();
        prop_assert!(segment.is_valid());
        prop_assert!(!corrupted.is_valid());
        prop_assert_eq!(corrupted.seq_no(), segment.seq_no());
        prop_assert_eq!(corrupted.data_length(), segment.data_length());
    }

    #[test]
    fn prop_short_datagrams_rejected(bytes in prop::collection::vec(any::<u8>(), 0..HEADER_SIZE)) {
        prop_assert!(Segment::from_bytes(&bytes).is_err());
    }
}
