//! Per-connection statistics tallied from protocol events

use crate::event::{Event, Impairment, Retransmit};
use crate::segment::Segment;
use std::io::{self, Write};

const SENDER_RULE: &str = "=========================================================";
const RECEIVER_RULE: &str = "==============================================";

/// Sender statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// Application payload accepted for sending (bytes)
    pub file_size: u64,
    /// Segments transmitted, drops and retransmissions included
    pub segments_transmitted: u64,
    /// Data segments handed to the emulator
    pub pld_segments: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub corrupted: u64,
    pub reordered: u64,
    pub delayed: u64,
    pub timeout_retransmits: u64,
    pub fast_retransmits: u64,
    pub duplicate_acks_received: u64,
}

impl SenderStats {
    /// Fold one event into the totals
    pub fn record(&mut self, event: &Event, segment: &Segment) {
        if event.is_sent() {
            self.segments_transmitted += 1;
            if segment.data_length() > 0 {
                self.pld_segments += 1;
            }

            match event.impairment {
                Some(Impairment::Drop) => self.dropped += 1,
                Some(Impairment::Duplicate) => self.duplicated += 1,
                Some(Impairment::Corrupt) => self.corrupted += 1,
                Some(Impairment::Reorder) => self.reordered += 1,
                Some(Impairment::Delay) => self.delayed += 1,
                None => {}
            }

            match event.retransmit {
                Some(Retransmit::Timeout) => self.timeout_retransmits += 1,
                Some(Retransmit::Fast) => self.fast_retransmits += 1,
                None => {}
            }
        } else if event.duplicate_ack {
            self.duplicate_acks_received += 1;
        }
    }

    pub fn record_payload(&mut self, len: usize) {
        self.file_size += len as u64;
    }

    /// Write the end-of-connection summary block
    pub fn write_summary<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out)?;
        writeln!(out, "{}", SENDER_RULE)?;
        let rows = [
            ("Size of the file (in bytes)", self.file_size),
            ("Segments transmitted (including drop & RXT)", self.segments_transmitted),
            ("Number of segments handled by PLD", self.pld_segments),
            ("Number of segments dropped", self.dropped),
            ("Number of segments duplicated", self.duplicated),
            ("Number of segments corrupted", self.corrupted),
            ("Number of segments reordered", self.reordered),
            ("Number of segments delayed", self.delayed),
            ("Number of retransmissions due to TIMEOUT", self.timeout_retransmits),
            ("Number of FAST RETRANSMISSIONs", self.fast_retransmits),
            ("Number of DUP ACKs received", self.duplicate_acks_received),
        ];
        for (label, value) in rows {
            writeln!(out, "{:<43}{:>14}", label, value)?;
        }
        writeln!(out, "{}", SENDER_RULE)?;
        writeln!(out)
    }
}

/// Receiver statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Payload bytes received, duplicates and corrupted segments included
    pub data_received: u64,
    pub segments_received: u64,
    pub data_segments_received: u64,
    /// Segments that failed their checksum
    pub bit_errors: u64,
    pub duplicate_segments: u64,
    pub duplicate_acks_sent: u64,
}

impl ReceiverStats {
    /// Fold one event into the totals
    pub fn record(&mut self, event: &Event, segment: &Segment) {
        if event.is_received() {
            let len = segment.data_length();
            if len > 0 {
                self.data_received += u64::from(len);
                self.data_segments_received += 1;
            }
            self.segments_received += 1;
            if event.corrupted_data {
                self.bit_errors += 1;
            }
            if event.duplicate_data {
                self.duplicate_segments += 1;
            }
        } else if event.duplicate_ack {
            self.duplicate_acks_sent += 1;
        }
    }

    /// Write the end-of-connection summary block
    pub fn write_summary<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out)?;
        writeln!(out, "{}", RECEIVER_RULE)?;
        let rows = [
            ("Amount of data received (bytes)", self.data_received),
            ("Total segments received", self.segments_received),
            ("Data segments received", self.data_segments_received),
            ("Data segments with bit errors", self.bit_errors),
            ("Duplicate data segments received", self.duplicate_segments),
            ("Duplicate ACKs sent", self.duplicate_acks_sent),
        ];
        for (label, value) in rows {
            writeln!(out, "{:<32}{:>14}", label, value)?;
        }
        writeln!(out, "{}", RECEIVER_RULE)?;
        writeln!(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Flags;

    #[test]
    fn test_sender_stats() {
        let mut stats = SenderStats::default();
        let data = Segment::data(1, 1, 1000, &[0u8; 100]);
        let ack = Segment::control(1, 101, 0, Flags::ACK);
        let syn = Segment::control(0, 0, 1000, Flags::SYN);

        stats.record(&Event::sent(), &syn);
        stats.record(&Event::sent().with_impairment(Impairment::Drop), &data);
        stats.record(
            &Event::sent()
                .with_retransmit(Some(Retransmit::Timeout))
                .with_impairment(Impairment::Corrupt),
            &data,
        );
        stats.record(&Event::sent().with_retransmit(Some(Retransmit::Fast)), &data);
        stats.record(&Event::received(), &ack);
        stats.record(&Event::received().duplicate_ack(), &ack);
        stats.record_payload(100);

        assert_eq!(stats.file_size, 100);
        assert_eq!(stats.segments_transmitted, 4);
        assert_eq!(stats.pld_segments, 3);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.corrupted, 1);
        assert_eq!(stats.timeout_retransmits, 1);
        assert_eq!(stats.fast_retransmits, 1);
        assert_eq!(stats.duplicate_acks_received, 1);
    }

    #[test]
    fn test_receiver_stats() {
        let mut stats = ReceiverStats::default();
        let data = Segment::data(1, 1, 1000, &[0u8; 100]);
        let ack = Segment::control(1, 101, 0, Flags::ACK);

        stats.record(&Event::received(), &data);
        stats.record(&Event::received().corrupted_data(), &data);
        stats.record(&Event::received().duplicate_data(), &data);
        stats.record(&Event::sent(), &ack);
        stats.record(&Event::sent().duplicate_ack(), &ack);

        assert_eq!(stats.data_received, 300);
        assert_eq!(stats.segments_received, 3);
        assert_eq!(stats.data_segments_received, 3);
        assert_eq!(stats.bit_errors, 1);
        assert_eq!(stats.duplicate_segments, 1);
        assert_eq!(stats.duplicate_acks_sent, 1);
    }

    #[test]
    fn test_summary_layout() {
        let stats = ReceiverStats {
            data_received: 250,
            ..Default::default()
        };
        let mut out = Vec::new();
        stats.write_summary(&mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let line = text
            .lines()
            .find(|line| line.starts_with("Amount of data received"))
            .unwrap();
        assert_eq!(line.len(), 32 + 14);
        assert!(line.ends_with("250"));
    }
}
