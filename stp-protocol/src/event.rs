//! Protocol events and the sink that records them
//!
//! Every segment that crosses the socket (or is dropped by the emulator on
//! its way there) is reported to an [`EventSink`] together with an [`Event`]
//! describing what happened to it.

use crate::segment::Segment;
use std::fmt;

/// Which way the segment travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

/// Impairment applied by the loss/delay emulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Impairment {
    Drop,
    Duplicate,
    Corrupt,
    Reorder,
    Delay,
}

impl Impairment {
    fn tag(self) -> &'static str {
        match self {
            Impairment::Drop => "drop",
            Impairment::Duplicate => "dup",
            Impairment::Corrupt => "corr",
            Impairment::Reorder => "rord",
            Impairment::Delay => "dely",
        }
    }
}

/// Reason a data segment is being sent again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retransmit {
    /// The retransmission timer expired
    Timeout,
    /// Three duplicate acknowledgements arrived
    Fast,
}

/// A logged protocol event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub direction: Direction,
    pub impairment: Option<Impairment>,
    pub retransmit: Option<Retransmit>,
    /// ACK repeating the previous cumulative acknowledgement
    pub duplicate_ack: bool,
    /// Data segment already delivered or buffered
    pub duplicate_data: bool,
    /// Segment failed its checksum
    pub corrupted_data: bool,
}

impl Event {
    fn new(direction: Direction) -> Self {
        Event {
            direction,
            impairment: None,
            retransmit: None,
            duplicate_ack: false,
            duplicate_data: false,
            corrupted_data: false,
        }
    }

    pub fn sent() -> Self {
        Event::new(Direction::Sent)
    }

    pub fn received() -> Self {
        Event::new(Direction::Received)
    }

    pub fn with_impairment(mut self, impairment: Impairment) -> Self {
        self.impairment = Some(impairment);
        self
    }

    pub fn with_retransmit(mut self, retransmit: Option<Retransmit>) -> Self {
        self.retransmit = retransmit;
        self
    }

    pub fn duplicate_ack(mut self) -> Self {
        self.duplicate_ack = true;
        self
    }

    pub fn duplicate_data(mut self) -> Self {
        self.duplicate_data = true;
        self
    }

    pub fn corrupted_data(mut self) -> Self {
        self.corrupted_data = true;
        self
    }

    pub fn is_sent(&self) -> bool {
        self.direction == Direction::Sent
    }

    pub fn is_received(&self) -> bool {
        self.direction == Direction::Received
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Sent => {
                f.write_str("snd")?;
                if self.retransmit.is_some() {
                    f.write_str("/RXT")?;
                }
                if let Some(impairment) = self.impairment {
                    write!(f, "/{}", impairment.tag())?;
                }
            }
            Direction::Received => {
                f.write_str("rcv")?;
                if self.corrupted_data {
                    f.write_str("/corr")?;
                }
            }
        }
        if self.duplicate_ack {
            f.write_str("/DA")?;
        }
        Ok(())
    }
}

/// Destination for protocol events
///
/// Implementations must be cheap to call from any stage thread.
pub trait EventSink: Send + Sync {
    /// Record `event` for `segment`
    fn record(&self, event: Event, segment: &Segment);

    /// Account for `len` bytes of application payload accepted for sending
    fn record_payload(&self, _len: usize) {}
}

/// Sink that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl EventSink for Discard {
    fn record(&self, _event: Event, _segment: &Segment) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_display() {
        assert_eq!(Event::sent().to_string(), "snd");
        assert_eq!(Event::received().to_string(), "rcv");
        assert_eq!(
            Event::sent()
                .with_retransmit(Some(Retransmit::Timeout))
                .with_impairment(Impairment::Drop)
                .to_string(),
            "snd/RXT/drop"
        );
        assert_eq!(
            Event::sent().with_impairment(Impairment::Delay).to_string(),
            "snd/dely"
        );
        assert_eq!(Event::received().duplicate_ack().to_string(), "rcv/DA");
        assert_eq!(Event::sent().duplicate_ack().to_string(), "snd/DA");
        assert_eq!(Event::received().corrupted_data().to_string(), "rcv/corr");
    }

    #[test]
    fn test_duplicate_data_not_rendered() {
        assert_eq!(Event::received().duplicate_data().to_string(), "rcv");
    }

    #[test]
    fn test_direction() {
        assert!(Event::sent().is_sent());
        assert!(Event::received().is_received());
        assert!(!Event::received().is_sent());
    }
}
