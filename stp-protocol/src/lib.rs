//! STP Protocol Core Implementation
//!
//! This crate implements the core of STP (Simple Transport Protocol), a
//! reliable byte stream over unreliable datagrams: the segment format and
//! checksum, the pipeline queue, the sender's window, RTO estimation, the
//! packet loss/delay emulator and the receiver's reordering buffer.

pub mod event;
pub mod pld;
pub mod queue;
pub mod reorder;
pub mod retransmit;
pub mod rto;
pub mod segment;
pub mod shutdown;
pub mod stats;
pub mod window;

pub use event::{Direction, Discard, Event, EventSink, Impairment, Retransmit};
pub use pld::{Outgoing, Pld, PldConfig};
pub use queue::Queue;
pub use reorder::{Delivery, Insert, ReorderBuffer};
pub use retransmit::{DupAckTracker, FAST_RETRANSMIT_THRESHOLD};
pub use rto::{Countdown, RtoEstimator, RtoTimer};
pub use segment::{Flags, Segment, SegmentError, HEADER_SIZE};
pub use shutdown::Shutdown;
pub use stats::{ReceiverStats, SenderStats};
pub use window::{SendWindow, WindowError};
