//! STP - Simple Transport Protocol
//!
//! Reliable, ordered byte streams over UDP. [`Sender`] and [`Receiver`] run
//! the two ends of a connection; each drives the handshake, a set of stage
//! threads for the transfer, and the teardown.

pub use stp_io as io;
pub use stp_protocol as protocol;

pub mod config;
pub mod connection;
pub mod log;
pub mod receiver;
pub mod sender;

// Re-export commonly used types
pub use config::{ReceiverConfig, SenderConfig};
pub use connection::{ConnectionError, ConnectionState};
pub use log::{EventLog, ReceiverLog, SenderLog, Tally};
pub use protocol::{Event, EventSink, PldConfig, ReceiverStats, Segment, SenderStats};
pub use receiver::Receiver;
pub use sender::Sender;
