//! STP I/O
//!
//! This crate provides the datagram transport used by STP connections: a
//! blocking UDP socket with a read timeout so that connection stages can
//! observe shutdown between reads.

pub mod socket;

pub use socket::{SocketError, StpSocket};
