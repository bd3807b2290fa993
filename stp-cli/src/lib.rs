//! STP CLI Library
//!
//! Shared functionality for the STP command-line tools.

pub mod config;
pub mod stats;

pub use config::{Config, ConfigError, PldOptions, ReceiverOptions, SenderOptions};
pub use stats::{
    display_receiver_summary, display_sender_summary, format_bandwidth, format_bytes,
    format_duration,
};

/// Install the `tracing` subscriber used by both tools
///
/// `RUST_LOG` takes precedence; otherwise the level is `info`, or `debug`
/// when `verbose` is set.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
