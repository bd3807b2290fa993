//! Statistics display and formatting

use std::time::Duration;
use stp::{ReceiverStats, SenderStats};

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format bandwidth in human-readable form
pub fn format_bandwidth(bps: u64) -> String {
    const KBPS: u64 = 1000;
    const MBPS: u64 = KBPS * 1000;
    const GBPS: u64 = MBPS * 1000;

    if bps >= GBPS {
        format!("{:.2} Gbps", bps as f64 / GBPS as f64)
    } else if bps >= MBPS {
        format!("{:.2} Mbps", bps as f64 / MBPS as f64)
    } else if bps >= KBPS {
        format!("{:.2} Kbps", bps as f64 / KBPS as f64)
    } else {
        format!("{} bps", bps)
    }
}

/// Format duration in human-readable form
///
/// Transfers shorter than a minute keep millisecond precision.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{:.3}s", duration.as_secs_f64())
    }
}

/// Average goodput over `elapsed`, in bits per second
fn throughput_bps(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 * 8.0 / secs) as u64
    } else {
        0
    }
}

fn row(label: &str, value: impl std::fmt::Display) -> String {
    format!("│ {:<39}{:>20} │", label, value.to_string())
}

fn sender_summary_lines(stats: &SenderStats, elapsed: Duration) -> Vec<String> {
    vec![
        "┌─────────────────────────────────────────────────────────────┐".to_string(),
        "│ SENDER SUMMARY                                              │".to_string(),
        "├─────────────────────────────────────────────────────────────┤".to_string(),
        row("File size", format_bytes(stats.file_size)),
        row("Duration", format_duration(elapsed)),
        row("Throughput", format_bandwidth(throughput_bps(stats.file_size, elapsed))),
        "├─────────────────────────────────────────────────────────────┤".to_string(),
        row("Segments transmitted", stats.segments_transmitted),
        row("Segments handled by PLD", stats.pld_segments),
        row("Dropped", stats.dropped),
        row("Corrupted", stats.corrupted),
        row("Reordered", stats.reordered),
        row("Duplicated", stats.duplicated),
        row("Delayed", stats.delayed),
        "├─────────────────────────────────────────────────────────────┤".to_string(),
        row("Retransmissions on timeout", stats.timeout_retransmits),
        row("Fast retransmissions", stats.fast_retransmits),
        row("Duplicate ACKs received", stats.duplicate_acks_received),
        "└─────────────────────────────────────────────────────────────┘".to_string(),
    ]
}

fn receiver_summary_lines(stats: &ReceiverStats, elapsed: Duration) -> Vec<String> {
    vec![
        "┌─────────────────────────────────────────────────────────────┐".to_string(),
        "│ RECEIVER SUMMARY                                            │".to_string(),
        "├─────────────────────────────────────────────────────────────┤".to_string(),
        row("Data received", format_bytes(stats.data_received)),
        row("Duration", format_duration(elapsed)),
        row("Throughput", format_bandwidth(throughput_bps(stats.data_received, elapsed))),
        "├─────────────────────────────────────────────────────────────┤".to_string(),
        row("Segments received", stats.segments_received),
        row("Data segments received", stats.data_segments_received),
        row("Data segments with bit errors", stats.bit_errors),
        row("Duplicate data segments", stats.duplicate_segments),
        row("Duplicate ACKs sent", stats.duplicate_acks_sent),
        "└─────────────────────────────────────────────────────────────┘".to_string(),
    ]
}

/// Display the sender's end-of-transfer statistics
pub fn display_sender_summary(stats: &SenderStats, elapsed: Duration) {
    println!();
    for line in sender_summary_lines(stats, elapsed) {
        println!("{}", line);
    }
}

/// Display the receiver's end-of-transfer statistics
pub fn display_receiver_summary(stats: &ReceiverStats, elapsed: Duration) {
    println!();
    for line in receiver_summary_lines(stats, elapsed) {
        println!("{}", line);
    }
}
