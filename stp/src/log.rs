//! Protocol event log
//!
//! Writes one line per event in fixed columns:
//!
//! ```text
//! event                 time          type       seq      data       ack
//! snd                0.00012          S            0         0         0
//! ```
//!
//! Time is seconds since the log was created. The log also tallies
//! statistics and appends a summary block when finished.

use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Instant;
use stp_protocol::{Event, EventSink, ReceiverStats, Segment, SenderStats};
use tracing::warn;

/// Statistics that can be tallied from events
pub trait Tally: Default + Clone + Send {
    fn record(&mut self, event: &Event, segment: &Segment);

    fn record_payload(&mut self, _len: usize) {}

    fn write_summary(&self, out: &mut dyn Write) -> io::Result<()>;
}

impl Tally for SenderStats {
    fn record(&mut self, event: &Event, segment: &Segment) {
        SenderStats::record(self, event, segment);
    }

    fn record_payload(&mut self, len: usize) {
        SenderStats::record_payload(self, len);
    }

    fn write_summary(&self, mut out: &mut dyn Write) -> io::Result<()> {
        SenderStats::write_summary(self, &mut out)
    }
}

impl Tally for ReceiverStats {
    fn record(&mut self, event: &Event, segment: &Segment) {
        ReceiverStats::record(self, event, segment);
    }

    fn write_summary(&self, mut out: &mut dyn Write) -> io::Result<()> {
        ReceiverStats::write_summary(self, &mut out)
    }
}

struct LogState<S> {
    out: Box<dyn Write + Send>,
    stats: S,
    /// Set after the first write error; later lines are not attempted
    failed: bool,
    finished: bool,
}

/// Event log writing to any output
pub struct EventLog<S> {
    state: Mutex<LogState<S>>,
    start: Instant,
}

/// Event log for the sending end
pub type SenderLog = EventLog<SenderStats>;

/// Event log for the receiving end
pub type ReceiverLog = EventLog<ReceiverStats>;

impl<S: Tally> EventLog<S> {
    /// Create a log writing to `out`, starting with the column header
    pub fn new<W: Write + Send + 'static>(out: W) -> io::Result<Self> {
        let mut out: Box<dyn Write + Send> = Box::new(out);
        writeln!(
            out,
            "{:<15}{:>11}{:>10}{:<4}{:>10}{:>10}{:>10}",
            "event", "time", "", "type", "seq", "data", "ack"
        )?;

        Ok(EventLog {
            state: Mutex::new(LogState {
                out,
                stats: S::default(),
                failed: false,
                finished: false,
            }),
            start: Instant::now(),
        })
    }

    /// Create (or truncate) a log file at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file))
    }

    /// Snapshot of the statistics so far
    pub fn stats(&self) -> S {
        self.state.lock().stats.clone()
    }

    /// Append the summary block and flush
    ///
    /// Only the first call writes the summary. Returns the final statistics.
    pub fn finish(&self) -> io::Result<S> {
        let mut state = self.state.lock();
        if !state.finished {
            state.finished = true;
            let LogState { out, stats, .. } = &mut *state;
            stats.write_summary(out.as_mut())?;
            out.flush()?;
        }
        Ok(state.stats.clone())
    }
}

impl<S: Tally> EventSink for EventLog<S> {
    fn record(&self, event: Event, segment: &Segment) {
        let elapsed = self.start.elapsed().as_secs_f64();
        let mut state = self.state.lock();
        state.stats.record(&event, segment);

        if state.failed || state.finished {
            return;
        }
        let result = writeln!(
            state.out,
            "{:<15}{:>11.5}{:>10}{:<4}{:>10}{:>10}{:>10}",
            event.to_string(),
            elapsed,
            "",
            segment.flags().to_string(),
            segment.seq_no(),
            segment.data_length(),
            segment.ack_no()
        );
        if let Err(e) = result {
            warn!(error = %e, "Event log write failed, further events are not written");
            state.failed = true;
        }
    }

    fn record_payload(&self, len: usize) {
        self.state.lock().stats.record_payload(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stp_protocol::{Flags, Impairment};

    /// Shared in-memory output
    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    #[test]
    fn test_header_and_line() {
        let capture = Capture::default();
        let log = SenderLog::new(capture.clone()).unwrap();

        log.record(Event::sent(), &Segment::control(0, 0, 1000, Flags::SYN));
        log.record(
            Event::sent().with_impairment(Impairment::Drop),
            &Segment::data(1, 1, 1000, &[0u8; 100]),
        );

        let text = capture.text();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("event"));
        assert!(lines[1].starts_with("snd "));
        assert_eq!(&lines[1][36..40], "S   ");
        assert!(lines[2].starts_with("snd/drop"));
        assert!(lines[2].ends_with("         1       100         1"));
    }

    #[test]
    fn test_finish_writes_summary_once() {
        let capture = Capture::default();
        let log = SenderLog::new(capture.clone()).unwrap();
        log.record_payload(250);
        log.record(Event::sent(), &Segment::data(1, 1, 1000, &[0u8; 100]));

        let stats = log.finish().unwrap();
        log.finish().unwrap();

        assert_eq!(stats.file_size, 250);
        assert_eq!(stats.segments_transmitted, 1);
        let text = capture.text();
        assert_eq!(text.matches("Size of the file").count(), 1);
    }

    #[test]
    fn test_receiver_log_tallies() {
        let log = ReceiverLog::new(io::sink()).unwrap();
        log.record(Event::received(), &Segment::data(1, 1, 0, &[0u8; 50]));
        log.record(Event::sent().duplicate_ack(), &Segment::control(1, 1, 0, Flags::ACK));

        let stats = log.stats();
        assert_eq!(stats.data_received, 50);
        assert_eq!(stats.duplicate_acks_sent, 1);
    }
}
