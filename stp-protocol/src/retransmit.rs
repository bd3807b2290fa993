//! Duplicate acknowledgement tracking for fast retransmit

/// Number of duplicate ACKs that triggers a fast retransmit
pub const FAST_RETRANSMIT_THRESHOLD: u32 = 3;

/// Counts duplicate acknowledgements of the current send base
///
/// Only the third duplicate triggers; the counter then starts over, so a
/// fourth and fifth duplicate do nothing and a sixth triggers again.
#[derive(Debug, Default, Clone)]
pub struct DupAckTracker {
    ack_no: u32,
    count: u32,
}

impl DupAckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new cumulative ACK advanced the window
    pub fn on_new_ack(&mut self, ack_no: u32) {
        self.ack_no = ack_no;
        self.count = 0;
    }

    /// Record a duplicate of `ack_no`
    ///
    /// Returns `true` when the segment starting at `ack_no` should be fast
    /// retransmitted.
    pub fn on_duplicate(&mut self, ack_no: u32) -> bool {
        if ack_no != self.ack_no {
            self.ack_no = ack_no;
            self.count = 0;
        }

        self.count += 1;
        if self.count == FAST_RETRANSMIT_THRESHOLD {
            self.count = 0;
            return true;
        }
        false
    }

    /// Duplicates counted since the last trigger or new ACK
    pub fn count(&self) -> u32 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_third_duplicate_triggers() {
        let mut tracker = DupAckTracker::new();
        tracker.on_new_ack(101);

        assert!(!tracker.on_duplicate(101));
        assert!(!tracker.on_duplicate(101));
        assert!(tracker.on_duplicate(101));
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn test_fourth_and_fifth_do_not_trigger() {
        let mut tracker = DupAckTracker::new();
        tracker.on_new_ack(101);

        for _ in 0..3 {
            tracker.on_duplicate(101);
        }
        assert!(!tracker.on_duplicate(101));
        assert!(!tracker.on_duplicate(101));
        assert!(tracker.on_duplicate(101));
    }

    #[test]
    fn test_new_ack_resets_count() {
        let mut tracker = DupAckTracker::new();
        tracker.on_new_ack(101);
        tracker.on_duplicate(101);
        tracker.on_duplicate(101);

        tracker.on_new_ack(201);
        assert_eq!(tracker.count(), 0);
        assert!(!tracker.on_duplicate(201));
        assert!(!tracker.on_duplicate(201));
        assert!(tracker.on_duplicate(201));
    }

    #[test]
    fn test_duplicate_of_other_ack_starts_over() {
        let mut tracker = DupAckTracker::new();
        tracker.on_new_ack(101);
        tracker.on_duplicate(101);
        tracker.on_duplicate(101);

        assert!(!tracker.on_duplicate(301));
        assert_eq!(tracker.count(), 1);
    }
}
