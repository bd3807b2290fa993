//! Retransmission timeout estimation and countdown
//!
//! The estimator follows Jacobson/Karels: a smoothed RTT and a smoothed
//! deviation, combined as `estimated + gamma * deviation`. The timer owns the
//! single RTT sample in flight and the single cancellable countdown.
//!
//! Consecutive timeouts for the same segment reuse the same interval; there
//! is no exponential backoff.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Initial smoothed RTT (seconds)
pub const INITIAL_ESTIMATED_RTT: f64 = 0.5;

/// Initial RTT deviation (seconds)
pub const INITIAL_DEV_RTT: f64 = 0.25;

/// Lower bound for the timeout interval (seconds)
pub const MIN_TIMEOUT_INTERVAL: f64 = 0.1;

/// RTO estimator
///
/// Tracks the smoothed RTT and its deviation, in seconds.
#[derive(Debug, Clone)]
pub struct RtoEstimator {
    estimated_rtt: f64,
    dev_rtt: f64,
    timeout_interval: f64,
    gamma: f64,
}

impl RtoEstimator {
    /// Create a new estimator with the given deviation multiplier
    pub fn new(gamma: f64) -> Self {
        RtoEstimator {
            estimated_rtt: INITIAL_ESTIMATED_RTT,
            dev_rtt: INITIAL_DEV_RTT,
            timeout_interval: INITIAL_ESTIMATED_RTT + gamma * INITIAL_DEV_RTT,
            gamma,
        }
    }

    /// Update with a new RTT sample
    pub fn update(&mut self, sample: Duration) {
        let sample = sample.as_secs_f64();

        self.estimated_rtt = 0.875 * self.estimated_rtt + 0.125 * sample;
        self.dev_rtt = 0.75 * self.dev_rtt + 0.25 * (sample - self.estimated_rtt).abs();
        self.timeout_interval =
            (self.estimated_rtt + self.gamma * self.dev_rtt).max(MIN_TIMEOUT_INTERVAL);
    }

    /// Smoothed RTT in seconds
    pub fn estimated_rtt(&self) -> f64 {
        self.estimated_rtt
    }

    /// RTT deviation in seconds
    pub fn dev_rtt(&self) -> f64 {
        self.dev_rtt
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Current retransmission timeout
    pub fn rto(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_interval)
    }
}

/// Outcome of a countdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    /// The full timeout passed
    Elapsed,
    /// [`RtoTimer::cancel`] (or [`RtoTimer::close`]) interrupted the wait
    CancelledEarly,
}

/// The RTT sample currently being timed
#[derive(Debug, Clone, Copy)]
struct RttSample {
    seq_no: u32,
    expected_ack: u32,
    started: Instant,
}

struct SampleState {
    estimator: RtoEstimator,
    sample: Option<RttSample>,
}

#[derive(Default)]
struct CountdownState {
    /// A countdown has been requested but not started
    armed: bool,
    running: bool,
    cancelled: bool,
    closed: bool,
}

/// Retransmission timer
///
/// Holds the RTO estimator, the in-flight RTT sample and the countdown. Each
/// operation takes one lock and none holds it across a wait.
pub struct RtoTimer {
    samples: Mutex<SampleState>,
    countdown: Mutex<CountdownState>,
    wake: Condvar,
}

impl RtoTimer {
    pub fn new(gamma: f64) -> Self {
        RtoTimer {
            samples: Mutex::new(SampleState {
                estimator: RtoEstimator::new(gamma),
                sample: None,
            }),
            countdown: Mutex::new(CountdownState::default()),
            wake: Condvar::new(),
        }
    }

    /// Current retransmission timeout
    pub fn rto(&self) -> Duration {
        self.samples.lock().estimator.rto()
    }

    /// Snapshot of the estimator
    pub fn estimator(&self) -> RtoEstimator {
        self.samples.lock().estimator.clone()
    }

    /// Begin timing the segment `seq_no` carrying `data_length` bytes
    ///
    /// Does nothing if a sample is already in flight.
    pub fn start_sample(&self, seq_no: u32, data_length: u32) {
        let mut state = self.samples.lock();
        if state.sample.is_some() {
            return;
        }
        state.sample = Some(RttSample {
            seq_no,
            expected_ack: seq_no.wrapping_add(data_length),
            started: Instant::now(),
        });
    }

    pub fn is_sampling(&self) -> bool {
        self.samples.lock().sample.is_some()
    }

    /// Sequence number of the segment being timed
    pub fn sampled_seq_no(&self) -> Option<u32> {
        self.samples.lock().sample.map(|s| s.seq_no)
    }

    /// Acknowledgement number that completes the current sample
    pub fn sampled_ack_no(&self) -> Option<u32> {
        self.samples.lock().sample.map(|s| s.expected_ack)
    }

    /// Finish the current sample and fold it into the estimate
    ///
    /// Returns the measured RTT, or `None` if no sample was in flight.
    pub fn stop_sample(&self) -> Option<Duration> {
        let mut state = self.samples.lock();
        let sample = state.sample.take()?;
        let rtt = sample.started.elapsed();
        state.estimator.update(rtt);
        Some(rtt)
    }

    /// Finish the current sample only if `ack_no` acknowledges its segment
    pub fn stop_sample_if_acked(&self, ack_no: u32) -> Option<Duration> {
        let mut state = self.samples.lock();
        match state.sample {
            Some(sample) if ack_no >= sample.expected_ack => {
                state.sample = None;
                let rtt = sample.started.elapsed();
                state.estimator.update(rtt);
                Some(rtt)
            }
            _ => None,
        }
    }

    /// Drop the current sample without updating the estimate
    pub fn cancel_sample(&self) {
        self.samples.lock().sample = None;
    }

    /// Request a countdown
    ///
    /// Requests coalesce: arming an already armed timer does nothing. A
    /// request made while a countdown runs starts another one after it.
    pub fn arm(&self) {
        let mut state = self.countdown.lock();
        if !state.armed {
            state.armed = true;
            self.wake.notify_all();
        }
    }

    /// Block until armed, then consume the request
    ///
    /// The countdown counts as running from this point, so a cancel that
    /// lands before [`RtoTimer::start_countdown`] is not lost. Returns `false`
    /// once the timer is closed.
    pub fn wait_armed(&self) -> bool {
        let mut state = self.countdown.lock();
        while !state.armed && !state.closed {
            self.wake.wait(&mut state);
        }
        if state.closed {
            return false;
        }
        state.armed = false;
        state.running = true;
        state.cancelled = false;
        true
    }

    /// Sleep for the current timeout unless cancelled first
    pub fn start_countdown(&self) -> Countdown {
        let deadline = Instant::now() + self.rto();

        let mut state = self.countdown.lock();
        if !state.running {
            state.running = true;
            state.cancelled = false;
        }
        while !state.cancelled && !state.closed {
            if self.wake.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        let outcome = if state.cancelled || state.closed {
            Countdown::CancelledEarly
        } else {
            Countdown::Elapsed
        };
        state.running = false;
        state.cancelled = false;
        outcome
    }

    /// Interrupt a running countdown. Does nothing if none is running.
    pub fn cancel(&self) {
        let mut state = self.countdown.lock();
        if state.running {
            state.cancelled = true;
            self.wake.notify_all();
        }
    }

    /// True while a countdown is in progress
    pub fn is_running(&self) -> bool {
        self.countdown.lock().running
    }

    /// Stop the timer for good, waking any waiter
    pub fn close(&self) {
        self.countdown.lock().closed = true;
        self.wake.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_initial_rto() {
        let estimator = RtoEstimator::new(4.0);
        assert_eq!(estimator.estimated_rtt(), 0.5);
        assert_eq!(estimator.dev_rtt(), 0.25);
        assert_eq!(estimator.rto(), Duration::from_millis(1500));
    }

    #[test]
    fn test_estimator_update() {
        let mut estimator = RtoEstimator::new(4.0);
        estimator.update(Duration::from_millis(100));

        // 0.875 * 0.5 + 0.125 * 0.1
        let expected_rtt = 0.45;
        // 0.75 * 0.25 + 0.25 * |0.1 - 0.45|
        let expected_dev = 0.275;
        assert!((estimator.estimated_rtt() - expected_rtt).abs() < 1e-9);
        assert!((estimator.dev_rtt() - expected_dev).abs() < 1e-9);
        assert!((estimator.rto().as_secs_f64() - (expected_rtt + 4.0 * expected_dev)).abs() < 1e-6);
    }

    #[test]
    fn test_rto_floor() {
        let mut estimator = RtoEstimator::new(0.0);
        for _ in 0..100 {
            estimator.update(Duration::ZERO);
        }
        assert_eq!(estimator.rto(), Duration::from_secs_f64(MIN_TIMEOUT_INTERVAL));
    }

    #[test]
    fn test_rto_does_not_back_off() {
        // Near-zero samples pull the timeout down to the floor
        let timer = RtoTimer::new(0.0);
        for seq in 0..60 {
            timer.start_sample(seq, 1);
            timer.stop_sample();
        }
        let rto = timer.rto();
        assert_eq!(rto, Duration::from_secs_f64(MIN_TIMEOUT_INTERVAL));

        // Back-to-back expiries of the same base, the way the timer stage runs them
        let mut intervals = Vec::new();
        timer.start_sample(1, 100);
        for _ in 0..3 {
            timer.arm();
            assert!(timer.wait_armed());
            let start = Instant::now();
            assert_eq!(timer.start_countdown(), Countdown::Elapsed);
            intervals.push(start.elapsed());
            timer.cancel_sample();
            assert_eq!(timer.rto(), rto);
        }

        for interval in &intervals {
            assert!(*interval >= rto);
            assert!(*interval < rto * 2, "interval grew to {:?}", interval);
        }
    }

    #[test]
    fn test_single_sample_in_flight() {
        let timer = RtoTimer::new(4.0);
        timer.start_sample(1, 100);
        timer.start_sample(101, 100);

        assert!(timer.is_sampling());
        assert_eq!(timer.sampled_seq_no(), Some(1));
        assert_eq!(timer.sampled_ack_no(), Some(101));
    }

    #[test]
    fn test_stop_sample_updates_estimate() {
        let timer = RtoTimer::new(4.0);
        timer.start_sample(1, 100);
        let rtt = timer.stop_sample().unwrap();

        assert!(rtt < Duration::from_millis(100));
        assert!(!timer.is_sampling());
        assert!(timer.estimator().estimated_rtt() < INITIAL_ESTIMATED_RTT);
        assert!(timer.stop_sample().is_none());
    }

    #[test]
    fn test_stop_sample_if_acked() {
        let timer = RtoTimer::new(4.0);
        timer.start_sample(101, 100);

        assert!(timer.stop_sample_if_acked(101).is_none());
        assert!(timer.is_sampling());
        assert!(timer.stop_sample_if_acked(201).is_some());
        assert!(!timer.is_sampling());
    }

    #[test]
    fn test_cancel_sample_keeps_estimate() {
        let timer = RtoTimer::new(4.0);
        timer.start_sample(1, 100);
        timer.cancel_sample();

        assert!(!timer.is_sampling());
        assert_eq!(timer.estimator().estimated_rtt(), INITIAL_ESTIMATED_RTT);
    }

    #[test]
    fn test_countdown_elapses() {
        let timer = RtoTimer::new(0.0);
        {
            let mut state = timer.samples.lock();
            for _ in 0..50 {
                state.estimator.update(Duration::ZERO);
            }
        }

        let start = Instant::now();
        assert_eq!(timer.start_countdown(), Countdown::Elapsed);
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(!timer.is_running());
    }

    #[test]
    fn test_countdown_cancelled_early() {
        let timer = Arc::new(RtoTimer::new(4.0));
        let waiter = {
            let timer = timer.clone();
            thread::spawn(move || {
                let start = Instant::now();
                (timer.start_countdown(), start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(30));
        timer.cancel();

        let (outcome, waited) = waiter.join().unwrap();
        assert_eq!(outcome, Countdown::CancelledEarly);
        assert!(waited < Duration::from_millis(1500));
    }

    #[test]
    fn test_cancel_without_countdown_is_noop() {
        let timer = RtoTimer::new(0.0);
        timer.cancel();
        timer.cancel();
        {
            let mut state = timer.samples.lock();
            for _ in 0..50 {
                state.estimator.update(Duration::ZERO);
            }
        }
        assert_eq!(timer.start_countdown(), Countdown::Elapsed);
    }

    #[test]
    fn test_cancel_between_arm_and_countdown() {
        let timer = RtoTimer::new(4.0);
        timer.arm();
        assert!(timer.wait_armed());
        timer.cancel();
        assert_eq!(timer.start_countdown(), Countdown::CancelledEarly);
    }

    #[test]
    fn test_close_wakes_waiters() {
        let timer = Arc::new(RtoTimer::new(4.0));
        let waiter = {
            let timer = timer.clone();
            thread::spawn(move || timer.wait_armed())
        };

        thread::sleep(Duration::from_millis(20));
        timer.close();
        assert!(!waiter.join().unwrap());
    }
}
