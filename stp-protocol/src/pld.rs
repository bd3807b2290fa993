//! Packet loss and delay emulator
//!
//! Every outgoing data segment passes through [`Pld::forward`] on its way to
//! the socket. Five Bernoulli trials are drawn in order (drop, duplicate,
//! corrupt, reorder, delay) and the first success decides what happens to
//! the segment; the remaining trials are not drawn. When none succeeds the
//! segment passes through untouched.
//!
//! A reordered segment is held back until `max_order` further segments have
//! been processed. Delayed segments sit on a single delay-line thread until
//! their deadline and are discarded if the emulator is closed first.

use crate::event::{Event, EventSink, Impairment, Retransmit};
use crate::queue::Queue;
use crate::segment::Segment;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Emulator parameters
#[derive(Debug, Clone, PartialEq)]
pub struct PldConfig {
    pub p_drop: f64,
    pub p_duplicate: f64,
    pub p_corrupt: f64,
    pub p_order: f64,
    /// Segments to let through before releasing a held one
    pub max_order: u32,
    pub p_delay: f64,
    /// Upper bound of the uniform delay, in milliseconds
    pub max_delay_ms: u64,
    /// PRNG seed shared by every trial and delay draw
    pub seed: u64,
}

impl Default for PldConfig {
    fn default() -> Self {
        PldConfig {
            p_drop: 0.0,
            p_duplicate: 0.0,
            p_corrupt: 0.0,
            p_order: 0.0,
            max_order: 0,
            p_delay: 0.0,
            max_delay_ms: 0,
            seed: 0,
        }
    }
}

/// A data segment on its way to the emulator
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub segment: Segment,
    /// Set when this is a retransmission
    pub retransmit: Option<Retransmit>,
}

impl Outgoing {
    pub fn new(segment: Segment) -> Self {
        Outgoing {
            segment,
            retransmit: None,
        }
    }

    pub fn retransmission(segment: Segment, reason: Retransmit) -> Self {
        Outgoing {
            segment,
            retransmit: Some(reason),
        }
    }

    fn event(&self) -> Event {
        Event::sent().with_retransmit(self.retransmit)
    }
}

/// Segment parked on the delay line
struct Delayed {
    due: Instant,
    /// Arrival order, breaks ties between equal deadlines
    order: u64,
    outgoing: Outgoing,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.order == other.order
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.order.cmp(&other.order))
    }
}

struct PldState {
    rng: StdRng,
    held: Option<Outgoing>,
    /// Segments still to be processed before `held` is released
    countdown: u32,
    delayed_count: u64,
}

struct PldCore {
    state: Mutex<PldState>,
    output: Arc<Queue<Segment>>,
    sink: Arc<dyn EventSink>,
}

impl PldCore {
    fn emit(&self, event: Event, segment: Segment) {
        self.sink.record(event, &segment);
        self.output.enqueue(segment);
    }

    /// Count one processed segment against the held one, releasing it at zero
    fn check_reorder(&self, state: &mut PldState) {
        state.countdown = state.countdown.saturating_sub(1);
        if state.countdown == 0 {
            if let Some(held) = state.held.take() {
                trace!(seq = held.segment.seq_no(), "Releasing reordered segment");
                let event = held.event().with_impairment(Impairment::Reorder);
                self.emit(event, held.segment);
            }
        }
    }

    fn release_delayed(&self, outgoing: Outgoing) {
        let mut state = self.state.lock();
        let event = outgoing.event().with_impairment(Impairment::Delay);
        self.emit(event, outgoing.segment);
        self.check_reorder(&mut state);
    }
}

/// Packet loss and delay emulator
pub struct Pld {
    config: PldConfig,
    core: Arc<PldCore>,
    delay_tx: Mutex<Option<Sender<Delayed>>>,
    delay_line: Mutex<Option<JoinHandle<()>>>,
}

impl Pld {
    /// Create an emulator feeding `output`
    ///
    /// Spawns the delay-line thread.
    pub fn new(
        config: PldConfig,
        output: Arc<Queue<Segment>>,
        sink: Arc<dyn EventSink>,
    ) -> std::io::Result<Self> {
        let core = Arc::new(PldCore {
            state: Mutex::new(PldState {
                rng: StdRng::seed_from_u64(config.seed),
                held: None,
                countdown: 0,
                delayed_count: 0,
            }),
            output,
            sink,
        });

        let (delay_tx, delay_rx) = channel::unbounded();
        let delay_line = {
            let core = core.clone();
            thread::Builder::new()
                .name("stp-pld-delay".into())
                .spawn(move || run_delay_line(core, delay_rx))?
        };

        Ok(Pld {
            config,
            core,
            delay_tx: Mutex::new(Some(delay_tx)),
            delay_line: Mutex::new(Some(delay_line)),
        })
    }

    pub fn config(&self) -> &PldConfig {
        &self.config
    }

    /// Subject one segment to the emulator
    pub fn forward(&self, outgoing: Outgoing) {
        let config = &self.config;
        let core = &self.core;
        let mut state = core.state.lock();

        if state.rng.gen::<f64>() < config.p_drop {
            trace!(seq = outgoing.segment.seq_no(), "Dropped");
            core.sink.record(
                outgoing.event().with_impairment(Impairment::Drop),
                &outgoing.segment,
            );
            core.check_reorder(&mut state);
        } else if state.rng.gen::<f64>() < config.p_duplicate {
            trace!(seq = outgoing.segment.seq_no(), "Duplicated");
            core.emit(outgoing.event(), outgoing.segment.duplicate());
            core.check_reorder(&mut state);
            core.emit(
                outgoing.event().with_impairment(Impairment::Duplicate),
                outgoing.segment,
            );
            core.check_reorder(&mut state);
        } else if state.rng.gen::<f64>() < config.p_corrupt {
            trace!(seq = outgoing.segment.seq_no(), "Corrupted");
            core.emit(
                outgoing.event().with_impairment(Impairment::Corrupt),
                outgoing.segment.corrupted(),
            );
            core.check_reorder(&mut state);
        } else if state.rng.gen::<f64>() < config.p_order {
            if state.held.is_none() {
                trace!(seq = outgoing.segment.seq_no(), "Held for reordering");
                state.held = Some(outgoing);
                state.countdown = config.max_order;
            } else {
                core.emit(outgoing.event(), outgoing.segment);
                core.check_reorder(&mut state);
            }
        } else if state.rng.gen::<f64>() < config.p_delay {
            let delay_ms = state.rng.gen_range(0..=config.max_delay_ms);
            trace!(seq = outgoing.segment.seq_no(), delay_ms, "Delayed");
            let order = state.delayed_count;
            state.delayed_count += 1;
            drop(state);

            let delayed = Delayed {
                due: Instant::now() + Duration::from_millis(delay_ms),
                order,
                outgoing,
            };
            if let Some(tx) = self.delay_tx.lock().as_ref() {
                let _ = tx.send(delayed);
            }
        } else {
            core.emit(outgoing.event(), outgoing.segment);
            core.check_reorder(&mut state);
        }
    }

    /// True while a segment is held back for reordering
    pub fn is_holding(&self) -> bool {
        self.core.state.lock().held.is_some()
    }

    /// Stop the delay line, discarding segments still waiting on it
    pub fn close(&self) {
        self.delay_tx.lock().take();
        if let Some(handle) = self.delay_line.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Pld {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_delay_line(core: Arc<PldCore>, rx: Receiver<Delayed>) {
    debug!("Delay line started");
    let mut pending: BinaryHeap<Reverse<Delayed>> = BinaryHeap::new();

    loop {
        let next = match pending.peek() {
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(Reverse(earliest)) => rx.recv_deadline(earliest.due),
        };

        match next {
            Ok(delayed) => pending.push(Reverse(delayed)),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        while pending
            .peek()
            .map_or(false, |Reverse(earliest)| earliest.due <= now)
        {
            if let Some(Reverse(delayed)) = pending.pop() {
                core.release_delayed(delayed.outgoing);
            }
        }
    }

    debug!(discarded = pending.len(), "Delay line stopped");
}
