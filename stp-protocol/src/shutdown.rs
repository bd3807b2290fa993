//! Cooperative shutdown signal shared by the stages of a connection
//!
//! The signal is a channel that never carries a message: triggering it drops
//! the only sender, which disconnects every receiver at once. Stages select
//! on [`Shutdown::signal`] next to whatever they are blocked on.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// One-shot broadcast shutdown signal
pub struct Shutdown {
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
    triggered: AtomicBool,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(0);
        Shutdown {
            trigger: Mutex::new(Some(tx)),
            signal: rx,
            triggered: AtomicBool::new(false),
        }
    }

    /// Fire the signal. Idempotent.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::Release);
        self.trigger.lock().take();
    }

    /// Check whether the signal has fired
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Receiver that becomes ready (disconnected) once the signal fires
    pub fn signal(&self) -> &Receiver<()> {
        &self.signal
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
