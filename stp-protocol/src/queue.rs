//! Unbounded FIFO handoff between pipeline stages
//!
//! Each stage of a connection owns one end of a queue: producers enqueue
//! without ever blocking, consumers block until an item arrives. Waiting is
//! done on the channel, never by polling.

use crate::shutdown::Shutdown;
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use std::time::Duration;

/// Thread-safe unbounded FIFO queue
pub struct Queue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Queue { tx, rx }
    }

    /// Append an item. Never blocks.
    pub fn enqueue(&self, item: T) {
        // Both ends live in `self`, so the channel cannot be disconnected
        let _ = self.tx.send(item);
    }

    /// Remove the oldest item, blocking until one is available
    pub fn dequeue(&self) -> T {
        loop {
            if let Ok(item) = self.rx.recv() {
                return item;
            }
        }
    }

    /// Remove the oldest item, or return `None` once `shutdown` fires
    pub fn dequeue_until(&self, shutdown: &Shutdown) -> Option<T> {
        if shutdown.is_triggered() {
            return None;
        }
        select! {
            recv(self.rx) -> item => item.ok(),
            recv(shutdown.signal()) -> _ => None,
        }
    }

    /// Remove the oldest item, waiting at most `timeout`
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Remove the oldest item if one is present
    pub fn try_dequeue(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = Queue::new();
        for i in 0..5 {
            queue.enqueue(i);
        }

        assert_eq!(queue.len(), 5);
        for i in 0..5 {
            assert_eq!(queue.dequeue(), i);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_dequeue_blocks_until_enqueue() {
        let queue = Arc::new(Queue::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue())
        };

        thread::sleep(Duration::from_millis(20));
        queue.enqueue(42u32);
        assert_eq!(consumer.join().unwrap(), 42);
    }

    #[test]
    fn test_dequeue_until_shutdown() {
        let queue: Arc<Queue<u32>> = Arc::new(Queue::new());
        let shutdown = Arc::new(Shutdown::new());
        let consumer = {
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || queue.dequeue_until(&shutdown))
        };

        thread::sleep(Duration::from_millis(20));
        shutdown.trigger();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_many_producers() {
        let queue = Arc::new(Queue::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        queue.enqueue(p * 1000 + i);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut last_seen = [None; 4];
        for _ in 0..400 {
            let item = queue.dequeue();
            let (p, i) = (item / 1000, item % 1000);
            // Items from one producer keep their relative order
            if let Some(prev) = last_seen[p] {
                assert!(i > prev);
            }
            last_seen[p] = Some(i);
        }
        assert!(queue.try_dequeue().is_none());
    }
}
