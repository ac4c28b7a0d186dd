//! Bounded single-producer/multi-consumer work queue.
//!
//! The capture thread is the sole producer; worker threads are the consumers. Enqueue
//! never blocks: a full queue fails immediately and the queue itself accounts the drop,
//! so callers must never also increment `queue_drops` (see DESIGN.md).

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::metrics::Metrics;
use crate::packet::PacketRecord;

/// Returned by `enqueue` when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

struct Inner {
    items: VecDeque<PacketRecord>,
    is_running: bool,
}

/// A FIFO of `PacketRecord` with a configured maximum depth.
pub struct WorkQueue {
    max_depth: usize,
    state: Mutex<Inner>,
    not_empty: Condvar,
    metrics: Arc<Metrics>,
}

impl WorkQueue {
    pub fn new(max_depth: usize, metrics: Arc<Metrics>) -> Self {
        WorkQueue {
            max_depth,
            state: Mutex::new(Inner {
                items: VecDeque::with_capacity(max_depth),
                is_running: true,
            }),
            not_empty: Condvar::new(),
            metrics,
        }
    }

    /// Non-blocking. Fails immediately if the queue is at `max_depth`; the caller is
    /// then responsible for dropping `record`, but the `queue_drops` counter has
    /// already been incremented here.
    pub fn enqueue(&self, record: PacketRecord) -> Result<(), QueueFull> {
        let mut state = self.state.lock().unwrap();
        if state.items.len() >= self.max_depth {
            self.metrics.inc_queue_drops();
            return Err(QueueFull);
        }
        state.items.push_back(record);
        let depth = state.items.len() as u32;
        drop(state);
        self.metrics.update_queue_depth_max(depth);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks until a record is available or the queue is shut down and empty.
    pub fn dequeue_blocking(&self) -> Option<PacketRecord> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(record) = state.items.pop_front() {
                return Some(record);
            }
            if !state.is_running {
                return None;
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Flips the running flag and wakes every waiting consumer. Any record still
    /// queued is dropped when `Self` is dropped (the `VecDeque` takes care of this).
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.is_running = false;
        drop(state);
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: u8) -> PacketRecord {
        PacketRecord::new(&[n; 60], n as u64)
    }

    #[test]
    fn test_enqueue_succeeds_up_to_capacity_then_fails() {
        let metrics = Arc::new(Metrics::new());
        let queue = WorkQueue::new(4, Arc::clone(&metrics));
        for i in 0..4 {
            assert!(queue.enqueue(record(i)).is_ok());
        }
        for i in 4..10 {
            assert_eq!(queue.enqueue(record(i)), Err(QueueFull));
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.queue_drops, 6);
        assert_eq!(snap.queue_depth_max, 4);
    }

    #[test]
    fn test_dequeue_returns_records_in_fifo_order() {
        let metrics = Arc::new(Metrics::new());
        let queue = WorkQueue::new(10, metrics);
        queue.enqueue(record(1)).unwrap();
        queue.enqueue(record(2)).unwrap();
        let first = queue.dequeue_blocking().unwrap();
        let second = queue.dequeue_blocking().unwrap();
        assert_eq!(first.capture_ts_ns, 1);
        assert_eq!(second.capture_ts_ns, 2);
    }

    #[test]
    fn test_dequeue_returns_none_after_shutdown_and_drain() {
        let metrics = Arc::new(Metrics::new());
        let queue = WorkQueue::new(10, metrics);
        queue.enqueue(record(1)).unwrap();
        queue.shutdown();
        assert!(queue.dequeue_blocking().is_some());
        assert!(queue.dequeue_blocking().is_none());
    }

    #[test]
    fn test_shutdown_wakes_blocked_consumer() {
        let metrics = Arc::new(Metrics::new());
        let queue = Arc::new(WorkQueue::new(10, metrics));
        let consumer_queue = Arc::clone(&queue);
        let handle = std::thread::spawn(move || consumer_queue.dequeue_blocking());
        std::thread::sleep(std::time::Duration::from_millis(20));
        queue.shutdown();
        let result = handle.join().unwrap();
        assert!(result.is_none());
    }
}
