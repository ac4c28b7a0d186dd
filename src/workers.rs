//! Fixed-size worker thread pool: dequeue, parse, observe, drop.
//!
//! Observation is gated on `metrics.is_active()`, which is how the warm-up phase excludes
//! itself from the measurement window without the workers needing to know about run-loop
//! phases at all.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::metrics::{now_ns, Metrics};
use crate::packet::{classify_ethertype, classify_ip_protocol, format_packet_dump};
use crate::queue::WorkQueue;

pub struct WorkerPool {
    queue: Arc<WorkQueue>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` named worker threads, each looping until the queue shuts down
    /// and drains.
    pub fn new(count: usize, queue: Arc<WorkQueue>, metrics: Arc<Metrics>, debug: bool) -> Self {
        let mut handles = Vec::with_capacity(count);
        for id in 0..count {
            let worker_queue = Arc::clone(&queue);
            let worker_metrics = Arc::clone(&metrics);
            let handle = std::thread::Builder::new()
                .name(format!("capture-worker-{id}"))
                .spawn(move || worker_loop(worker_queue, worker_metrics, debug))
                .expect("failed to spawn capture worker thread");
            handles.push(handle);
        }
        WorkerPool { queue, handles }
    }

    /// Flips the queue's running flag, wakes every blocked worker, joins them all, then
    /// drops any records still queued.
    pub fn shutdown_and_join(self) {
        self.queue.shutdown();
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(queue: Arc<WorkQueue>, metrics: Arc<Metrics>, debug: bool) {
    while let Some(record) = queue.dequeue_blocking() {
        match record.parse() {
            None => {
                metrics.inc_parse_errors();
            }
            Some(parsed) => {
                if !parsed.ipv4_checksum_valid.unwrap_or(true) {
                    metrics.inc_checksum_failures();
                }

                if !metrics.is_active() {
                    continue;
                }

                metrics.record_ethertype(classify_ethertype(parsed.ethernet.ethertype));

                if let Some(ipv4) = parsed.ipv4 {
                    metrics.record_protocol(classify_ip_protocol(ipv4.protocol));
                } else if let Some(next_header) = parsed.ipv6_next_header {
                    metrics.record_protocol(classify_ip_protocol(next_header));
                }

                let latency_ns = now_ns().saturating_sub(record.capture_ts_ns);
                metrics.observe_latency(latency_ns);
                metrics.inc_processed(record.packet_length);

                if debug {
                    tracing::trace!("{}", format_packet_dump(&parsed, record.packet_length));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketRecord;

    fn ipv4_tcp_frame() -> Vec<u8> {
        let mut pkt = vec![0u8; 14 + 20 + 20];
        pkt[12] = 0x08;
        pkt[13] = 0x00;
        pkt[14] = 0x45;
        pkt[14 + 9] = 6; // TCP
        pkt
    }

    #[test]
    fn test_worker_processes_queued_records_only_when_active() {
        let metrics = Arc::new(Metrics::new());
        let queue = Arc::new(WorkQueue::new(16, Arc::clone(&metrics)));
        let pool = WorkerPool::new(2, Arc::clone(&queue), Arc::clone(&metrics), false);

        // Enqueue before metrics are active: these should be parsed but not counted as processed.
        for _ in 0..5 {
            queue
                .enqueue(PacketRecord::new(&ipv4_tcp_frame(), now_ns()))
                .unwrap();
        }
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert_eq!(metrics.snapshot().pkts_processed, 0);

        metrics.start();
        for _ in 0..5 {
            queue
                .enqueue(PacketRecord::new(&ipv4_tcp_frame(), now_ns()))
                .unwrap();
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
        pool.shutdown_and_join();

        let snap = metrics.snapshot();
        assert_eq!(snap.pkts_processed, 5);
        assert_eq!(snap.ether_ipv4, 5);
        assert_eq!(snap.proto_tcp, 5);
    }

    #[test]
    fn test_worker_counts_parse_errors_for_short_frames() {
        let metrics = Arc::new(Metrics::new());
        let queue = Arc::new(WorkQueue::new(16, Arc::clone(&metrics)));
        let pool = WorkerPool::new(1, Arc::clone(&queue), Arc::clone(&metrics), false);
        metrics.start();
        queue.enqueue(PacketRecord::new(&[0u8; 10], now_ns())).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(30));
        pool.shutdown_and_join();
        assert_eq!(metrics.snapshot().parse_errors, 1);
    }
}
