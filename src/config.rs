//! Centralized runtime constants for the capture harness.
//!
//! All tunable intervals, thresholds, and counts are collected here so they can
//! be found and adjusted in a single place rather than scattered across modules.

/// Default bounded work-queue depth.
pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// Default worker thread count.
pub const DEFAULT_THREADS: usize = 4;

/// Default measurement duration in seconds (0 = unlimited).
pub const DEFAULT_DURATION_SECS: u64 = 20;

/// Default warm-up duration in seconds, excluded from measurement.
pub const DEFAULT_WARMUP_SECS: u64 = 2;

/// Default number of measurement runs in a multi-run session.
pub const DEFAULT_RUNS: usize = 5;

/// Default minimum processed-packet sum across all runs for a valid sample.
pub const DEFAULT_MIN_PACKETS: u64 = 200;

/// Default traffic-generator rate in packets per second.
pub const DEFAULT_TRAFFIC_RATE: u32 = 50;

/// Lower bound for `--traffic-rate`, inclusive.
pub const TRAFFIC_RATE_MIN: u32 = 1;

/// Upper bound for `--traffic-rate`, inclusive.
pub const TRAFFIC_RATE_MAX: u32 = 500;

/// Default regression threshold (fractional, e.g. 0.10 == 10%).
pub const DEFAULT_REGRESSION_THRESHOLD: f64 = 0.10;

/// Sleep duration when the capture source reports no packet available (milliseconds).
pub const IDLE_POLL_SLEEP_MS: u64 = 1;

/// Sleep duration after `stop_capture` to let workers finish queued records.
pub const DRAIN_SLEEP_MS: u64 = 500;

/// Wait after SIGINT before escalating the traffic generator to SIGTERM (milliseconds).
pub const TRAFFIC_SIGINT_WAIT_MS: u64 = 200;

/// Wait after SIGTERM before escalating the traffic generator to SIGKILL (milliseconds).
pub const TRAFFIC_SIGTERM_WAIT_MS: u64 = 100;

/// Number of buckets in the exponential latency histogram.
pub const LATENCY_HISTOGRAM_BUCKETS: usize = 32;

/// Maximum accepted baseline file size in bytes, guards against loading garbage/huge files.
pub const MAX_BASELINE_FILE_BYTES: u64 = 1024 * 1024;

/// Kernel receive-buffer size requested on the `AF_PACKET` capture socket.
pub const CAPTURE_RECV_BUFFER_BYTES: usize = 4 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traffic_rate_bounds_are_sane() {
        assert!(TRAFFIC_RATE_MIN <= TRAFFIC_RATE_MAX);
        assert!(DEFAULT_TRAFFIC_RATE >= TRAFFIC_RATE_MIN);
        assert!(DEFAULT_TRAFFIC_RATE <= TRAFFIC_RATE_MAX);
    }

    #[test]
    fn test_all_durations_positive() {
        assert!(DEFAULT_QUEUE_SIZE > 0);
        assert!(DEFAULT_THREADS > 0);
        assert!(DEFAULT_RUNS > 0);
        assert!(DEFAULT_MIN_PACKETS > 0);
        assert!(IDLE_POLL_SLEEP_MS > 0);
        assert!(DRAIN_SLEEP_MS > 0);
    }

    #[test]
    fn test_histogram_bucket_count_matches_u32_log2_domain() {
        assert_eq!(LATENCY_HISTOGRAM_BUCKETS, 32);
    }

    #[test]
    fn test_regression_threshold_is_fractional() {
        assert!(DEFAULT_REGRESSION_THRESHOLD > 0.0 && DEFAULT_REGRESSION_THRESHOLD < 1.0);
    }

    #[test]
    fn test_capture_recv_buffer_is_positive() {
        assert!(CAPTURE_RECV_BUFFER_BYTES > 0);
    }
}
