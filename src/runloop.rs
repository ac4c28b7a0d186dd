//! The per-run state machine: INIT → WARMUP → MEASURE → DRAIN → DONE, with a SHUTDOWN
//! sink reachable from any of the three active states on SIGINT/SIGTERM.
//!
//! A single `RunLoop` invocation drives one measurement run against a long-lived capture
//! source, work queue, and worker pool shared across every run in the session — only the
//! metrics counters are reset per run (see `Metrics::init`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::capture::{CaptureRead, CaptureSource};
use crate::cli::InternalConfig;
use crate::config::{DRAIN_SLEEP_MS, IDLE_POLL_SLEEP_MS};
use crate::metrics::{now_ns, Metrics, MetricsSnapshot};
use crate::packet::PacketRecord;
use crate::queue::WorkQueue;
use crate::reporters;
use crate::traffic::TrafficGenerator;

const MAX_FRAME_SIZE: usize = 65_535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Warmup,
    Measure,
    Drain,
    Done,
}

/// Installs a process-wide `AtomicBool` that signal-hook clears on SIGINT/SIGTERM, and
/// returns a clone the run loop polls every iteration.
pub fn install_shutdown_flag() -> Result<Arc<AtomicBool>, crate::error::AppError> {
    let flag = Arc::new(AtomicBool::new(true));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag))
        .map_err(|e| crate::error::AppError::Fatal(format!("failed to install SIGINT handler: {e}")))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))
        .map_err(|e| crate::error::AppError::Fatal(format!("failed to install SIGTERM handler: {e}")))?;
    Ok(flag)
}

/// Runs one measurement run to completion and returns its metrics snapshot.
///
/// `is_running` is shared across every run in the session; once it clears, the current
/// run drains and finishes early, and the controller should not start another run.
pub fn run_single(
    capture: &mut dyn CaptureSource,
    queue: &WorkQueue,
    metrics: &Metrics,
    config: &InternalConfig,
    is_running: &Arc<AtomicBool>,
) -> MetricsSnapshot {
    metrics.init();

    let mut traffic = match TrafficGenerator::start(&config.traffic_mode, &config.traffic_target, config.traffic_rate) {
        Ok(generator) => Some(generator),
        Err(e) => {
            tracing::warn!("traffic generator did not start: {e}");
            None
        }
    };

    let loop_start = Instant::now();
    let warmup_end = loop_start + Duration::from_secs(config.warmup_sec);
    let measure_end = if config.duration_sec == 0 {
        None
    } else {
        Some(warmup_end + Duration::from_secs(config.duration_sec))
    };

    let mut state = if config.warmup_sec == 0 {
        metrics.start();
        RunState::Measure
    } else {
        RunState::Warmup
    };

    let mut packet_count: u64 = 0;
    let mut buf = vec![0u8; MAX_FRAME_SIZE];

    let stats_tick_interval = (config.stats_interval_sec > 0).then(|| Duration::from_secs(config.stats_interval_sec));
    let human_tick_interval =
        (config.metrics_interval_ms > 0).then(|| Duration::from_millis(config.metrics_interval_ms));
    let mut last_stats_tick = Instant::now();
    let mut last_human_tick = Instant::now();

    loop {
        match state {
            RunState::Warmup => {
                if !is_running.load(Ordering::Relaxed) {
                    metrics.stop_capture();
                    if let Some(generator) = traffic.take() {
                        generator.stop();
                    }
                    state = RunState::Drain;
                } else if Instant::now() >= warmup_end {
                    metrics.init();
                    metrics.start();
                    last_stats_tick = Instant::now();
                    last_human_tick = Instant::now();
                    state = RunState::Measure;
                }
            }
            RunState::Measure => {
                let time_up = measure_end.map(|end| Instant::now() >= end).unwrap_or(false);
                let packets_up = config.max_packets > 0 && packet_count >= config.max_packets;
                if time_up || packets_up || !is_running.load(Ordering::Relaxed) {
                    metrics.stop_capture();
                    if let Some(generator) = traffic.take() {
                        generator.stop();
                    }
                    state = RunState::Drain;
                }
            }
            RunState::Drain => {
                std::thread::sleep(Duration::from_millis(DRAIN_SLEEP_MS));
                state = RunState::Done;
            }
            RunState::Done => break,
        }

        if state == RunState::Done {
            break;
        }

        if state == RunState::Measure {
            if let Some(interval) = stats_tick_interval {
                if last_stats_tick.elapsed() >= interval {
                    reporters::tick(&metrics.snapshot());
                    last_stats_tick = Instant::now();
                }
            }
            if let Some(interval) = human_tick_interval {
                if last_human_tick.elapsed() >= interval {
                    reporters::print_metrics_human(&metrics.snapshot());
                    last_human_tick = Instant::now();
                }
            }
        }

        if matches!(state, RunState::Warmup | RunState::Measure) {
            match capture.read_frame(&mut buf) {
                CaptureRead::Packet(len) if len > 0 => {
                    let ts = now_ns();
                    if state == RunState::Measure {
                        metrics.inc_captured(len as u32);
                        packet_count += 1;
                    }
                    let record = PacketRecord::new(&buf[..len], ts);
                    let _ = queue.enqueue(record);
                }
                CaptureRead::Packet(_) => {}
                CaptureRead::NoPacket => {
                    std::thread::sleep(Duration::from_millis(IDLE_POLL_SLEEP_MS));
                }
                CaptureRead::TransientError(e) => {
                    tracing::debug!("transient capture error: {e}");
                }
            }
        }
    }

    if let Some(generator) = traffic {
        generator.stop();
    }

    metrics.snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::SyntheticCaptureSource;

    fn test_config(warmup_sec: u64, duration_sec: u64) -> InternalConfig {
        InternalConfig {
            interface: "lo".into(),
            filter: crate::capture::Filter::None,
            duration_sec,
            warmup_sec,
            runs: 1,
            max_packets: 0,
            threads: 1,
            queue_size: 64,
            stats_interval_sec: 1,
            metrics_interval_ms: 1000,
            metrics_json: None,
            min_packets: 1,
            traffic_mode: "none".into(),
            traffic_rate: 10,
            traffic_target: "127.0.0.1".into(),
            baseline: None,
            fail_on_regression: false,
            regression_threshold: 0.10,
            debug: false,
        }
    }

    #[test]
    fn test_zero_warmup_starts_measuring_immediately() {
        let metrics = Metrics::new();
        let queue = WorkQueue::new(64, Arc::new(Metrics::new()));
        let mut source = SyntheticCaptureSource::new(2_000);
        let config = test_config(0, 1);
        let is_running = Arc::new(AtomicBool::new(true));

        let snapshot = run_single(&mut source, &queue, &metrics, &config, &is_running);
        assert!(snapshot.start_time_ns > 0);
    }

    #[test]
    fn test_shutdown_flag_ends_run_early() {
        let metrics = Metrics::new();
        let queue = WorkQueue::new(64, Arc::new(Metrics::new()));
        let mut source = SyntheticCaptureSource::new(2_000);
        let config = test_config(0, 60);
        let is_running = Arc::new(AtomicBool::new(false));

        let start = Instant::now();
        let _ = run_single(&mut source, &queue, &metrics, &config, &is_running);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_max_packets_cap_ends_measure_phase() {
        let metrics = Metrics::new();
        let queue = WorkQueue::new(64, Arc::new(Metrics::new()));
        let mut source = SyntheticCaptureSource::new(5_000);
        let mut config = test_config(0, 0);
        config.max_packets = 20;
        let is_running = Arc::new(AtomicBool::new(true));

        let snapshot = run_single(&mut source, &queue, &metrics, &config, &is_running);
        assert!(snapshot.pkts_captured >= 20);
    }

    #[test]
    fn test_disabled_tickers_do_not_panic() {
        let metrics = Metrics::new();
        let queue = WorkQueue::new(64, Arc::new(Metrics::new()));
        let mut source = SyntheticCaptureSource::new(2_000);
        let mut config = test_config(0, 1);
        config.stats_interval_sec = 0;
        config.metrics_interval_ms = 0;
        let is_running = Arc::new(AtomicBool::new(true));

        let snapshot = run_single(&mut source, &queue, &metrics, &config, &is_running);
        assert!(snapshot.start_time_ns > 0);
    }
}
