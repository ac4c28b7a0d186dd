//! Multi-run controller: drives N measurement runs over one long-lived capture source,
//! worker pool, and work queue, then reduces their snapshots to per-session medians.
//!
//! The worker pool and capture source persist across runs; only the metrics counters are
//! reset, inside `runloop::run_single`, at the top of each run and again at the
//! WARMUP→MEASURE boundary.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::capture::CaptureSource;
use crate::cli::InternalConfig;
use crate::error::AppError;
use crate::metrics::{Metadata, Metrics, MetricsSnapshot};
use crate::queue::WorkQueue;
use crate::runloop;
use crate::workers::WorkerPool;

/// Derived per-run figures used for both reporting and the session-level median.
#[derive(Debug, Clone, Copy)]
pub struct RunResult {
    pub run_index: usize,
    pub pps: f64,
    pub mbps: f64,
    pub p95_latency_ns: u64,
    pub drop_rate: f64,
    pub pkts_processed: u64,
}

impl RunResult {
    fn from_snapshot(run_index: usize, snapshot: &MetricsSnapshot) -> Self {
        RunResult {
            run_index,
            pps: snapshot.pps(),
            mbps: snapshot.mbps(),
            p95_latency_ns: snapshot.percentile(0.95),
            drop_rate: snapshot.drop_rate(),
            pkts_processed: snapshot.pkts_processed,
        }
    }
}

/// Session-level reduction across every run: the median of each of the four headline
/// metrics, computed independently (not the run that produced the median pps is
/// necessarily the run whose mbps is reported).
#[derive(Debug, Clone, Copy)]
pub struct SessionSummary {
    pub median_pps: f64,
    pub median_mbps: f64,
    pub median_p95_latency_ns: u64,
    pub median_drop_rate: f64,
    pub total_pkts_processed: u64,
}

fn median_f64(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    median_sorted(values, |a, b| (a + b) / 2.0)
}

fn median_u64(values: &mut [u64]) -> u64 {
    values.sort_unstable();
    median_sorted(values, |a, b| (a + b) / 2)
}

fn median_sorted<T: Copy>(sorted: &[T], midpoint: impl Fn(T, T) -> T) -> T {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        midpoint(sorted[n / 2 - 1], sorted[n / 2])
    }
}

fn summarize(results: &[RunResult]) -> SessionSummary {
    let mut pps: Vec<f64> = results.iter().map(|r| r.pps).collect();
    let mut mbps: Vec<f64> = results.iter().map(|r| r.mbps).collect();
    let mut p95: Vec<u64> = results.iter().map(|r| r.p95_latency_ns).collect();
    let mut drop_rate: Vec<f64> = results.iter().map(|r| r.drop_rate).collect();

    SessionSummary {
        median_pps: median_f64(&mut pps),
        median_mbps: median_f64(&mut mbps),
        median_p95_latency_ns: median_u64(&mut p95),
        median_drop_rate: median_f64(&mut drop_rate),
        total_pkts_processed: results.iter().map(|r| r.pkts_processed).sum(),
    }
}

/// Runs `config.runs` measurement runs, reporting each one via `on_run` as it completes,
/// and returns the session summary alongside every individual run's snapshot.
pub fn run_session(
    capture: &mut dyn CaptureSource,
    config: &InternalConfig,
    metadata: Metadata,
    is_running: &Arc<AtomicBool>,
    mut on_run: impl FnMut(usize, &MetricsSnapshot, &RunResult),
) -> Result<(Vec<MetricsSnapshot>, SessionSummary), AppError> {
    let metrics = Arc::new(Metrics::new());
    metrics.set_metadata(metadata);
    let queue = Arc::new(WorkQueue::new(config.queue_size, Arc::clone(&metrics)));
    let pool = WorkerPool::new(config.threads, Arc::clone(&queue), Arc::clone(&metrics), config.debug);

    let mut snapshots = Vec::with_capacity(config.runs);
    let mut results = Vec::with_capacity(config.runs);

    for run_index in 0..config.runs {
        if !is_running.load(std::sync::atomic::Ordering::Relaxed) {
            break;
        }
        let snapshot = runloop::run_single(capture, &queue, &metrics, config, is_running);
        let result = RunResult::from_snapshot(run_index, &snapshot);

        if let Some(path) = &config.metrics_json {
            if config.runs > 1 {
                write_run_json(path, run_index, &snapshot)?;
            }
        }

        on_run(run_index, &snapshot, &result);
        results.push(result);
        snapshots.push(snapshot);
    }

    pool.shutdown_and_join();

    if results.is_empty() {
        return Err(AppError::Fatal("no measurement runs completed".into()));
    }

    let summary = summarize(&results);
    Ok((snapshots, summary))
}

fn write_run_json(base_path: &Path, run_index: usize, snapshot: &MetricsSnapshot) -> Result<(), AppError> {
    let stem = base_path.file_stem().unwrap_or_default().to_string_lossy();
    let ext = base_path.extension().map(|e| e.to_string_lossy().to_string()).unwrap_or_else(|| "json".into());
    let run_path = base_path.with_file_name(format!("{stem}_run{run_index}.{ext}"));
    let json = serde_json::to_string_pretty(&snapshot.to_json())
        .map_err(|e| AppError::Io(format!("failed to serialize run {run_index} report: {e}")))?;
    std::fs::write(&run_path, json)?;
    Ok(())
}
