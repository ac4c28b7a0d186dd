//! Baseline comparison and regression detection for CI performance gating.
//!
//! Baseline loading is deliberately lenient: it reads whatever a prior run's JSON report
//! provides and derives anything missing (rate fields from raw counters, drop rate from
//! counts) rather than rejecting the file outright. Grounded on the original harness's
//! field-extraction-with-fallback behavior, reimplemented over `serde_json::Value` instead
//! of hand-rolled string scanning.

use std::path::Path;

use serde_json::Value;

use crate::config::MAX_BASELINE_FILE_BYTES;
use crate::error::AppError;
use crate::metrics::{Metadata, MetricsSnapshot};

/// Fields recovered from a baseline JSON report, with derivation fallbacks applied.
#[derive(Debug, Clone, Default)]
pub struct Baseline {
    pub elapsed_sec: f64,
    pub pkts_processed: u64,
    pub pps: f64,
    pub bytes_processed: u64,
    pub mbps: f64,
    pub p95_latency_ns: u64,
    pub drop_rate: f64,
    pub metadata: Option<Metadata>,
}

fn get_f64(v: &Value, path: &[&str]) -> Option<f64> {
    let mut cur = v;
    for key in path {
        cur = cur.get(key)?;
    }
    cur.as_f64()
}

fn get_u64(v: &Value, path: &[&str]) -> Option<u64> {
    let mut cur = v;
    for key in path {
        cur = cur.get(key)?;
    }
    cur.as_u64()
}

fn get_string(v: &Value, key: &str) -> String {
    v.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn get_u32(v: &Value, key: &str) -> u32 {
    v.get(key).and_then(Value::as_u64).unwrap_or(0) as u32
}

fn get_u64_field(v: &Value, key: &str) -> u64 {
    v.get(key).and_then(Value::as_u64).unwrap_or(0)
}

/// Reads and parses a baseline report, applying the same field-derivation fallbacks as
/// the original harness: `rate_pps`/`rate_mbps` are computed from raw counters when the
/// key is absent, and `drop_rate` is derived from `queue_drops + capture_drops` over
/// `captured` when not present directly.
pub fn load_baseline(path: &Path) -> Result<Baseline, AppError> {
    let file_len = std::fs::metadata(path)
        .map_err(|e| AppError::Baseline(format!("cannot stat baseline '{}': {e}", path.display())))?
        .len();
    if file_len == 0 || file_len > MAX_BASELINE_FILE_BYTES {
        return Err(AppError::Baseline(format!(
            "baseline '{}' is empty or exceeds {MAX_BASELINE_FILE_BYTES} bytes",
            path.display()
        )));
    }

    let text = std::fs::read_to_string(path)
        .map_err(|e| AppError::Baseline(format!("cannot read baseline '{}': {e}", path.display())))?;
    let json: Value = serde_json::from_str(&text)?;

    let elapsed_sec = get_f64(&json, &["capture_elapsed_sec"])
        .or_else(|| get_f64(&json, &["elapsed_sec"]))
        .unwrap_or(0.0);

    let pkts_processed = get_u64(&json, &["packets", "processed"]).unwrap_or(0);
    let pps = get_f64(&json, &["packets", "rate_pps"]).unwrap_or_else(|| {
        if elapsed_sec > 0.0 {
            pkts_processed as f64 / elapsed_sec
        } else {
            0.0
        }
    });

    let bytes_processed = get_u64(&json, &["bytes", "processed"]).unwrap_or(0);
    let mbps = get_f64(&json, &["bytes", "rate_mbps"]).unwrap_or_else(|| {
        if elapsed_sec > 0.0 {
            (bytes_processed as f64 * 8.0) / (elapsed_sec * 1e6)
        } else {
            0.0
        }
    });

    let p95_latency_ns = get_u64(&json, &["latency_ns", "p95"]).unwrap_or(0);

    let queue_drops = get_u64(&json, &["errors", "queue_drops"]).unwrap_or(0);
    let capture_drops = get_u64(&json, &["errors", "capture_drops"]).unwrap_or(0);
    let captured = get_u64(&json, &["packets", "captured"]).unwrap_or(0);
    let drop_rate = if captured > 0 {
        (queue_drops + capture_drops) as f64 / captured as f64
    } else {
        0.0
    };

    let metadata = json.get("metadata").map(|m| Metadata {
        interface: get_string(m, "interface"),
        filter: get_string(m, "filter"),
        os: get_string(m, "os"),
        git_sha: get_string(m, "git_sha"),
        traffic_mode: get_string(m, "traffic_mode"),
        traffic_target: get_string(m, "traffic_target"),
        threads: get_u32(m, "threads"),
        bpf_buffer_size: get_u32(m, "bpf_buffer_size"),
        duration_sec: get_u64_field(m, "duration_sec"),
        warmup_sec: get_u64_field(m, "warmup_sec"),
        traffic_rate: get_u32(m, "traffic_rate"),
    });

    let baseline = Baseline {
        elapsed_sec,
        pkts_processed,
        pps,
        bytes_processed,
        mbps,
        p95_latency_ns,
        drop_rate,
        metadata,
    };

    if baseline.pps <= 0.0 && baseline.pkts_processed == 0 {
        return Err(AppError::Baseline(format!(
            "baseline '{}' is missing required throughput fields",
            path.display()
        )));
    }

    Ok(baseline)
}

/// One field's compatibility check result.
#[derive(Debug, Clone)]
pub struct FieldCompat {
    pub field: &'static str,
    pub baseline: String,
    pub current: String,
    pub must_match: bool,
    pub mismatch: bool,
}

/// Checks a baseline's metadata against the current run's for comparability.
///
/// Returns `Ok(table)` (with zero or more advisory mismatches logged within) when the run
/// is comparable, or `Err(table)` when a must-match field differs — the caller should
/// print the table either way, per the original harness's behavior.
pub fn check_compatibility(baseline: &Baseline, current: &Metadata) -> Result<Vec<FieldCompat>, Vec<FieldCompat>> {
    let Some(base_meta) = &baseline.metadata else {
        tracing::warn!("baseline has no metadata section — skipping compatibility check (legacy format)");
        return Ok(Vec::new());
    };

    let mut table = Vec::new();
    let mut hard_mismatch = false;

    let mut check_str = |field: &'static str, must_match: bool, base: &str, cur: &str| {
        let mismatch = !base.is_empty() && base != cur;
        if mismatch && must_match {
            hard_mismatch = true;
        }
        table.push(FieldCompat {
            field,
            baseline: if base.is_empty() { "(not set)".into() } else { base.into() },
            current: cur.into(),
            must_match,
            mismatch,
        });
    };

    check_str("filter", true, &base_meta.filter, &current.filter);
    check_str("traffic_mode", true, &base_meta.traffic_mode, &current.traffic_mode);
    check_str("traffic_target", true, &base_meta.traffic_target, &current.traffic_target);
    check_str("interface", false, &base_meta.interface, &current.interface);
    check_str("os", false, &base_meta.os, &current.os);

    let mut check_num = |field: &'static str, must_match: bool, base: u64, cur: u64| {
        let mismatch = base > 0 && base != cur;
        if mismatch && must_match {
            hard_mismatch = true;
        }
        table.push(FieldCompat {
            field,
            baseline: if base == 0 { "(not set)".into() } else { base.to_string() },
            current: cur.to_string(),
            must_match,
            mismatch,
        });
    };

    check_num("threads", true, base_meta.threads as u64, current.threads as u64);
    check_num("warmup_sec", true, base_meta.warmup_sec, current.warmup_sec);
    check_num("duration_sec", true, base_meta.duration_sec, current.duration_sec);
    check_num("traffic_rate", true, base_meta.traffic_rate as u64, current.traffic_rate as u64);
    check_num("bpf_buffer_size", false, base_meta.bpf_buffer_size as u64, current.bpf_buffer_size as u64);

    if !base_meta.git_sha.is_empty() && base_meta.git_sha != current.git_sha {
        tracing::info!(
            "git sha differs: baseline='{}', current='{}'",
            base_meta.git_sha,
            current.git_sha
        );
    }

    if hard_mismatch {
        Err(table)
    } else {
        Ok(table)
    }
}

/// One metric's regression verdict for a single run.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricVerdict {
    pub baseline: f64,
    pub current: f64,
    pub delta_pct: f64,
    pub regressed: bool,
}

/// Per-run comparison against the baseline across all four headline metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegressionResult {
    pub threshold: f64,
    pub pps: MetricVerdict,
    pub mbps: MetricVerdict,
    pub latency_p95: MetricVerdict,
    pub drop_rate: MetricVerdict,
}

impl RegressionResult {
    pub fn any_regression(&self) -> bool {
        self.pps.regressed || self.mbps.regressed || self.latency_p95.regressed || self.drop_rate.regressed
    }
}

fn throughput_verdict(baseline: f64, current: f64, threshold: f64) -> MetricVerdict {
    let delta_pct = if baseline > 0.0 { (current - baseline) / baseline } else { 0.0 };
    let regressed = baseline > 0.0 && current < baseline * (1.0 - threshold);
    MetricVerdict { baseline, current, delta_pct, regressed }
}

fn latency_verdict(baseline_ns: u64, current_ns: u64, threshold: f64) -> MetricVerdict {
    let baseline = baseline_ns as f64;
    let current = current_ns as f64;
    let delta_pct = if baseline > 0.0 { (current - baseline) / baseline } else { 0.0 };
    let regressed = baseline > 0.0 && (current_ns as f64) > baseline * (1.0 + threshold);
    MetricVerdict { baseline, current, delta_pct, regressed }
}

fn drop_rate_verdict(baseline: f64, current: f64, threshold: f64) -> MetricVerdict {
    if baseline > 0.0 {
        let delta_pct = (current - baseline) / baseline;
        let regressed = current > baseline * (1.0 + threshold);
        MetricVerdict { baseline, current, delta_pct, regressed }
    } else {
        let delta_pct = if current > 0.0 { f64::INFINITY } else { 0.0 };
        let regressed = current > threshold;
        MetricVerdict { baseline, current, delta_pct, regressed }
    }
}

/// Compares one run's snapshot against the baseline using the full four-metric rule.
pub fn compare_run(baseline: &Baseline, snapshot: &MetricsSnapshot, threshold: f64) -> RegressionResult {
    RegressionResult {
        threshold,
        pps: throughput_verdict(baseline.pps, snapshot.pps(), threshold),
        mbps: throughput_verdict(baseline.mbps, snapshot.mbps(), threshold),
        latency_p95: latency_verdict(baseline.p95_latency_ns, snapshot.percentile(0.95), threshold),
        drop_rate: drop_rate_verdict(baseline.drop_rate, snapshot.drop_rate(), threshold),
    }
}

/// Final session verdict after applying the persistence rule across every run's result.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersistenceVerdict {
    pub pps_persistent: bool,
    pub mbps_persistent: bool,
    pub latency_persistent: bool,
    pub drop_rate_persistent: bool,
}

impl PersistenceVerdict {
    pub fn any(&self) -> bool {
        self.pps_persistent || self.mbps_persistent || self.latency_persistent || self.drop_rate_persistent
    }
}

/// `ceil(3R/5)`, minimum 1 — the number of regressed runs needed for a metric to count as
/// persistently regressed.
fn persistence_floor(total_runs: usize) -> usize {
    (((3 * total_runs) + 4) / 5).max(1)
}

/// Applies the persistence rule across every run's `RegressionResult`.
pub fn evaluate_persistence(results: &[RegressionResult]) -> PersistenceVerdict {
    let floor = persistence_floor(results.len());
    let count = |pick: fn(&RegressionResult) -> bool| results.iter().filter(|r| pick(r)).count();

    PersistenceVerdict {
        pps_persistent: count(|r| r.pps.regressed) >= floor,
        mbps_persistent: count(|r| r.mbps.regressed) >= floor,
        latency_persistent: count(|r| r.latency_p95.regressed) >= floor,
        drop_rate_persistent: count(|r| r.drop_rate.regressed) >= floor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;

    fn sample_baseline(pps: f64, mbps: f64, p95_ns: u64, drop_rate: f64) -> Baseline {
        Baseline {
            elapsed_sec: 10.0,
            pkts_processed: 1000,
            pps,
            bytes_processed: 100_000,
            mbps,
            p95_latency_ns: p95_ns,
            drop_rate,
            metadata: None,
        }
    }

    #[test]
    fn test_persistence_floor_minimum_one_run() {
        assert_eq!(persistence_floor(1), 1);
    }

    #[test]
    fn test_persistence_floor_ceil_three_fifths() {
        assert_eq!(persistence_floor(5), 3);
        assert_eq!(persistence_floor(10), 6);
        assert_eq!(persistence_floor(3), 2);
    }

    #[test]
    fn test_throughput_regression_below_threshold_triggers() {
        let verdict = throughput_verdict(1000.0, 850.0, 0.10);
        assert!(verdict.regressed);
    }

    #[test]
    fn test_throughput_within_threshold_does_not_trigger() {
        let verdict = throughput_verdict(1000.0, 950.0, 0.10);
        assert!(!verdict.regressed);
    }

    #[test]
    fn test_latency_regression_above_threshold_triggers() {
        let verdict = latency_verdict(1_000_000, 1_200_000, 0.10);
        assert!(verdict.regressed);
    }

    #[test]
    fn test_drop_rate_zero_baseline_uses_threshold_directly() {
        let verdict = drop_rate_verdict(0.0, 0.15, 0.10);
        assert!(verdict.regressed);
        assert!(verdict.delta_pct.is_infinite());
    }

    #[test]
    fn test_load_baseline_rejects_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.json");
        std::fs::write(&path, vec![b'a'; (MAX_BASELINE_FILE_BYTES + 1) as usize]).unwrap();
        assert!(load_baseline(&path).is_err());
    }

    #[test]
    fn test_load_baseline_derives_missing_rate_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baseline.json");
        let json = serde_json::json!({
            "capture_elapsed_sec": 10.0,
            "packets": {"captured": 1000, "processed": 1000},
            "bytes": {"processed": 1_000_000},
            "latency_ns": {"p95": 50000},
            "errors": {"queue_drops": 0, "capture_drops": 0}
        });
        std::fs::write(&path, json.to_string()).unwrap();
        let baseline = load_baseline(&path).unwrap();
        assert!(baseline.pps > 0.0);
        assert!(baseline.mbps > 0.0);
    }

    #[test]
    fn test_compatibility_hard_mismatch_on_filter() {
        let mut baseline = sample_baseline(1000.0, 80.0, 50_000, 0.0);
        baseline.metadata = Some(Metadata {
            filter: "icmp".into(),
            threads: 4,
            warmup_sec: 2,
            duration_sec: 20,
            traffic_mode: "ping".into(),
            traffic_target: "127.0.0.1".into(),
            traffic_rate: 50,
            ..Default::default()
        });
        let current = Metadata {
            filter: "none".into(),
            threads: 4,
            warmup_sec: 2,
            duration_sec: 20,
            traffic_mode: "ping".into(),
            traffic_target: "127.0.0.1".into(),
            traffic_rate: 50,
            ..Default::default()
        };
        assert!(check_compatibility(&baseline, &current).is_err());
    }

    #[test]
    fn test_compatibility_advisory_mismatch_does_not_fail() {
        let mut baseline = sample_baseline(1000.0, 80.0, 50_000, 0.0);
        baseline.metadata = Some(Metadata {
            filter: "none".into(),
            interface: "eth0".into(),
            threads: 4,
            warmup_sec: 2,
            duration_sec: 20,
            traffic_mode: "none".into(),
            traffic_target: "127.0.0.1".into(),
            traffic_rate: 50,
            ..Default::default()
        });
        let current = Metadata {
            filter: "none".into(),
            interface: "wlan0".into(),
            threads: 4,
            warmup_sec: 2,
            duration_sec: 20,
            traffic_mode: "none".into(),
            traffic_target: "127.0.0.1".into(),
            traffic_rate: 50,
            ..Default::default()
        };
        assert!(check_compatibility(&baseline, &current).is_ok());
    }

    #[test]
    fn test_compare_run_flags_any_regression() {
        let metrics = Metrics::new();
        metrics.start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        metrics.stop_capture();
        let snapshot = metrics.snapshot();
        let baseline = sample_baseline(1_000_000.0, 8000.0, 1, 0.0);
        let result = compare_run(&baseline, &snapshot, 0.10);
        assert!(result.any_regression());
    }
}
