//! Human-facing output: the one-line-per-run summary, a periodic live ticker, the JSON
//! snapshot writer, and the regression analysis report.
//!
//! Grounded on the original harness's `regression_print_report`/live-stats formatting,
//! reimplemented over `tracing` for structured logging and plain `println!` for the
//! report table itself (a user-facing artifact, not a log line).

use std::path::Path;

use crate::controller::{RunResult, SessionSummary};
use crate::error::AppError;
use crate::metrics::MetricsSnapshot;
use crate::regression::{FieldCompat, PersistenceVerdict, RegressionResult};

/// One line per completed run: `run 2/5: 48213 pps, 412.8 mbps, p95=118us, drop=0.00%`.
pub fn report_run(result: &RunResult, total_runs: usize) {
    tracing::info!(
        "run {}/{total_runs}: {:.0} pps, {:.1} mbps, p95={}, drop={:.2}%",
        result.run_index + 1,
        result.pps,
        result.mbps,
        format_latency(result.p95_latency_ns),
        result.drop_rate * 100.0,
    );
}

/// Session-level summary line after every run completes.
pub fn report_summary(summary: &SessionSummary) {
    tracing::info!(
        "session median: {:.0} pps, {:.1} mbps, p95={}, drop={:.2}%, total processed={}",
        summary.median_pps,
        summary.median_mbps,
        format_latency(summary.median_p95_latency_ns),
        summary.median_drop_rate * 100.0,
        summary.total_pkts_processed,
    );
}

/// Periodic live ticker invoked on a fixed interval while a run is in progress. Prints
/// binary mebibytes/s for operator readability alongside the decimal-megabit figure that
/// is authoritative everywhere else (see SPEC_FULL.md §9 on the mbps formula).
pub fn tick(snapshot: &MetricsSnapshot) {
    let mib_per_sec = (snapshot.bytes_processed as f64 / (1024.0 * 1024.0)) / snapshot.capture_elapsed_sec.max(1e-3);
    tracing::info!(
        "{:.0} pps | {:.1} mbps ({:.2} MiB/s) | queue_max={} | drops={}",
        snapshot.pps(),
        snapshot.mbps(),
        mib_per_sec,
        snapshot.queue_depth_max,
        snapshot.queue_drops + snapshot.capture_drops,
    );
}

/// Detailed `[METRICS]`/`[PROTO]` dump on the `--metrics-interval-ms` cadence, separate
/// from the compact `tick` line on the `--stats-interval` cadence.
pub fn print_metrics_human(snapshot: &MetricsSnapshot) {
    let total_drops = snapshot.queue_drops + snapshot.capture_drops;
    println!(
        "[METRICS] {:.1}s | pkts: {} ({:.0}/s) | {:.2} mbps | drops: {} | latency p50/p95/p99/max: {}/{}/{}/{}",
        snapshot.elapsed_sec,
        snapshot.pkts_processed,
        snapshot.pps(),
        snapshot.mbps(),
        total_drops,
        format_latency(snapshot.percentile(0.50)),
        format_latency(snapshot.percentile(0.95)),
        format_latency(snapshot.percentile(0.99)),
        format_latency(snapshot.latency_max_ns),
    );
    println!(
        "[PROTO] L3: IPv4={} IPv6={} ARP={} other={} | L4: TCP={} UDP={} ICMP={} other={}",
        snapshot.ether_ipv4,
        snapshot.ether_ipv6,
        snapshot.ether_arp,
        snapshot.ether_other,
        snapshot.proto_tcp,
        snapshot.proto_udp,
        snapshot.proto_icmp,
        snapshot.proto_other,
    );
}

/// Writes the final metrics snapshot as pretty-printed JSON to `path`.
pub fn write_metrics_json(path: &Path, snapshot: &MetricsSnapshot) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(&snapshot.to_json())
        .map_err(|e| AppError::Io(format!("failed to serialize metrics report: {e}")))?;
    std::fs::write(path, json)?;
    Ok(())
}

fn format_latency(ns: u64) -> String {
    if ns < 1_000 {
        format!("{ns}ns")
    } else if ns < 1_000_000 {
        format!("{:.2}us", ns as f64 / 1_000.0)
    } else if ns < 1_000_000_000 {
        format!("{:.2}ms", ns as f64 / 1_000_000.0)
    } else {
        format!("{:.2}s", ns as f64 / 1_000_000_000.0)
    }
}

fn format_delta(delta_pct: f64, regressed: bool) -> String {
    let indicator = if regressed { "FAIL" } else { "OK" };
    if delta_pct.is_infinite() {
        format!("[{indicator}] N/A (baseline was 0)")
    } else {
        format!("[{indicator}] {:+.2}%", delta_pct * 100.0)
    }
}

/// Prints the full regression-analysis report table for one run's comparison, matching
/// the structure (though not the exact byte layout) of the original harness's report.
pub fn print_regression_report(result: &RegressionResult) {
    println!();
    println!("{}", "=".repeat(80));
    println!("{:^80}", "REGRESSION ANALYSIS REPORT");
    println!("{}", "=".repeat(80));
    println!("Threshold: {:.1}%\n", result.threshold * 100.0);

    println!("THROUGHPUT (packets/sec):");
    println!("  Baseline:  {:>12.2} pps", result.pps.baseline);
    println!("  Current:   {:>12.2} pps", result.pps.current);
    println!("  Delta:     {}\n", format_delta(result.pps.delta_pct, result.pps.regressed));

    println!("THROUGHPUT (mbps):");
    println!("  Baseline:  {:>12.4} mbps", result.mbps.baseline);
    println!("  Current:   {:>12.4} mbps", result.mbps.current);
    println!("  Delta:     {}\n", format_delta(result.mbps.delta_pct, result.mbps.regressed));

    println!("LATENCY (p95):");
    println!("  Baseline:  {:>12}", format_latency(result.latency_p95.baseline as u64));
    println!("  Current:   {:>12}", format_latency(result.latency_p95.current as u64));
    println!(
        "  Delta:     {}\n",
        format_delta(result.latency_p95.delta_pct, result.latency_p95.regressed)
    );

    println!("DROP RATE:");
    println!("  Baseline:  {:>12.4}%", result.drop_rate.baseline * 100.0);
    println!("  Current:   {:>12.4}%", result.drop_rate.current * 100.0);
    println!(
        "  Delta:     {}\n",
        format_delta(result.drop_rate.delta_pct, result.drop_rate.regressed)
    );

    println!("{}", "=".repeat(80));
    if result.any_regression() {
        print!("RESULT: PERFORMANCE REGRESSION DETECTED\n  Regressions found in:");
        if result.pps.regressed {
            print!(" [throughput-pps]");
        }
        if result.mbps.regressed {
            print!(" [throughput-mbps]");
        }
        if result.latency_p95.regressed {
            print!(" [latency-p95]");
        }
        if result.drop_rate.regressed {
            print!(" [drop-rate]");
        }
        println!();
    } else {
        println!("RESULT: ALL METRICS WITHIN THRESHOLD");
    }
    println!("{}\n", "=".repeat(80));
}

/// Prints the session-level persistence verdict after every run's comparison is in.
pub fn print_persistence_verdict(verdict: &PersistenceVerdict, total_runs: usize) {
    println!("Persistence across {total_runs} run(s) (floor reached ⇒ persistent regression):");
    println!("  throughput-pps:   {}", if verdict.pps_persistent { "REGRESSED" } else { "ok" });
    println!("  throughput-mbps:  {}", if verdict.mbps_persistent { "REGRESSED" } else { "ok" });
    println!("  latency-p95:      {}", if verdict.latency_persistent { "REGRESSED" } else { "ok" });
    println!("  drop-rate:        {}", if verdict.drop_rate_persistent { "REGRESSED" } else { "ok" });
}

/// Prints the metadata compatibility table emitted on a hard mismatch (or, for
/// completeness, on a clean comparison with advisory-only differences).
pub fn print_compatibility_table(fields: &[FieldCompat]) {
    eprintln!();
    eprintln!("{}", "=".repeat(80));
    eprintln!("{:^80}", "BASELINE METADATA COMPATIBILITY");
    eprintln!("{}", "=".repeat(80));
    eprintln!("{:<20} {:<25} {:<25} {}", "FIELD", "BASELINE", "CURRENT", "STATUS");
    eprintln!("{}", "-".repeat(80));
    for field in fields {
        let status = if field.mismatch {
            if field.must_match {
                "[MISMATCH]"
            } else {
                "[WARN]"
            }
        } else {
            "[OK]"
        };
        eprintln!("{:<20} {:<25} {:<25} {status}", field.field, field.baseline, field.current);
    }
    eprintln!("{}\n", "=".repeat(80));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_latency_picks_appropriate_unit() {
        assert_eq!(format_latency(500), "500ns");
        assert_eq!(format_latency(1_500), "1.50us");
        assert_eq!(format_latency(2_500_000), "2.50ms");
        assert_eq!(format_latency(3_000_000_000), "3.00s");
    }

    #[test]
    fn test_format_delta_marks_infinite_as_baseline_zero() {
        let s = format_delta(f64::INFINITY, true);
        assert!(s.contains("N/A"));
    }

    #[test]
    fn test_write_metrics_json_roundtrips() {
        let metrics = crate::metrics::Metrics::new();
        metrics.start();
        metrics.inc_processed(1500);
        metrics.stop_capture();
        let snapshot = metrics.snapshot();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_metrics_json(&path, &snapshot).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["packets"]["processed"], 1);
    }
}
