//! Command-line surface and its conversion into the run loop's internal configuration.

use clap::Parser;

use crate::config;

fn default_interface() -> &'static str {
    if cfg!(target_os = "macos") {
        "en0"
    } else {
        "eth0"
    }
}

fn parse_traffic_rate(s: &str) -> Result<u32, String> {
    let value: u32 = s.parse().map_err(|_| format!("'{s}' is not a valid packet rate"))?;
    Ok(value.clamp(config::TRAFFIC_RATE_MIN, config::TRAFFIC_RATE_MAX))
}

fn parse_regression_threshold(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid threshold"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("threshold must be within [0, 1], got {value}"));
    }
    Ok(value)
}

/// Packet-capture performance harness with CI regression gating.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Network interface to bind for capture.
    #[arg(long, default_value_t = default_interface().to_string())]
    pub interface: String,

    /// Measurement duration in seconds (0 = unlimited).
    #[arg(short = 'd', long = "duration-sec", default_value_t = config::DEFAULT_DURATION_SECS)]
    pub duration_sec: u64,

    /// Warm-up duration in seconds, excluded from measurement.
    #[arg(long, default_value_t = config::DEFAULT_WARMUP_SECS)]
    pub warmup_sec: u64,

    /// Alias for `--duration-sec`, accepted for compatibility with the original harness's
    /// naming; both flags drive the same internal measurement window.
    #[arg(long)]
    pub measure_sec: Option<u64>,

    /// Number of measurement runs in a session.
    #[arg(long, default_value_t = config::DEFAULT_RUNS)]
    pub runs: usize,

    /// Maximum packets to capture per run (0 = unlimited).
    #[arg(short = 'n', long = "max-packets", default_value_t = 0)]
    pub max_packets: u64,

    /// Number of worker threads.
    #[arg(short = 't', long = "threads", default_value_t = config::DEFAULT_THREADS)]
    pub threads: usize,

    /// Bounded work-queue depth.
    #[arg(long = "queue-size", default_value_t = config::DEFAULT_QUEUE_SIZE)]
    pub queue_size: usize,

    /// Restrict capture to ICMPv4/ICMPv6 frames at link layer.
    #[arg(long)]
    pub icmp: bool,

    /// Interval between human-readable stats lines, in seconds (0 = disabled).
    #[arg(long = "stats-interval", default_value_t = 1)]
    pub stats_interval_sec: u64,

    /// Interval between detailed `[METRICS]`/`[PROTO]` dumps, in milliseconds (0 = disabled).
    #[arg(long = "metrics-interval-ms", default_value_t = 0)]
    pub metrics_interval_ms: u64,

    /// Path to write the final JSON metrics report.
    #[arg(long = "metrics-json")]
    pub metrics_json: Option<std::path::PathBuf>,

    /// Minimum processed-packet sum across all runs for a valid sample.
    #[arg(long = "min-packets", default_value_t = config::DEFAULT_MIN_PACKETS)]
    pub min_packets: u64,

    /// Traffic-generator mode.
    #[arg(long = "traffic", default_value = "none")]
    pub traffic_mode: String,

    /// Traffic-generator rate in packets per second, clamped to [1, 500].
    #[arg(long = "traffic-rate", default_value_t = config::DEFAULT_TRAFFIC_RATE, value_parser = parse_traffic_rate)]
    pub traffic_rate: u32,

    /// Traffic-generator target address.
    #[arg(long = "traffic-target", default_value = "127.0.0.1")]
    pub traffic_target: String,

    /// Path to a baseline JSON report to compare against.
    #[arg(long)]
    pub baseline: Option<std::path::PathBuf>,

    /// Exit non-zero when a persistent regression or metadata hard-mismatch is detected.
    #[arg(long)]
    pub fail_on_regression: bool,

    /// Regression threshold, fractional (e.g. 0.10 == 10%).
    #[arg(long = "regression-threshold", default_value_t = config::DEFAULT_REGRESSION_THRESHOLD, value_parser = parse_regression_threshold)]
    pub regression_threshold: f64,

    /// Enable debug-level logging and per-packet hex dumps.
    #[arg(long)]
    pub debug: bool,
}

/// Fully-resolved configuration consumed by the run loop and multi-run controller.
#[derive(Debug, Clone)]
pub struct InternalConfig {
    pub interface: String,
    pub filter: crate::capture::Filter,
    pub duration_sec: u64,
    pub warmup_sec: u64,
    pub runs: usize,
    pub max_packets: u64,
    pub threads: usize,
    pub queue_size: usize,
    pub stats_interval_sec: u64,
    pub metrics_interval_ms: u64,
    pub metrics_json: Option<std::path::PathBuf>,
    pub min_packets: u64,
    pub traffic_mode: String,
    pub traffic_rate: u32,
    pub traffic_target: String,
    pub baseline: Option<std::path::PathBuf>,
    pub fail_on_regression: bool,
    pub regression_threshold: f64,
    pub debug: bool,
}

impl From<&Cli> for InternalConfig {
    fn from(cli: &Cli) -> Self {
        // `--measure-sec` takes precedence over `--duration-sec` when both are given.
        let duration_sec = cli.measure_sec.unwrap_or(cli.duration_sec);
        let filter = if cli.icmp {
            crate::capture::Filter::Icmp
        } else {
            crate::capture::Filter::None
        };

        InternalConfig {
            interface: cli.interface.clone(),
            filter,
            duration_sec,
            warmup_sec: cli.warmup_sec,
            runs: cli.runs.max(1),
            max_packets: cli.max_packets,
            threads: cli.threads.max(1),
            queue_size: cli.queue_size.max(1),
            stats_interval_sec: cli.stats_interval_sec,
            metrics_interval_ms: cli.metrics_interval_ms,
            metrics_json: cli.metrics_json.clone(),
            min_packets: cli.min_packets,
            traffic_mode: cli.traffic_mode.clone(),
            traffic_rate: cli.traffic_rate,
            traffic_target: cli.traffic_target.clone(),
            baseline: cli.baseline.clone(),
            fail_on_regression: cli.fail_on_regression,
            regression_threshold: cli.regression_threshold,
            debug: cli.debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults_match_spec() {
        let cli = Cli::parse_from(["flowgate"]);
        let config = InternalConfig::from(&cli);
        assert_eq!(config.duration_sec, config::DEFAULT_DURATION_SECS);
        assert_eq!(config.warmup_sec, config::DEFAULT_WARMUP_SECS);
        assert_eq!(config.runs, config::DEFAULT_RUNS);
        assert_eq!(config.threads, config::DEFAULT_THREADS);
        assert_eq!(config.min_packets, config::DEFAULT_MIN_PACKETS);
        assert_eq!(config.traffic_rate, config::DEFAULT_TRAFFIC_RATE);
        assert_eq!(config.filter, crate::capture::Filter::None);
    }

    #[test]
    fn test_icmp_flag_sets_filter() {
        let cli = Cli::parse_from(["flowgate", "--icmp"]);
        let config = InternalConfig::from(&cli);
        assert_eq!(config.filter, crate::capture::Filter::Icmp);
    }

    #[test]
    fn test_traffic_rate_is_clamped() {
        let cli = Cli::parse_from(["flowgate", "--traffic-rate", "50000"]);
        assert_eq!(cli.traffic_rate, config::TRAFFIC_RATE_MAX);

        let cli = Cli::parse_from(["flowgate", "--traffic-rate", "0"]);
        assert_eq!(cli.traffic_rate, config::TRAFFIC_RATE_MIN);
    }

    #[test]
    fn test_measure_sec_overrides_duration_sec() {
        let cli = Cli::parse_from(["flowgate", "--duration-sec", "20", "--measure-sec", "5"]);
        let config = InternalConfig::from(&cli);
        assert_eq!(config.duration_sec, 5);
    }

    #[test]
    fn test_invalid_regression_threshold_is_rejected() {
        let result = Cli::try_parse_from(["flowgate", "--regression-threshold", "2.0"]);
        assert!(result.is_err());
    }
}
