//! Binary entry point: parses the CLI, builds the capture source and run configuration,
//! drives the multi-run session, and maps the outcome onto the exit codes named in
//! SPEC_FULL.md §6/§7.

use std::sync::Arc;

use clap::Parser;

use flowgate::capture::synthetic::SyntheticCaptureSource;
#[cfg(target_os = "linux")]
use flowgate::capture::socket::LinuxPacketSocket;
use flowgate::capture::CaptureSource;
use flowgate::cli::{Cli, InternalConfig};
use flowgate::config::DEFAULT_TRAFFIC_RATE;
use flowgate::metrics::Metadata;
use flowgate::{controller, init_logging, regression, reporters, runloop};

const EXIT_SUCCESS: i32 = 0;
const EXIT_FATAL: i32 = 1;
const EXIT_REGRESSION: i32 = 2;
const EXIT_INSUFFICIENT_SAMPLE: i32 = 3;
const EXIT_CONFIG_MISMATCH: i32 = 4;

fn main() {
    let cli = Cli::parse();
    let config = InternalConfig::from(&cli);
    init_logging(config.debug);

    let code = run(&config);
    std::process::exit(code);
}

fn open_capture_source(config: &InternalConfig) -> Box<dyn CaptureSource> {
    #[cfg(target_os = "linux")]
    {
        match LinuxPacketSocket::new(&config.interface) {
            Ok(socket) => return Box::new(socket),
            Err(e) => {
                tracing::warn!("falling back to synthetic capture source: {e}");
            }
        }
    }
    Box::new(SyntheticCaptureSource::new(DEFAULT_TRAFFIC_RATE))
}

fn build_metadata(config: &InternalConfig) -> Metadata {
    Metadata {
        interface: config.interface.clone(),
        filter: config.filter.as_str().to_string(),
        os: std::env::consts::OS.to_string(),
        git_sha: std::env::var("GIT_SHA").unwrap_or_else(|_| "unknown".into()),
        traffic_mode: config.traffic_mode.clone(),
        traffic_target: config.traffic_target.clone(),
        threads: config.threads as u32,
        bpf_buffer_size: 0,
        duration_sec: config.duration_sec,
        warmup_sec: config.warmup_sec,
        traffic_rate: config.traffic_rate,
    }
}

fn run(config: &InternalConfig) -> i32 {
    let is_running = match runloop::install_shutdown_flag() {
        Ok(flag) => flag,
        Err(e) => {
            tracing::error!("{e}");
            return EXIT_FATAL;
        }
    };

    let mut capture = open_capture_source(config);
    if let Err(e) = capture.set_filter(config.filter) {
        tracing::error!("{e}");
        return EXIT_FATAL;
    }

    let metadata = build_metadata(config);

    let (snapshots, summary) = match controller::run_session(
        capture.as_mut(),
        config,
        metadata.clone(),
        &is_running,
        |_run_index, _snapshot, result| reporters::report_run(result, config.runs),
    ) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("{e}");
            return EXIT_FATAL;
        }
    };

    reporters::report_summary(&summary);

    let final_snapshot = snapshots.last().expect("run_session returns at least one snapshot");
    if let Some(path) = &config.metrics_json {
        if let Err(e) = reporters::write_metrics_json(path, final_snapshot) {
            tracing::error!("failed to write metrics JSON: {e}");
        }
    }

    if summary.total_pkts_processed < config.min_packets {
        tracing::warn!(
            "insufficient sample: {} processed packets across all runs, need at least {}",
            summary.total_pkts_processed,
            config.min_packets
        );
        return EXIT_INSUFFICIENT_SAMPLE;
    }

    let Some(baseline_path) = &config.baseline else {
        return EXIT_SUCCESS;
    };

    let baseline = match regression::load_baseline(baseline_path) {
        Ok(baseline) => baseline,
        Err(e) => {
            tracing::error!("baseline comparison skipped: {e}");
            return EXIT_SUCCESS;
        }
    };

    let compat_fields = match regression::check_compatibility(&baseline, &metadata) {
        Ok(fields) => fields,
        Err(fields) => {
            reporters::print_compatibility_table(&fields);
            return if config.fail_on_regression { EXIT_CONFIG_MISMATCH } else { EXIT_SUCCESS };
        }
    };
    if !compat_fields.is_empty() {
        reporters::print_compatibility_table(&compat_fields);
    }

    let results: Vec<_> = snapshots
        .iter()
        .map(|snapshot| regression::compare_run(&baseline, snapshot, config.regression_threshold))
        .collect();

    if let Some(last) = results.last() {
        reporters::print_regression_report(last);
    }
    let persistence = regression::evaluate_persistence(&results);
    reporters::print_persistence_verdict(&persistence, config.runs);

    if persistence.any() && config.fail_on_regression {
        EXIT_REGRESSION
    } else {
        EXIT_SUCCESS
    }
}
