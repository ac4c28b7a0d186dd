//! Traffic-generator subprocess lifecycle.
//!
//! Spawns the system `ping` binary so warm-up and measurement see identical load, and
//! reaps it through a graceful SIGINT → SIGTERM → SIGKILL escalation on shutdown.

use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::config::{TRAFFIC_SIGINT_WAIT_MS, TRAFFIC_SIGTERM_WAIT_MS};
use crate::error::AppError;

pub struct TrafficGenerator {
    child: Option<Child>,
}

impl TrafficGenerator {
    /// `mode == "none"` skips spawning entirely. `rate_pps` is clamped to [1,500] by the
    /// CLI layer before reaching here; it is translated into `ping -i <interval>`.
    pub fn start(mode: &str, target: &str, rate_pps: u32) -> Result<Self, AppError> {
        if mode == "none" {
            return Ok(TrafficGenerator { child: None });
        }
        if mode != "ping" {
            return Err(AppError::Config(format!("unknown traffic mode '{mode}'")));
        }

        let interval_sec = 1.0 / rate_pps.max(1) as f64;
        let child = Command::new("ping")
            .arg("-i")
            .arg(format!("{interval_sec:.3}"))
            .arg(target)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AppError::Io(format!("failed to spawn traffic generator: {e}")))?;

        tracing::info!("traffic generator started: ping -i {interval_sec:.3} {target}");
        Ok(TrafficGenerator { child: Some(child) })
    }

    /// SIGINT, wait 200ms; if still alive, SIGTERM, wait 100ms; if still alive, SIGKILL.
    /// Always reaps the child before returning.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = child.id() as i32;

        send_signal(pid, libc::SIGINT);
        if wait_for_exit(&mut child, Duration::from_millis(TRAFFIC_SIGINT_WAIT_MS)) {
            return;
        }

        send_signal(pid, libc::SIGTERM);
        if wait_for_exit(&mut child, Duration::from_millis(TRAFFIC_SIGTERM_WAIT_MS)) {
            return;
        }

        send_signal(pid, libc::SIGKILL);
        let _ = child.wait();
    }
}

impl Drop for TrafficGenerator {
    fn drop(&mut self) {
        if self.child.is_some() {
            tracing::warn!("TrafficGenerator dropped without stop() — force-killing child");
            self.stop_inner();
        }
    }
}

fn send_signal(pid: i32, signal: i32) {
    unsafe {
        libc::kill(pid, signal);
    }
}

fn wait_for_exit(child: &mut Child, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {
                if start.elapsed() >= timeout {
                    return false;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(_) => return true,
        }
    }
}
