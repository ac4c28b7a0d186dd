//! Unified error type for the capture harness.
//!
//! `AppError` is the single error type that can propagate out of startup, capture-source
//! acquisition, and baseline loading. Per-packet failures (parse errors, checksum mismatches,
//! queue drops) are never represented here — they are metrics-counter side effects, recorded
//! and continued past, never raised.

/// Top-level application error, one variant per failure domain.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The capture source could not be opened or configured.
    #[error("capture error: {0}")]
    Capture(String),

    /// Filesystem or OS-level I/O failure outside the capture source itself.
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid or inconsistent CLI/configuration input.
    #[error("configuration error: {0}")]
    Config(String),

    /// Baseline file missing, unreadable, or too malformed to derive required fields.
    #[error("baseline error: {0}")]
    Baseline(String),

    /// Any other unrecoverable startup failure (worker threads failed to spawn, etc).
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl AppError {
    /// Returns the error kind as a string matching the variant name, used for log correlation.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Capture(_) => "Capture",
            AppError::Io(_) => "Io",
            AppError::Config(_) => "Config",
            AppError::Baseline(_) => "Baseline",
            AppError::Fatal(_) => "Fatal",
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Baseline(err.to_string())
    }
}
