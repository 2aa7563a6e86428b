//! Error types for jitter measurement
//!
//! Configuration misuse and report-buffer exhaustion come back as
//! [`JitterError`] values. Instrument failures never do: a lost timestamp
//! aborts the process (see [`crate::fatal`]).

use crate::clock::Timebase;
use thiserror::Error;

/// Errors surfaced by the measurement core
#[derive(Error, Debug)]
pub enum JitterError {
    #[error("histogram already sized for {expected} buckets, re-init requested {found}")]
    BucketCountMismatch { expected: usize, found: usize },

    #[error("report buffer exhausted: {needed} bytes needed, capacity is {capacity}")]
    BufferExhausted { capacity: usize, needed: usize },

    #[error("timebase {0} is not available on this host")]
    TimebaseUnavailable(Timebase),

    #[error("instrument not calibrated: {0}")]
    NotCalibrated(&'static str),

    #[error("percentile must be in (0, 100], got {0}")]
    InvalidPercentile(f64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for jitter measurement operations
pub type Result<T> = std::result::Result<T, JitterError>;
