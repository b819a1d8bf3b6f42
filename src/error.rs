//! Error handling module
//!
//! Provides the unified error taxonomy for the sweep utility.

use thiserror::Error;

use crate::report::SweepReport;

/// Application-wide error type.
///
/// Connection and read failures abort a sweep before any classification is
/// trusted. Write failures are collected per-id and surfaced once the
/// remaining deletions have been attempted. A verification mismatch after a
/// sweep is always fatal, never silently ignored.
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Scan of collection '{collection}' failed: {detail}")]
    Read { collection: String, detail: String },

    #[error("Record in collection '{collection}' is unusable: {detail}")]
    InvalidRecord { collection: String, detail: String },

    #[error("Deletion of id '{id}' in collection '{collection}' failed: {detail}")]
    Delete {
        collection: String,
        id: String,
        detail: String,
    },

    #[error(
        "{} deletion(s) failed in collection '{}'",
        .report.write_failures.len(),
        .report.reference.source
    )]
    Write { report: Box<SweepReport> },

    #[error(
        "Verification found {} remaining orphan(s) for {}",
        .report.remaining_orphans,
        .report.reference
    )]
    VerificationMismatch { report: Box<SweepReport> },

    #[error("Invalid reference declaration: {0}")]
    Reference(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sweep exceeded the {0}s deadline")]
    DeadlineExceeded(u64),

    #[error("Sweep cancelled by operator")]
    Cancelled,
}

impl From<crate::config::ConfigError> for SweepError {
    fn from(err: crate::config::ConfigError) -> Self {
        SweepError::Config(err.to_string())
    }
}

impl SweepError {
    /// The completed-but-failed variants still carry the full report so the
    /// caller can emit it before propagating the failure.
    pub fn report(&self) -> Option<&SweepReport> {
        match self {
            SweepError::Write { report } | SweepError::VerificationMismatch { report } => {
                Some(report)
            }
            _ => None,
        }
    }
}

/// Result type alias for sweep operations
pub type SweepResult<T> = Result<T, SweepError>;
