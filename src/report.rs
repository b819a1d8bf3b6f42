//! Sweep reports
//!
//! A `SweepReport` is the machine-consumable outcome of one run: counts at
//! every stage, per-id write failures, and the verification verdict. It
//! serializes as camelCase JSON and also renders as flat `key=value` pairs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::reference::Reference;
use crate::sweep::{SweepMode, SweepStage};

/// One deletion that could not be applied
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WriteFailure {
    pub id: String,
    pub detail: String,
}

/// Structured outcome of a single sweep run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub run_id: Uuid,
    pub mode: SweepMode,
    pub reference: Reference,
    pub records_scanned: u64,
    pub target_ids: u64,
    pub orphans_found: u64,
    pub orphans_deleted: u64,
    pub write_failures: Vec<WriteFailure>,
    /// Orphans still present at post-sweep verification (check mode reports
    /// the classified count here since nothing was deleted)
    pub remaining_orphans: u64,
    pub verification_passed: bool,
    pub final_stage: SweepStage,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SweepReport {
    /// Overall verdict: no write failures and a clean verification
    pub fn passed(&self) -> bool {
        self.write_failures.is_empty() && self.verification_passed
    }

    /// Flat key/value rendering for line-oriented consumers
    pub fn to_kv_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("runId".into(), self.run_id.to_string()),
            ("mode".into(), self.mode.to_string()),
            ("reference".into(), self.reference.to_string()),
            ("recordsScanned".into(), self.records_scanned.to_string()),
            ("targetIds".into(), self.target_ids.to_string()),
            ("orphansFound".into(), self.orphans_found.to_string()),
            ("orphansDeleted".into(), self.orphans_deleted.to_string()),
            (
                "writeFailures".into(),
                self.write_failures.len().to_string(),
            ),
            (
                "remainingOrphans".into(),
                self.remaining_orphans.to_string(),
            ),
            (
                "verificationPassed".into(),
                self.verification_passed.to_string(),
            ),
            ("finalStage".into(), self.final_stage.to_string()),
            ("startedAt".into(), self.started_at.to_rfc3339()),
            ("finishedAt".into(), self.finished_at.to_rfc3339()),
        ]
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.to_kv_pairs().into_iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}
