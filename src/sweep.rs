//! Reconciliation sweep
//!
//! Detects and removes records that violate a declared reference, without
//! ever touching records that are merely unreferenced in the opposite
//! direction. The run is a linear pipeline — scan, classify, apply, verify —
//! with no retries: any stage failure is terminal and propagates to the
//! caller. Committed deletions are never rolled back; the sweep is not
//! transactional and re-running it over a clean store performs zero writes.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SweepError, SweepResult};
use crate::record::{RecordMapper, RecordView};
use crate::reference::Reference;
use crate::report::{SweepReport, WriteFailure};
use crate::store::DocumentStore;

/// Stages of the linear sweep state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SweepStage {
    Connected,
    Scanned,
    Classified,
    Applied,
    Verified,
    Failed,
}

impl SweepStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SweepStage::Connected => "CONNECTED",
            SweepStage::Scanned => "SCANNED",
            SweepStage::Classified => "CLASSIFIED",
            SweepStage::Applied => "APPLIED",
            SweepStage::Verified => "VERIFIED",
            SweepStage::Failed => "FAILED",
        }
    }
}

impl fmt::Display for SweepStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether the run applies corrective writes or only reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepMode {
    /// Classify, delete orphans, verify
    Sweep,
    /// Classify and report only; zero writes
    Check,
}

impl fmt::Display for SweepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepMode::Sweep => write!(f, "sweep"),
            SweepMode::Check => write!(f, "check"),
        }
    }
}

/// Fetch all source records and the target id set.
///
/// Two independent full scans; no transaction spans them. The staleness
/// window between the reads is accepted — this is a run-once maintenance
/// utility against a low-concurrency store.
pub async fn load_reference_sets(
    store: &dyn DocumentStore,
    reference: &Reference,
    mapper: RecordMapper,
) -> SweepResult<(Vec<RecordView>, HashSet<String>)> {
    let docs = store.scan(&reference.source).await?;
    let mut records = Vec::with_capacity(docs.len());
    for doc in &docs {
        let view = mapper(doc, &reference.field).map_err(|e| SweepError::InvalidRecord {
            collection: reference.source.clone(),
            detail: e.to_string(),
        })?;
        records.push(view);
    }

    let target_ids = store.ids(&reference.target).await?;
    Ok((records, target_ids))
}

/// A record is an orphan iff its reference is non-null and absent from the
/// target id set. Null or absent references are never orphans: a missing
/// reference is not a broken one.
pub fn classify_orphans(records: &[RecordView], target_ids: &HashSet<String>) -> Vec<String> {
    records
        .iter()
        .filter(|r| {
            r.reference
                .as_ref()
                .is_some_and(|target| !target_ids.contains(target))
        })
        .map(|r| r.id.clone())
        .collect()
}

/// Delete the classified orphans by identity — never by re-matching the
/// predicate, so records mutated between classification and deletion are
/// left alone. Best-effort: a failed delete is recorded and the remaining
/// deletions are still attempted.
pub async fn apply_deletions(
    store: &dyn DocumentStore,
    source: &str,
    orphan_ids: &[String],
) -> (u64, Vec<WriteFailure>) {
    let mut deleted = 0u64;
    let mut failures = Vec::new();
    for id in orphan_ids {
        match store.delete(source, id).await {
            Ok(()) => {
                debug!(collection = source, id = %id, "deleted orphan");
                deleted += 1;
            }
            Err(e) => {
                warn!(collection = source, id = %id, error = %e, "orphan deletion failed");
                failures.push(WriteFailure {
                    id: id.clone(),
                    detail: e.to_string(),
                });
            }
        }
    }
    (deleted, failures)
}

/// Re-run classification after deletion; the count must be zero for the
/// sweep to pass.
pub async fn verify(
    store: &dyn DocumentStore,
    reference: &Reference,
    mapper: RecordMapper,
) -> SweepResult<u64> {
    let (records, target_ids) = load_reference_sets(store, reference, mapper).await?;
    Ok(classify_orphans(&records, &target_ids).len() as u64)
}

/// Run one sweep over a connected store.
///
/// Connection and read failures return early with no report. Runs that
/// complete with write failures or a verification mismatch return the
/// matching error variant carrying the full report.
pub async fn run(
    store: &dyn DocumentStore,
    reference: &Reference,
    mapper: RecordMapper,
    mode: SweepMode,
) -> SweepResult<SweepReport> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    info!(%run_id, reference = %reference, mode = %mode, stage = %SweepStage::Connected, "sweep starting");

    let (records, target_ids) = load_reference_sets(store, reference, mapper).await?;
    debug!(
        records = records.len(),
        target_ids = target_ids.len(),
        stage = %SweepStage::Scanned,
        "reference sets loaded"
    );

    let orphans = classify_orphans(&records, &target_ids);
    info!(orphans = orphans.len(), stage = %SweepStage::Classified, "classification complete");

    if mode == SweepMode::Check {
        let remaining = orphans.len() as u64;
        return Ok(SweepReport {
            run_id,
            mode,
            reference: reference.clone(),
            records_scanned: records.len() as u64,
            target_ids: target_ids.len() as u64,
            orphans_found: remaining,
            orphans_deleted: 0,
            write_failures: Vec::new(),
            remaining_orphans: remaining,
            verification_passed: remaining == 0,
            final_stage: SweepStage::Classified,
            started_at,
            finished_at: Utc::now(),
        });
    }

    let (deleted, write_failures) = apply_deletions(store, &reference.source, &orphans).await;
    debug!(deleted, stage = %SweepStage::Applied, "deletions applied");

    let remaining = verify(store, reference, mapper).await?;
    let verification_passed = remaining == 0;

    let final_stage = if verification_passed && write_failures.is_empty() {
        SweepStage::Verified
    } else {
        SweepStage::Failed
    };

    let report = SweepReport {
        run_id,
        mode,
        reference: reference.clone(),
        records_scanned: records.len() as u64,
        target_ids: target_ids.len() as u64,
        orphans_found: orphans.len() as u64,
        orphans_deleted: deleted,
        write_failures,
        remaining_orphans: remaining,
        verification_passed,
        final_stage,
        started_at,
        finished_at: Utc::now(),
    };

    if !report.write_failures.is_empty() {
        return Err(SweepError::Write {
            report: Box::new(report),
        });
    }
    if !report.verification_passed {
        return Err(SweepError::VerificationMismatch {
            report: Box::new(report),
        });
    }

    info!(%run_id, deleted = report.orphans_deleted, "sweep verified clean");
    Ok(report)
}

/// Run one sweep under an optional overall deadline
pub async fn run_with_deadline(
    store: &dyn DocumentStore,
    reference: &Reference,
    mapper: RecordMapper,
    mode: SweepMode,
    deadline: Option<Duration>,
) -> SweepResult<SweepReport> {
    match deadline {
        Some(limit) => {
            // timeout polls the wrapped future first, so a zero deadline
            // would let a fast store complete the whole sweep. An already
            // expired deadline fails before the first scan instead.
            if limit.is_zero() {
                return Err(SweepError::DeadlineExceeded(0));
            }
            tokio::time::timeout(limit, run(store, reference, mapper, mode))
                .await
                .map_err(|_| SweepError::DeadlineExceeded(limit.as_secs()))?
        }
        None => run(store, reference, mapper, mode).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::json_record;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn orders_ref() -> Reference {
        Reference::new("orders", "target_id", "targets").unwrap()
    }

    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .seed(
                "orders",
                vec![
                    json!({"id": "A", "target_id": "1"}),
                    json!({"id": "B", "target_id": "99"}),
                ],
            )
            .await
            .unwrap();
        store
            .seed("targets", vec![json!({"id": "1"})])
            .await
            .unwrap();
        store
    }

    #[test]
    fn classify_flags_only_broken_references() {
        let records = vec![
            RecordView {
                id: "A".into(),
                reference: Some("1".into()),
            },
            RecordView {
                id: "B".into(),
                reference: Some("99".into()),
            },
            RecordView {
                id: "C".into(),
                reference: None,
            },
        ];
        let target_ids: HashSet<String> = ["1".to_string()].into_iter().collect();
        assert_eq!(classify_orphans(&records, &target_ids), vec!["B"]);
    }

    #[test]
    fn classify_of_empty_input_is_empty() {
        assert_eq!(classify_orphans(&[], &HashSet::new()), Vec::<String>::new());
    }

    #[tokio::test]
    async fn sweep_deletes_orphan_and_verifies_clean() {
        let store = seeded_store().await;
        let report = run(&store, &orders_ref(), json_record, SweepMode::Sweep)
            .await
            .unwrap();

        assert_eq!(report.records_scanned, 2);
        assert_eq!(report.target_ids, 1);
        assert_eq!(report.orphans_found, 1);
        assert_eq!(report.orphans_deleted, 1);
        assert_eq!(report.remaining_orphans, 0);
        assert!(report.verification_passed);
        assert_eq!(report.final_stage, SweepStage::Verified);
        assert!(report.passed());

        assert!(store.contains("orders", "A").await);
        assert!(!store.contains("orders", "B").await);
        assert_eq!(store.len("orders").await, 1);
    }

    #[tokio::test]
    async fn null_reference_is_never_an_orphan() {
        let store = MemoryStore::new();
        store
            .seed("orders", vec![json!({"id": "C", "target_id": null})])
            .await
            .unwrap();

        let report = run(&store, &orders_ref(), json_record, SweepMode::Sweep)
            .await
            .unwrap();
        assert_eq!(report.orphans_found, 0);
        assert_eq!(store.delete_calls(), 0);
        assert!(store.contains("orders", "C").await);
    }

    #[tokio::test]
    async fn empty_source_passes_trivially() {
        let store = MemoryStore::new();
        let report = run(&store, &orders_ref(), json_record, SweepMode::Sweep)
            .await
            .unwrap();
        assert_eq!(report.records_scanned, 0);
        assert_eq!(report.orphans_found, 0);
        assert_eq!(store.delete_calls(), 0);
        assert!(report.verification_passed);
    }

    #[tokio::test]
    async fn second_run_performs_zero_writes() {
        let store = seeded_store().await;
        run(&store, &orders_ref(), json_record, SweepMode::Sweep)
            .await
            .unwrap();
        let calls_after_first = store.delete_calls();

        let report = run(&store, &orders_ref(), json_record, SweepMode::Sweep)
            .await
            .unwrap();
        assert_eq!(report.orphans_found, 0);
        assert_eq!(report.orphans_deleted, 0);
        assert_eq!(store.delete_calls(), calls_after_first);
    }

    #[tokio::test]
    async fn deletion_acts_on_classified_ids_not_the_predicate() {
        let store = seeded_store().await;
        let reference = orders_ref();
        let (records, target_ids) = load_reference_sets(&store, &reference, json_record)
            .await
            .unwrap();
        let orphans = classify_orphans(&records, &target_ids);
        assert_eq!(orphans, vec!["B"]);

        // A new orphan appears between classification and deletion; it must
        // survive this pass.
        store
            .insert("orders", json!({"id": "C", "target_id": "77"}))
            .await
            .unwrap();

        let (deleted, failures) = apply_deletions(&store, &reference.source, &orphans).await;
        assert_eq!(deleted, 1);
        assert!(failures.is_empty());
        assert!(!store.contains("orders", "B").await);
        assert!(store.contains("orders", "C").await);
    }

    #[tokio::test]
    async fn write_failure_marks_run_failed_but_continues() {
        let store = MemoryStore::new();
        store
            .seed(
                "orders",
                vec![
                    json!({"id": "B", "target_id": "98"}),
                    json!({"id": "D", "target_id": "99"}),
                ],
            )
            .await
            .unwrap();
        store.fail_delete_of("B").await;

        let err = run(&store, &orders_ref(), json_record, SweepMode::Sweep)
            .await
            .unwrap_err();
        let report = err.report().expect("write error carries a report");
        assert_eq!(report.orphans_found, 2);
        assert_eq!(report.orphans_deleted, 1);
        assert_eq!(report.write_failures.len(), 1);
        assert_eq!(report.write_failures[0].id, "B");
        assert_eq!(report.remaining_orphans, 1);
        assert_eq!(report.final_stage, SweepStage::Failed);
        assert!(matches!(err, SweepError::Write { .. }));

        // The other orphan was still deleted.
        assert!(!store.contains("orders", "D").await);
    }

    #[tokio::test]
    async fn verification_mismatch_is_fatal() {
        let store = seeded_store().await;
        store.ignore_deletes().await;

        let err = run(&store, &orders_ref(), json_record, SweepMode::Sweep)
            .await
            .unwrap_err();
        assert!(matches!(err, SweepError::VerificationMismatch { .. }));
        let report = err.report().unwrap();
        assert!(report.write_failures.is_empty());
        assert_eq!(report.remaining_orphans, 1);
        assert_eq!(report.final_stage, SweepStage::Failed);
    }

    #[tokio::test]
    async fn check_mode_reports_without_writing() {
        let store = seeded_store().await;
        let report = run(&store, &orders_ref(), json_record, SweepMode::Check)
            .await
            .unwrap();
        assert_eq!(report.orphans_found, 1);
        assert_eq!(report.orphans_deleted, 0);
        assert_eq!(report.final_stage, SweepStage::Classified);
        assert!(!report.passed());
        assert_eq!(store.delete_calls(), 0);
        assert_eq!(store.len("orders").await, 2);
    }

    #[tokio::test]
    async fn malformed_record_aborts_the_scan() {
        let store = seeded_store().await;
        store
            .insert_with_key("orders", "Z", json!({"id": true, "target_id": "1"}))
            .await;

        let err = run(&store, &orders_ref(), json_record, SweepMode::Sweep)
            .await
            .unwrap_err();
        assert!(matches!(err, SweepError::InvalidRecord { .. }));
        // No partial classification was trusted: nothing got deleted.
        assert_eq!(store.delete_calls(), 0);
        assert_eq!(store.len("orders").await, 3);
    }

    struct SlowStore;

    #[async_trait]
    impl crate::store::DocumentStore for SlowStore {
        async fn scan(&self, _collection: &str) -> SweepResult<Vec<crate::store::Document>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }

        async fn ids(&self, _collection: &str) -> SweepResult<HashSet<String>> {
            Ok(HashSet::new())
        }

        async fn delete(&self, _collection: &str, _id: &str) -> SweepResult<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_aborts_a_stuck_run() {
        let err = run_with_deadline(
            &SlowStore,
            &orders_ref(),
            json_record,
            SweepMode::Sweep,
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SweepError::DeadlineExceeded(5)));
    }

    #[tokio::test]
    async fn zero_deadline_fails_before_any_write() {
        let store = seeded_store().await;
        let err = run_with_deadline(
            &store,
            &orders_ref(),
            json_record,
            SweepMode::Sweep,
            Some(Duration::ZERO),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SweepError::DeadlineExceeded(0)));
        // Even against an instant store nothing was deleted.
        assert_eq!(store.delete_calls(), 0);
        assert_eq!(store.len("orders").await, 2);
    }

    #[tokio::test]
    async fn no_deadline_runs_to_completion() {
        let store = seeded_store().await;
        let report = run_with_deadline(&store, &orders_ref(), json_record, SweepMode::Sweep, None)
            .await
            .unwrap();
        assert!(report.passed());
    }
}
