//! Sync run bookkeeping: per-item outcomes, aggregate statistics, and the
//! [`SyncRun`] audit record with its finalization rules.
//!
//! A run is created `running`, mutated only by the orchestrator, and
//! finalized exactly once into `success`, `partial`, or `failed`.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which reconciliation strategy a run used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Full,
    Incremental,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Full => "full",
            SyncKind::Incremental => "incremental",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(SyncKind::Full),
            "incremental" => Some(SyncKind::Incremental),
            _ => None,
        }
    }
}

/// Lifecycle state of a [`SyncRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "partial" => Some(RunStatus::Partial),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Classification of a single item's reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// No row existed for the external id; one was inserted.
    Created,
    /// A row existed and its upstream-owned fields changed.
    Updated,
    /// A row existed with identical content; only `last_synced_at` moved.
    Unchanged,
    /// The store rejected the write.
    Failed,
}

/// A per-item reconciliation failure. Data, not control flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub external_id: String,
    pub message: String,
}

impl std::fmt::Display for ItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.external_id.is_empty() {
            write!(f, "(no external id): {}", self.message)
        } else {
            write!(f, "{}: {}", self.external_id, self.message)
        }
    }
}

/// Aggregate outcome counts for one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub failed: u64,
    pub errors: Vec<ItemError>,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a non-failed outcome. Failures go through [`SyncStats::record_failure`].
    pub fn record(&mut self, outcome: ItemOutcome) {
        self.processed += 1;
        match outcome {
            ItemOutcome::Created => self.created += 1,
            ItemOutcome::Updated => self.updated += 1,
            ItemOutcome::Unchanged => self.unchanged += 1,
            ItemOutcome::Failed => self.failed += 1,
        }
    }

    pub fn record_failure(&mut self, external_id: &str, message: impl Into<String>) {
        self.record(ItemOutcome::Failed);
        self.errors.push(ItemError {
            external_id: external_id.to_string(),
            message: message.into(),
        });
    }

    /// A failure outside reconciliation, such as retiring an item that is
    /// gone upstream. Makes the run `partial` without counting as processed.
    pub fn record_retire_failure(&mut self, external_id: &str, message: impl Into<String>) {
        self.failed += 1;
        self.errors.push(ItemError {
            external_id: external_id.to_string(),
            message: format!("retire failed: {}", message.into()),
        });
    }

    /// Fold another pass (e.g. one batch) into this one.
    pub fn merge(&mut self, other: SyncStats) {
        self.processed += other.processed;
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
        self.errors.extend(other.errors);
    }

    /// `success` iff nothing failed, else `partial`.
    pub fn run_status(&self) -> RunStatus {
        if self.failed == 0 {
            RunStatus::Success
        } else {
            RunStatus::Partial
        }
    }
}

/// Audit record for one synchronization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: i64,
    pub source: String,
    pub kind: SyncKind,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub records_processed: u64,
    pub records_created: u64,
    pub records_updated: u64,
    pub records_unchanged: u64,
    pub records_failed: u64,
    /// Run-level failure first (if any), then per-item failures, bounded.
    pub error_summary: Vec<String>,
    /// Pagination metadata and strategy parameters, for diagnosis.
    pub details: serde_json::Value,
}

impl SyncRun {
    /// A fresh `running` record. The id is assigned by the run log.
    pub fn started(id: i64, source: &str, kind: SyncKind, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            source: source.to_string(),
            kind,
            status: RunStatus::Running,
            started_at,
            completed_at: None,
            duration_seconds: None,
            records_processed: 0,
            records_created: 0,
            records_updated: 0,
            records_unchanged: 0,
            records_failed: 0,
            error_summary: Vec::new(),
            details: serde_json::json!({}),
        }
    }

    /// Move the run into its terminal state.
    ///
    /// With `failure` set the run is `failed` and the failure message heads
    /// the error summary; otherwise the status follows [`SyncStats::run_status`].
    /// Errors if the run was already finalized.
    pub fn finalize(
        &mut self,
        stats: &SyncStats,
        failure: Option<&str>,
        completed_at: DateTime<Utc>,
        max_errors: usize,
    ) -> Result<()> {
        if self.status.is_terminal() {
            bail!("sync run {} is already {}", self.id, self.status.as_str());
        }

        self.records_processed = stats.processed;
        self.records_created = stats.created;
        self.records_updated = stats.updated;
        self.records_unchanged = stats.unchanged;
        self.records_failed = stats.failed;

        let mut summary = Vec::new();
        if let Some(msg) = failure {
            summary.push(msg.to_string());
        }
        summary.extend(summarize_errors(&stats.errors, max_errors));
        self.error_summary = summary;

        self.status = match failure {
            Some(_) => RunStatus::Failed,
            None => stats.run_status(),
        };
        self.completed_at = Some(completed_at);
        let elapsed_ms = (completed_at - self.started_at).num_milliseconds().max(0);
        self.duration_seconds = Some(elapsed_ms as f64 / 1000.0);
        Ok(())
    }
}

/// Render per-item errors as summary lines, keeping at most `limit` of them
/// and appending an overflow marker for the rest.
pub fn summarize_errors(errors: &[ItemError], limit: usize) -> Vec<String> {
    let mut lines: Vec<String> = errors.iter().take(limit).map(|e| e.to_string()).collect();
    if errors.len() > limit {
        lines.push(format!("... and {} more", errors.len() - limit));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn stats_with(outcomes: &[ItemOutcome]) -> SyncStats {
        let mut stats = SyncStats::new();
        for (i, outcome) in outcomes.iter().enumerate() {
            if *outcome == ItemOutcome::Failed {
                stats.record_failure(&format!("X-{}", i), "constraint failed");
            } else {
                stats.record(*outcome);
            }
        }
        stats
    }

    #[test]
    fn status_is_success_iff_nothing_failed() {
        let sequences: Vec<Vec<ItemOutcome>> = vec![
            vec![],
            vec![ItemOutcome::Created, ItemOutcome::Updated],
            vec![ItemOutcome::Unchanged, ItemOutcome::Failed],
            vec![ItemOutcome::Failed],
            vec![ItemOutcome::Created, ItemOutcome::Failed, ItemOutcome::Updated],
        ];
        for seq in sequences {
            let stats = stats_with(&seq);
            let started = Utc::now();
            let mut run = SyncRun::started(1, "erp", SyncKind::Full, started);
            run.finalize(&stats, None, started + Duration::seconds(2), 50)
                .unwrap();
            let expected = if stats.failed == 0 {
                RunStatus::Success
            } else {
                RunStatus::Partial
            };
            assert_eq!(run.status, expected, "outcomes: {:?}", seq);
            assert_eq!(run.records_processed, seq.len() as u64);
        }
    }

    #[test]
    fn retire_failure_makes_the_run_partial() {
        let mut stats = stats_with(&[ItemOutcome::Unchanged, ItemOutcome::Unchanged]);
        stats.record_retire_failure("SKU-9", "database is locked");
        assert_eq!((stats.processed, stats.failed), (2, 1));

        let started = Utc::now();
        let mut run = SyncRun::started(1, "erp", SyncKind::Full, started);
        run.finalize(&stats, None, started, 50).unwrap();
        assert_eq!(run.status, RunStatus::Partial);
        assert_eq!(
            run.error_summary,
            vec!["SKU-9: retire failed: database is locked".to_string()]
        );
    }

    #[test]
    fn failure_yields_failed_with_nonempty_summary() {
        let started = Utc::now();
        let mut run = SyncRun::started(7, "erp", SyncKind::Incremental, started);
        run.finalize(
            &SyncStats::new(),
            Some("authentication rejected: HTTP 401"),
            started,
            50,
        )
        .unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_summary[0], "authentication rejected: HTTP 401");
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn finalize_happens_once() {
        let started = Utc::now();
        let mut run = SyncRun::started(3, "erp", SyncKind::Full, started);
        run.finalize(&SyncStats::new(), None, started, 50).unwrap();
        assert!(run.finalize(&SyncStats::new(), None, started, 50).is_err());
        assert_eq!(run.status, RunStatus::Success);
    }

    #[test]
    fn duration_is_measured_in_seconds() {
        let started = Utc::now();
        let mut run = SyncRun::started(1, "erp", SyncKind::Full, started);
        run.finalize(
            &SyncStats::new(),
            None,
            started + Duration::milliseconds(2500),
            50,
        )
        .unwrap();
        assert_eq!(run.duration_seconds, Some(2.5));
    }

    #[test]
    fn error_summary_is_bounded() {
        let outcomes = vec![ItemOutcome::Failed; 8];
        let stats = stats_with(&outcomes);
        let lines = summarize_errors(&stats.errors, 5);
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "X-0: constraint failed");
        assert_eq!(lines[5], "... and 3 more");
    }

    #[test]
    fn merge_accumulates_batches() {
        let mut total = stats_with(&[ItemOutcome::Created]);
        total.merge(stats_with(&[ItemOutcome::Updated, ItemOutcome::Failed]));
        assert_eq!(total.processed, 3);
        assert_eq!(total.created, 1);
        assert_eq!(total.updated, 1);
        assert_eq!(total.failed, 1);
        assert_eq!(total.errors.len(), 1);
    }
}
