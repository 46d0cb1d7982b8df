//! Sync orchestrator.
//!
//! One call to [`SyncEngine::run_full`] or [`SyncEngine::run_incremental`]
//! is one [`SyncRun`]:
//!
//! ```text
//! guard ──▶ start_run (running) ──▶ fetch ──▶ map ──▶ reconcile ──▶ [sweep] ──▶ finish_run
//!                                     │                   │
//!                                     └──── run-level error ───▶ finish_run (failed)
//! ```
//!
//! Every run that gets a row also gets a terminal status. Errors raised
//! before the row exists (configuration, a concurrent run) come back as a
//! failed [`TriggerResult`] without touching the run log.
//!
//! # Full sync
//!
//! Probe; an empty upstream ends the run as `success` with zero stats.
//! Otherwise crawl every page, reconcile, then sweep items of this source
//! that the snapshot no longer contains according to `sync.prune_missing`.
//! The sweep only runs on a complete snapshot with zero item failures.
//! A retire that fails counts as an item failure, so the run ends `partial`.
//!
//! # Incremental sync
//!
//! Request records modified since the last `success` run completed
//! (default: `incremental_lookback_hours` ago). Nothing modified ends the
//! run as `success` without calling the reconciler. Skipped pages fail the
//! run so the watermark does not move past records that were never read.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use catalog_sync_core::mapper::map_record;
use catalog_sync_core::models::CatalogItem;
use catalog_sync_core::run::{RunStatus, SyncKind, SyncRun, SyncStats};
use catalog_sync_core::store::{CatalogStore, PruneMode, RunLog};

use crate::config::{Config, Credentials};
use crate::error::{ConfigError, FetchError, SyncError};
use crate::fetch::{FetchReport, FetchSettings, Fetcher};
use crate::probe::{probe_connection, ProbeReport};
use crate::reconcile::{ReconcileSettings, Reconciler};
use crate::sqlite_store::SqliteStore;
use crate::upstream::{HttpUpstream, UpstreamApi};

/// Outcome handed back to whoever triggered a run.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerResult {
    /// True for `success` and `partial` runs.
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<RunCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub failed: u64,
}

impl TriggerResult {
    pub fn from_run(run: &SyncRun) -> Self {
        let counts = RunCounts {
            processed: run.records_processed,
            created: run.records_created,
            updated: run.records_updated,
            unchanged: run.records_unchanged,
            failed: run.records_failed,
        };
        let message = match run.status {
            RunStatus::Failed => format!(
                "{} sync failed: {}",
                run.kind.as_str(),
                run.error_summary
                    .first()
                    .map(String::as_str)
                    .unwrap_or("unknown error")
            ),
            status => format!(
                "{} sync {}: {} processed, {} created, {} updated, {} unchanged, {} failed",
                run.kind.as_str(),
                status.as_str(),
                counts.processed,
                counts.created,
                counts.updated,
                counts.unchanged,
                counts.failed
            ),
        };

        Self {
            success: matches!(run.status, RunStatus::Success | RunStatus::Partial),
            message,
            run_id: Some(run.id),
            status: Some(run.status),
            stats: Some(counts),
            errors: if run.error_summary.is_empty() {
                None
            } else {
                Some(run.error_summary.clone())
            },
        }
    }

    /// A trigger that never got as far as creating a run.
    pub fn rejected(err: &SyncError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            run_id: None,
            status: None,
            stats: None,
            errors: None,
        }
    }
}

/// Stats and details gathered while a run is in flight, kept outside the
/// phase functions so a run-level failure still records what was done.
struct RunProgress {
    stats: SyncStats,
    details: serde_json::Value,
}

impl RunProgress {
    fn new(kind: SyncKind) -> Self {
        Self {
            stats: SyncStats::new(),
            details: json!({ "kind": kind.as_str() }),
        }
    }

    fn set(&mut self, key: &str, value: serde_json::Value) {
        if let Some(obj) = self.details.as_object_mut() {
            obj.insert(key.to_string(), value);
        }
    }

    fn absorb_fetch(&mut self, report: &FetchReport) {
        if let serde_json::Value::Object(fetched) = report.details() {
            for (k, v) in fetched {
                self.set(&k, v);
            }
        }
    }
}

pub struct SyncEngine {
    source: String,
    api: Arc<dyn UpstreamApi>,
    catalog: Arc<dyn CatalogStore>,
    runs: Arc<dyn RunLog>,
    fetch: FetchSettings,
    reconcile: ReconcileSettings,
    prune: PruneMode,
    lookback: chrono::Duration,
    stale_after: chrono::Duration,
    max_errors: usize,
    // in-process exclusion; the running-row check covers other processes
    gate: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        config: &Config,
        api: Arc<dyn UpstreamApi>,
        catalog: Arc<dyn CatalogStore>,
        runs: Arc<dyn RunLog>,
    ) -> Self {
        Self {
            source: config.sync.source.clone(),
            api,
            catalog,
            runs,
            fetch: FetchSettings::from_config(&config.upstream),
            reconcile: ReconcileSettings::from_config(&config.sync),
            prune: config.sync.prune_missing,
            lookback: chrono::Duration::try_hours(config.sync.incremental_lookback_hours)
                .unwrap_or(chrono::Duration::MAX),
            stale_after: i64::try_from(config.sync.stale_run_after_secs)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .unwrap_or(chrono::Duration::MAX),
            max_errors: config.sync.max_error_summary,
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Engine over the HTTP upstream and the SQLite store.
    ///
    /// Fails with [`SyncError::Config`] on a bad endpoint; credentials are
    /// passed in already validated.
    pub fn from_config(
        config: &Config,
        credentials: Credentials,
        pool: SqlitePool,
    ) -> Result<Self, SyncError> {
        let api = Arc::new(HttpUpstream::new(&config.upstream, credentials)?);
        let store = Arc::new(SqliteStore::new(pool));
        Ok(Self::new(config, api, store.clone(), store))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn run_log(&self) -> Arc<dyn RunLog> {
        self.runs.clone()
    }

    pub async fn probe_connection(&self) -> ProbeReport {
        probe_connection(self.api.as_ref(), &self.fetch).await
    }

    pub async fn run_full(&self, cancel: &CancellationToken) -> TriggerResult {
        self.trigger(SyncKind::Full, cancel).await
    }

    pub async fn run_incremental(&self, cancel: &CancellationToken) -> TriggerResult {
        self.trigger(SyncKind::Incremental, cancel).await
    }

    async fn trigger(&self, kind: SyncKind, cancel: &CancellationToken) -> TriggerResult {
        match self.execute(kind, cancel).await {
            Ok(run) => TriggerResult::from_run(&run),
            Err(e) => {
                tracing::warn!(kind = kind.as_str(), error = %e, "sync not started");
                TriggerResult::rejected(&e)
            }
        }
    }

    /// Run one sync to a terminal state.
    ///
    /// `Ok` carries the finalized run whatever its status. `Err` means no
    /// run was created, or the terminal state could not be persisted.
    pub async fn execute(
        &self,
        kind: SyncKind,
        cancel: &CancellationToken,
    ) -> Result<SyncRun, SyncError> {
        let _guard = match self.gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let live = self.runs.running_runs(&self.source).await?;
                return Err(SyncError::AlreadyRunning {
                    run_id: live.first().map(|r| r.id),
                });
            }
        };
        self.claim().await?;

        let mut run = self.runs.start_run(&self.source, kind, Utc::now()).await?;
        let span = tracing::info_span!(
            "sync_run",
            run_id = run.id,
            kind = kind.as_str(),
            source = %self.source
        );

        let mut progress = RunProgress::new(kind);
        let outcome = async {
            tracing::info!("sync started");
            match kind {
                SyncKind::Full => self.full(&mut progress, cancel).await,
                SyncKind::Incremental => self.incremental(&mut progress, cancel).await,
            }
        }
        .instrument(span.clone())
        .await;

        let failure = outcome.err().map(|e| e.to_string());
        run.details = progress.details;
        run.finalize(
            &progress.stats,
            failure.as_deref(),
            Utc::now(),
            self.max_errors,
        )?;

        if let Err(e) = self.runs.finish_run(&run).await {
            span.in_scope(|| {
                tracing::error!(error = %format!("{:#}", e), "failed to persist terminal run state")
            });
            return Err(SyncError::Store(e));
        }

        span.in_scope(|| match run.status {
            RunStatus::Failed => tracing::error!(
                error = failure.as_deref().unwrap_or_default(),
                duration_seconds = run.duration_seconds,
                "sync failed"
            ),
            status => tracing::info!(
                status = status.as_str(),
                processed = run.records_processed,
                created = run.records_created,
                updated = run.records_updated,
                unchanged = run.records_unchanged,
                failed = run.records_failed,
                duration_seconds = run.duration_seconds,
                "sync finished"
            ),
        });

        Ok(run)
    }

    /// Refuse to start next to a live run; finalize runs that were
    /// abandoned without reaching a terminal state.
    async fn claim(&self) -> Result<(), SyncError> {
        let now = Utc::now();
        for mut stale in self.runs.running_runs(&self.source).await? {
            if now - stale.started_at < self.stale_after {
                return Err(SyncError::AlreadyRunning {
                    run_id: Some(stale.id),
                });
            }
            tracing::warn!(
                run_id = stale.id,
                started_at = %stale.started_at,
                "finalizing abandoned run"
            );
            let reason = format!(
                "abandoned: run started at {} never finished",
                stale.started_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            );
            stale.finalize(&SyncStats::new(), Some(&reason), now, self.max_errors)?;
            self.runs.finish_run(&stale).await?;
        }
        Ok(())
    }

    async fn full(
        &self,
        progress: &mut RunProgress,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let fetcher = Fetcher::new(self.api.as_ref(), &self.fetch);
        let probe = fetcher.probe(None).await?;
        progress.set("total_records", json!(probe.total_records));

        if probe.total_records == 0 {
            tracing::info!("upstream reports no records");
            return Ok(());
        }

        let report = fetcher.fetch_pages(&probe, None, cancel).await?;
        progress.absorb_fetch(&report);

        let items = map_all(&report);
        self.reconcile_into(progress, &items, cancel).await?;

        let prune = self.sweep(&report, &items, &mut progress.stats, cancel).await?;
        progress.set("prune", prune);
        Ok(())
    }

    async fn incremental(
        &self,
        progress: &mut RunProgress,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let since = self.watermark().await?;
        progress.set(
            "modified_since",
            json!(since.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

        let report = Fetcher::new(self.api.as_ref(), &self.fetch)
            .fetch_all(Some(since), cancel)
            .await?;
        progress.absorb_fetch(&report);

        if report.records.is_empty() {
            tracing::info!(modified_since = %since, "no records modified upstream");
        } else {
            let items = map_all(&report);
            self.reconcile_into(progress, &items, cancel).await?;
        }

        if !report.pages_skipped.is_empty() {
            return Err(FetchError::Incomplete {
                pages: report.pages_skipped.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Completion time of the last successful run, or the lookback default.
    pub async fn watermark(&self) -> Result<DateTime<Utc>, SyncError> {
        Ok(match self.runs.last_success_completed_at(&self.source).await? {
            Some(completed) => completed,
            None => Utc::now().checked_sub_signed(self.lookback).ok_or_else(|| {
                ConfigError::InvalidSetting {
                    key: "sync.incremental_lookback_hours",
                    reason: "lookback window reaches before the earliest representable time"
                        .to_string(),
                }
            })?,
        })
    }

    async fn reconcile_into(
        &self,
        progress: &mut RunProgress,
        items: &[CatalogItem],
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let result = Reconciler::new(self.catalog.as_ref(), &self.source, &self.reconcile)
            .reconcile(items, cancel)
            .await;
        progress.stats = result.stats;
        if result.cancelled {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    async fn sweep(
        &self,
        report: &FetchReport,
        items: &[CatalogItem],
        stats: &mut SyncStats,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, SyncError> {
        let mode = self.prune;
        if mode == PruneMode::Keep {
            return Ok(json!({ "mode": mode.as_str(), "retired": 0 }));
        }

        let skipped = if !report.is_complete() {
            Some("snapshot incomplete")
        } else if stats.failed > 0 {
            Some("items failed")
        } else {
            None
        };
        if let Some(reason) = skipped {
            tracing::warn!(reason, "skipping sweep of items missing upstream");
            return Ok(json!({ "mode": mode.as_str(), "retired": 0, "skipped": reason }));
        }
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let seen: HashSet<&str> = items.iter().map(|i| i.external_id.as_str()).collect();
        let mut retired = 0u64;
        let mut failed = 0u64;

        for external_id in self.catalog.external_ids(&self.source).await? {
            if seen.contains(external_id.as_str()) {
                continue;
            }
            match self
                .catalog
                .retire_item(&self.source, &external_id, mode)
                .await
            {
                Ok(true) => retired += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(%external_id, error = %format!("{:#}", e), "failed to retire item");
                    stats.record_retire_failure(&external_id, format!("{:#}", e));
                    failed += 1;
                }
            }
        }

        if retired > 0 {
            tracing::info!(retired, mode = mode.as_str(), "retired items missing upstream");
        }
        Ok(json!({ "mode": mode.as_str(), "retired": retired, "failed": failed }))
    }
}

fn map_all(report: &FetchReport) -> Vec<CatalogItem> {
    let mapped_at = Utc::now();
    report
        .records
        .iter()
        .map(|raw| map_record(raw, mapped_at))
        .collect()
}
