//! Storage abstraction for the catalog and the run log.
//!
//! [`CatalogStore`] is the reconciler's only view of the catalog: lookups
//! and per-item writes keyed on `(source, external_id)`. [`RunLog`] is the
//! append-only audit trail of [`SyncRun`]s the orchestrator writes and
//! reads back for incremental watermarks.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! | Implementation | Crate |
//! |----------------|-------|
//! | [`memory::InMemoryStore`] | this crate (tests) |
//! | `SqliteStore` | `catalog-sync` |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::{CatalogItem, CatalogRow};
use crate::run::{SyncKind, SyncRun};

/// What a reconciliation needs to know about an existing row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingItem {
    pub internal_id: i64,
    pub content_hash: String,
}

/// How a full sync treats stored items that are absent from the upstream snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PruneMode {
    /// Leave them untouched (pure upsert).
    Keep,
    /// Set their status to inactive; presentation fields survive.
    Deactivate,
    /// Remove the rows.
    Delete,
}

impl PruneMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PruneMode::Keep => "keep",
            PruneMode::Deactivate => "deactivate",
            PruneMode::Delete => "delete",
        }
    }
}

/// Catalog persistence with upsert-by-external-key semantics.
///
/// Write methods only ever touch upstream-owned columns. Presentation
/// fields are owned by admin flows and must survive every call here.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Look up the stored row for an external id.
    async fn find_item(&self, source: &str, external_id: &str) -> Result<Option<ExistingItem>>;

    /// Insert a new row. Returns the store-assigned internal id.
    async fn insert_item(
        &self,
        source: &str,
        item: &CatalogItem,
        content_hash: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<i64>;

    /// Overwrite the upstream-owned fields of an existing row.
    async fn update_item(
        &self,
        internal_id: i64,
        item: &CatalogItem,
        content_hash: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Record that an unchanged row was seen by a sync. Errors if the row is gone.
    async fn touch_item(&self, internal_id: i64, synced_at: DateTime<Utc>) -> Result<()>;

    /// All external ids currently stored for a source.
    async fn external_ids(&self, source: &str) -> Result<Vec<String>>;

    /// Apply a [`PruneMode`] to one stored item. Returns whether a row changed.
    async fn retire_item(&self, source: &str, external_id: &str, mode: PruneMode) -> Result<bool>;

    /// Read a full row back.
    async fn get_item(&self, source: &str, external_id: &str) -> Result<Option<CatalogRow>>;
}

/// Append-only log of sync runs.
#[async_trait]
pub trait RunLog: Send + Sync {
    /// Create a `running` row and return it with its assigned id.
    async fn start_run(
        &self,
        source: &str,
        kind: SyncKind,
        started_at: DateTime<Utc>,
    ) -> Result<SyncRun>;

    /// Persist a finalized run.
    async fn finish_run(&self, run: &SyncRun) -> Result<()>;

    /// Runs for the source still in `running` state.
    async fn running_runs(&self, source: &str) -> Result<Vec<SyncRun>>;

    /// Completion time of the most recent `success` run. Partial, failed,
    /// and still-running rows are never considered.
    async fn last_success_completed_at(&self, source: &str) -> Result<Option<DateTime<Utc>>>;

    /// Most recent runs first.
    async fn recent_runs(&self, source: &str, limit: i64) -> Result<Vec<SyncRun>>;

    async fn get_run(&self, id: i64) -> Result<Option<SyncRun>>;
}
