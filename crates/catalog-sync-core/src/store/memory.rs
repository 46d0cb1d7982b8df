//! In-memory [`CatalogStore`] and [`RunLog`] for tests.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Mirrors the SQLite
//! constraints that matter to the reconciler (non-empty external id,
//! unique `(source, external_id)`), and can be told to reject specific
//! external ids (insert, update and retire) to simulate constraint violations.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{CatalogItem, CatalogRow, ItemStatus, Presentation};
use crate::run::{RunStatus, SyncKind, SyncRun};

use super::{CatalogStore, ExistingItem, PruneMode, RunLog};

/// In-memory store for tests.
pub struct InMemoryStore {
    rows: RwLock<HashMap<i64, CatalogRow>>,
    next_item_id: RwLock<i64>,
    runs: RwLock<Vec<SyncRun>>,
    rejected: RwLock<HashSet<String>>,
    writes: RwLock<u64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            next_item_id: RwLock::new(1),
            runs: RwLock::new(Vec::new()),
            rejected: RwLock::new(HashSet::new()),
            writes: RwLock::new(0),
        }
    }

    /// Make every write for this external id fail like a constraint violation.
    pub fn reject_external_id(&self, external_id: &str) {
        self.rejected
            .write()
            .unwrap()
            .insert(external_id.to_string());
    }

    /// Stand-in for an admin edit of the locally-owned fields.
    pub fn set_presentation(
        &self,
        source: &str,
        external_id: &str,
        presentation: Presentation,
    ) -> Result<()> {
        let mut rows = self.rows.write().unwrap();
        let row = rows
            .values_mut()
            .find(|r| r.source == source && r.item.external_id == external_id)
            .ok_or_else(|| anyhow!("no item {} in {}", external_id, source))?;
        row.presentation = presentation;
        Ok(())
    }

    /// Number of insert/update calls that changed a row.
    pub fn write_count(&self) -> u64 {
        *self.writes.read().unwrap()
    }

    pub fn item_count(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    /// Seed a run row directly, e.g. one left `running` by a crashed process.
    pub fn seed_run(&self, run: SyncRun) {
        self.runs.write().unwrap().push(run);
    }

    fn check_writable(&self, item: &CatalogItem) -> Result<()> {
        if item.external_id.trim().is_empty() {
            bail!("CHECK constraint failed: external_id must not be empty");
        }
        if self.rejected.read().unwrap().contains(&item.external_id) {
            bail!("constraint failed: write rejected for {}", item.external_id);
        }
        Ok(())
    }

    fn stored_copy(item: &CatalogItem) -> CatalogItem {
        let mut stored = item.clone();
        stored.stock_quantity = item.persisted_stock();
        stored
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn find_item(&self, source: &str, external_id: &str) -> Result<Option<ExistingItem>> {
        let rows = self.rows.read().unwrap();
        Ok(rows
            .values()
            .find(|r| r.source == source && r.item.external_id == external_id)
            .map(|r| ExistingItem {
                internal_id: r.internal_id,
                content_hash: r.content_hash.clone(),
            }))
    }

    async fn insert_item(
        &self,
        source: &str,
        item: &CatalogItem,
        content_hash: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<i64> {
        self.check_writable(item)?;
        let mut rows = self.rows.write().unwrap();
        if rows
            .values()
            .any(|r| r.source == source && r.item.external_id == item.external_id)
        {
            bail!(
                "UNIQUE constraint failed: catalog_items.source, catalog_items.external_id ({})",
                item.external_id
            );
        }

        let mut next = self.next_item_id.write().unwrap();
        let id = *next;
        *next += 1;

        rows.insert(
            id,
            CatalogRow {
                internal_id: id,
                source: source.to_string(),
                item: Self::stored_copy(item),
                content_hash: content_hash.to_string(),
                last_synced_at: synced_at,
                presentation: Presentation::default(),
            },
        );
        *self.writes.write().unwrap() += 1;
        Ok(id)
    }

    async fn update_item(
        &self,
        internal_id: i64,
        item: &CatalogItem,
        content_hash: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<()> {
        self.check_writable(item)?;
        let mut rows = self.rows.write().unwrap();
        let row = rows
            .get_mut(&internal_id)
            .ok_or_else(|| anyhow!("catalog item {} not found", internal_id))?;
        // presentation is deliberately left as-is
        row.item = Self::stored_copy(item);
        row.content_hash = content_hash.to_string();
        row.last_synced_at = synced_at;
        *self.writes.write().unwrap() += 1;
        Ok(())
    }

    async fn touch_item(&self, internal_id: i64, synced_at: DateTime<Utc>) -> Result<()> {
        let mut rows = self.rows.write().unwrap();
        let row = rows
            .get_mut(&internal_id)
            .ok_or_else(|| anyhow!("catalog item {} not found", internal_id))?;
        row.last_synced_at = synced_at;
        Ok(())
    }

    async fn external_ids(&self, source: &str) -> Result<Vec<String>> {
        let rows = self.rows.read().unwrap();
        let mut ids: Vec<String> = rows
            .values()
            .filter(|r| r.source == source)
            .map(|r| r.item.external_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn retire_item(&self, source: &str, external_id: &str, mode: PruneMode) -> Result<bool> {
        let mut rows = self.rows.write().unwrap();
        let id = match rows
            .values()
            .find(|r| r.source == source && r.item.external_id == external_id)
        {
            Some(r) => r.internal_id,
            None => return Ok(false),
        };
        if mode != PruneMode::Keep && self.rejected.read().unwrap().contains(external_id) {
            bail!("constraint failed: write rejected for {}", external_id);
        }
        match mode {
            PruneMode::Keep => Ok(false),
            PruneMode::Delete => Ok(rows.remove(&id).is_some()),
            PruneMode::Deactivate => {
                let row = rows
                    .get_mut(&id)
                    .ok_or_else(|| anyhow!("catalog item {} not found", id))?;
                if row.item.status == ItemStatus::Inactive {
                    return Ok(false);
                }
                row.item.status = ItemStatus::Inactive;
                row.content_hash = row.item.content_hash();
                Ok(true)
            }
        }
    }

    async fn get_item(&self, source: &str, external_id: &str) -> Result<Option<CatalogRow>> {
        let rows = self.rows.read().unwrap();
        Ok(rows
            .values()
            .find(|r| r.source == source && r.item.external_id == external_id)
            .cloned())
    }
}

#[async_trait]
impl RunLog for InMemoryStore {
    async fn start_run(
        &self,
        source: &str,
        kind: SyncKind,
        started_at: DateTime<Utc>,
    ) -> Result<SyncRun> {
        let mut runs = self.runs.write().unwrap();
        let id = runs.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        let run = SyncRun::started(id, source, kind, started_at);
        runs.push(run.clone());
        Ok(run)
    }

    async fn finish_run(&self, run: &SyncRun) -> Result<()> {
        let mut runs = self.runs.write().unwrap();
        let slot = runs
            .iter_mut()
            .find(|r| r.id == run.id)
            .ok_or_else(|| anyhow!("sync run {} not found", run.id))?;
        *slot = run.clone();
        Ok(())
    }

    async fn running_runs(&self, source: &str) -> Result<Vec<SyncRun>> {
        let runs = self.runs.read().unwrap();
        Ok(runs
            .iter()
            .filter(|r| r.source == source && r.status == RunStatus::Running)
            .cloned()
            .collect())
    }

    async fn last_success_completed_at(&self, source: &str) -> Result<Option<DateTime<Utc>>> {
        let runs = self.runs.read().unwrap();
        Ok(runs
            .iter()
            .filter(|r| r.source == source && r.status == RunStatus::Success)
            .filter_map(|r| r.completed_at)
            .max())
    }

    async fn recent_runs(&self, source: &str, limit: i64) -> Result<Vec<SyncRun>> {
        let runs = self.runs.read().unwrap();
        let mut matching: Vec<SyncRun> = runs.iter().filter(|r| r.source == source).cloned().collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }

    async fn get_run(&self, id: i64) -> Result<Option<SyncRun>> {
        Ok(self.runs.read().unwrap().iter().find(|r| r.id == id).cloned())
    }
}
