//! Reconciler: create-or-update of mapped items against the catalog store.
//!
//! Items are written one at a time in fixed-size batches with a pause
//! between batches. A failing item is recorded in the stats and the pass
//! moves on; nothing an individual item does can stop the others.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use catalog_sync_core::models::CatalogItem;
use catalog_sync_core::run::{ItemOutcome, SyncStats};
use catalog_sync_core::store::CatalogStore;

use crate::config::SyncConfig;

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub batch_size: usize,
    pub batch_pause: Duration,
}

impl ReconcileSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            batch_pause: Duration::from_millis(config.batch_pause_ms),
        }
    }
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub stats: SyncStats,
    /// Set when the pass stopped at a batch boundary because of cancellation.
    pub cancelled: bool,
}

pub struct Reconciler<'a> {
    store: &'a dyn CatalogStore,
    source: &'a str,
    settings: &'a ReconcileSettings,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn CatalogStore, source: &'a str, settings: &'a ReconcileSettings) -> Self {
        Self {
            store,
            source,
            settings,
        }
    }

    pub async fn reconcile(
        &self,
        items: &[CatalogItem],
        cancel: &CancellationToken,
    ) -> Reconciliation {
        let mut result = Reconciliation::default();

        for (index, batch) in items.chunks(self.settings.batch_size).enumerate() {
            if index > 0 {
                if cancel.is_cancelled() {
                    tracing::warn!(
                        processed = result.stats.processed,
                        remaining = items.len() as u64 - result.stats.processed,
                        "reconciliation cancelled between batches"
                    );
                    result.cancelled = true;
                    break;
                }
                if !self.settings.batch_pause.is_zero() {
                    tokio::time::sleep(self.settings.batch_pause).await;
                }
            }

            let mut batch_stats = SyncStats::new();
            for item in batch {
                match self.reconcile_item(item).await {
                    Ok(outcome) => batch_stats.record(outcome),
                    Err(e) => {
                        tracing::warn!(
                            external_id = %item.external_id,
                            error = %format!("{:#}", e),
                            "item reconciliation failed"
                        );
                        batch_stats.record_failure(&item.external_id, format!("{:#}", e));
                    }
                }
            }

            tracing::debug!(
                batch = index,
                created = batch_stats.created,
                updated = batch_stats.updated,
                unchanged = batch_stats.unchanged,
                failed = batch_stats.failed,
                "batch reconciled"
            );
            result.stats.merge(batch_stats);
        }

        result
    }

    /// Insert, update, or touch one item, keyed on its external id.
    pub async fn reconcile_item(&self, item: &CatalogItem) -> Result<ItemOutcome> {
        if item.external_id.is_empty() {
            anyhow::bail!("record has no external id");
        }

        let hash = item.content_hash();
        let now = Utc::now();

        match self.store.find_item(self.source, &item.external_id).await? {
            None => {
                self.store.insert_item(self.source, item, &hash, now).await?;
                Ok(ItemOutcome::Created)
            }
            Some(existing) if existing.content_hash == hash => {
                self.store.touch_item(existing.internal_id, now).await?;
                Ok(ItemOutcome::Unchanged)
            }
            Some(existing) => {
                self.store
                    .update_item(existing.internal_id, item, &hash, now)
                    .await?;
                Ok(ItemOutcome::Updated)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_sync_core::mapper::map_record;
    use catalog_sync_core::models::Presentation;
    use catalog_sync_core::store::memory::InMemoryStore;
    use serde_json::json;

    fn settings() -> ReconcileSettings {
        ReconcileSettings {
            batch_size: 3,
            batch_pause: Duration::ZERO,
        }
    }

    fn items(ids: &[&str]) -> Vec<CatalogItem> {
        ids.iter()
            .map(|id| {
                let raw = json!({ "id": id, "name": format!("Item {}", id), "price": 10 });
                map_record(raw.as_object().unwrap(), Utc::now())
            })
            .collect()
    }

    #[tokio::test]
    async fn second_pass_over_same_snapshot_changes_nothing() {
        let store = InMemoryStore::new();
        let settings = settings();
        let reconciler = Reconciler::new(&store, "erp", &settings);
        let batch = items(&["A", "B", "C", "D", "E"]);

        let first = reconciler.reconcile(&batch, &CancellationToken::new()).await;
        assert_eq!(first.stats.created, 5);
        let writes = store.write_count();

        // remapped with a later timestamp, as the next run would
        let again = items(&["A", "B", "C", "D", "E"]);
        let second = reconciler.reconcile(&again, &CancellationToken::new()).await;
        assert_eq!(second.stats.created, 0);
        assert_eq!(second.stats.updated, 0);
        assert_eq!(second.stats.unchanged, 5);
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn one_bad_item_does_not_block_the_rest() {
        let store = InMemoryStore::new();
        store.reject_external_id("C");
        let settings = settings();
        let reconciler = Reconciler::new(&store, "erp", &settings);
        let batch = items(&["A", "B", "C", "D", "E", "F", "G"]);

        let result = reconciler.reconcile(&batch, &CancellationToken::new()).await;
        assert_eq!(result.stats.processed, 7);
        assert_eq!(result.stats.created, 6);
        assert_eq!(result.stats.failed, 1);
        assert_eq!(result.stats.errors.len(), 1);
        assert_eq!(result.stats.errors[0].external_id, "C");
        assert_eq!(store.item_count(), 6);
    }

    #[tokio::test]
    async fn missing_external_id_is_a_recorded_failure() {
        let store = InMemoryStore::new();
        let settings = settings();
        let reconciler = Reconciler::new(&store, "erp", &settings);
        let mut batch = items(&["A"]);
        batch.push(map_record(
            json!({ "name": "orphan" }).as_object().unwrap(),
            Utc::now(),
        ));

        let result = reconciler.reconcile(&batch, &CancellationToken::new()).await;
        assert_eq!(result.stats.created, 1);
        assert_eq!(result.stats.failed, 1);
        assert_eq!(
            result.stats.errors[0].to_string(),
            "(no external id): record has no external id"
        );
    }

    #[tokio::test]
    async fn updates_keep_presentation_fields() {
        let store = InMemoryStore::new();
        let settings = settings();
        let reconciler = Reconciler::new(&store, "erp", &settings);
        reconciler
            .reconcile(&items(&["A"]), &CancellationToken::new())
            .await;
        store
            .set_presentation(
                "erp",
                "A",
                Presentation {
                    image_url: Some("https://cdn/custom.png".into()),
                    slug: None,
                    published: true,
                },
            )
            .unwrap();

        for price in [11, 12, 13] {
            let raw = json!({ "id": "A", "name": "Item A", "price": price });
            let item = map_record(raw.as_object().unwrap(), Utc::now());
            let result = reconciler.reconcile(&[item], &CancellationToken::new()).await;
            assert_eq!(result.stats.updated, 1);
        }

        let row = store.get_item("erp", "A").await.unwrap().unwrap();
        assert_eq!(row.item.price, rust_decimal::Decimal::from(13));
        assert_eq!(row.presentation.image_url.as_deref(), Some("https://cdn/custom.png"));
        assert!(row.presentation.published);
    }

    #[tokio::test]
    async fn cancellation_stops_at_a_batch_boundary() {
        let store = InMemoryStore::new();
        let settings = settings();
        let reconciler = Reconciler::new(&store, "erp", &settings);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = reconciler
            .reconcile(&items(&["A", "B", "C", "D", "E"]), &cancel)
            .await;
        // the first batch always completes
        assert!(result.cancelled);
        assert_eq!(result.stats.processed, 3);
        assert_eq!(store.item_count(), 3);
    }
}
