//! SQLite-backed [`CatalogStore`] and [`RunLog`].
//!
//! Timestamps are stored as Unix milliseconds, prices as normalized
//! decimal strings, and JSON blobs (`raw_metadata`, `error_summary`,
//! `details`) as TEXT. Sync writes never name the presentation columns
//! (`image_url`, `slug`, `published`).

use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use catalog_sync_core::models::{CatalogItem, CatalogRow, ItemStatus, Presentation};
use catalog_sync_core::run::{RunStatus, SyncKind, SyncRun};
use catalog_sync_core::store::{CatalogStore, ExistingItem, PruneMode, RunLog};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Admin-side edit of the locally-owned fields.
    pub async fn set_presentation(
        &self,
        source: &str,
        external_id: &str,
        presentation: &Presentation,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE catalog_items SET image_url = ?, slug = ?, published = ? WHERE source = ? AND external_id = ?",
        )
        .bind(&presentation.image_url)
        .bind(&presentation.slug)
        .bind(presentation.published)
        .bind(source)
        .bind(external_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("no item {} in {}", external_id, source);
        }
        Ok(())
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

fn price_text(price: Decimal) -> String {
    price.normalize().to_string()
}

fn row_to_catalog(row: &SqliteRow) -> Result<CatalogRow> {
    let status: String = row.get("status");
    let price: String = row.get("price");
    let raw_metadata: String = row.get("raw_metadata");
    let modified: Option<i64> = row.get("upstream_modified_at");

    let item = CatalogItem {
        external_id: row.get("external_id"),
        external_code: row.get("external_code"),
        name: row.get("name"),
        description: row.get("description"),
        short_description: row.get("short_description"),
        price: Decimal::from_str(&price).with_context(|| format!("bad stored price '{}'", price))?,
        stock_quantity: row.get("stock_quantity"),
        unit: row.get("unit"),
        category: row.get("category"),
        subcategory: row.get("subcategory"),
        status: ItemStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown item status '{}'", status))?,
        raw_metadata: serde_json::from_str(&raw_metadata).context("bad stored raw_metadata")?,
        upstream_modified_at: modified.map(from_millis).transpose()?,
    };

    Ok(CatalogRow {
        internal_id: row.get("id"),
        source: row.get("source"),
        item,
        content_hash: row.get("content_hash"),
        last_synced_at: from_millis(row.get("last_synced_at"))?,
        presentation: Presentation {
            image_url: row.get("image_url"),
            slug: row.get("slug"),
            published: row.get::<i64, _>("published") != 0,
        },
    })
}

fn row_to_run(row: &SqliteRow) -> Result<SyncRun> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    let completed_at: Option<i64> = row.get("completed_at");
    let error_summary: String = row.get("error_summary");
    let details: String = row.get("details");

    Ok(SyncRun {
        id: row.get("id"),
        source: row.get("source"),
        kind: SyncKind::parse(&kind).ok_or_else(|| anyhow!("unknown run kind '{}'", kind))?,
        status: RunStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown run status '{}'", status))?,
        started_at: from_millis(row.get("started_at"))?,
        completed_at: completed_at.map(from_millis).transpose()?,
        duration_seconds: row.get("duration_seconds"),
        records_processed: row.get::<i64, _>("records_processed") as u64,
        records_created: row.get::<i64, _>("records_created") as u64,
        records_updated: row.get::<i64, _>("records_updated") as u64,
        records_unchanged: row.get::<i64, _>("records_unchanged") as u64,
        records_failed: row.get::<i64, _>("records_failed") as u64,
        error_summary: serde_json::from_str(&error_summary).context("bad stored error_summary")?,
        details: serde_json::from_str(&details).context("bad stored details")?,
    })
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn find_item(&self, source: &str, external_id: &str) -> Result<Option<ExistingItem>> {
        let row = sqlx::query(
            "SELECT id, content_hash FROM catalog_items WHERE source = ? AND external_id = ?",
        )
        .bind(source)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ExistingItem {
            internal_id: r.get("id"),
            content_hash: r.get("content_hash"),
        }))
    }

    async fn insert_item(
        &self,
        source: &str,
        item: &CatalogItem,
        content_hash: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<i64> {
        let now = to_millis(synced_at);
        let result = sqlx::query(
            r#"
            INSERT INTO catalog_items (source, external_id, external_code, name, description,
                                       short_description, price, stock_quantity, unit, category,
                                       subcategory, status, raw_metadata, content_hash,
                                       upstream_modified_at, last_synced_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(source)
        .bind(&item.external_id)
        .bind(&item.external_code)
        .bind(&item.name)
        .bind(&item.description)
        .bind(&item.short_description)
        .bind(price_text(item.price))
        .bind(item.persisted_stock())
        .bind(&item.unit)
        .bind(&item.category)
        .bind(&item.subcategory)
        .bind(item.status.as_str())
        .bind(item.raw_metadata.to_string())
        .bind(content_hash)
        .bind(item.upstream_modified_at.map(to_millis))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn update_item(
        &self,
        internal_id: i64,
        item: &CatalogItem,
        content_hash: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE catalog_items SET
                external_code = ?,
                name = ?,
                description = ?,
                short_description = ?,
                price = ?,
                stock_quantity = ?,
                unit = ?,
                category = ?,
                subcategory = ?,
                status = ?,
                raw_metadata = ?,
                content_hash = ?,
                upstream_modified_at = ?,
                last_synced_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&item.external_code)
        .bind(&item.name)
        .bind(&item.description)
        .bind(&item.short_description)
        .bind(price_text(item.price))
        .bind(item.persisted_stock())
        .bind(&item.unit)
        .bind(&item.category)
        .bind(&item.subcategory)
        .bind(item.status.as_str())
        .bind(item.raw_metadata.to_string())
        .bind(content_hash)
        .bind(item.upstream_modified_at.map(to_millis))
        .bind(to_millis(synced_at))
        .bind(internal_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("catalog item {} not found", internal_id);
        }
        Ok(())
    }

    async fn touch_item(&self, internal_id: i64, synced_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE catalog_items SET last_synced_at = ? WHERE id = ?")
            .bind(to_millis(synced_at))
            .bind(internal_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("catalog item {} not found", internal_id);
        }
        Ok(())
    }

    async fn external_ids(&self, source: &str) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT external_id FROM catalog_items WHERE source = ? ORDER BY external_id",
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn retire_item(&self, source: &str, external_id: &str, mode: PruneMode) -> Result<bool> {
        match mode {
            PruneMode::Keep => Ok(false),
            PruneMode::Delete => {
                let result =
                    sqlx::query("DELETE FROM catalog_items WHERE source = ? AND external_id = ?")
                        .bind(source)
                        .bind(external_id)
                        .execute(&self.pool)
                        .await?;
                Ok(result.rows_affected() > 0)
            }
            PruneMode::Deactivate => {
                let Some(mut row) = self.get_item(source, external_id).await? else {
                    return Ok(false);
                };
                if row.item.status == ItemStatus::Inactive {
                    return Ok(false);
                }
                // the hash must follow the status, or a reappearing item would look unchanged
                row.item.status = ItemStatus::Inactive;
                sqlx::query("UPDATE catalog_items SET status = ?, content_hash = ? WHERE id = ?")
                    .bind(ItemStatus::Inactive.as_str())
                    .bind(row.item.content_hash())
                    .bind(row.internal_id)
                    .execute(&self.pool)
                    .await?;
                Ok(true)
            }
        }
    }

    async fn get_item(&self, source: &str, external_id: &str) -> Result<Option<CatalogRow>> {
        let row = sqlx::query("SELECT * FROM catalog_items WHERE source = ? AND external_id = ?")
            .bind(source)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_catalog).transpose()
    }
}

#[async_trait]
impl RunLog for SqliteStore {
    async fn start_run(
        &self,
        source: &str,
        kind: SyncKind,
        started_at: DateTime<Utc>,
    ) -> Result<SyncRun> {
        let result = sqlx::query(
            "INSERT INTO sync_runs (source, kind, status, started_at) VALUES (?, ?, ?, ?)",
        )
        .bind(source)
        .bind(kind.as_str())
        .bind(RunStatus::Running.as_str())
        .bind(to_millis(started_at))
        .execute(&self.pool)
        .await?;

        Ok(SyncRun::started(
            result.last_insert_rowid(),
            source,
            kind,
            started_at,
        ))
    }

    async fn finish_run(&self, run: &SyncRun) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_runs SET
                status = ?,
                completed_at = ?,
                duration_seconds = ?,
                records_processed = ?,
                records_created = ?,
                records_updated = ?,
                records_unchanged = ?,
                records_failed = ?,
                error_summary = ?,
                details = ?
            WHERE id = ?
            "#,
        )
        .bind(run.status.as_str())
        .bind(run.completed_at.map(to_millis))
        .bind(run.duration_seconds)
        .bind(run.records_processed as i64)
        .bind(run.records_created as i64)
        .bind(run.records_updated as i64)
        .bind(run.records_unchanged as i64)
        .bind(run.records_failed as i64)
        .bind(serde_json::to_string(&run.error_summary)?)
        .bind(run.details.to_string())
        .bind(run.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("sync run {} not found", run.id);
        }
        Ok(())
    }

    async fn running_runs(&self, source: &str) -> Result<Vec<SyncRun>> {
        let rows = sqlx::query(
            "SELECT * FROM sync_runs WHERE source = ? AND status = 'running' ORDER BY started_at",
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_run).collect()
    }

    async fn last_success_completed_at(&self, source: &str) -> Result<Option<DateTime<Utc>>> {
        let ms: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(completed_at) FROM sync_runs WHERE source = ? AND status = 'success'",
        )
        .bind(source)
        .fetch_one(&self.pool)
        .await?;
        ms.map(from_millis).transpose()
    }

    async fn recent_runs(&self, source: &str, limit: i64) -> Result<Vec<SyncRun>> {
        let rows = sqlx::query(
            "SELECT * FROM sync_runs WHERE source = ? ORDER BY started_at DESC, id DESC LIMIT ?",
        )
        .bind(source)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_run).collect()
    }

    async fn get_run(&self, id: i64) -> Result<Option<SyncRun>> {
        let row = sqlx::query("SELECT * FROM sync_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_run).transpose()
    }
}
