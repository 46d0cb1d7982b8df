use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema in the configured database. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Catalog items. AUTOINCREMENT so internal ids are never reused after a prune.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            external_id TEXT NOT NULL CHECK (length(external_id) > 0),
            external_code TEXT,
            name TEXT NOT NULL,
            description TEXT,
            short_description TEXT,
            price TEXT NOT NULL DEFAULT '0',
            stock_quantity INTEGER NOT NULL DEFAULT 0 CHECK (stock_quantity >= 0),
            unit TEXT NOT NULL,
            category TEXT NOT NULL,
            subcategory TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('active', 'inactive')),
            raw_metadata TEXT NOT NULL DEFAULT '{}',
            content_hash TEXT NOT NULL,
            upstream_modified_at INTEGER,
            last_synced_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            image_url TEXT,
            slug TEXT,
            published INTEGER NOT NULL DEFAULT 0,
            UNIQUE(source, external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Run log
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('full', 'incremental')),
            status TEXT NOT NULL CHECK (status IN ('running', 'success', 'partial', 'failed')),
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            duration_seconds REAL,
            records_processed INTEGER NOT NULL DEFAULT 0,
            records_created INTEGER NOT NULL DEFAULT 0,
            records_updated INTEGER NOT NULL DEFAULT 0,
            records_unchanged INTEGER NOT NULL DEFAULT 0,
            records_failed INTEGER NOT NULL DEFAULT 0,
            error_summary TEXT NOT NULL DEFAULT '[]',
            details TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_catalog_items_source ON catalog_items(source)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sync_runs_source_started ON sync_runs(source, started_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sync_runs_source_status ON sync_runs(source, status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
