mod common;

use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use catalog_sync::config::{load_config, Credentials};
use catalog_sync::sqlite_store::SqliteStore;
use catalog_sync::{db, migrate, server, SyncEngine};
use catalog_sync_core::models::{ItemStatus, Presentation};
use catalog_sync_core::run::RunStatus;
use catalog_sync_core::store::{CatalogStore, RunLog};

use common::*;

struct Harness {
    _tmp: tempfile::TempDir,
    erp: FakeErp,
    engine: Arc<SyncEngine>,
    store: SqliteStore,
}

async fn harness(records: Vec<Value>, secret: &str) -> Harness {
    harness_with(records, secret, "").await
}

async fn harness_with(records: Vec<Value>, secret: &str, upstream_extra: &str) -> Harness {
    let erp = spawn_fake_erp(records).await;
    let (tmp, config_path) = setup_test_env_with(&erp.base_url(), upstream_extra);
    let cfg = load_config(&config_path).unwrap();

    let pool = db::connect(&cfg).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    let engine =
        SyncEngine::from_config(&cfg, Credentials::new(API_KEY, secret), pool.clone()).unwrap();

    Harness {
        _tmp: tmp,
        erp,
        engine: Arc::new(engine),
        store: SqliteStore::new(pool),
    }
}

async fn item_count(store: &SqliteStore) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM catalog_items")
        .fetch_one(store.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn full_sync_over_http_into_sqlite() {
    let h = harness(erp_records(487), API_SECRET).await;

    let result = h.engine.run_full(&CancellationToken::new()).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.status, Some(RunStatus::Success));
    assert_eq!(result.stats.unwrap().created, 487);
    assert_eq!(item_count(&h.store).await, 487);

    // probe + 5 pages, each freshly signed
    let seen = h.erp.state.seen();
    assert_eq!(seen.len(), 6);
    assert!(seen.iter().all(|s| s.signature_ok));
    assert!(unique_nonces(&seen));
    assert!(seen[0].query.contains("limit=1"));
    assert!(seen[1].query.contains("fields="));

    let row = h.store.get_item("erp", "ITM-00007").await.unwrap().unwrap();
    assert_eq!(row.item.name, "Product number 7");
    assert_eq!(row.item.category, "Hardware");
    assert_eq!(row.item.price.to_string(), "8.5");
    assert_eq!(row.item.stock_quantity, 0);
    assert_eq!(row.item.external_code.as_deref(), Some("10007"));
    assert_eq!(row.item.status, ItemStatus::Active);
    // not a field the mapper knows, so the default field list never asks for it
    assert!(row.item.raw_metadata.get("warehouse").is_none());

    let run = h
        .store
        .get_run(result.run_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.details["total_pages"], json!(5));
    assert_eq!(run.details["end"]["reason"], json!("exhausted"));
}

#[tokio::test]
async fn empty_field_list_keeps_unmapped_fields() {
    let h = harness_with(erp_records(3), API_SECRET, "fields = []").await;

    let result = h.engine.run_full(&CancellationToken::new()).await;
    assert_eq!(result.stats.unwrap().created, 3);
    assert!(h.erp.state.seen()[1..]
        .iter()
        .all(|s| !s.query.contains("fields=")));

    let row = h.store.get_item("erp", "ITM-00002").await.unwrap().unwrap();
    assert_eq!(row.item.name, "Product number 2");
    assert_eq!(row.item.raw_metadata["warehouse"], json!("MAIN"));
}

#[tokio::test]
async fn second_sync_is_idempotent_and_keeps_presentation() {
    let h = harness(erp_records(40), API_SECRET).await;
    h.engine.run_full(&CancellationToken::new()).await;
    h.store
        .set_presentation(
            "erp",
            "ITM-00003",
            &Presentation {
                image_url: Some("https://cdn.example.com/3.webp".into()),
                slug: Some("product-3".into()),
                published: true,
            },
        )
        .await
        .unwrap();

    let again = h.engine.run_full(&CancellationToken::new()).await;
    let stats = again.stats.unwrap();
    assert_eq!((stats.created, stats.updated, stats.unchanged), (0, 0, 40));

    let mut changed = erp_records(40);
    changed[3]["salesPrice"] = json!("99,00");
    h.erp.state.set_records(changed);
    let third = h.engine.run_full(&CancellationToken::new()).await;
    assert_eq!(third.stats.unwrap().updated, 1);

    let row = h.store.get_item("erp", "ITM-00003").await.unwrap().unwrap();
    assert_eq!(row.item.price.to_string(), "99");
    assert_eq!(
        row.presentation.image_url.as_deref(),
        Some("https://cdn.example.com/3.webp")
    );
    assert_eq!(row.presentation.slug.as_deref(), Some("product-3"));
    assert!(row.presentation.published);
}

#[tokio::test]
async fn constraint_violation_fails_one_item_only() {
    let h = harness(erp_records(30), API_SECRET).await;
    sqlx::query(
        r#"
        CREATE TRIGGER reject_item BEFORE INSERT ON catalog_items
        WHEN NEW.external_id = 'ITM-00012'
        BEGIN
            SELECT RAISE(ABORT, 'rejected by trigger');
        END
        "#,
    )
    .execute(h.store.pool())
    .await
    .unwrap();

    let result = h.engine.run_full(&CancellationToken::new()).await;
    assert!(result.success);
    assert_eq!(result.status, Some(RunStatus::Partial));
    let stats = result.stats.unwrap();
    assert_eq!(stats.created, 29);
    assert_eq!(stats.failed, 1);
    let errors = result.errors.unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("ITM-00012: "), "{}", errors[0]);
    assert_eq!(item_count(&h.store).await, 29);
}

#[tokio::test]
async fn wrong_secret_fails_the_run() {
    let h = harness(erp_records(10), "not-the-secret").await;

    let result = h.engine.run_full(&CancellationToken::new()).await;
    assert!(!result.success);
    assert_eq!(result.status, Some(RunStatus::Failed));

    let run = h
        .store
        .get_run(result.run_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error_summary[0].contains("HTTP 401"));
    assert!(h.store.running_runs("erp").await.unwrap().is_empty());
    assert_eq!(item_count(&h.store).await, 0);
    // auth is never retried
    assert_eq!(h.erp.state.seen().len(), 1);
}

#[tokio::test]
async fn full_sync_deactivates_dropped_items() {
    let h = harness(erp_records(12), API_SECRET).await;
    h.engine.run_full(&CancellationToken::new()).await;

    h.erp.state.set_records(erp_records(10));
    h.engine.run_full(&CancellationToken::new()).await;

    let dropped = h.store.get_item("erp", "ITM-00011").await.unwrap().unwrap();
    assert_eq!(dropped.item.status, ItemStatus::Inactive);
    let kept = h.store.get_item("erp", "ITM-00009").await.unwrap().unwrap();
    assert_eq!(kept.item.status, ItemStatus::Active);
}

#[tokio::test]
async fn incremental_sync_sends_watermark() {
    let h = harness(erp_records(5), API_SECRET).await;
    let full = h.engine.run_full(&CancellationToken::new()).await;
    let completed = h
        .store
        .get_run(full.run_id.unwrap())
        .await
        .unwrap()
        .unwrap()
        .completed_at
        .unwrap();

    let mut records = erp_records(5);
    records[2]["itemName"] = json!("Renamed");
    records[2]["modifiedAt"] = json!((completed + chrono::Duration::seconds(5)).to_rfc3339());
    h.erp.state.set_records(records);

    let before = h.erp.state.seen().len();
    let result = h.engine.run_incremental(&CancellationToken::new()).await;
    let stats = result.stats.unwrap();
    assert_eq!((stats.processed, stats.updated), (1, 1));

    let probe = &h.erp.state.seen()[before];
    assert!(probe.query.contains("modifiedSince="), "{}", probe.query);
    let renamed = h.store.get_item("erp", "ITM-00002").await.unwrap().unwrap();
    assert_eq!(renamed.item.name, "Renamed");
}

#[tokio::test]
async fn trigger_server_endpoints() {
    let h = harness(erp_records(25), API_SECRET).await;
    let app = server::router(h.engine.clone(), CancellationToken::new());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let base = format!("http://{}", addr);
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], json!("ok"));

    let probe: Value = client
        .get(format!("{}/probe", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(probe["reachable"], json!(true));
    assert_eq!(probe["total_records"], json!(25));
    assert!(h.store.recent_runs("erp", 10).await.unwrap().is_empty());

    let full: Value = client
        .post(format!("{}/sync/full", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(full["success"], json!(true));
    assert_eq!(full["status"], json!("success"));
    assert_eq!(full["stats"]["created"], json!(25));
    let run_id = full["run_id"].as_i64().unwrap();

    let runs: Value = client
        .get(format!("{}/runs?limit=5", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(runs.as_array().unwrap().len(), 1);
    assert_eq!(runs[0]["id"], json!(run_id));

    let one = client
        .get(format!("{}/runs/{}", base, run_id))
        .send()
        .await
        .unwrap();
    assert_eq!(one.status(), reqwest::StatusCode::OK);

    let missing = client
        .get(format!("{}/runs/9999", base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["error"]["code"], json!("not_found"));
}
