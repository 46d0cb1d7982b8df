#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;

pub const API_KEY: &str = "test-key";
pub const API_SECRET: &str = "test-secret";

/// What the fake ERP saw on one request.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub query: String,
    pub nonce: String,
    pub signature_ok: bool,
}

pub struct ErpState {
    records: Mutex<Vec<Value>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ErpState {
    pub fn set_records(&self, records: Vec<Value>) {
        *self.records.lock().unwrap() = records;
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

/// An in-process ERP that checks request signatures the same way a real
/// upstream would, and paginates a fixed record list.
pub struct FakeErp {
    pub addr: SocketAddr,
    pub state: Arc<ErpState>,
}

impl FakeErp {
    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }
}

pub async fn spawn_fake_erp(records: Vec<Value>) -> FakeErp {
    let state = Arc::new(ErpState {
        records: Mutex::new(records),
        seen: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/api/items", get(handle_items))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeErp { addr, state }
}

async fn handle_items(
    State(state): State<Arc<ErpState>>,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    let query = uri.query().unwrap_or_default().to_string();
    let nonce = header("x-nonce");
    let expected = catalog_sync::upstream::sign(
        API_SECRET,
        uri.path(),
        &query,
        &header("x-timestamp"),
        &nonce,
    );
    let signature_ok = header("x-api-key") == API_KEY && header("x-signature") == expected;
    state.seen.lock().unwrap().push(SeenRequest {
        query,
        nonce,
        signature_ok,
    });

    if !signature_ok {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "message": "invalid signature" })),
        )
            .into_response();
    }

    let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(0);
    let limit: usize = params
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(100)
        .max(1);
    let since: Option<DateTime<Utc>> = params
        .get("modifiedSince")
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));

    let records = state.records.lock().unwrap().clone();
    let matching: Vec<Value> = records
        .into_iter()
        .filter(|r| match since {
            Some(since) => r["modifiedAt"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc) >= since)
                .unwrap_or(true),
            None => true,
        })
        .collect();

    let fields: Vec<&str> = params
        .get("fields")
        .map(|f| f.split(',').filter(|f| !f.is_empty()).collect())
        .unwrap_or_default();
    let rows: Vec<Value> = matching
        .iter()
        .skip(page * limit)
        .take(limit)
        .map(|r| project(r, &fields))
        .collect();
    Json(json!({
        "success": true,
        "records": rows,
        "pageInfo": {
            "pageCount": matching.len().div_ceil(limit),
            "rowCount": matching.len(),
        }
    }))
    .into_response()
}

/// Keep only the requested keys; an empty list means every key.
fn project(record: &Value, fields: &[&str]) -> Value {
    match record.as_object() {
        Some(obj) if !fields.is_empty() => Value::Object(
            obj.iter()
                .filter(|(k, _)| fields.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        _ => record.clone(),
    }
}

/// `n` upstream records shaped the way an ERP typically returns them.
pub fn erp_records(n: usize) -> Vec<Value> {
    let modified = (Utc::now() - chrono::Duration::hours(2)).to_rfc3339();
    (0..n)
        .map(|i| {
            json!({
                "itemId": format!("ITM-{:05}", i),
                "itemCode": format!("{}", 10000 + i),
                "itemName": format!("Product number {}", i),
                "salesPrice": format!("{},50", i % 90 + 1),
                "qtyOnHand": (i % 7) as i64 - 1,
                "category": { "id": i % 4, "name": "Hardware" },
                "isActive": true,
                "warehouse": "MAIN",
                "modifiedAt": modified,
            })
        })
        .collect()
}

/// Temp dir with a config pointing at `base_url` and zero delays.
pub fn setup_test_env(base_url: &str) -> (TempDir, PathBuf) {
    setup_test_env_with(base_url, "")
}

/// Same as [`setup_test_env`], with extra lines in the `[upstream]` section.
pub fn setup_test_env_with(base_url: &str, upstream_extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    std::fs::create_dir_all(root.join("config")).unwrap();

    let config = format!(
        r#"[db]
path = "{}/data/catalog.sqlite"

[upstream]
base_url = "{}"
records_path = "items"
page_size = 100
timeout_secs = 5
retry_backoff_ms = 0
page_delay_ms = 0
{}

[sync]
source = "erp"
batch_pause_ms = 0

[server]
bind = "127.0.0.1:0"
"#,
        root.display(),
        base_url,
        upstream_extra
    );
    let config_path = root.join("config").join("catsync.toml");
    std::fs::write(&config_path, config).unwrap();
    (tmp, config_path)
}

pub fn unique_nonces(seen: &[SeenRequest]) -> bool {
    let nonces: HashSet<&str> = seen.iter().map(|s| s.nonce.as_str()).collect();
    nonces.len() == seen.len()
}

pub fn catsync_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_catsync"))
}

pub fn run_catsync(
    config_path: &Path,
    args: &[&str],
    credentials: Option<(&str, &str)>,
) -> (String, String, bool) {
    let binary = catsync_binary();
    let mut command = std::process::Command::new(&binary);
    command
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("CATSYNC_BASE_URL")
        .env_remove("CATSYNC_LOG")
        .env_remove("RUST_LOG");
    match credentials {
        Some((key, secret)) => {
            command
                .env("CATSYNC_API_KEY", key)
                .env("CATSYNC_API_SECRET", secret);
        }
        None => {
            command
                .env_remove("CATSYNC_API_KEY")
                .env_remove("CATSYNC_API_SECRET");
        }
    }

    let output = command
        .output()
        .unwrap_or_else(|e| panic!("Failed to run catsync binary at {:?}: {}", binary, e));
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}
