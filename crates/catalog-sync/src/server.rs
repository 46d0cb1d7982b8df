//! HTTP trigger surface.
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | `GET` | `/health` | `{ status, version }` |
//! | `GET` | `/probe` | [`ProbeReport`] |
//! | `POST` | `/sync/full` | [`TriggerResult`] |
//! | `POST` | `/sync/incremental` | [`TriggerResult`] |
//! | `GET` | `/runs?limit=N` | recent [`SyncRun`]s, newest first |
//! | `GET` | `/runs/{id}` | one [`SyncRun`] |
//!
//! Trigger endpoints always answer 200 with a structured result; a run
//! that failed or could not start is reported through `success: false`.
//! Errors on the read endpoints use `{ "error": { "code", "message" } }`.
//!
//! Syncs run on their own task so a client disconnecting mid-request does
//! not interrupt a run between item writes. Shutdown (Ctrl-C) cancels
//! in-flight runs cooperatively.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use catalog_sync_core::run::{SyncKind, SyncRun};

use crate::config::Config;
use crate::probe::ProbeReport;
use crate::sync::{SyncEngine, TriggerResult};

#[derive(Clone)]
struct AppState {
    engine: Arc<SyncEngine>,
    shutdown: CancellationToken,
}

/// Serve until Ctrl-C.
pub async fn run_server(config: &Config, engine: Arc<SyncEngine>) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, source = engine.source(), "trigger server listening");

    let signal = shutdown.clone();
    axum::serve(listener, router(engine, shutdown))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down; cancelling in-flight runs");
            signal.cancel();
        })
        .await?;
    Ok(())
}

/// The application router, separate from binding so tests can serve it.
pub fn router(engine: Arc<SyncEngine>, shutdown: CancellationToken) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/probe", get(handle_probe))
        .route("/sync/full", post(handle_full))
        .route("/sync/incremental", post(handle_incremental))
        .route("/runs", get(handle_runs))
        .route("/runs/{id}", get(handle_run))
        .layer(cors)
        .with_state(AppState { engine, shutdown })
}

// ============ Errors ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "store_error",
        message: format!("{:#}", err),
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_probe(State(state): State<AppState>) -> Json<ProbeReport> {
    Json(state.engine.probe_connection().await)
}

async fn handle_full(State(state): State<AppState>) -> Json<TriggerResult> {
    Json(spawn_sync(state, SyncKind::Full).await)
}

async fn handle_incremental(State(state): State<AppState>) -> Json<TriggerResult> {
    Json(spawn_sync(state, SyncKind::Incremental).await)
}

async fn spawn_sync(state: AppState, kind: SyncKind) -> TriggerResult {
    let engine = state.engine.clone();
    let cancel = state.shutdown.child_token();
    let task = tokio::spawn(async move {
        match kind {
            SyncKind::Full => engine.run_full(&cancel).await,
            SyncKind::Incremental => engine.run_incremental(&cancel).await,
        }
    });

    match task.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "sync task panicked");
            TriggerResult {
                success: false,
                message: format!("sync task failed: {}", e),
                run_id: None,
                status: None,
                stats: None,
                errors: None,
            }
        }
    }
}

#[derive(Deserialize)]
struct RunsQuery {
    limit: Option<i64>,
}

async fn handle_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<SyncRun>>, AppError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 500);
    let runs = state
        .engine
        .run_log()
        .recent_runs(state.engine.source(), limit)
        .await
        .map_err(internal)?;
    Ok(Json(runs))
}

async fn handle_run(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SyncRun>, AppError> {
    state
        .engine
        .run_log()
        .get_run(id)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found(format!("no sync run with id {}", id)))
}
