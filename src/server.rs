//! HTTP trigger server.
//!
//! Exposes the unification job and its stats via a small JSON API so an
//! external scheduler or backend can invoke the pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/unify` | Run the pipeline (`mode`, `skipNormalization`, `skipClustering`) |
//! | `GET`  | `/stats` | Aggregate counts without running anything |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Contract
//!
//! `POST /unify` returns `200` with `{ "success": true, "stats": {...} }`
//! on success, or a non-2xx status with `{ "success": false, "error": "..." }`.
//! Writes already committed by individual records/groups before a failure
//! are not rolled back; re-invoking converges by idempotence.
//!
//! Invocations of `/unify` are serialized with an in-process lock — the job
//! contract assumes at most one run at a time.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! dashboards and cross-origin schedulers.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db;
use crate::pipeline::{self, UnifyRequest, UnifyStats};
use crate::stats;
use crate::store::sqlite::SqliteStore;
use crate::store::AggregateStats;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    /// Serializes pipeline runs; the job assumes a single invocation at
    /// a time.
    unify_lock: Arc<Mutex<()>>,
}

/// Starts the HTTP trigger server.
///
/// Binds to the address configured in `[server].bind` and runs until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let state = AppState {
        config: Arc::new(config.clone()),
        unify_lock: Arc::new(Mutex::new(())),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/unify", post(handle_unify))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("Unify server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Response types ============

#[derive(Serialize)]
struct UnifyResponse {
    success: bool,
    stats: UnifyStats,
}

#[derive(Serialize)]
struct StatsResponse {
    success: bool,
    stats: AggregateStats,
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: message.into(),
    }
}

// ============ Handlers ============

/// `POST /unify` — run the pipeline with the requested stage flags.
///
/// An empty body runs a full pipeline with default flags.
async fn handle_unify(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> Result<Json<UnifyResponse>, AppError> {
    let request: UnifyRequest = if body.is_empty() {
        UnifyRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| bad_request(format!("invalid request body: {}", e)))?
    };

    let _guard = state.unify_lock.lock().await;

    let pool = db::connect(&state.config)
        .await
        .map_err(|e| internal_error(format!("storage unavailable: {}", e)))?;
    let store = SqliteStore::new(pool.clone());

    println!("unify run (mode: {})", request.mode);

    let result = pipeline::run_unify(&store, &state.config.unify, &request).await;
    pool.close().await;

    match result {
        Ok(stats) => Ok(Json(UnifyResponse {
            success: true,
            stats,
        })),
        Err(e) => Err(internal_error(e.to_string())),
    }
}

/// `GET /stats` — aggregate counts without running the pipeline.
async fn handle_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let pool = db::connect(&state.config)
        .await
        .map_err(|e| internal_error(format!("storage unavailable: {}", e)))?;
    let store = SqliteStore::new(pool.clone());

    let aggregate = stats::aggregate(&store).await;
    pool.close().await;

    Ok(Json(StatsResponse {
        success: true,
        stats: aggregate,
    }))
}

/// `GET /health` — liveness probe.
async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
