use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use fieldsync_core::sync::{EntryOutcome, JournalMetrics, SubmitBatch, SyncEngine};
use fieldsync_core::{EntryId, EntryStatus, JournalEntry};

use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/sync/submit", post(submit))
        .route("/v1/sync/entries/{dedup_key}", get(entry_status))
        .route("/v1/sync/entries/{id}/force", post(force_sync))
        .route("/v1/sync/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    journal: JournalMetrics,
}

async fn healthz(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let journal = state.engine.metrics().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        journal,
    }))
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    client_id: String,
    results: Vec<EntryOutcome>,
}

async fn submit(
    State(state): State<AppState>,
    Json(batch): Json<SubmitBatch>,
) -> Result<Json<SubmitResponse>, AppError> {
    let client_id = batch.client_id.clone();
    let submitted = batch.entries.len();
    let results = state.engine.submit_batch(batch).await?;

    let rejected = results
        .iter()
        .filter(|outcome| matches!(outcome, EntryOutcome::Rejected { .. }))
        .count();
    tracing::info!(
        client = %client_id,
        submitted,
        rejected,
        "Processed sync batch"
    );

    Ok(Json(SubmitResponse { client_id, results }))
}

/// Client-facing view of a journal entry's progress
#[derive(Debug, Serialize)]
struct EntryStatusResponse {
    entry_id: EntryId,
    dedup_key: String,
    status: EntryStatus,
    attempts: u32,
    next_retry_at: Option<i64>,
    server_timestamp: i64,
    error_message: Option<String>,
    result: Option<Value>,
    /// Terminal statuses need no further resubmission of this payload
    settled: bool,
}

impl From<JournalEntry> for EntryStatusResponse {
    fn from(entry: JournalEntry) -> Self {
        Self {
            dedup_key: entry.dedup_key(),
            settled: entry.is_settled(),
            entry_id: entry.id,
            status: entry.status,
            attempts: entry.attempts,
            next_retry_at: entry.next_retry_at,
            server_timestamp: entry.server_timestamp,
            error_message: entry.error_message,
            result: entry.result,
        }
    }
}

async fn entry_status(
    State(state): State<AppState>,
    Path(dedup_key): Path<String>,
) -> Result<Json<EntryStatusResponse>, AppError> {
    let entry = state.engine.entry_by_dedup_key(&dedup_key).await?;
    Ok(Json(entry.into()))
}

async fn force_sync(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EntryStatusResponse>, AppError> {
    let id: EntryId = id
        .parse()
        .map_err(|_| AppError::BadRequest(format!("malformed entry id: {id}")))?;
    let entry = state.engine.force_sync(&id).await?;
    tracing::info!(entry_id = %entry.id, status = %entry.status, "Force-synced entry");
    Ok(Json(entry.into()))
}

async fn metrics(State(state): State<AppState>) -> Result<Json<JournalMetrics>, AppError> {
    Ok(Json(state.engine.metrics().await?))
}
