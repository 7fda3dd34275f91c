//! HTTP query surface.
//!
//! A thin axum router over the pipeline: every handler reads a snapshot
//! from the shared read model and serializes a DTO, with no write path and
//! no coupling to the poll loop. The router is generic over the source and
//! cursor store so tests can drive it entirely in memory.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use pseeview_core::cursor_store::CursorStore;
use pseeview_core::dto::{SessionSummary, SessionsResponse};
use pseeview_core::pipeline::{DEFAULT_ALERT_LIMIT, PipelineStats, SessionPipeline};
use pseeview_core::read_model::SlaAlert;
use pseeview_core::source::EventSource;
use serde::Deserialize;

/// Query parameters for the alert listing.
#[derive(Debug, Deserialize)]
pub struct AlertParams {
    /// Maximum number of alerts returned (newest last). Defaults to
    /// [`DEFAULT_ALERT_LIMIT`].
    limit: Option<usize>,
}

/// Builds the query router over a shared pipeline.
pub fn router<S, C>(pipeline: Arc<SessionPipeline<S, C>>) -> Router
where
    S: EventSource + 'static,
    C: CursorStore + 'static,
{
    Router::new()
        .route("/sessions", get(list_sessions::<S, C>))
        .route("/sessions/{id}", get(get_session::<S, C>))
        .route("/alerts", get(list_alerts::<S, C>))
        .route("/stats", get(get_stats::<S, C>))
        .route("/healthz", get(healthz))
        .with_state(pipeline)
}

async fn list_sessions<S, C>(
    State(pipeline): State<Arc<SessionPipeline<S, C>>>,
) -> Json<SessionsResponse>
where
    S: EventSource + 'static,
    C: CursorStore + 'static,
{
    Json(pipeline.sessions().await)
}

async fn get_session<S, C>(
    State(pipeline): State<Arc<SessionPipeline<S, C>>>,
    Path(id): Path<String>,
) -> Result<Json<SessionSummary>, StatusCode>
where
    S: EventSource + 'static,
    C: CursorStore + 'static,
{
    pipeline
        .session(&id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn list_alerts<S, C>(
    State(pipeline): State<Arc<SessionPipeline<S, C>>>,
    Query(params): Query<AlertParams>,
) -> Json<Vec<SlaAlert>>
where
    S: EventSource + 'static,
    C: CursorStore + 'static,
{
    Json(
        pipeline
            .alerts(params.limit.unwrap_or(DEFAULT_ALERT_LIMIT))
            .await,
    )
}

async fn get_stats<S, C>(State(pipeline): State<Arc<SessionPipeline<S, C>>>) -> Json<PipelineStats>
where
    S: EventSource + 'static,
    C: CursorStore + 'static,
{
    Json(pipeline.stats().await)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
