//! Web router using Axum

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use mentorboard_core::{parse_key, DashboardService};
use mentorboard_types::SubjectType;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::Caller;
use crate::error::ApiError;
use crate::sse;

type ApiResult = Result<Json<Value>, ApiError>;

/// Create the web router
pub fn create_router(service: Arc<DashboardService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/dashboards/{subject_type}/{subject_id}", get(dashboard_handler))
        .route(
            "/api/dashboards/{subject_type}/{subject_id}/refresh",
            post(refresh_handler),
        )
        .route("/api/refresh/{subject_type}", post(refresh_all_handler))
        .route("/api/queue", get(queue_handler))
        .route("/api/events", get(sse_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(service)
}

fn caller(service: &DashboardService, headers: &HeaderMap) -> Result<Caller, ApiError> {
    Caller::from_headers(headers, service.config().operator_token.as_deref())
}

async fn health_handler(State(service): State<Arc<DashboardService>>) -> ApiResult {
    let stats = service.stats()?;
    Ok(Json(json!({
        "status": stats.state,
        "cached_dashboards": stats.cache.total_entries,
        "pending_queue": stats.pending_queue,
        "held_claims": stats.held_claims,
        "last_tick_at": stats.last_tick.as_ref().and_then(|t| t.started_at),
    })))
}

async fn dashboard_handler(
    State(service): State<Arc<DashboardService>>,
    Path((subject_type, subject_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult {
    let key = parse_key(&subject_type, &subject_id)?;
    caller(&service, &headers)?.authorize_read(&key)?;

    let record = service.get_cache_record(&key).await?;
    let age_secs = record.age(Utc::now()).num_seconds();
    Ok(Json(json!({
        "record": record.as_ref(),
        "age_secs": age_secs,
        "stale": record.is_stale(Utc::now(), service.config().staleness_threshold()),
    })))
}

async fn refresh_handler(
    State(service): State<Arc<DashboardService>>,
    Path((subject_type, subject_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult {
    caller(&service, &headers)?.require_operator()?;
    let key = parse_key(&subject_type, &subject_id)?;

    let refreshed = service.refresh_now(&key).await?;
    Ok(Json(json!({
        "outcome": refreshed.outcome,
        "record": refreshed.record.as_ref(),
    })))
}

async fn refresh_all_handler(
    State(service): State<Arc<DashboardService>>,
    Path(subject_type): Path<String>,
    headers: HeaderMap,
) -> ApiResult {
    caller(&service, &headers)?.require_operator()?;
    let subject_type: SubjectType = subject_type
        .parse()
        .map_err(|e: mentorboard_types::ParseSubjectTypeError| {
            ApiError::new(axum::http::StatusCode::BAD_REQUEST, e.to_string())
        })?;

    let summary = service.refresh_all(subject_type).await?;
    Ok(Json(json!(summary)))
}

#[derive(Debug, Deserialize)]
struct QueueQuery {
    limit: Option<usize>,
}

async fn queue_handler(
    State(service): State<Arc<DashboardService>>,
    Query(query): Query<QueueQuery>,
    headers: HeaderMap,
) -> ApiResult {
    caller(&service, &headers)?.require_operator()?;
    let limit = query.limit.unwrap_or(100).min(1000);

    let queue = service.queue();
    let pending = queue.pending_count().map_err(mentorboard_core::CoreError::from)?;
    let entries = queue.list(limit).map_err(mentorboard_core::CoreError::from)?;
    Ok(Json(json!({
        "pending": pending,
        "entries": entries,
    })))
}

/// SSE endpoint for refresh activity (operators only: events name every subject)
async fn sse_handler(
    State(service): State<Arc<DashboardService>>,
    headers: HeaderMap,
) -> Result<Sse<impl futures::stream::Stream<Item = Result<Event, Infallible>>>, ApiError> {
    caller(&service, &headers)?.require_operator()?;
    // Clone EventBus to avoid lifetime issues (it's cheap - Arc internally)
    let event_bus = service.events().clone();
    Ok(sse::create_sse_stream(event_bus))
}
