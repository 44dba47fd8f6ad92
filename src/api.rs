use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::DropGuard;
use tower_http::cors::CorsLayer;

use crate::cache::orchestrator::{CacheOrchestrator, Freshness, RefreshOutcome};
use crate::ingest::config::{KEY_NEWS, KEY_TRACKS_FAVORITES, KEY_TRACKS_STREAM};
use crate::ingest::types::Item;

pub const CACHE_HEADER: &str = "x-cache";

#[derive(Clone)]
pub struct AppState {
    pub cache: CacheOrchestrator,
    /// Cancels the scheduler and in-flight refreshes when the last router
    /// clone is dropped.
    _shutdown: Option<Arc<DropGuard>>,
}

impl AppState {
    pub fn new(cache: CacheOrchestrator) -> Self {
        Self {
            cache,
            _shutdown: None,
        }
    }

    pub fn with_shutdown_guard(mut self, guard: DropGuard) -> Self {
        self._shutdown = Some(Arc::new(guard));
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/news", get(news))
        .route("/api/soundcloud/stream", get(tracks_stream))
        .route("/api/soundcloud/favorites", get(tracks_favorites))
        .route("/api/cache/{key}", get(cache_by_key))
        .route("/admin/refresh/{key}", post(admin_refresh))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct CollectionResp<'a> {
    key: &'a str,
    collection: &'a [Item],
    last_updated: DateTime<Utc>,
    stale: bool,
}

#[derive(Serialize)]
struct ErrorResp<'a> {
    key: &'a str,
    error: &'a str,
}

#[derive(Serialize)]
struct RefreshResp<'a> {
    key: &'a str,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

async fn news(State(state): State<AppState>) -> Response {
    serve(&state, KEY_NEWS).await
}

async fn tracks_stream(State(state): State<AppState>) -> Response {
    serve(&state, KEY_TRACKS_STREAM).await
}

async fn tracks_favorites(State(state): State<AppState>) -> Response {
    serve(&state, KEY_TRACKS_FAVORITES).await
}

async fn cache_by_key(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    serve(&state, &key).await
}

async fn serve(state: &AppState, key: &str) -> Response {
    let Some(read) = state.cache.read(key).await else {
        return error(StatusCode::NOT_FOUND, key, "unknown key");
    };
    let Some(entry) = read.entry else {
        return error(StatusCode::SERVICE_UNAVAILABLE, key, "no data available yet");
    };

    let stale =
        Freshness::classify(Some(&entry), Utc::now(), state.cache.ttl()) == Freshness::Stale;
    let label = match read.freshness {
        Freshness::Missing => "MISS",
        Freshness::Fresh => "HIT",
        Freshness::Stale if stale => "STALE",
        Freshness::Stale => "MISS",
    };

    let body = CollectionResp {
        key,
        collection: &entry.items,
        last_updated: entry.last_updated,
        stale,
    };
    let mut resp = Json(body).into_response();
    resp.headers_mut()
        .insert(CACHE_HEADER, HeaderValue::from_static(label));
    resp
}

async fn admin_refresh(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    if !state.cache.has_key(&key) {
        return error(StatusCode::NOT_FOUND, &key, "unknown key");
    }
    let outcome = state.cache.refresh(&key).await;
    let (status, items, reason) = match &outcome {
        RefreshOutcome::Committed { items } => (StatusCode::OK, Some(*items), None),
        RefreshOutcome::Coalesced => (StatusCode::OK, None, None),
        RefreshOutcome::Preserved { reason } => {
            (StatusCode::BAD_GATEWAY, None, Some(reason.as_str()))
        }
        RefreshOutcome::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, None, None),
    };
    let body = RefreshResp {
        key: &key,
        outcome: outcome.label(),
        items,
        reason,
    };
    (status, Json(body)).into_response()
}

fn error(status: StatusCode, key: &str, msg: &str) -> Response {
    (status, Json(ErrorResp { key, error: msg })).into_response()
}
