use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::cache::CacheStatus;
use crate::dashboard::Dashboard;
use crate::fetcher::{DataService, DataState};
use crate::poller::{latest, SnapshotStore};
use crate::stations::{StationRegistry, TrackedStation};

/// Tells the dashboard whether it is looking at live, cached or no data.
pub const DATA_STATE_HEADER: &str = "x-data-state";

const DEFAULT_TOP_SPECIES: u32 = 10;

#[derive(Clone)]
pub struct AppState {
    pub data: Arc<DataService>,
    pub registry: Arc<StationRegistry>,
    pub dashboard: Arc<Dashboard>,
    pub snapshots: SnapshotStore,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/stations", get(list_stations).post(add_station))
        .route("/stations/search", get(search_stations))
        .route("/stations/{id}", get(station_info).delete(remove_station))
        .route("/highlights", get(highlights))
        .route("/species", get(species))
        .route("/snapshot", get(snapshot))
        .route("/patterns/time-of-day", get(time_of_day))
        .route("/patterns/daily", get(daily))
        .route("/top-species", get(top_species))
        .route("/counts", get(counts))
        .route("/debug/cache", get(debug_cache))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: msg.into() })).into_response()
}

fn with_data_state<T: Serialize>(state: DataState, body: T) -> Response {
    let mut resp = Json(body).into_response();
    resp.headers_mut()
        .insert(DATA_STATE_HEADER, HeaderValue::from_static(state.as_str()));
    resp
}

async fn list_stations(State(state): State<AppState>) -> Json<Vec<TrackedStation>> {
    Json(state.registry.list())
}

async fn add_station(
    State(state): State<AppState>,
    Json(station): Json<TrackedStation>,
) -> Response {
    match state.registry.add(station) {
        Ok(true) => (StatusCode::CREATED, Json(state.registry.list())).into_response(),
        Ok(false) => (StatusCode::OK, Json(state.registry.list())).into_response(),
        Err(e) => error(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

async fn remove_station(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if state.registry.remove(&id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error(StatusCode::NOT_FOUND, format!("station {id} is not tracked"))
    }
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

async fn search_stations(State(state): State<AppState>, Query(q): Query<SearchQuery>) -> Response {
    if q.q.trim().is_empty() {
        return error(StatusCode::BAD_REQUEST, "query must not be blank");
    }
    Json(state.data.search_stations(&q.q).await).into_response()
}

async fn station_info(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.data.station_info(&id).await {
        Some(st) => Json(st).into_response(),
        None => error(StatusCode::NOT_FOUND, format!("station {id} not found")),
    }
}

async fn highlights(State(state): State<AppState>) -> Response {
    let ids = state.registry.ids();
    let (data_state, items) = state.dashboard.highlights(&ids).await;
    with_data_state(data_state, items)
}

async fn species(State(state): State<AppState>) -> Response {
    let ids = state.registry.ids();
    let (data_state, items) = state.dashboard.species(&ids).await;
    with_data_state(data_state, items)
}

async fn snapshot(State(state): State<AppState>) -> Response {
    let snap = latest(&state.snapshots);
    with_data_state(snap.state, snap)
}

async fn time_of_day(State(state): State<AppState>) -> Json<Vec<crate::model::TimeOfDayCount>> {
    Json(state.data.time_of_day_counts(&state.registry.ids()).await)
}

async fn daily(State(state): State<AppState>) -> Json<Vec<crate::model::DailyCount>> {
    Json(state.data.daily_detection_counts(&state.registry.ids()).await)
}

#[derive(Deserialize)]
struct TopSpeciesQuery {
    limit: Option<u32>,
}

async fn top_species(
    State(state): State<AppState>,
    Query(q): Query<TopSpeciesQuery>,
) -> Json<Vec<crate::model::SpeciesCount>> {
    let limit = q.limit.unwrap_or(DEFAULT_TOP_SPECIES).clamp(1, 100);
    Json(state.data.top_species(&state.registry.ids(), limit).await)
}

async fn counts(State(state): State<AppState>) -> Response {
    match state.data.counts(&state.registry.ids()).await {
        Some(c) => Json(c).into_response(),
        None => error(StatusCode::SERVICE_UNAVAILABLE, "counts unavailable"),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheDebug {
    entries: Vec<CacheStatus>,
    recent_calls: usize,
    max_calls_per_minute: usize,
}

async fn debug_cache(State(state): State<AppState>) -> Json<CacheDebug> {
    let limiter = state.data.limiter();
    Json(CacheDebug {
        entries: state.data.cache_status(),
        recent_calls: limiter.recent_calls(),
        max_calls_per_minute: limiter.limits().max_calls_per_minute,
    })
}
