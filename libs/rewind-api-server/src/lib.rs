mod error;
mod ws;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use rewind_api::{Cursor, Event, EventKind, NewRecord, Record, StreamFilter};
use rewind_engine::{Engine, StreamPage, TimelinePage, TimelineQuery};

pub use error::ApiError;

#[derive(Clone)]
pub(crate) struct AppState {
    engine: Arc<Engine>,
}

/// HTTP + WebSocket routes over one engine.
pub fn build_router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/api/records", post(handle_create_record))
        .route("/api/records/{id}", get(handle_get_record))
        .route("/api/records/{id}/timeline", get(handle_timeline))
        .route("/api/records/{id}/console", get(handle_console))
        .route("/api/records/{id}/network", get(handle_network))
        .route("/api/records/{id}/network/{event_id}", get(handle_network_event))
        .route("/api/records/{id}/breadcrumbs", get(handle_breadcrumbs))
        .route("/api/records/{id}/rrweb", get(handle_rrweb))
        .route("/ws/ingest", get(ws::handle_ingest))
        .route("/ws/cdp", get(ws::handle_cdp))
        .route("/ws/clock", get(ws::handle_clock))
        .route("/ws/live", get(ws::handle_live))
        .with_state(AppState { engine })
}

/// Bind `host:port` and serve until `shutdown` is cancelled.
pub async fn run(host: &str, port: u16, engine: Arc<Engine>, shutdown: CancellationToken) -> Result<(), String> {
    let listener = TcpListener::bind(format!("{host}:{port}"))
        .await
        .map_err(|e| format!("bind api {host}:{port}: {e}"))?;
    tracing::info!(addr = %format!("{host}:{port}"), "api listening");
    serve(listener, engine, shutdown).await
}

/// Serve on an already bound listener.
pub async fn serve(listener: TcpListener, engine: Arc<Engine>, shutdown: CancellationToken) -> Result<(), String> {
    axum::serve(listener, build_router(engine))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| format!("axum serve: {e}"))
}

fn ensure_record(state: &AppState, record_id: &str) -> Result<(), ApiError> {
    if state.engine.log().contains_record(record_id) {
        Ok(())
    } else {
        Err(ApiError::RecordNotFound(record_id.to_string()))
    }
}

// --- REST: POST /api/records ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatedRecord {
    record_id: String,
    session_id: String,
    ingest_ws_path: String,
}

async fn handle_create_record(State(state): State<AppState>, body: Bytes) -> Result<Json<CreatedRecord>, ApiError> {
    let req: NewRecord = if body.iter().all(u8::is_ascii_whitespace) {
        NewRecord::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    let record = state.engine.ingestor().create_record(req);
    Ok(Json(CreatedRecord {
        ingest_ws_path: format!("/ws/ingest?recordId={}", record.record_id),
        record_id: record.record_id,
        session_id: record.session_id,
    }))
}

// --- REST: GET /api/records/{id} ---

async fn handle_get_record(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Record>, ApiError> {
    state
        .engine
        .log()
        .get_record(&id)
        .map(Json)
        .ok_or(ApiError::RecordNotFound(id))
}

// --- REST: GET /api/records/{id}/timeline?after=&limit=&types=&... ---

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimelineParams {
    after: Option<String>,
    limit: Option<usize>,
    types: Option<String>,
    #[serde(alias = "level")]
    console_level: Option<String>,
    status_min: Option<i32>,
    #[serde(alias = "name")]
    breadcrumb_name: Option<String>,
    ts_from: Option<i64>,
    ts_to: Option<i64>,
}

impl TimelineParams {
    fn filter(&self) -> StreamFilter {
        StreamFilter {
            console_level: self.console_level.clone(),
            status_min: self.status_min,
            breadcrumb_name: self.breadcrumb_name.clone(),
        }
    }

    fn cursor(&self) -> Cursor {
        Cursor::parse_opt(self.after.as_deref())
    }
}

async fn handle_timeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<TimelineParams>,
) -> Result<Json<TimelinePage>, ApiError> {
    ensure_record(&state, &id)?;
    let query = TimelineQuery {
        cursor: params.cursor(),
        limit: state.engine.config().timeline.clamp_limit(params.limit),
        kinds: TimelineQuery::parse_kinds(params.types.as_deref()),
        filter: params.filter(),
        ts_from: params.ts_from,
        ts_to: params.ts_to,
    };
    let page = state.engine.merger().page(&id, &query).await?;
    Ok(Json(page))
}

// --- REST: single-stream pages ---

async fn stream_page(
    state: &AppState,
    id: &str,
    kind: EventKind,
    params: &TimelineParams,
) -> Result<Json<StreamPage>, ApiError> {
    ensure_record(state, id)?;
    let limit = state.engine.config().timeline.clamp_limit(params.limit);
    let page = state
        .engine
        .merger()
        .stream_page(id, kind, params.cursor(), limit, &params.filter())
        .await?;
    Ok(Json(page))
}

async fn handle_console(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<TimelineParams>,
) -> Result<Json<StreamPage>, ApiError> {
    stream_page(&state, &id, EventKind::Console, &params).await
}

async fn handle_network(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<TimelineParams>,
) -> Result<Json<StreamPage>, ApiError> {
    stream_page(&state, &id, EventKind::Network, &params).await
}

async fn handle_breadcrumbs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<TimelineParams>,
) -> Result<Json<StreamPage>, ApiError> {
    stream_page(&state, &id, EventKind::Breadcrumb, &params).await
}

async fn handle_rrweb(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<TimelineParams>,
) -> Result<Json<StreamPage>, ApiError> {
    stream_page(&state, &id, EventKind::Rrweb, &params).await
}

// --- REST: GET /api/records/{id}/network/{event_id} ---

async fn handle_network_event(
    State(state): State<AppState>,
    Path((id, event_id)): Path<(String, String)>,
) -> Result<Json<Event>, ApiError> {
    ensure_record(&state, &id)?;
    let found = state.engine.merger().find(&id, EventKind::Network, &event_id).await?;
    found.map(Json).ok_or(ApiError::EventNotFound(event_id))
}
