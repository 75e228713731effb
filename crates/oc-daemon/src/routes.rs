//! Axum router and all HTTP handlers for oc-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so integration tests in
//! `tests/` can compose the router directly.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::Stream;
use tokio_stream::{wrappers::BroadcastStream, StreamExt as _};

use crate::{
    api_types::{BucketsRequest, ErrorResponse, HealthResponse, OkResponse, PriorityOrderRequest, SubmitRequest},
    state::{AppState, BusMsg},
};

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/stream", get(stream))
        .route("/v1/dispatcher/submit", post(dispatcher_submit))
        .route("/v1/dispatcher/queue", get(dispatcher_queue))
        .route("/v1/dispatcher/stats", get(dispatcher_stats))
        .route("/v1/dispatcher/close", post(dispatcher_close))
        .route("/v1/dispatcher/pause", post(dispatcher_pause))
        .route("/v1/dispatcher/resume", post(dispatcher_resume))
        .route("/v1/dispatcher/priority", post(dispatcher_priority))
        .nest("/v1/positions", oc_sync::routes::build_router(state.sync_service.clone()))
        .with_state(state)
}

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

pub(crate) async fn dispatcher_submit(
    State(st): State<Arc<AppState>>,
    Json(body): Json<SubmitRequest>,
) -> Response {
    match st.dispatcher.submit(body.bucket, body.payload).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(OkResponse { ok: true })).into_response(),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        )
            .into_response(),
    }
}

pub(crate) async fn dispatcher_queue(State(st): State<Arc<AppState>>) -> Response {
    match st.dispatcher.queue_size().await {
        Ok(sizes) => Json(sizes).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        )
            .into_response(),
    }
}

pub(crate) async fn dispatcher_stats(State(st): State<Arc<AppState>>) -> Response {
    match st.dispatcher.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        )
            .into_response(),
    }
}

pub(crate) async fn dispatcher_close(State(st): State<Arc<AppState>>) -> Response {
    match st.dispatcher.close().await {
        Ok(()) => (StatusCode::OK, Json(OkResponse { ok: true })).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        )
            .into_response(),
    }
}

pub(crate) async fn dispatcher_pause(
    State(st): State<Arc<AppState>>,
    Json(body): Json<BucketsRequest>,
) -> Response {
    match st.dispatcher.pause_buckets(body.buckets).await {
        Ok(()) => (StatusCode::OK, Json(OkResponse { ok: true })).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        )
            .into_response(),
    }
}

pub(crate) async fn dispatcher_resume(
    State(st): State<Arc<AppState>>,
    Json(body): Json<BucketsRequest>,
) -> Response {
    match st.dispatcher.resume_buckets(body.buckets).await {
        Ok(()) => (StatusCode::OK, Json(OkResponse { ok: true })).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        )
            .into_response(),
    }
}

pub(crate) async fn dispatcher_priority(
    State(st): State<Arc<AppState>>,
    Json(body): Json<PriorityOrderRequest>,
) -> Response {
    match st.dispatcher.set_priority_order(body.order).await {
        Ok(()) => (StatusCode::OK, Json(OkResponse { ok: true })).into_response(),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        )
            .into_response(),
    }
}

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);
    Sse::new(events).keep_alive(KeepAlive::new()).into_response()
}

fn broadcast_to_sse(
    rx: tokio::sync::broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(m) => {
            let event_name = match &m {
                BusMsg::Heartbeat { .. } => "heartbeat",
                BusMsg::DispatcherStats(_) => "dispatcher_stats",
                BusMsg::LogLine { .. } => "log",
            };
            let data = serde_json::to_string(&m).ok()?;
            Some(Ok(Event::default().event(event_name).data(data)))
        }
        Err(_) => None,
    })
}
