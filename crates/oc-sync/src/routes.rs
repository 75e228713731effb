//! HTTP/WS control surface for the position sync engine. Ports the FastAPI
//! routes of the historical service onto axum.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::warn;

use crate::filter::SubscriptionFilter;
use crate::service::SyncService;
use oc_schemas::PositionEvent;

pub fn build_router(service: Arc<SyncService>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/control/start", post(control_start))
        .route("/control/stop", post(control_stop))
        .route("/subscriptions/:symbol", post(subscribe_symbol))
        .route("/subscriptions/:symbol", delete(unsubscribe_symbol))
        .route("/ws/positions", get(ws_positions))
        .with_state(service)
}

async fn status(State(service): State<Arc<SyncService>>) -> impl IntoResponse {
    Json(service.status().await)
}

#[derive(Serialize)]
struct ControlResponse {
    running: bool,
}

async fn control_start(State(service): State<Arc<SyncService>>) -> impl IntoResponse {
    let started = service.start().await;
    let running = service.is_running().await;
    let code = if started {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    (code, Json(ControlResponse { running }))
}

async fn control_stop(State(service): State<Arc<SyncService>>) -> impl IntoResponse {
    let stopped = service.stop().await;
    let running = service.is_running().await;
    let code = if stopped {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    (code, Json(ControlResponse { running }))
}

async fn subscribe_symbol(
    State(service): State<Arc<SyncService>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    service.subscribe_symbol(&symbol).await;
    StatusCode::NO_CONTENT
}

async fn unsubscribe_symbol(
    State(service): State<Arc<SyncService>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    service.unsubscribe_symbol(&symbol).await;
    StatusCode::NO_CONTENT
}

/// Upgrades to a websocket that first sends a full snapshot (seq 0 is
/// reserved for it), then streams every subsequent matching event.
async fn ws_positions(
    ws: WebSocketUpgrade,
    State(service): State<Arc<SyncService>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let filter = SubscriptionFilter::from_query(&params);
    ws.on_upgrade(move |socket| handle_ws(socket, service, filter))
}

async fn handle_ws(mut socket: WebSocket, service: Arc<SyncService>, filter: SubscriptionFilter) {
    let positions = service.snapshot(&filter).await;
    let snapshot = PositionEvent::Snapshot {
        seq: service.current_sequence().await,
        positions,
    };
    if send_event(&mut socket, &snapshot).await.is_err() {
        return;
    }

    let mut handle = service.subscribe_realtime(filter).await;
    loop {
        tokio::select! {
            event = handle.rx.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            frame = socket.recv() => {
                match frame {
                    None | Some(Err(_)) => break,
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    handle.close().await;
}

async fn send_event(socket: &mut WebSocket, event: &PositionEvent) -> Result<(), axum::Error> {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize position event");
            return Ok(());
        }
    };
    socket.send(Message::Text(payload)).await
}
