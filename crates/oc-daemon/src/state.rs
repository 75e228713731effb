//! Shared runtime state for oc-daemon.
//!
//! All types here are `Clone`-able (via `Arc`). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async itself.

use std::sync::Arc;
use std::time::Duration;

use oc_dispatcher::DispatcherHandle;
use oc_schemas::DispatcherStats;
use oc_sync::SyncService;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    DispatcherStats(DispatcherStats),
    LogLine { level: String, msg: String },
}

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub dispatcher: DispatcherHandle,
    pub sync_service: Arc<SyncService>,
}

impl AppState {
    pub fn new(dispatcher: DispatcherHandle, sync_service: Arc<SyncService>) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "oc-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            dispatcher,
            sync_service,
        }
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawns a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Spawns a background task that periodically publishes dispatcher stats
/// onto the bus, so operators watching the SSE stream see queue/backlog
/// movement without polling `/v1/dispatcher/stats`.
pub fn spawn_stats_tick(bus: broadcast::Sender<BusMsg>, dispatcher: DispatcherHandle, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Ok(stats) = dispatcher.stats().await {
                let _ = bus.send(BusMsg::DispatcherStats(stats));
            }
        }
    });
}
