//! Wire DTOs shared between the dispatcher, the position sync engine, and
//! the daemon's HTTP/WS surface. No business logic lives here.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An envelope queued for dispatch by the PRD, in the shape callers submit
/// it and the worker stores it. See `oc-envelope` for construction/
/// normalization from loosely-typed mappings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeWire {
    pub bucket: String,
    pub url_callback: String,
    pub base_url: String,
    pub method: String,
    pub params: serde_json::Value,
    pub encoding: String,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

/// Result of dispatching one envelope's activity call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DispatchOutcome {
    Ok {
        code: u16,
        body: serde_json::Value,
        callback_url: String,
    },
    Error {
        message: String,
        callback_url: String,
    },
}

/// Snapshot of dispatcher state exposed over `/status` and the control SSE
/// stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherStats {
    pub run_id: uuid::Uuid,
    pub total_dispatched: u64,
    pub items_this_run: u64,
    pub queue_sizes: std::collections::BTreeMap<String, usize>,
    pub paused_buckets: Vec<String>,
    pub priority_order: Vec<String>,
    pub closed: bool,
    pub last_dispatch_at: Option<DateTime<Utc>>,
}

/// Canonical position record as persisted and as shipped over `/ws/positions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionWire {
    pub id: Option<i64>,
    pub contract_symbol: String,
    pub exchange: String,
    pub side: String,
    pub status: String,
    pub amount_usdt: Decimal,
    pub entry_price: Decimal,
    pub qty_contract: Decimal,
    pub leverage: Decimal,
    pub external_order_id: Option<String>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub pnl_usdt: Option<Decimal>,
    pub time_in_force: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub external_status: Option<String>,
    pub last_sync_at: DateTime<Utc>,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

/// One event published to the realtime hub and forwarded to matching
/// subscribers over `/ws/positions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PositionEvent {
    Snapshot {
        seq: u64,
        positions: Vec<PositionWire>,
    },
    Opened {
        seq: u64,
        position: PositionWire,
    },
    Closed {
        seq: u64,
        position: PositionWire,
        previous: Option<PositionWire>,
    },
    QuantityChanged {
        seq: u64,
        position: PositionWire,
        previous: Option<PositionWire>,
    },
    Updated {
        seq: u64,
        position: PositionWire,
        previous: Option<PositionWire>,
    },
}

impl PositionEvent {
    pub fn seq(&self) -> u64 {
        match self {
            PositionEvent::Snapshot { seq, .. }
            | PositionEvent::Opened { seq, .. }
            | PositionEvent::Closed { seq, .. }
            | PositionEvent::QuantityChanged { seq, .. }
            | PositionEvent::Updated { seq, .. } => *seq,
        }
    }
}

/// Status snapshot exposed by the PSE control API's `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub running: bool,
    pub sequence: u64,
    pub active_subscribers: usize,
    pub tracked_positions: usize,
    pub exchange: String,
}
