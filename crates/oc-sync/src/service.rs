//! Position sync engine (C5): reconciles the websocket push feed and the
//! REST poll feed into one canonical, sequenced position state, publishing
//! diffs to the realtime hub and persisting every update.

use std::collections::HashMap;
use std::sync::Arc;

use oc_position::{fetch_active, normalize_position, upsert};
use oc_schemas::{PositionEvent, PositionWire, SyncStatus};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::config::BitmartConfig;
use crate::filter::SubscriptionFilter;
use crate::hub::{RealtimeHub, SubscriptionHandle};
use crate::rest::RestClient;
use crate::ws::WsClient;

const DEFAULT_TIME_IN_FORCE: &str = "GTC";
const EXCHANGE_NAME: &str = "bitmart";

struct RunningTasks {
    stop_tx: watch::Sender<bool>,
    ws_task: JoinHandle<()>,
    poll_task: JoinHandle<()>,
}

pub struct SyncService {
    ws: Arc<WsClient>,
    rest: Arc<RestClient>,
    pool: PgPool,
    poll_interval: u64,
    hub: Arc<RealtimeHub>,
    state: RwLock<HashMap<String, PositionWire>>,
    sequence: std::sync::atomic::AtomicU64,
    run_lock: Mutex<Option<RunningTasks>>,
    load_lock: Mutex<()>,
    state_loaded: std::sync::atomic::AtomicBool,
}

fn state_key(symbol: &str, side: &str) -> String {
    format!("{}::{}", symbol.to_uppercase(), side.to_uppercase())
}

fn is_closed(position: &PositionWire) -> bool {
    position.status.eq_ignore_ascii_case("closed") || position.qty_contract.is_zero()
}

impl SyncService {
    pub fn new(config: BitmartConfig, pool: PgPool) -> Arc<Self> {
        let poll_interval = config.poll_interval;
        Arc::new(Self {
            ws: Arc::new(WsClient::new(config.clone())),
            rest: Arc::new(RestClient::new(config)),
            pool,
            poll_interval,
            hub: RealtimeHub::new(),
            state: RwLock::new(HashMap::new()),
            sequence: std::sync::atomic::AtomicU64::new(0),
            run_lock: Mutex::new(None),
            load_lock: Mutex::new(()),
            state_loaded: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn channels(&self) -> Vec<String> {
        self.ws.list_channels()
    }

    pub async fn is_running(&self) -> bool {
        self.run_lock.lock().await.is_some()
    }

    pub async fn status(&self) -> SyncStatus {
        SyncStatus {
            running: self.is_running().await,
            sequence: self.sequence.load(std::sync::atomic::Ordering::SeqCst),
            active_subscribers: self.hub.active_subscribers().await,
            tracked_positions: self.state.read().await.len(),
            exchange: EXCHANGE_NAME.to_string(),
        }
    }

    /// Idempotent: returns `false` if already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut guard = self.run_lock.lock().await;
        if guard.is_some() {
            return false;
        }
        self.ensure_state_loaded().await;

        let (stop_tx, stop_rx) = watch::channel(false);
        let ws_self = Arc::clone(self);
        let ws_stop = stop_rx.clone();
        let ws_task = tokio::spawn(async move { ws_self.consume_websocket(ws_stop).await });

        let poll_self = Arc::clone(self);
        let poll_stop = stop_rx;
        let poll_task = tokio::spawn(async move { poll_self.poll_loop(poll_stop).await });

        *guard = Some(RunningTasks {
            stop_tx,
            ws_task,
            poll_task,
        });
        true
    }

    /// Idempotent: returns `false` if not running.
    pub async fn stop(self: &Arc<Self>) -> bool {
        let mut guard = self.run_lock.lock().await;
        let Some(running) = guard.take() else {
            return false;
        };
        let _ = running.stop_tx.send(true);
        let _ = running.ws_task.await;
        let _ = running.poll_task.await;
        true
    }

    pub async fn subscribe_symbol(&self, symbol: &str) {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return;
        }
        self.ws.subscribe(&self.channel_for_symbol(&symbol));
    }

    pub async fn unsubscribe_symbol(&self, symbol: &str) {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return;
        }
        self.ws.unsubscribe(&self.channel_for_symbol(&symbol));
    }

    fn channel_for_symbol(&self, symbol: &str) -> String {
        let base = self
            .ws
            .list_channels()
            .into_iter()
            .find(|c| !c.contains(':'))
            .unwrap_or_else(|| "futures/position".to_string());
        format!("{base}:{symbol}")
    }

    pub async fn subscribe_realtime(
        self: &Arc<Self>,
        filter: SubscriptionFilter,
    ) -> SubscriptionHandle {
        self.ensure_state_loaded().await;
        self.hub.subscribe(filter).await
    }

    pub async fn snapshot(&self, filter: &SubscriptionFilter) -> Vec<PositionWire> {
        let state = self.state.read().await;
        let mut positions: Vec<PositionWire> = state
            .values()
            .filter(|p| filter.matches(&p.contract_symbol, &p.status, &p.side, None))
            .cloned()
            .collect();
        positions.sort_by(|a, b| (&a.contract_symbol, &a.side).cmp(&(&b.contract_symbol, &b.side)));
        positions
    }

    pub async fn current_sequence(&self) -> u64 {
        self.sequence.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn consume_websocket(self: Arc<Self>, stop: watch::Receiver<bool>) {
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let ws = Arc::clone(&self.ws);
        let listen_stop = stop.clone();
        let listener = tokio::spawn(async move { ws.listen(listen_stop, tx).await });

        loop {
            tokio::select! {
                _ = stop_triggered(stop.clone()) => break,
                message = rx.recv() => {
                    match message {
                        Some(message) => {
                            let updates = self.extract_updates(&message);
                            if !updates.is_empty() {
                                self.apply_updates(updates, true).await;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        let _ = listener.await;
    }

    async fn poll_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        while !*stop.borrow() {
            match self.rest.fetch_positions().await {
                Ok(payload) => {
                    let updates = self.extract_updates(&payload);
                    self.apply_snapshot(updates).await;
                }
                Err(err) => warn!(error = %err, "REST poll failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(self.poll_interval)) => {}
                _ = stop.changed() => {}
            }
        }
    }

    async fn apply_updates(&self, updates: Vec<PositionWire>, notify: bool) {
        for update in updates {
            self.persist_update(&update).await;
            self.update_state(update, notify).await;
        }
    }

    async fn persist_update(&self, update: &PositionWire) {
        if let Err(err) = upsert(&self.pool, update).await {
            error!(
                symbol = %update.contract_symbol,
                side = %update.side,
                error = %err,
                "failed to persist position"
            );
        }
    }

    fn extract_updates(&self, message: &Value) -> Vec<PositionWire> {
        self.extract_data(message)
            .into_iter()
            .filter_map(|entry| normalize_position(&entry))
            .collect()
    }

    /// Heuristic extraction of the position list from whatever envelope
    /// shape the message arrived in: a `data` array, a `data.positions`
    /// array, a top-level `positions` array, or the message itself if it
    /// looks like a single position.
    fn extract_data(&self, message: &Value) -> Vec<Value> {
        let Some(obj) = message.as_object() else {
            return Vec::new();
        };
        if obj.is_empty() {
            return Vec::new();
        }
        if let Some(table) = obj.get("table").and_then(Value::as_str) {
            if !table.contains("position") {
                return Vec::new();
            }
        }
        if let Some(Value::Array(items)) = obj.get("data") {
            return items.iter().filter(|i| i.is_object()).cloned().collect();
        }
        if let Some(Value::Object(data)) = obj.get("data") {
            if let Some(Value::Array(items)) = data.get("positions") {
                return items.iter().filter(|i| i.is_object()).cloned().collect();
            }
        }
        if let Some(Value::Array(items)) = obj.get("positions") {
            return items.iter().filter(|i| i.is_object()).cloned().collect();
        }
        if obj.get("symbol").is_some() {
            return vec![message.clone()];
        }
        Vec::new()
    }

    async fn update_state(&self, update: PositionWire, notify: bool) {
        let key = state_key(&update.contract_symbol, &update.side);
        let (event, previous) = {
            let mut state = self.state.write().await;
            let previous = state.get(&key).cloned();
            state.insert(key, update.clone());
            if notify {
                let event = determine_event(previous.as_ref(), &update);
                (event, previous)
            } else {
                (None, previous)
            }
        };
        let Some(event_kind) = event else { return };
        let seq = self
            .sequence
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        let position_event = build_event(&event_kind, seq, update.clone(), previous);
        self.hub
            .publish(position_event, &update.contract_symbol, &update.status, &update.side)
            .await;
    }

    async fn ensure_state_loaded(&self) {
        if self.state_loaded.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        let _guard = self.load_lock.lock().await;
        if self.state_loaded.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        match self.rest.fetch_positions().await {
            Ok(payload) => {
                let updates = self.extract_updates(&payload);
                let observed: std::collections::HashSet<String> = updates
                    .iter()
                    .map(|u| state_key(&u.contract_symbol, &u.side))
                    .collect();
                if !updates.is_empty() {
                    self.apply_updates(updates, false).await;
                }
                self.close_missing_positions(&observed, false).await;
            }
            Err(err) => {
                warn!(error = %err, "initial REST sync failed");
            }
        }
        self.state_loaded
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    async fn apply_snapshot(&self, updates: Vec<PositionWire>) {
        let observed: std::collections::HashSet<String> = updates
            .iter()
            .map(|u| state_key(&u.contract_symbol, &u.side))
            .collect();
        if !updates.is_empty() {
            self.apply_updates(updates, true).await;
        }
        self.close_missing_positions(&observed, true).await;
    }

    /// Any position this service still considers active (per the DB) but
    /// that did not appear in the latest snapshot is forced closed.
    async fn close_missing_positions(&self, observed: &std::collections::HashSet<String>, notify: bool) {
        let active = match fetch_active(&self.pool, EXCHANGE_NAME).await {
            Ok(active) => active,
            Err(err) => {
                error!(error = %err, "failed to fetch active positions");
                return;
            }
        };
        let now = chrono::Utc::now();
        let forced: Vec<PositionWire> = active
            .into_iter()
            .filter(|(key, _)| !observed.contains(key))
            .map(|(_, row)| build_forced_close(row, now))
            .collect();
        if !forced.is_empty() {
            self.apply_updates(forced, notify).await;
        }
    }
}

async fn stop_triggered(mut stop: watch::Receiver<bool>) {
    loop {
        if *stop.borrow() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

fn determine_event(previous: Option<&PositionWire>, current: &PositionWire) -> Option<&'static str> {
    match previous {
        None if is_closed(current) => Some("closed"),
        None => Some("opened"),
        Some(prev) => {
            if is_closed(current) {
                if !is_closed(prev) {
                    return Some("closed");
                }
                return Some("updated");
            }
            if prev.qty_contract != current.qty_contract {
                return Some("quantity_changed");
            }
            if prev.status != current.status {
                return Some("updated");
            }
            if prev.entry_price != current.entry_price || prev.pnl_usdt != current.pnl_usdt {
                return Some("updated");
            }
            None
        }
    }
}

fn build_event(
    kind: &str,
    seq: u64,
    position: PositionWire,
    previous: Option<PositionWire>,
) -> PositionEvent {
    match kind {
        "opened" => PositionEvent::Opened { seq, position },
        "closed" => PositionEvent::Closed {
            seq,
            position,
            previous,
        },
        "quantity_changed" => PositionEvent::QuantityChanged {
            seq,
            position,
            previous,
        },
        _ => PositionEvent::Updated {
            seq,
            position,
            previous,
        },
    }
}

fn build_forced_close(row: PositionWire, closed_at: chrono::DateTime<chrono::Utc>) -> PositionWire {
    let mut meta = row.meta;
    meta.entry(
        "last_known_amount_usdt".to_string(),
    )
    .or_insert(Value::String(row.amount_usdt.to_string()));
    meta.entry("last_known_qty_contract".to_string())
        .or_insert(Value::String(row.qty_contract.to_string()));
    meta.insert(
        "sync_status".to_string(),
        Value::String("closed_by_snapshot".to_string()),
    );
    meta.insert(
        "sync_closed_at".to_string(),
        Value::String(closed_at.to_rfc3339()),
    );

    PositionWire {
        id: row.id,
        contract_symbol: row.contract_symbol,
        exchange: row.exchange,
        side: row.side,
        status: "CLOSED".to_string(),
        amount_usdt: Decimal::ZERO,
        entry_price: row.entry_price,
        qty_contract: Decimal::ZERO,
        leverage: row.leverage,
        external_order_id: row.external_order_id,
        opened_at: row.opened_at,
        closed_at: Some(closed_at),
        stop_loss: row.stop_loss,
        take_profit: row.take_profit,
        pnl_usdt: row.pnl_usdt,
        time_in_force: Some(
            row.time_in_force
                .unwrap_or_else(|| DEFAULT_TIME_IN_FORCE.to_string())
                .to_uppercase(),
        ),
        expires_at: row.expires_at,
        external_status: Some("CLOSED".to_string()),
        last_sync_at: closed_at,
        meta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn pos(qty: &str, status: &str) -> PositionWire {
        PositionWire {
            id: None,
            contract_symbol: "BTCUSDT".to_string(),
            exchange: "bitmart".to_string(),
            side: "LONG".to_string(),
            status: status.to_string(),
            amount_usdt: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            qty_contract: Decimal::from_str_radix(qty, 10).unwrap_or(Decimal::ZERO),
            leverage: Decimal::ZERO,
            external_order_id: None,
            opened_at: None,
            closed_at: None,
            stop_loss: None,
            take_profit: None,
            pnl_usdt: None,
            time_in_force: None,
            expires_at: None,
            external_status: None,
            last_sync_at: chrono::Utc::now(),
            meta: Default::default(),
        }
    }

    #[test]
    fn new_position_is_opened() {
        assert_eq!(determine_event(None, &pos("1", "OPEN")), Some("opened"));
    }

    #[test]
    fn new_position_already_closed_is_closed_event() {
        assert_eq!(determine_event(None, &pos("0", "CLOSED")), Some("closed"));
    }

    #[test]
    fn qty_change_is_quantity_changed() {
        let prev = pos("1", "OPEN");
        let cur = pos("2", "OPEN");
        assert_eq!(determine_event(Some(&prev), &cur), Some("quantity_changed"));
    }

    #[test]
    fn going_to_zero_qty_is_closed() {
        let prev = pos("1", "OPEN");
        let cur = pos("0", "OPEN");
        assert_eq!(determine_event(Some(&prev), &cur), Some("closed"));
    }

    #[test]
    fn already_closed_staying_closed_is_updated() {
        let prev = pos("0", "CLOSED");
        let cur = pos("0", "CLOSED");
        assert_eq!(determine_event(Some(&prev), &cur), Some("updated"));
    }

    #[test]
    fn unchanged_position_has_no_event() {
        let prev = pos("1", "OPEN");
        let cur = pos("1", "OPEN");
        assert_eq!(determine_event(Some(&prev), &cur), None);
    }
}
