//! Subscriber fan-out. Each subscriber gets a bounded mpsc channel; a full
//! channel means a slow consumer, and the hub drops the message for that
//! subscriber rather than block the publisher or everyone else.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use oc_schemas::PositionEvent;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

use crate::filter::SubscriptionFilter;

/// Per-subscriber mailbox capacity. A subscriber slower than this falls
/// behind and starts losing events rather than stalling the hub.
pub const QUEUE_SIZE: usize = 100;

struct Subscriber {
    filter: SubscriptionFilter,
    tx: mpsc::Sender<PositionEvent>,
}

#[derive(Default)]
struct Inner {
    subscribers: HashMap<u64, Subscriber>,
}

pub struct RealtimeHub {
    inner: RwLock<Inner>,
    next_id: AtomicU64,
}

/// A live subscription. Dropping it (or calling `close`) removes the
/// subscriber from the hub.
pub struct SubscriptionHandle {
    pub id: u64,
    pub rx: mpsc::Receiver<PositionEvent>,
    hub: Arc<RealtimeHub>,
}

impl SubscriptionHandle {
    pub async fn close(self) {
        self.hub.unsubscribe(self.id).await;
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl RealtimeHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn subscribe(
        self: &Arc<Self>,
        filter: SubscriptionFilter,
    ) -> SubscriptionHandle {
        let (tx, rx) = mpsc::channel(QUEUE_SIZE);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.write().await.subscribers.insert(id, Subscriber { filter, tx });
        SubscriptionHandle {
            id,
            rx,
            hub: Arc::clone(self),
        }
    }

    pub async fn unsubscribe(&self, id: u64) {
        self.inner.write().await.subscribers.remove(&id);
    }

    /// Publishes `event` to every subscriber whose filter matches. A full
    /// subscriber queue is a dropped message for that subscriber only.
    pub async fn publish(&self, event: PositionEvent, symbol: &str, status: &str, side: &str) {
        let inner = self.inner.read().await;
        let mut dropped = 0u32;
        for subscriber in inner.subscribers.values() {
            if !subscriber.filter.matches(symbol, status, side, None) {
                continue;
            }
            if subscriber.tx.try_send(event.clone()).is_err() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!(dropped, "dropped realtime messages because subscriber queues are full");
        }
    }

    pub async fn active_subscribers(&self) -> usize {
        self.inner.read().await.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_then_publish_delivers_matching_event() {
        let hub = RealtimeHub::new();
        let mut handle = hub.subscribe(SubscriptionFilter::default()).await;
        hub.publish(
            PositionEvent::Opened {
                seq: 1,
                position: sample_position(),
            },
            "BTCUSDT",
            "OPEN",
            "LONG",
        )
        .await;
        let event = handle.rx.recv().await.unwrap();
        assert_eq!(event.seq(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_from_active_count() {
        let hub = RealtimeHub::new();
        let handle = hub.subscribe(SubscriptionFilter::default()).await;
        assert_eq!(hub.active_subscribers().await, 1);
        handle.close().await;
        assert_eq!(hub.active_subscribers().await, 0);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let hub = RealtimeHub::new();
        let handle = hub.subscribe(SubscriptionFilter::default()).await;
        for i in 0..(QUEUE_SIZE as u64 + 5) {
            hub.publish(
                PositionEvent::Opened {
                    seq: i,
                    position: sample_position(),
                },
                "BTCUSDT",
                "OPEN",
                "LONG",
            )
            .await;
        }
        assert_eq!(hub.active_subscribers().await, 1);
        drop(handle);
    }

    fn sample_position() -> oc_schemas::PositionWire {
        oc_schemas::PositionWire {
            id: None,
            contract_symbol: "BTCUSDT".to_string(),
            exchange: "bitmart".to_string(),
            side: "LONG".to_string(),
            status: "OPEN".to_string(),
            amount_usdt: Default::default(),
            entry_price: Default::default(),
            qty_contract: Default::default(),
            leverage: Default::default(),
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
}
