//! Reconnecting websocket client. Ports the reconnect/backoff, login,
//! resubscribe, ping, and idle-timeout behavior of the historical
//! `BitmartWebsocketClient` onto `tokio-tungstenite`.

use std::collections::HashSet;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::BitmartConfig;
use crate::signing::Signer;

const MIN_BACKOFF_SECS: u64 = 5;
const MAX_BACKOFF_SECS: u64 = 60;

pub struct WsClient {
    config: BitmartConfig,
    signer: Signer,
    channels: StdMutex<HashSet<String>>,
    write_tx: StdMutex<Option<mpsc::UnboundedSender<Message>>>,
}

impl WsClient {
    pub fn new(config: BitmartConfig) -> Self {
        let signer = Signer::new(config.api_secret.clone(), config.api_memo.clone());
        let channels = config.ws_channels.iter().cloned().collect();
        Self {
            config,
            signer,
            channels: StdMutex::new(channels),
            write_tx: StdMutex::new(None),
        }
    }

    pub fn list_channels(&self) -> Vec<String> {
        let mut v: Vec<String> = self.channels.lock().unwrap().iter().cloned().collect();
        v.sort();
        v
    }

    pub fn subscribe(&self, channel: &str) {
        let channel = channel.trim();
        if channel.is_empty() {
            return;
        }
        let is_new = self.channels.lock().unwrap().insert(channel.to_string());
        if is_new {
            self.send_control("subscribe", &[channel]);
            info!(channel, "subscribed channel");
        }
    }

    pub fn unsubscribe(&self, channel: &str) {
        let channel = channel.trim();
        if channel.is_empty() {
            return;
        }
        let removed = self.channels.lock().unwrap().remove(channel);
        if removed {
            self.send_control("unsubscribe", &[channel]);
            info!(channel, "unsubscribed channel");
        }
    }

    fn send_control(&self, op: &str, args: &[&str]) {
        if let Some(tx) = self.write_tx.lock().unwrap().as_ref() {
            let msg = json!({"op": op, "args": args}).to_string();
            let _ = tx.send(Message::Text(msg));
        }
    }

    /// Drives the reconnect loop, sending every decoded, non-control
    /// message to `out`. Exits when `stop` is set.
    pub async fn listen(&self, mut stop: watch::Receiver<bool>, out: mpsc::Sender<Value>) {
        let mut backoff = MIN_BACKOFF_SECS;
        while !*stop.borrow() {
            match self.run_connection(&mut stop, &out).await {
                Ok(()) => backoff = MIN_BACKOFF_SECS,
                Err(err) => {
                    warn!(error = %err, "websocket error");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(backoff)) => {}
                        _ = stop.changed() => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                }
            }
            *self.write_tx.lock().unwrap() = None;
        }
        info!("websocket listener stopped");
    }

    async fn run_connection(
        &self,
        stop: &mut watch::Receiver<bool>,
        out: &mpsc::Sender<Value>,
    ) -> anyhow::Result<()> {
        let (ws, _) = tokio_tungstenite::connect_async(&self.config.ws_url).await?;
        info!(url = %self.config.ws_url, "connected to websocket");
        let (mut sink, mut stream) = ws.split();

        self.authenticate(&mut sink).await?;
        self.resubscribe(&mut sink).await?;

        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Message>();
        *self.write_tx.lock().unwrap() = Some(write_tx.clone());

        let writer = tokio::spawn(async move {
            while let Some(msg) = write_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let ping_interval = self.config.ws_ping_interval.max(10);
        let idle_timeout = Duration::from_secs((self.config.ws_ping_interval * 2).max(30));
        let mut ping_ticker = tokio::time::interval(Duration::from_secs(ping_interval));
        ping_ticker.tick().await; // first tick fires immediately

        let result = loop {
            tokio::select! {
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break Ok(());
                    }
                }
                _ = ping_ticker.tick() => {
                    if write_tx.send(Message::Text(json!({"op": "ping"}).to_string())).is_err() {
                        break Ok(());
                    }
                }
                frame = tokio::time::timeout(idle_timeout, stream.next()) => {
                    match frame {
                        Err(_) => {
                            warn!(?idle_timeout, "websocket idle, forcing reconnect");
                            break Ok(());
                        }
                        Ok(None) => break Ok(()),
                        Ok(Some(Err(e))) => break Err(anyhow::anyhow!(e)),
                        Ok(Some(Ok(Message::Text(text)))) => {
                            if let Some(value) = self.decode(&text) {
                                if out.send(value).await.is_err() {
                                    break Ok(());
                                }
                            }
                        }
                        Ok(Some(Ok(Message::Close(_)))) => break Ok(()),
                        Ok(Some(Ok(_))) => {}
                    }
                }
            }
        };

        drop(write_tx);
        let _ = writer.await;
        result
    }

    async fn authenticate(
        &self,
        sink: &mut (impl SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    ) -> anyhow::Result<()> {
        let timestamp_ms = chrono::Utc::now().timestamp_millis().to_string();
        let signature = self
            .signer
            .sign_ws_login(&timestamp_ms, &self.config.ws_login_payload);
        let payload = json!({
            "op": "login",
            "args": {
                "apiKey": self.config.api_key,
                "timestamp": timestamp_ms,
                "sign": signature,
                "memo": self.signer.api_memo,
            }
        });
        sink.send(Message::Text(payload.to_string())).await?;
        debug!("sent login frame");
        Ok(())
    }

    async fn resubscribe(
        &self,
        sink: &mut (impl SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    ) -> anyhow::Result<()> {
        let channels = self.list_channels();
        if channels.is_empty() {
            warn!("no websocket channels configured; skipping subscribe");
            return Ok(());
        }
        let payload = json!({"op": "subscribe", "args": channels});
        sink.send(Message::Text(payload.to_string())).await?;
        info!(?channels, "subscribed to channels");
        Ok(())
    }

    fn decode(&self, raw: &str) -> Option<Value> {
        let message: Value = serde_json::from_str(raw).ok()?;
        if let Some(event) = message.get("event").and_then(Value::as_str) {
            if event == "subscribe" || event == "login" {
                debug!(event, "control message");
                return None;
            }
        }
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> BitmartConfig {
        BitmartConfig {
            api_key: "k".into(),
            api_secret: "s".into(),
            api_memo: "m".into(),
            ws_url: "wss://example.invalid".into(),
            rest_url: "https://example.invalid".into(),
            ws_login_payload: "login".into(),
            ws_ping_interval: 20,
            poll_interval: 60,
            rest_timeout_secs: 10.0,
            ws_channels: vec!["futures/position".to_string()],
        }
    }

    #[test]
    fn decode_filters_control_messages() {
        let client = WsClient::new(test_config());
        assert!(client.decode(r#"{"event":"login"}"#).is_none());
        assert!(client.decode(r#"{"event":"subscribe"}"#).is_none());
        assert!(client.decode(r#"{"data":[{"symbol":"BTCUSDT"}]}"#).is_some());
    }

    #[test]
    fn subscribe_and_unsubscribe_update_channel_set() {
        let client = WsClient::new(test_config());
        client.subscribe("futures/position:ETHUSDT");
        assert!(client.list_channels().contains(&"futures/position:ETHUSDT".to_string()));
        client.unsubscribe("futures/position:ETHUSDT");
        assert!(!client.list_channels().contains(&"futures/position:ETHUSDT".to_string()));
    }
}
