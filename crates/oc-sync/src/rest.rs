//! Signed REST polling client. Used both for the periodic snapshot poll and
//! for the one-time initial sync under the load lock.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::config::BitmartConfig;
use crate::signing::Signer;

const POSITIONS_PATH: &str = "/contract/private/position";

pub struct RestClient {
    http: reqwest::Client,
    config: BitmartConfig,
    signer: Signer,
}

impl RestClient {
    pub fn new(config: BitmartConfig) -> Self {
        let signer = Signer::new(config.api_secret.clone(), config.api_memo.clone());
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(config.rest_timeout_secs.max(1.0)))
            .build()
            .expect("reqwest client builds with static config");
        Self { http, config, signer }
    }

    /// Fetches the current position snapshot as a raw JSON value; callers
    /// feed this into the same `_extract_data`-style heuristics used for
    /// websocket messages.
    pub async fn fetch_positions(&self) -> Result<Value> {
        let timestamp_ms = chrono::Utc::now().timestamp_millis().to_string();
        let (payload, _body) =
            Signer::build_rest_components("GET", POSITIONS_PATH, "", None);
        let signature = self.signer.sign(&timestamp_ms, &payload);

        let url = format!("{}{}", self.config.rest_url, POSITIONS_PATH);
        let response = self
            .http
            .get(url)
            .header("X-BM-KEY", &self.config.api_key)
            .header("X-BM-SIGN", signature)
            .header("X-BM-TIMESTAMP", timestamp_ms)
            .send()
            .await
            .context("sending positions REST request")?;

        response
            .error_for_status()
            .context("positions REST request returned an error status")?
            .json::<Value>()
            .await
            .context("decoding positions REST response")
    }
}
