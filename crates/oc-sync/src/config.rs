//! Environment-driven configuration for the position sync engine. Env var
//! names and defaults match the historical deployment's `.env` surface.

pub const DEFAULT_WS_URL: &str = "wss://openapi-ws-v2.bitmart.com/api?protocol=1.1";
pub const DEFAULT_REST_URL: &str = "https://api-cloud-v2.bitmart.com";
pub const DEFAULT_POLL_SECONDS: u64 = 120;
pub const DEFAULT_WS_PING_SECONDS: u64 = 20;
pub const DEFAULT_WS_LOGIN_PAYLOAD: &str = "login";
pub const DEFAULT_WS_CHANNELS: &str = "futures/position";
pub const DEFAULT_API_HOST: &str = "0.0.0.0";
pub const DEFAULT_API_PORT: u16 = 9000;
/// Floor enforced regardless of what the env supplies, so a misconfigured
/// poll interval can't hammer the REST endpoint.
pub const MIN_POLL_SECONDS: u64 = 30;

#[derive(Debug, Clone)]
pub struct BitmartConfig {
    pub api_key: String,
    pub api_secret: String,
    pub api_memo: String,
    pub ws_url: String,
    pub rest_url: String,
    pub ws_login_payload: String,
    pub ws_ping_interval: u64,
    pub poll_interval: u64,
    pub rest_timeout_secs: f64,
    pub ws_channels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bitmart: BitmartConfig,
    pub log_level: String,
    pub api_host: String,
    pub api_port: u16,
    pub auto_start: bool,
}

fn getenv(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn getenv_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        _ => default,
    }
}

fn get_channels(raw: &str) -> Vec<String> {
    let parts: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        vec![DEFAULT_WS_CHANNELS.to_string()]
    } else {
        parts
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let channels = get_channels(&getenv("BITMART_WS_CHANNELS", ""));

        let poll_interval = getenv("BITMART_POLL_SECONDS", &DEFAULT_POLL_SECONDS.to_string())
            .parse::<u64>()
            .unwrap_or(DEFAULT_POLL_SECONDS)
            .max(MIN_POLL_SECONDS);

        let bitmart = BitmartConfig {
            api_key: getenv("BITMART_API_KEY", ""),
            api_secret: getenv("BITMART_SECRET_KEY", ""),
            api_memo: getenv("BITMART_API_MEMO", ""),
            ws_url: getenv("BITMART_WS_URL", DEFAULT_WS_URL),
            rest_url: getenv("BITMART_REST_URL", DEFAULT_REST_URL),
            ws_login_payload: getenv("BITMART_WS_LOGIN_PAYLOAD", DEFAULT_WS_LOGIN_PAYLOAD),
            ws_ping_interval: getenv("BITMART_WS_PING_SECONDS", &DEFAULT_WS_PING_SECONDS.to_string())
                .parse()
                .unwrap_or(DEFAULT_WS_PING_SECONDS),
            poll_interval,
            rest_timeout_secs: getenv("BITMART_REST_TIMEOUT", "10").parse().unwrap_or(10.0),
            ws_channels: channels,
        };

        Self {
            bitmart,
            log_level: getenv("LOG_LEVEL", "INFO"),
            api_host: getenv("BITMART_SYNC_HOST", DEFAULT_API_HOST),
            api_port: getenv("BITMART_SYNC_PORT", &DEFAULT_API_PORT.to_string())
                .parse()
                .unwrap_or(DEFAULT_API_PORT),
            auto_start: getenv_bool("BITMART_AUTO_START", true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_channels_falls_back_to_default() {
        assert_eq!(get_channels(""), vec![DEFAULT_WS_CHANNELS.to_string()]);
    }

    #[test]
    fn get_channels_splits_and_trims() {
        assert_eq!(
            get_channels("a, b ,, c"),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }
}
