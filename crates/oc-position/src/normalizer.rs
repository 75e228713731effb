//! Heuristic field extraction from whatever shape a position feed (the WS
//! push or the REST snapshot) hands us. Exchange payloads are not a fixed
//! schema across endpoints, so every field is resolved by trying a short
//! list of known key variants in priority order.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use oc_schemas::PositionWire;

const QTY_KEYS: &[&str] = &[
    "size",
    "current_amount",
    "hold_volume",
    "position_volume",
    "open_size",
    "available",
];
const ENTRY_KEYS: &[&str] = &["entry_price", "avg_entry_price", "average_price", "avg_price"];
const LEVERAGE_KEYS: &[&str] = &["leverage", "position_leverage", "open_leverage"];
const STOP_LOSS_KEYS: &[&str] = &["stop_loss", "sl_price", "preset_stop_loss_price"];
const TAKE_PROFIT_KEYS: &[&str] = &["take_profit", "tp_price", "preset_take_profit_price"];
const PNL_KEYS: &[&str] = &[
    "realised_pnl",
    "unrealised_pnl",
    "pnl",
    "unrealised_profit",
    "unrealisedProfit",
    "unrealized_pnl",
    "unrealized_profit",
    "unrealizedProfit",
    "unrealisedPnl",
    "unrealizedPnl",
    "realized_pnl",
    "realizedPnl",
    "realized_profit",
    "realisedProfit",
];
const OPEN_TIME_KEYS: &[&str] = &["open_time", "created_at", "createdTime", "open_timestamp"];
const CLOSE_TIME_KEYS: &[&str] = &["close_time", "updated_at", "closedTime"];
const ORDER_ID_KEYS: &[&str] = &["order_id", "clOrdId", "client_oid", "clientOrderId"];
const DEFAULT_TIME_IN_FORCE: &str = "GTC";
const EXCHANGE_NAME: &str = "bitmart";

fn side_numeric(n: i64) -> Option<&'static str> {
    match n {
        1 => Some("LONG"),
        2 | -1 => Some("SHORT"),
        _ => None,
    }
}

fn side_text(normalized: &str) -> Option<&'static str> {
    match normalized {
        "LONG" | "BUY" | "BID" | "OPEN_LONG" | "HOLD_LONG" => Some("LONG"),
        "SHORT" | "SELL" | "ASK" | "OPEN_SHORT" | "HOLD_SHORT" => Some("SHORT"),
        _ => None,
    }
}

fn is_blank(v: &Value) -> bool {
    matches!(v, Value::Null) || matches!(v, Value::String(s) if s.is_empty())
}

fn extract_symbol(raw: &serde_json::Map<String, Value>) -> Option<String> {
    let v = raw
        .get("symbol")
        .or_else(|| raw.get("contract"))
        .or_else(|| raw.get("contract_symbol"))?;
    if is_blank(v) {
        return None;
    }
    Some(value_to_string(v).to_uppercase())
}

fn extract_side(raw: &serde_json::Map<String, Value>) -> Option<String> {
    // A blank `side` (null or empty string) falls through to the next key
    // in the chain rather than short-circuiting the whole lookup.
    let value = raw
        .get("side")
        .filter(|v| !is_blank(v))
        .or_else(|| raw.get("hold_side").filter(|v| !is_blank(v)))
        .or_else(|| raw.get("position_side").filter(|v| !is_blank(v)))
        .or_else(|| raw.get("holdSide").filter(|v| !is_blank(v)))?
        .clone();

    if let Some(n) = value.as_i64() {
        return side_numeric(n).map(str::to_string);
    }
    if let Some(f) = value.as_f64() {
        return side_numeric(f as i64).map(str::to_string);
    }

    let normalized = value_to_string(&value).trim().to_uppercase();
    if let Some(mapped) = side_text(&normalized) {
        return Some(mapped.to_string());
    }
    if normalized == "LONG" || normalized == "SHORT" {
        return Some(normalized);
    }
    None
}

fn extract_decimal(raw: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<Decimal> {
    for key in keys {
        let Some(value) = raw.get(*key) else { continue };
        if is_blank(value) {
            continue;
        }
        let text = value_to_string(value);
        if let Ok(d) = Decimal::from_str(&text) {
            return Some(d);
        }
    }
    None
}

fn extract_datetime(raw: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<DateTime<Utc>> {
    for key in keys {
        let Some(value) = raw.get(*key) else { continue };
        if is_blank(value) {
            continue;
        }
        if let Some(n) = value.as_f64() {
            return epoch_to_datetime(n);
        }
        if let Value::String(s) = value {
            let stripped = s.trim();
            if stripped.chars().all(|c| c.is_ascii_digit()) && !stripped.is_empty() {
                if let Ok(n) = stripped.parse::<f64>() {
                    return epoch_to_datetime(n);
                }
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(stripped) {
                return Some(dt.with_timezone(&Utc));
            }
        }
    }
    None
}

fn epoch_to_datetime(mut value: f64) -> Option<DateTime<Utc>> {
    if value > 10_000_000_000.0 {
        value /= 1000.0;
    }
    Utc.timestamp_opt(value as i64, 0).single()
}

fn first_of(raw: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        raw.get(*k).and_then(|v| {
            if is_blank(v) {
                None
            } else {
                Some(value_to_string(v))
            }
        })
    })
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalizes a raw position payload into the canonical record, or `None`
/// if no symbol could be determined (the payload isn't a position at all).
pub fn normalize_position(raw: &Value) -> Option<PositionWire> {
    let raw = raw.as_object()?;

    let symbol = extract_symbol(raw)?;
    let side = extract_side(raw).unwrap_or_else(|| "LONG".to_string());

    let qty = extract_decimal(raw, QTY_KEYS);
    let entry_price = extract_decimal(raw, ENTRY_KEYS);
    let leverage = extract_decimal(raw, LEVERAGE_KEYS);
    let stop_loss = extract_decimal(raw, STOP_LOSS_KEYS);
    let take_profit = extract_decimal(raw, TAKE_PROFIT_KEYS);
    let pnl = extract_decimal(raw, PNL_KEYS);

    let opened_at = extract_datetime(raw, OPEN_TIME_KEYS);
    let closed_at = extract_datetime(raw, CLOSE_TIME_KEYS);

    let status = match &qty {
        None => "CLOSED".to_string(),
        Some(q) if q.is_zero() => "CLOSED".to_string(),
        _ => raw
            .get("status")
            .filter(|v| !is_blank(v))
            .map(|v| value_to_string(v).to_uppercase())
            .unwrap_or_else(|| "OPEN".to_string()),
    };

    let amount = match (&qty, &entry_price) {
        (Some(q), Some(p)) => *q * *p,
        _ => Decimal::ZERO,
    };

    let external_status = raw
        .get("state")
        .or_else(|| raw.get("external_status"))
        .filter(|v| !is_blank(v))
        .map(|v| value_to_string(v).to_uppercase());

    let time_in_force = raw
        .get("time_in_force")
        .map(|v| value_to_string(v).to_uppercase())
        .unwrap_or_else(|| DEFAULT_TIME_IN_FORCE.to_string());

    Some(PositionWire {
        id: None,
        contract_symbol: symbol,
        exchange: EXCHANGE_NAME.to_string(),
        side,
        status: status.clone(),
        amount_usdt: amount,
        entry_price: entry_price.unwrap_or(Decimal::ZERO),
        qty_contract: qty.unwrap_or(Decimal::ZERO),
        leverage: leverage.unwrap_or(Decimal::ZERO),
        external_order_id: first_of(raw, ORDER_ID_KEYS),
        opened_at,
        closed_at: if status == "CLOSED" { closed_at } else { None },
        stop_loss,
        take_profit,
        pnl_usdt: pnl,
        time_in_force: Some(time_in_force),
        expires_at: None,
        external_status,
        last_sync_at: Utc::now(),
        meta: raw.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_payload_without_symbol() {
        assert!(normalize_position(&json!({"side": "LONG"})).is_none());
    }

    #[test]
    fn extracts_numeric_side_and_computes_amount() {
        let raw = json!({
            "symbol": "btcusdt",
            "side": 2,
            "size": "1.5",
            "entry_price": "100",
        });
        let pos = normalize_position(&raw).unwrap();
        assert_eq!(pos.contract_symbol, "BTCUSDT");
        assert_eq!(pos.side, "SHORT");
        assert_eq!(pos.amount_usdt, Decimal::from_str("150").unwrap());
        assert_eq!(pos.status, "OPEN");
    }

    #[test]
    fn negative_one_maps_to_short() {
        let raw = json!({"symbol": "ethusdt", "side": -1});
        let pos = normalize_position(&raw).unwrap();
        assert_eq!(pos.side, "SHORT");
    }

    #[test]
    fn blank_side_falls_through_to_hold_side() {
        let raw = json!({"symbol": "ethusdt", "side": Value::Null, "hold_side": 2});
        let pos = normalize_position(&raw).unwrap();
        assert_eq!(pos.side, "SHORT");

        let raw_empty = json!({"symbol": "ethusdt", "side": "", "hold_side": 1});
        let pos_empty = normalize_position(&raw_empty).unwrap();
        assert_eq!(pos_empty.side, "LONG");
    }

    #[test]
    fn zero_qty_forces_closed_status() {
        let raw = json!({"symbol": "ethusdt", "side": "LONG", "size": "0"});
        let pos = normalize_position(&raw).unwrap();
        assert_eq!(pos.status, "CLOSED");
    }

    #[test]
    fn text_side_variants_map_to_long_or_short() {
        for (text, expected) in [
            ("BUY", "LONG"),
            ("bid", "LONG"),
            ("OPEN_LONG", "LONG"),
            ("SELL", "SHORT"),
            ("ask", "SHORT"),
            ("HOLD_SHORT", "SHORT"),
        ] {
            let raw = json!({"symbol": "btcusdt", "side": text});
            let pos = normalize_position(&raw).unwrap();
            assert_eq!(pos.side, expected, "side {text}");
        }
    }

    #[test]
    fn millisecond_timestamp_is_scaled_down() {
        let raw = json!({"symbol": "btcusdt", "side": "LONG", "open_time": 1_700_000_000_000i64});
        let pos = normalize_position(&raw).unwrap();
        assert_eq!(pos.opened_at.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn second_timestamp_is_used_directly() {
        let raw = json!({"symbol": "btcusdt", "side": "LONG", "open_time": 1_700_000_000});
        let pos = normalize_position(&raw).unwrap();
        assert_eq!(pos.opened_at.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn order_id_falls_back_through_key_list() {
        let raw = json!({"symbol": "btcusdt", "side": "LONG", "clOrdId": "abc123"});
        let pos = normalize_position(&raw).unwrap();
        assert_eq!(pos.external_order_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn normalization_is_idempotent_on_its_own_output() {
        let raw = json!({"symbol": "btcusdt", "side": "LONG", "size": "2", "entry_price": "50"});
        let once = normalize_position(&raw).unwrap();
        let meta_as_value = Value::Object(once.meta.clone());
        let twice = normalize_position(&meta_as_value);
        assert!(twice.is_some());
    }
}
