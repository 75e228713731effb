//! Postgres-backed position store. Mirrors the find-existing/insert/update
//! upsert shape of the historical repository, translated from MySQL to
//! Postgres placeholders.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::info;

use oc_schemas::PositionWire;

/// Opens a pool using `OC_DATABASE_URL`, falling back to `DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var("OC_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .context("OC_DATABASE_URL (or DATABASE_URL) must be set")?;
    PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("connecting to positions database")
}

pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn state_key(symbol: &str, side: &str) -> String {
    format!("{}::{}", symbol.to_uppercase(), side.to_uppercase())
}

/// Finds the existing row for `(contract_symbol, side)` if any, then
/// inserts or updates. Returns the row id that was written. The
/// find-then-write sequence runs inside a single transaction so a
/// concurrent upsert for the same `(contract_symbol, side)` (e.g. the WS
/// and REST paths racing on the same position) can't both pass the SELECT
/// and both INSERT.
pub async fn upsert(pool: &PgPool, position: &PositionWire) -> Result<i64> {
    let mut tx = pool.begin().await.context("starting position upsert transaction")?;

    let existing: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT id FROM positions
        WHERE contract_symbol = $1 AND side = $2
        ORDER BY (opened_at IS NULL), opened_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(&position.contract_symbol)
    .bind(&position.side)
    .fetch_optional(&mut *tx)
    .await
    .context("looking up existing position")?;

    let meta_json = serde_json::Value::Object(position.meta.clone());

    let id = match existing {
        None => {
            info!(symbol = %position.contract_symbol, side = %position.side, "inserting position");
            let row: (i64,) = sqlx::query_as(
                r#"
                INSERT INTO positions (
                    contract_symbol, exchange, side, status, amount_usdt, entry_price,
                    qty_contract, leverage, external_order_id, opened_at, closed_at,
                    stop_loss, take_profit, pnl_usdt, meta, created_at, updated_at,
                    time_in_force, expires_at, external_status, last_sync_at
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $16, $17, $18, $19, $16
                )
                RETURNING id
                "#,
            )
            .bind(&position.contract_symbol)
            .bind(&position.exchange)
            .bind(&position.side)
            .bind(&position.status)
            .bind(position.amount_usdt)
            .bind(position.entry_price)
            .bind(position.qty_contract)
            .bind(position.leverage)
            .bind(&position.external_order_id)
            .bind(position.opened_at)
            .bind(position.closed_at)
            .bind(position.stop_loss)
            .bind(position.take_profit)
            .bind(position.pnl_usdt)
            .bind(meta_json)
            .bind(position.last_sync_at)
            .bind(&position.time_in_force)
            .bind(position.expires_at)
            .bind(&position.external_status)
            .fetch_one(&mut *tx)
            .await
            .context("inserting position")?;
            row.0
        }
        Some((id,)) => {
            info!(id, symbol = %position.contract_symbol, side = %position.side, "updating position");
            sqlx::query(
                r#"
                UPDATE positions SET
                    status = $1, amount_usdt = $2, entry_price = $3, qty_contract = $4,
                    leverage = $5, external_order_id = $6, opened_at = $7, closed_at = $8,
                    stop_loss = $9, take_profit = $10, pnl_usdt = $11, meta = $12,
                    updated_at = $13, time_in_force = $14, expires_at = $15,
                    external_status = $16, last_sync_at = $13
                WHERE id = $17
                "#,
            )
            .bind(&position.status)
            .bind(position.amount_usdt)
            .bind(position.entry_price)
            .bind(position.qty_contract)
            .bind(position.leverage)
            .bind(&position.external_order_id)
            .bind(position.opened_at)
            .bind(position.closed_at)
            .bind(position.stop_loss)
            .bind(position.take_profit)
            .bind(position.pnl_usdt)
            .bind(meta_json)
            .bind(position.last_sync_at)
            .bind(&position.time_in_force)
            .bind(position.expires_at)
            .bind(&position.external_status)
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("updating position")?;
            id
        }
    };

    tx.commit().await.context("committing position upsert transaction")?;
    Ok(id)
}

/// Loads all open positions for `exchange`, keyed by `"{symbol}::{side}"`,
/// used to seed in-memory state on startup and to detect positions that
/// vanished from an exchange snapshot.
pub async fn fetch_active(pool: &PgPool, exchange: &str) -> Result<HashMap<String, PositionWire>> {
    let rows = sqlx::query(
        r#"
        SELECT id, contract_symbol, side, exchange, status, amount_usdt, entry_price,
               qty_contract, leverage, external_order_id, opened_at, closed_at,
               stop_loss, take_profit, pnl_usdt, time_in_force, expires_at,
               external_status, last_sync_at, meta
        FROM positions
        WHERE exchange = $1 AND status IN ('OPEN', 'NORMAL')
        "#,
    )
    .bind(exchange)
    .fetch_all(pool)
    .await
    .context("fetching active positions")?;

    let mut out = HashMap::new();
    for row in rows {
        let meta: Option<serde_json::Value> = row.try_get("meta")?;
        let meta = match meta {
            Some(serde_json::Value::Object(m)) => m,
            _ => serde_json::Map::new(),
        };
        let position = PositionWire {
            id: row.try_get("id")?,
            contract_symbol: row.try_get("contract_symbol")?,
            exchange: row.try_get("exchange")?,
            side: row.try_get("side")?,
            status: row.try_get("status")?,
            amount_usdt: row.try_get::<Decimal, _>("amount_usdt")?,
            entry_price: row.try_get::<Decimal, _>("entry_price")?,
            qty_contract: row.try_get::<Decimal, _>("qty_contract")?,
            leverage: row.try_get::<Decimal, _>("leverage")?,
            external_order_id: row.try_get("external_order_id")?,
            opened_at: row.try_get::<Option<DateTime<Utc>>, _>("opened_at")?,
            closed_at: row.try_get::<Option<DateTime<Utc>>, _>("closed_at")?,
            stop_loss: row.try_get::<Option<Decimal>, _>("stop_loss")?,
            take_profit: row.try_get::<Option<Decimal>, _>("take_profit")?,
            pnl_usdt: row.try_get::<Option<Decimal>, _>("pnl_usdt")?,
            time_in_force: row.try_get("time_in_force")?,
            expires_at: row.try_get::<Option<DateTime<Utc>>, _>("expires_at")?,
            external_status: row.try_get("external_status")?,
            last_sync_at: row.try_get("last_sync_at")?,
            meta,
        };
        let key = state_key(&position.contract_symbol, &position.side);
        out.insert(key, position);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_key_uppercases_and_joins() {
        assert_eq!(state_key("btcusdt", "long"), "BTCUSDT::LONG");
    }
}
