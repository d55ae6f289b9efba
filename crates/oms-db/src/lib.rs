//! Best-effort persistence: every write is fire-and-forget from the
//! trading path's perspective. Connection/migration plumbing follows the
//! teacher's `connect_from_env` / embedded-migrations pattern.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use oms_schemas::{Intent, IntentResult, Side};
use oms_state::{OrderStatus, OrderType, SymbolPosition, WorkingOrder};

pub async fn connect_from_env() -> anyhow::Result<PgPool> {
    let url = std::env::var("OMS_DATABASE_URL").context("OMS_DATABASE_URL not set")?;
    PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to postgres")
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("failed to run migrations")
}

/// Thin wrapper around a `PgPool`. Every method swallows its own errors
/// into a `tracing::warn!` rather than propagating — persistence failures
/// must never interrupt a trading decision.
#[derive(Clone)]
pub struct OmsPersistence {
    pool: PgPool,
}

impl OmsPersistence {
    pub fn new(pool: PgPool) -> Self {
        OmsPersistence { pool }
    }

    pub async fn record_intent(&self, intent: &Intent, result: &IntentResult) {
        let request_json = serde_json::json!({
            "strategy_id": intent.strategy_id,
            "symbol": intent.symbol,
            "kind": enum_text(&intent.kind),
        });
        let result_json = serde_json::to_value(result).ok();
        let res = sqlx::query(
            "insert into intents (intent_id, strategy_id, symbol, kind, idempotency_key, request_json, result_json)
             values ($1, $2, $3, $4, $5, $6, $7)
             on conflict (intent_id) do update set result_json = excluded.result_json",
        )
        .bind(intent.intent_id)
        .bind(&intent.strategy_id)
        .bind(&intent.symbol)
        .bind(enum_text(&intent.kind))
        .bind(&intent.idempotency_key)
        .bind(request_json)
        .bind(result_json)
        .execute(&self.pool)
        .await;
        log_if_err("record_intent", res);
    }

    pub async fn sync_position(&self, pos: &SymbolPosition) {
        let res = sqlx::query(
            "insert into positions (symbol, real_qty, avg_price_micros, frozen, updated_at)
             values ($1, $2, $3, $4, now())
             on conflict (symbol) do update set
               real_qty = excluded.real_qty,
               avg_price_micros = excluded.avg_price_micros,
               frozen = excluded.frozen,
               updated_at = now()",
        )
        .bind(&pos.symbol)
        .bind(pos.real_qty)
        .bind(pos.avg_price_micros)
        .bind(pos.frozen)
        .execute(&self.pool)
        .await;
        log_if_err("sync_position", res);
    }

    pub async fn sync_allocation(&self, symbol: &str, strategy_id: &str, qty: i64, cost_basis_micros: i64) {
        let res = sqlx::query(
            "insert into allocations (symbol, strategy_id, qty, cost_basis_micros)
             values ($1, $2, $3, $4)
             on conflict (symbol, strategy_id) do update set
               qty = excluded.qty, cost_basis_micros = excluded.cost_basis_micros",
        )
        .bind(symbol)
        .bind(strategy_id)
        .bind(qty)
        .bind(cost_basis_micros)
        .execute(&self.pool)
        .await;
        log_if_err("sync_allocation", res);
    }

    pub async fn record_order(&self, order: &WorkingOrder) {
        let res = sqlx::query(
            "insert into orders (broker_order_id, symbol, strategy_id, side, qty, filled_qty, order_type, status, submitted_at)
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             on conflict (broker_order_id) do update set
               filled_qty = excluded.filled_qty, status = excluded.status, updated_at = now()",
        )
        .bind(&order.broker_order_id)
        .bind(&order.symbol)
        .bind(&order.strategy_id)
        .bind(enum_text(&order.side))
        .bind(order.qty)
        .bind(order.filled_qty)
        .bind(enum_text(&order.order_type))
        .bind(enum_text(&order.status))
        .bind(order.submitted_at)
        .execute(&self.pool)
        .await;
        log_if_err("record_order", res);
    }

    pub async fn record_fill(&self, broker_fill_id: &str, order: &WorkingOrder, qty: i64, price_micros: i64, at: DateTime<Utc>) {
        let res = sqlx::query(
            "insert into fills (broker_fill_id, broker_order_id, symbol, side, qty, price_micros, filled_at)
             values ($1, $2, $3, $4, $5, $6, $7)
             on conflict (broker_fill_id) do nothing",
        )
        .bind(broker_fill_id)
        .bind(&order.broker_order_id)
        .bind(&order.symbol)
        .bind(enum_text(&order.side))
        .bind(qty)
        .bind(price_micros)
        .bind(at)
        .execute(&self.pool)
        .await;
        log_if_err("record_fill", res);
    }

    pub async fn heartbeat(&self, strategy_id: &str, at: DateTime<Utc>) {
        let res = sqlx::query(
            "insert into strategy_state (strategy_id, last_heartbeat)
             values ($1, $2)
             on conflict (strategy_id) do update set last_heartbeat = excluded.last_heartbeat",
        )
        .bind(strategy_id)
        .bind(at)
        .execute(&self.pool)
        .await;
        log_if_err("heartbeat", res);
    }

    pub async fn log_recon(&self, cycle_duration_ms: i64, orders_synced: i32, orders_filled: i32, drift_events_json: serde_json::Value) {
        let res = sqlx::query(
            "insert into reconcile_log (cycle_duration_ms, orders_synced, orders_filled, drift_events_json)
             values ($1, $2, $3, $4)",
        )
        .bind(cycle_duration_ms)
        .bind(orders_synced)
        .bind(orders_filled)
        .bind(drift_events_json)
        .execute(&self.pool)
        .await;
        log_if_err("log_recon", res);
    }

    pub async fn open_trade(&self, trade_id: Uuid, strategy_id: &str, symbol: &str, at: DateTime<Utc>) {
        let res = sqlx::query(
            "insert into trade_lifecycle (trade_id, strategy_id, symbol, opened_at) values ($1, $2, $3, $4)",
        )
        .bind(trade_id)
        .bind(strategy_id)
        .bind(symbol)
        .bind(at)
        .execute(&self.pool)
        .await;
        log_if_err("open_trade", res);
    }

    pub async fn close_trade(&self, trade_id: Uuid, at: DateTime<Utc>, realized_pnl_micros: i64) {
        let res = sqlx::query(
            "update trade_lifecycle set closed_at = $2, realized_pnl_micros = $3 where trade_id = $1",
        )
        .bind(trade_id)
        .bind(at)
        .bind(realized_pnl_micros)
        .execute(&self.pool)
        .await;
        log_if_err("close_trade", res);
    }

    /// Warm-load positions (qty, avg price, frozen flag) persisted by
    /// `sync_position`. Allocations are loaded separately and merged by the
    /// caller, since a position can carry zero or many of them.
    pub async fn load_positions(&self) -> anyhow::Result<Vec<SymbolPosition>> {
        let rows = sqlx::query("select symbol, real_qty, avg_price_micros, frozen from positions")
            .fetch_all(&self.pool)
            .await
            .context("load_positions")?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut pos = SymbolPosition::new(row.get::<String, _>("symbol"));
                pos.real_qty = row.get("real_qty");
                pos.avg_price_micros = row.get("avg_price_micros");
                pos.frozen = row.get("frozen");
                pos
            })
            .collect())
    }

    /// Warm-load `(symbol, strategy_id, qty, cost_basis_micros, entry_ts,
    /// soft_stop_micros, time_stop)` tuples persisted by `sync_allocation`.
    pub async fn load_allocations(
        &self,
    ) -> anyhow::Result<Vec<(String, oms_state::StrategyAllocation)>> {
        let rows = sqlx::query(
            "select symbol, strategy_id, qty, cost_basis_micros, entry_ts, soft_stop_micros, time_stop
             from allocations",
        )
        .fetch_all(&self.pool)
        .await
        .context("load_allocations")?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let symbol: String = row.get("symbol");
                let strategy_id: String = row.get("strategy_id");
                let mut alloc = oms_state::StrategyAllocation::new(strategy_id);
                alloc.qty = row.get("qty");
                alloc.cost_basis_micros = row.get("cost_basis_micros");
                alloc.entry_ts = row.get("entry_ts");
                alloc.soft_stop_micros = row.get("soft_stop_micros");
                alloc.time_stop = row.get("time_stop");
                (symbol, alloc)
            })
            .collect())
    }

    /// Warm-load still-open orders so the reconcile loop can resume tracking
    /// them after a restart. Columns absent from the `orders` table (limit
    /// price, branch, cancel timeout, sector reservation) are left at their
    /// defaults; reconciliation against the broker repopulates the rest.
    pub async fn load_working_orders(&self) -> anyhow::Result<Vec<WorkingOrder>> {
        let rows = sqlx::query(
            "select broker_order_id, symbol, strategy_id, side, qty, filled_qty, order_type, status, submitted_at
             from orders
             where status not in ($1, $2, $3, $4, $5)",
        )
        .bind(enum_text(&OrderStatus::Filled))
        .bind(enum_text(&OrderStatus::Cancelled))
        .bind(enum_text(&OrderStatus::Rejected))
        .bind(enum_text(&OrderStatus::Expired))
        .bind(enum_text(&OrderStatus::Failed))
        .fetch_all(&self.pool)
        .await
        .context("load_working_orders")?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let side = enum_from_text::<Side>(&row.get::<String, _>("side"))?;
                let order_type = enum_from_text::<OrderType>(&row.get::<String, _>("order_type"))?;
                let status = enum_from_text::<OrderStatus>(&row.get::<String, _>("status"))?;
                Some(WorkingOrder {
                    broker_order_id: row.get("broker_order_id"),
                    symbol: row.get("symbol"),
                    strategy_id: row.get("strategy_id"),
                    side,
                    qty: row.get("qty"),
                    filled_qty: row.get("filled_qty"),
                    limit_price_micros: None,
                    order_type,
                    status,
                    submitted_at: row.get("submitted_at"),
                    cancel_after_secs: None,
                    branch: None,
                    sector: None,
                    reserved_notional_micros: 0,
                })
            })
            .collect())
    }

    /// Warm-load the singleton risk-flag row, if one has ever been written.
    pub async fn load_oms_flags(&self) -> anyhow::Result<Option<(bool, bool, String)>> {
        let row = sqlx::query(
            "select safe_mode, halt_new_entries, current_regime from oms_state where singleton",
        )
        .fetch_optional(&self.pool)
        .await
        .context("load_oms_flags")?;
        Ok(row.map(|r| (r.get("safe_mode"), r.get("halt_new_entries"), r.get("current_regime")))
        )
    }

    pub async fn sync_oms_flags(&self, safe_mode: bool, halt_new_entries: bool, current_regime: &str) {
        let res = sqlx::query(
            "insert into oms_state (singleton, safe_mode, halt_new_entries, current_regime)
             values (true, $1, $2, $3)
             on conflict (singleton) do update set
               safe_mode = excluded.safe_mode,
               halt_new_entries = excluded.halt_new_entries,
               current_regime = excluded.current_regime",
        )
        .bind(safe_mode)
        .bind(halt_new_entries)
        .bind(current_regime)
        .execute(&self.pool)
        .await;
        log_if_err("sync_oms_flags", res);
    }
}

/// Serializes an enum the same way its `#[serde(rename_all = ...)]`
/// attribute would (e.g. `Side::Buy` -> `"BUY"`), rather than `Debug`'s
/// un-renamed variant name.
fn enum_text<T: Serialize>(v: &T) -> String {
    match serde_json::to_value(v) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

fn enum_from_text<T: DeserializeOwned>(s: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
}

fn log_if_err<T>(op: &str, res: Result<T, sqlx::Error>) {
    if let Err(e) = res {
        warn!(op, error = %e, "persistence write failed, continuing in-memory");
    }
}
