//! oms-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, builds the shared
//! pipeline, spawns the reconciliation loop, wires middleware, and starts
//! the HTTP server. All route handlers live in `routes.rs`; all shared
//! state types live in `state.rs`.

mod api_types;
mod routes;
mod state;

use std::{
    net::SocketAddr,
    path::Path,
    sync::{atomic::AtomicBool, Arc},
    time::Instant,
};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

use oms_arbitration::{default_lock_durations, ArbitrationEngine};
use oms_broker::{BrokerAdapter, PaperBroker};
use oms_config::{BrokerMode, LoadedConfig};
use oms_db::OmsPersistence;
use oms_pipeline::{FixedPriceSource, OmsPipeline, PriceSource};
use oms_reconcile::{AdaptiveScheduler, ReconcileEngine};
use oms_risk::RiskConfig;
use oms_state::StateStore;

const STARTING_EQUITY_MICROS: i64 = 100_000_000 * oms_state::MICROS_SCALE;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config = load_config();
    let risk_cfg = RiskConfig::from_config_value(&config.config_json);
    info!(config_hash = %config.config_hash, "loaded layered config");

    let broker_mode = broker_mode_from_config(&config.config_json);
    // Only the paper broker is wired up today; this still validates that
    // whichever mode the config names has its required credentials present.
    if let Err(e) = oms_config::resolve_secrets_for_mode(broker_mode) {
        warn!(error = %e, mode = ?broker_mode, "broker secrets unavailable for configured mode, continuing on paper broker");
    }

    let store = Arc::new(StateStore::new());
    store
        .update_account(|a| a.equity_micros = STARTING_EQUITY_MICROS)
        .await;

    let persistence = connect_persistence().await;
    let mut warm_flags = None;
    if let Some(db) = &persistence {
        warm_flags = warm_load_state(&store, db).await;
    }

    let broker: Arc<dyn BrokerAdapter> = Arc::new(PaperBroker::new(STARTING_EQUITY_MICROS));
    let prices: Arc<dyn PriceSource> = Arc::new(FixedPriceSource::new());

    let mut pipeline = OmsPipeline::new(
        store.clone(),
        risk_cfg,
        ArbitrationEngine::new(default_lock_durations()),
        broker.clone(),
        prices,
    );
    if let Some(db) = &persistence {
        pipeline = pipeline.with_persistence(db.clone());
    }
    let pipeline = Arc::new(pipeline);
    if let Some((safe_mode, halted)) = warm_flags.take() {
        pipeline.restore_risk_flags(safe_mode, halted).await;
    }

    let reconcile_healthy = Arc::new(AtomicBool::new(true));
    spawn_reconcile_loop(
        store.clone(),
        broker.clone(),
        pipeline.clone(),
        reconcile_healthy.clone(),
        persistence.clone(),
    );

    let shared = Arc::new(state::AppState::new(pipeline, reconcile_healthy));

    let app = routes::build_router(shared)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env(&config.config_json)
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8900)));
    info!("oms-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

/// Deep-merges `config/base.yaml` with an optional `config/local.yaml`
/// override. Missing files are skipped, so a fresh checkout still runs on
/// [`RiskConfig::sane_defaults`].
fn load_config() -> LoadedConfig {
    let paths = [Path::new("config/base.yaml"), Path::new("config/local.yaml")];
    oms_config::load_layered_yaml(&paths).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load layered config, falling back to built-in defaults");
        LoadedConfig {
            config_json: serde_json::Value::Object(serde_json::Map::new()),
            canonical_json: "{}".to_string(),
            config_hash: "none".to_string(),
        }
    })
}

/// Connects to Postgres and runs migrations when `OMS_DATABASE_URL` is set;
/// returns `None` (in-memory-only) otherwise, matching the paper-broker
/// default of running without external dependencies.
async fn connect_persistence() -> Option<Arc<OmsPersistence>> {
    if std::env::var("OMS_DATABASE_URL").is_err() {
        info!("OMS_DATABASE_URL not set, running without a persistence backend");
        return None;
    }
    let pool = match oms_db::connect_from_env().await {
        Ok(pool) => pool,
        Err(e) => {
            warn!(error = %e, "failed to connect to persistence database, running in-memory only");
            return None;
        }
    };
    if let Err(e) = oms_db::migrate(&pool).await {
        warn!(error = %e, "failed to run database migrations, running in-memory only");
        return None;
    }
    Some(Arc::new(OmsPersistence::new(pool)))
}

/// Replays persisted positions, allocations, working orders and risk flags
/// into the fresh `StateStore` before the daemon starts serving traffic.
/// Returns the warm-loaded `(safe_mode, halted)` pair, if any, for the
/// caller to apply to the pipeline's risk state once it exists.
async fn warm_load_state(store: &Arc<StateStore>, db: &OmsPersistence) -> Option<(bool, bool)> {
    match db.load_positions().await {
        Ok(positions) => {
            let count = positions.len();
            for pos in positions {
                store
                    .update_position(&pos.symbol, |p| {
                        p.real_qty = pos.real_qty;
                        p.avg_price_micros = pos.avg_price_micros;
                        p.frozen = pos.frozen;
                    })
                    .await;
            }
            info!(count, "warm-loaded positions");
        }
        Err(e) => warn!(error = %e, "failed to warm-load positions"),
    }

    match db.load_allocations().await {
        Ok(allocations) => {
            let count = allocations.len();
            for (symbol, alloc) in allocations {
                store
                    .update_position(&symbol, |p| {
                        p.allocations.insert(alloc.strategy_id.clone(), alloc);
                    })
                    .await;
            }
            info!(count, "warm-loaded allocations");
        }
        Err(e) => warn!(error = %e, "failed to warm-load allocations"),
    }

    match db.load_working_orders().await {
        Ok(orders) => {
            let count = orders.len();
            for order in orders {
                store.add_working_order(&order.symbol.clone(), order).await;
            }
            info!(count, "warm-loaded working orders");
        }
        Err(e) => warn!(error = %e, "failed to warm-load working orders"),
    }

    match db.load_oms_flags().await {
        Ok(Some((safe_mode, halt_new_entries, regime))) => {
            store
                .update_account(|a| {
                    a.safe_mode = safe_mode;
                    a.halt_new_entries = halt_new_entries;
                    a.current_regime = regime;
                })
                .await;
            info!("warm-loaded risk flags");
            Some((safe_mode, halt_new_entries))
        }
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "failed to warm-load risk flags");
            None
        }
    }
}

/// Runs the reconciliation loop on its own task at the cadence the
/// [`AdaptiveScheduler`] chooses, tripping safe mode after five
/// consecutive broker-sync failures.
fn spawn_reconcile_loop(
    store: Arc<StateStore>,
    broker: Arc<dyn BrokerAdapter>,
    pipeline: Arc<OmsPipeline>,
    reconcile_healthy: Arc<std::sync::atomic::AtomicBool>,
    persistence: Option<Arc<OmsPersistence>>,
) {
    tokio::spawn(async move {
        let mut scheduler = AdaptiveScheduler::new();
        loop {
            let cycle_started = Instant::now();
            let engine = ReconcileEngine::with_sectors(&store, broker.as_ref(), pipeline.sectors())
                .with_persistence(persistence.as_deref());
            let report = engine.run_cycle().await;
            let cycle_duration = cycle_started.elapsed();

            reconcile_healthy.store(!report.cycle_failed, std::sync::atomic::Ordering::Relaxed);

            if !report.drift_events.is_empty() {
                warn!(count = report.drift_events.len(), "reconcile cycle found allocation drift");
            }

            let has_working_orders = !store.get_working_orders(None).await.is_empty();
            let (interval, trip_safe_mode) =
                scheduler.next_interval(has_working_orders, cycle_duration, report.cycle_failed);

            if trip_safe_mode {
                warn!("reconcile loop tripping safe mode after repeated sync failures");
                pipeline.set_safe_mode(true).await;
            }

            tokio::time::sleep(interval).await;
        }
    });
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Reads `daemon.broker_mode` (`live` | `paper` | `backtest`), defaulting to
/// `paper` when absent or unrecognized.
fn broker_mode_from_config(config: &serde_json::Value) -> BrokerMode {
    match config
        .get("daemon")
        .and_then(|d| d.get("broker_mode"))
        .and_then(|v| v.as_str())
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("live") => BrokerMode::Live,
        Some("backtest") => BrokerMode::Backtest,
        _ => BrokerMode::Paper,
    }
}

/// `OMS_DAEMON_ADDR` wins over the config file's `daemon.bind_addr`.
fn bind_addr_from_env(config: &serde_json::Value) -> Option<SocketAddr> {
    if let Ok(v) = std::env::var("OMS_DAEMON_ADDR") {
        if let Ok(addr) = v.parse() {
            return Some(addr);
        }
    }
    config
        .get("daemon")
        .and_then(|d| d.get("bind_addr"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
}

/// CORS: allow only localhost origins, matching the operator-console ports
/// used in development.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}

