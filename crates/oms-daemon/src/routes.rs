use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;

use crate::api_types::{
    AccountQuery, HealthResponse, HeartbeatRequest, IntentRequestBody, RegimeRequest,
    ResolveDriftRequest, SafeModeQuery, SectorMapRequest, ViCooldownRequest,
};
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/intents", post(submit_intent))
        .route("/positions", get(list_positions))
        .route("/positions/:symbol", get(get_position))
        .route("/allocations/:strategy", get(get_allocations))
        .route("/state/account", get(get_account))
        .route("/strategies/:strategy/heartbeat", post(strategy_heartbeat))
        .route("/risk/regime", post(set_regime))
        .route("/risk/vi-cooldown", post(set_vi_cooldown))
        .route("/risk/safe-mode", post(set_safe_mode))
        .route("/admin/flatten-all", post(flatten_all))
        .route("/admin/eod-cleanup", post(eod_cleanup))
        .route("/admin/pause-strategy/:strategy", post(pause_strategy))
        .route("/admin/resume-strategy/:strategy", post(resume_strategy))
        .route("/admin/resolve-drift", post(resolve_drift))
        .route("/admin/sector-map", post(set_sector_map))
        .route("/health", get(health))
        .with_state(state)
}

async fn submit_intent(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IntentRequestBody>,
) -> impl IntoResponse {
    let result = state.pipeline.submit_intent(body.into()).await;
    let status = match result.status {
        oms_schemas::IntentStatus::Rejected => StatusCode::UNPROCESSABLE_ENTITY,
        oms_schemas::IntentStatus::Deferred => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    };
    (status, Json(result))
}

async fn list_positions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.pipeline.store.get_all_positions().await)
}

async fn get_position(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    Json(state.pipeline.store.get_position(&symbol).await)
}

async fn get_allocations(
    State(state): State<Arc<AppState>>,
    Path(strategy): Path<String>,
) -> impl IntoResponse {
    let allocations = state
        .pipeline
        .store
        .get_allocations_for_strategy(&strategy.to_uppercase())
        .await;
    Json(allocations)
}

async fn get_account(
    State(state): State<Arc<AppState>>,
    axum::extract::Query(query): axum::extract::Query<AccountQuery>,
) -> impl IntoResponse {
    let mut account = state.pipeline.store.account().await;
    if let Some(strategy) = query.strategy {
        let cfg = state.pipeline.risk_cfg();
        let fraction = cfg.budget_for(&strategy.to_uppercase()).capital_allocation_pct;
        account.equity_micros = (account.equity_micros as f64 * fraction) as i64;
    }
    Json(account)
}

async fn strategy_heartbeat(
    Path(strategy): Path<String>,
    Json(_body): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    tracing::debug!(strategy = %strategy, "strategy heartbeat received");
    StatusCode::NO_CONTENT
}

async fn set_regime(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegimeRequest>,
) -> impl IntoResponse {
    state.pipeline.set_regime(&body.regime.to_uppercase()).await;
    StatusCode::NO_CONTENT
}

async fn set_vi_cooldown(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ViCooldownRequest>,
) -> impl IntoResponse {
    let until = chrono::Utc::now() + chrono::Duration::seconds(body.cooldown_secs);
    state
        .pipeline
        .store
        .update_position(&body.symbol, |p| p.vi_cooldown_until = Some(until))
        .await;
    tracing::warn!(symbol = %body.symbol, until = %until, "vi cooldown armed");
    StatusCode::NO_CONTENT
}

async fn set_safe_mode(
    State(state): State<Arc<AppState>>,
    axum::extract::Query(query): axum::extract::Query<SafeModeQuery>,
) -> impl IntoResponse {
    state.pipeline.set_safe_mode(query.enabled).await;
    tracing::warn!(enabled = query.enabled, "safe mode toggled via admin endpoint");
    StatusCode::NO_CONTENT
}

async fn flatten_all(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let positions = state.pipeline.store.get_all_positions().await;
    let mut submitted = Vec::new();
    for pos in positions {
        for (strategy_id, alloc) in pos.allocations.iter() {
            if alloc.qty <= 0 {
                continue;
            }
            let req = oms_schemas::IntentRequest {
                strategy_id: strategy_id.clone(),
                symbol: pos.symbol.clone(),
                kind: oms_schemas::IntentKind::Flatten,
                desired_qty: None,
                target_qty: None,
                urgency: oms_schemas::Urgency::High,
                time_horizon: oms_schemas::TimeHorizon::Intraday,
                constraints: oms_schemas::IntentConstraints::default(),
                risk: oms_schemas::RiskPayload::default(),
            };
            let result = state.pipeline.submit_intent(req).await;
            submitted.push(result);
        }
    }
    Json(json!({ "flatten_intents_submitted": submitted.len(), "results": submitted }))
}

async fn eod_cleanup(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cancelled = state.pipeline.eod_reset().await;
    tracing::info!(orders_cancelled = cancelled, "eod cleanup completed");
    StatusCode::NO_CONTENT
}

async fn pause_strategy(
    State(state): State<Arc<AppState>>,
    Path(strategy): Path<String>,
) -> impl IntoResponse {
    state.pipeline.pause_strategy(&strategy.to_uppercase()).await;
    StatusCode::NO_CONTENT
}

async fn resume_strategy(
    State(state): State<Arc<AppState>>,
    Path(strategy): Path<String>,
) -> impl IntoResponse {
    state.pipeline.resume_strategy(&strategy.to_uppercase()).await;
    StatusCode::NO_CONTENT
}

async fn resolve_drift(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ResolveDriftRequest>,
) -> impl IntoResponse {
    let pos = state.pipeline.store.get_position(&body.symbol).await;
    if !pos.frozen {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "symbol is not frozen"})));
    }
    match body.action.as_str() {
        "acknowledge" | "unfreeze" => {
            state
                .pipeline
                .store
                .update_position(&body.symbol, |p| p.frozen = false)
                .await;
            (StatusCode::OK, Json(json!({"status": "unfrozen"})))
        }
        "reassign" | "assign" => {
            let Some(target) = body.target_strategy.as_deref() else {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "target_strategy required for assign"})),
                );
            };
            let drift = pos.allocation_drift();
            state
                .pipeline
                .store
                .update_allocation(&body.symbol, &target.to_uppercase(), drift, None, chrono::Utc::now())
                .await;
            state
                .pipeline
                .store
                .update_position(&body.symbol, |p| p.frozen = false)
                .await;
            (StatusCode::OK, Json(json!({"status": "assigned", "qty": drift})))
        }
        other => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("unknown action '{other}'")})),
        ),
    }
}

async fn set_sector_map(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SectorMapRequest>,
) -> impl IntoResponse {
    state.pipeline.update_sector_map(body.symbol, body.sector).await;
    StatusCode::NO_CONTENT
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (safe_mode, halted) = state.pipeline.risk_flags().await;
    let reconciliation_status = state.reconciliation_status();
    let status = if safe_mode || halted {
        "halted"
    } else if reconciliation_status != "ok" {
        "degraded"
    } else {
        "ok"
    };
    let position_count = state
        .pipeline
        .store
        .get_all_positions()
        .await
        .into_iter()
        .filter(|p| p.real_qty != 0 || p.has_working_orders())
        .count();

    Json(HealthResponse {
        status,
        uptime_secs: state.uptime_secs(),
        version: state.build.version,
        position_count,
        broker_circuit_breaker_state: if halted { "open" } else { "closed" },
        reconciliation_status,
    })
}
