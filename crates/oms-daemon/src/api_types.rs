use serde::{Deserialize, Serialize};

use oms_schemas::{IntentConstraints, IntentKind, IntentRequest, RiskPayload, TimeHorizon, Urgency};

#[derive(Debug, Deserialize)]
pub struct IntentRequestBody {
    pub strategy_id: String,
    pub symbol: String,
    pub kind: IntentKind,
    pub desired_qty: Option<i64>,
    pub target_qty: Option<i64>,
    #[serde(default = "default_urgency")]
    pub urgency: Urgency,
    #[serde(default = "default_horizon")]
    pub time_horizon: TimeHorizon,
    #[serde(default)]
    pub constraints: IntentConstraints,
    #[serde(default)]
    pub risk: RiskPayload,
}

fn default_urgency() -> Urgency {
    Urgency::Normal
}
fn default_horizon() -> TimeHorizon {
    TimeHorizon::Intraday
}

impl From<IntentRequestBody> for IntentRequest {
    fn from(b: IntentRequestBody) -> Self {
        IntentRequest {
            strategy_id: b.strategy_id,
            symbol: b.symbol,
            kind: b.kind,
            desired_qty: b.desired_qty,
            target_qty: b.target_qty,
            urgency: b.urgency,
            time_horizon: b.time_horizon,
            constraints: b.constraints,
            risk: b.risk,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub version: &'static str,
    pub position_count: usize,
    pub broker_circuit_breaker_state: &'static str,
    pub reconciliation_status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct RegimeRequest {
    pub regime: String,
}

#[derive(Debug, Deserialize)]
pub struct SafeModeQuery {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveDriftRequest {
    pub symbol: String,
    pub action: String,
    pub target_strategy: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ViCooldownRequest {
    pub symbol: String,
    pub cooldown_secs: i64,
}

#[derive(Debug, Deserialize, Default)]
pub struct AccountQuery {
    pub strategy: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SectorMapRequest {
    pub symbol: String,
    pub sector: String,
}
