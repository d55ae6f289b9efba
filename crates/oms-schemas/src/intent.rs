use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kst_trade_date;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentKind {
    Enter,
    Reduce,
    Exit,
    SetTarget,
    CancelOrders,
    ModifyRisk,
    Flatten,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeHorizon {
    Intraday,
    Swing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    Green,
    Yellow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl IntentKind {
    /// Screaming-snake-case name matching the original intent type's
    /// `.name` (e.g. `Enter` -> `"ENTER"`). Used in the idempotency key,
    /// where `Debug`'s `"Enter"` would silently diverge.
    pub fn as_screaming_snake(self) -> &'static str {
        match self {
            IntentKind::Enter => "ENTER",
            IntentKind::Reduce => "REDUCE",
            IntentKind::Exit => "EXIT",
            IntentKind::SetTarget => "SET_TARGET",
            IntentKind::CancelOrders => "CANCEL_ORDERS",
            IntentKind::ModifyRisk => "MODIFY_RISK",
            IntentKind::Flatten => "FLATTEN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    Pending,
    Accepted,
    Approved,
    Modified,
    Rejected,
    Deferred,
    Executed,
    Cancelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentConstraints {
    pub max_slippage_bps: Option<f64>,
    pub max_spread_bps: Option<f64>,
    pub limit_price_micros: Option<i64>,
    pub stop_price_micros: Option<i64>,
    pub expiry: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskPayload {
    pub entry_price_micros: Option<i64>,
    pub soft_stop_micros: Option<i64>,
    pub hard_stop_micros: Option<i64>,
    pub rationale_code: Option<String>,
    pub confidence: Option<Confidence>,
    pub signal_hash: Option<String>,
}

/// A strategy's declarative request to change a position. Minted server
/// side with an `intent_id` and a deterministic `idempotency_key`; the
/// rest of the fields arrive from the strategy over the intent ingress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub intent_id: Uuid,
    pub strategy_id: String,
    pub symbol: String,
    pub kind: IntentKind,
    pub desired_qty: Option<i64>,
    pub target_qty: Option<i64>,
    pub urgency: Urgency,
    pub time_horizon: TimeHorizon,
    pub constraints: IntentConstraints,
    pub risk: RiskPayload,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub strategy_id: String,
    pub symbol: String,
    pub kind: IntentKind,
    pub desired_qty: Option<i64>,
    pub target_qty: Option<i64>,
    pub urgency: Urgency,
    pub time_horizon: TimeHorizon,
    pub constraints: IntentConstraints,
    pub risk: RiskPayload,
}

impl Intent {
    /// Mints a fresh `Intent` from a caller-supplied request, normalizing
    /// `strategy_id` to upper case and deriving the idempotency key the
    /// way the original OMS core does: `strategy:symbol:kind:trade_date:suffix:qty`.
    pub fn new(req: IntentRequest, now: DateTime<Utc>) -> Intent {
        let intent_id = Uuid::new_v4();
        let strategy_id = req.strategy_id.to_uppercase();
        let trade_date = kst_trade_date(now);
        let suffix = Self::suffix(&req, intent_id);
        let qty_part = req
            .desired_qty
            .or(req.target_qty)
            .map(|q| q.to_string())
            .unwrap_or_else(|| "none".to_string());
        let idempotency_key = format!(
            "{strategy_id}:{}:{}:{trade_date}:{suffix}:{qty_part}",
            req.symbol,
            req.kind.as_screaming_snake()
        );
        Intent {
            intent_id,
            strategy_id,
            symbol: req.symbol,
            kind: req.kind,
            desired_qty: req.desired_qty,
            target_qty: req.target_qty,
            urgency: req.urgency,
            time_horizon: req.time_horizon,
            constraints: req.constraints,
            risk: req.risk,
            idempotency_key,
            created_at: now,
        }
    }

    fn suffix(req: &IntentRequest, intent_id: Uuid) -> String {
        match req.kind {
            IntentKind::Enter => req
                .risk
                .signal_hash
                .clone()
                .or_else(|| req.risk.rationale_code.clone())
                .unwrap_or_else(|| "default".to_string()),
            IntentKind::Exit | IntentKind::Reduce | IntentKind::Flatten => req
                .risk
                .rationale_code
                .clone()
                .unwrap_or_else(|| "manual".to_string()),
            _ => intent_id.simple().to_string()[..8].to_string(),
        }
    }

    /// Mirrors the original `Intent.validate()`: cheap shape checks done
    /// before the symbol mutex is acquired.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), String> {
        if self.symbol.trim().is_empty() {
            return Err("symbol is required".to_string());
        }
        if self.strategy_id.trim().is_empty() {
            return Err("strategy_id is required".to_string());
        }
        if matches!(self.kind, IntentKind::Enter | IntentKind::Reduce) && self.desired_qty.is_none()
        {
            return Err(format!("{:?} requires desired_qty", self.kind));
        }
        if let Some(expiry) = self.constraints.expiry {
            if expiry <= now {
                return Err("expiry is in the past".to_string());
            }
        }
        Ok(())
    }
}

/// Verdict produced by the intent pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent_id: Uuid,
    pub idempotency_key: String,
    pub status: IntentStatus,
    pub message: Option<String>,
    pub broker_order_id: Option<String>,
    pub modified_qty: Option<i64>,
    pub defer_until: Option<DateTime<Utc>>,
}

impl IntentResult {
    pub fn executed(intent: &Intent, message: impl Into<String>, broker_order_id: Option<String>) -> Self {
        IntentResult {
            intent_id: intent.intent_id,
            idempotency_key: intent.idempotency_key.clone(),
            status: IntentStatus::Executed,
            message: Some(message.into()),
            broker_order_id,
            modified_qty: None,
            defer_until: None,
        }
    }

    pub fn rejected(intent: &Intent, message: impl Into<String>) -> Self {
        IntentResult {
            intent_id: intent.intent_id,
            idempotency_key: intent.idempotency_key.clone(),
            status: IntentStatus::Rejected,
            message: Some(message.into()),
            broker_order_id: None,
            modified_qty: None,
            defer_until: None,
        }
    }

    pub fn deferred(intent: &Intent, message: impl Into<String>, defer_until: Option<DateTime<Utc>>) -> Self {
        IntentResult {
            intent_id: intent.intent_id,
            idempotency_key: intent.idempotency_key.clone(),
            status: IntentStatus::Deferred,
            message: Some(message.into()),
            broker_order_id: None,
            modified_qty: None,
            defer_until,
        }
    }

    pub fn is_cacheable(&self) -> bool {
        matches!(self.status, IntentStatus::Executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn req(kind: IntentKind) -> IntentRequest {
        IntentRequest {
            strategy_id: "kmp".to_string(),
            symbol: "005930".to_string(),
            kind,
            desired_qty: Some(100),
            target_qty: None,
            urgency: Urgency::Normal,
            time_horizon: TimeHorizon::Intraday,
            constraints: IntentConstraints::default(),
            risk: RiskPayload::default(),
        }
    }

    #[test]
    fn strategy_id_normalized_upper() {
        let intent = Intent::new(req(IntentKind::Enter), Utc::now());
        assert_eq!(intent.strategy_id, "KMP");
    }

    #[test]
    fn enter_without_qty_fails_validation() {
        let mut r = req(IntentKind::Enter);
        r.desired_qty = None;
        let intent = Intent::new(r, Utc::now());
        assert!(intent.validate(Utc::now()).is_err());
    }

    #[test]
    fn idempotency_key_is_deterministic_for_same_inputs() {
        let now = Utc::now();
        let a = Intent::new(req(IntentKind::Enter), now);
        let b = Intent::new(req(IntentKind::Enter), now);
        assert_eq!(a.idempotency_key, b.idempotency_key);
    }
}
