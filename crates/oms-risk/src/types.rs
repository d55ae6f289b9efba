use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MICROS_SCALE: i64 = 1_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    Crisis,
    Weak,
    Normal,
    Strong,
}

impl Regime {
    pub fn cap_pct(self, cfg: &RiskConfig) -> f64 {
        cfg.regime_exposure_caps
            .get(&self.label())
            .copied()
            .unwrap_or(1.0)
    }

    fn label(self) -> String {
        match self {
            Regime::Crisis => "CRISIS",
            Regime::Weak => "WEAK",
            Regime::Normal => "NORMAL",
            Regime::Strong => "STRONG",
        }
        .to_string()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StrategyBudget {
    pub max_positions: u32,
    pub max_risk_pct: f64,
    pub capital_allocation_pct: f64,
}

impl Default for StrategyBudget {
    fn default() -> Self {
        StrategyBudget {
            max_positions: 5,
            max_risk_pct: 0.02,
            capital_allocation_pct: 0.25,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnknownSectorPolicy {
    Allow,
    Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RiskConfig {
    pub daily_loss_warn_pct: f64,
    pub daily_loss_halt_pct: f64,
    pub max_gross_exposure_pct: f64,
    pub max_net_exposure_pct: f64,
    pub max_position_pct: f64,
    pub max_positions_count: u32,
    pub max_sector_pct: f64,
    pub max_sector_count: u32,
    pub max_spread_bps: f64,
    pub vi_cooldown_sec: i64,
    pub regime_exposure_caps: BTreeMap<String, f64>,
    pub strategy_budgets: BTreeMap<String, StrategyBudget>,
    pub unknown_sector_policy: UnknownSectorPolicy,
}

impl RiskConfig {
    /// Mirrors `original_source/oms/risk.py`'s `RiskConfig.__post_init__` defaults.
    pub fn sane_defaults() -> Self {
        let mut regime_exposure_caps = BTreeMap::new();
        regime_exposure_caps.insert("CRISIS".to_string(), 0.20);
        regime_exposure_caps.insert("WEAK".to_string(), 0.50);
        regime_exposure_caps.insert("NORMAL".to_string(), 0.80);
        regime_exposure_caps.insert("STRONG".to_string(), 1.00);

        RiskConfig {
            daily_loss_warn_pct: 0.02,
            daily_loss_halt_pct: 0.03,
            max_gross_exposure_pct: 0.80,
            max_net_exposure_pct: 0.60,
            max_position_pct: 0.15,
            max_positions_count: 10,
            max_sector_pct: 0.30,
            max_sector_count: 4,
            max_spread_bps: 50.0,
            vi_cooldown_sec: 600,
            regime_exposure_caps,
            strategy_budgets: BTreeMap::new(),
            unknown_sector_policy: UnknownSectorPolicy::Allow,
        }
    }

    pub fn budget_for(&self, strategy_id: &str) -> StrategyBudget {
        self.strategy_budgets
            .get(strategy_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Overlays a `risk:` subtree (from layered YAML config) onto
    /// [`RiskConfig::sane_defaults`]; keys the subtree omits keep their
    /// built-in default rather than being zeroed out.
    pub fn from_config_value(value: &serde_json::Value) -> RiskConfig {
        let mut cfg = RiskConfig::sane_defaults();
        let Some(risk) = value.get("risk").and_then(|v| v.as_object()) else {
            return cfg;
        };

        macro_rules! overlay_f64 {
            ($field:ident) => {
                if let Some(v) = risk.get(stringify!($field)).and_then(|v| v.as_f64()) {
                    cfg.$field = v;
                }
            };
        }
        macro_rules! overlay_u32 {
            ($field:ident) => {
                if let Some(v) = risk.get(stringify!($field)).and_then(|v| v.as_u64()) {
                    cfg.$field = v as u32;
                }
            };
        }
        macro_rules! overlay_i64 {
            ($field:ident) => {
                if let Some(v) = risk.get(stringify!($field)).and_then(|v| v.as_i64()) {
                    cfg.$field = v;
                }
            };
        }

        overlay_f64!(daily_loss_warn_pct);
        overlay_f64!(daily_loss_halt_pct);
        overlay_f64!(max_gross_exposure_pct);
        overlay_f64!(max_net_exposure_pct);
        overlay_f64!(max_position_pct);
        overlay_u32!(max_positions_count);
        overlay_f64!(max_sector_pct);
        overlay_u32!(max_sector_count);
        overlay_f64!(max_spread_bps);
        overlay_i64!(vi_cooldown_sec);

        if let Some(policy) = risk.get("unknown_sector_policy").and_then(|v| v.as_str()) {
            cfg.unknown_sector_policy = match policy.to_uppercase().as_str() {
                "BLOCK" => UnknownSectorPolicy::Block,
                _ => UnknownSectorPolicy::Allow,
            };
        }

        if let Some(map) = risk.get("regime_exposure_caps").and_then(|v| v.as_object()) {
            for (k, v) in map {
                if let Some(pct) = v.as_f64() {
                    cfg.regime_exposure_caps.insert(k.to_uppercase(), pct);
                }
            }
        }

        if let Some(map) = risk.get("strategy_budgets").and_then(|v| v.as_object()) {
            for (k, v) in map {
                let Some(entry) = v.as_object() else { continue };
                let mut budget = StrategyBudget::default();
                if let Some(n) = entry.get("max_positions").and_then(|v| v.as_u64()) {
                    budget.max_positions = n as u32;
                }
                if let Some(n) = entry.get("max_risk_pct").and_then(|v| v.as_f64()) {
                    budget.max_risk_pct = n;
                }
                if let Some(n) = entry.get("capital_allocation_pct").and_then(|v| v.as_f64()) {
                    budget.capital_allocation_pct = n;
                }
                cfg.strategy_budgets.insert(k.to_uppercase(), budget);
            }
        }

        cfg
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Entry,
    Exit,
    Reduce,
    Flatten,
    Other,
}

impl RequestKind {
    pub fn is_risk_reducing(self) -> bool {
        matches!(self, RequestKind::Exit | RequestKind::Reduce | RequestKind::Flatten)
    }
}

/// Everything the gateway needs to decide, already resolved by the caller.
/// The engine itself performs no IO, reads no clock and calls no broker —
/// it is purely a function of this input and the mutable [`RiskState`]/
/// [`crate::sector::SectorExposure`] it is handed.
#[derive(Clone, Debug, PartialEq)]
pub struct RiskCheckInput {
    pub request: RequestKind,
    pub strategy_id: String,
    pub symbol: String,
    pub sector: Option<String>,
    pub qty: i64,
    pub entry_price_micros: i64,
    pub stop_price_micros: Option<i64>,
    pub equity_micros: i64,
    /// Today's total P&L as a fraction of equity, e.g. `-0.025` for -2.5%.
    pub daily_pnl_pct: f64,
    pub current_regime: Regime,
    /// Existing gross notional across all open + committed positions,
    /// excluding this request.
    pub existing_gross_notional_micros: i64,
    pub existing_net_notional_micros: i64,
    pub existing_position_count: u32,
    /// Notional already committed to this symbol (existing + working).
    pub existing_symbol_notional_micros: i64,
    pub existing_strategy_position_count: u32,
    pub existing_strategy_risk_micros: i64,
    /// Caller-supplied clock reading this check is evaluated against.
    pub now: DateTime<Utc>,
    /// Set when the symbol is inside a volatility-interruption cooldown
    /// window; `None` when no VI event is active.
    pub vi_cooldown_until: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReasonCode {
    Allowed,
    SafeMode,
    FlattenInProgress,
    HaltNewEntries,
    StrategyPaused,
    SymbolFrozen,
    DailyLossHalt,
    DailyLossWarn,
    MaxPositionsCount,
    MaxGrossExposure,
    RegimeCap,
    MaxPositionPct,
    NoPriceAvailable,
    MaxSectorPct,
    MaxSectorCount,
    SectorBlocked,
    StrategyMaxPositions,
    StrategyRiskBudget,
    ViCooldown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RiskVerdict {
    Approve,
    Modify { qty: i64, reason: ReasonCode },
    Reject { reason: ReasonCode, cooldown_secs: Option<i64> },
    Defer { reason: ReasonCode },
}

/// Per-day sticky state for the circuit breaker, mirroring the
/// halted/disarmed stickiness pattern used throughout the risk engine's
/// day/window rollover bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RiskState {
    pub trade_date: String,
    pub halted: bool,
    pub safe_mode: bool,
}

impl RiskState {
    pub fn new(trade_date: impl Into<String>) -> Self {
        RiskState {
            trade_date: trade_date.into(),
            halted: false,
            safe_mode: false,
        }
    }

    pub fn roll_to_day(&mut self, trade_date: &str) {
        if self.trade_date != trade_date {
            self.trade_date = trade_date.to_string();
            self.halted = false;
        }
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn from_config_value_overlays_only_present_keys() {
        let value = serde_json::json!({
            "risk": {
                "max_position_pct": 0.25,
                "strategy_budgets": {
                    "kmp": {"max_positions": 3, "capital_allocation_pct": 0.4}
                }
            }
        });
        let cfg = RiskConfig::from_config_value(&value);
        assert_eq!(cfg.max_position_pct, 0.25);
        assert_eq!(cfg.daily_loss_halt_pct, RiskConfig::sane_defaults().daily_loss_halt_pct);
        let budget = cfg.budget_for("KMP");
        assert_eq!(budget.max_positions, 3);
        assert_eq!(budget.capital_allocation_pct, 0.4);
    }

    #[test]
    fn from_config_value_defaults_when_risk_key_missing() {
        let cfg = RiskConfig::from_config_value(&serde_json::json!({}));
        assert_eq!(cfg, RiskConfig::sane_defaults());
    }
}
