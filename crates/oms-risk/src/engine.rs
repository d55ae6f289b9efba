use crate::sector::SectorExposure;
use crate::types::{
    ReasonCode, RequestKind, RiskCheckInput, RiskConfig, RiskState, RiskVerdict, UnknownSectorPolicy,
};

/// Runs the fixed check order from global blocks down to microstructure and
/// folds the result into a single verdict: the smallest of any `Modify`
/// quantities wins, and the first `Reject`/`Defer` short-circuits the rest.
pub fn evaluate(
    input: &RiskCheckInput,
    cfg: &RiskConfig,
    state: &mut RiskState,
    sectors: &SectorExposure,
    symbol_frozen: bool,
    strategy_paused: bool,
) -> RiskVerdict {
    if let Some(v) = check_global_blocks(input, state, symbol_frozen, strategy_paused) {
        return v;
    }
    if let Some(v) = check_daily_circuit_breaker(input, cfg, state) {
        return v;
    }

    if !input.request.is_risk_reducing() {
        let mut modified_qty: Option<i64> = None;

        match check_exposure_limits(input, cfg) {
            RiskVerdict::Approve => {}
            RiskVerdict::Modify { qty, .. } => {
                modified_qty = Some(modified_qty.map_or(qty, |q| q.min(qty)))
            }
            other => return other,
        }

        if let Some(v) = check_sector_limits(input, cfg, sectors) {
            return v;
        }

        match check_strategy_budget(input, cfg, modified_qty.unwrap_or(input.qty)) {
            RiskVerdict::Approve => {}
            RiskVerdict::Modify { qty, .. } => {
                modified_qty = Some(modified_qty.map_or(qty, |q| q.min(qty)))
            }
            other => return other,
        }

        if let Some(v) = check_microstructure(input, cfg) {
            return v;
        }

        if let Some(qty) = modified_qty {
            if qty <= 0 {
                return RiskVerdict::Reject {
                    reason: ReasonCode::MaxPositionPct,
                    cooldown_secs: None,
                };
            }
            return RiskVerdict::Modify {
                qty,
                reason: ReasonCode::MaxPositionPct,
            };
        }
    }

    RiskVerdict::Approve
}

fn check_global_blocks(
    input: &RiskCheckInput,
    state: &RiskState,
    symbol_frozen: bool,
    strategy_paused: bool,
) -> Option<RiskVerdict> {
    if state.safe_mode {
        return Some(RiskVerdict::Defer {
            reason: ReasonCode::SafeMode,
        });
    }
    if input.request.is_risk_reducing() {
        return None;
    }
    if state.halted {
        return Some(RiskVerdict::Reject {
            reason: ReasonCode::HaltNewEntries,
            cooldown_secs: None,
        });
    }
    if strategy_paused {
        return Some(RiskVerdict::Reject {
            reason: ReasonCode::StrategyPaused,
            cooldown_secs: None,
        });
    }
    if symbol_frozen {
        return Some(RiskVerdict::Reject {
            reason: ReasonCode::SymbolFrozen,
            cooldown_secs: None,
        });
    }
    None
}

/// Trips on `daily_pnl_pct ≤ −halt_pct` (reject, no state change needed —
/// the breach already speaks for itself) or `≤ −warn_pct` (reject and
/// latch `state.halted` so later entries short-circuit in
/// `check_global_blocks` without re-deriving P&L). Exits always pass.
fn check_daily_circuit_breaker(
    input: &RiskCheckInput,
    cfg: &RiskConfig,
    state: &mut RiskState,
) -> Option<RiskVerdict> {
    if input.request.is_risk_reducing() {
        return None;
    }
    if input.equity_micros <= 0 {
        return Some(RiskVerdict::Reject {
            reason: ReasonCode::DailyLossHalt,
            cooldown_secs: None,
        });
    }
    if input.daily_pnl_pct <= -cfg.daily_loss_halt_pct {
        state.halted = true;
        return Some(RiskVerdict::Reject {
            reason: ReasonCode::DailyLossHalt,
            cooldown_secs: None,
        });
    }
    if input.daily_pnl_pct <= -cfg.daily_loss_warn_pct {
        state.halted = true;
        return Some(RiskVerdict::Reject {
            reason: ReasonCode::DailyLossWarn,
            cooldown_secs: None,
        });
    }
    None
}

fn check_exposure_limits(input: &RiskCheckInput, cfg: &RiskConfig) -> RiskVerdict {
    if input.existing_position_count + 1 > cfg.max_positions_count {
        return RiskVerdict::Reject {
            reason: ReasonCode::MaxPositionsCount,
            cooldown_secs: None,
        };
    }

    let new_notional = input.qty * input.entry_price_micros;
    let gross_after = input.existing_gross_notional_micros + new_notional;
    let gross_cap = (input.equity_micros as f64 * cfg.max_gross_exposure_pct) as i64;
    if gross_after > gross_cap {
        return RiskVerdict::Reject {
            reason: ReasonCode::MaxGrossExposure,
            cooldown_secs: None,
        };
    }

    let regime_cap_pct = input.current_regime.cap_pct(cfg).min(cfg.max_gross_exposure_pct);
    let regime_cap = (input.equity_micros as f64 * regime_cap_pct) as i64;
    if gross_after > regime_cap {
        return RiskVerdict::Reject {
            reason: ReasonCode::RegimeCap,
            cooldown_secs: None,
        };
    }

    if input.entry_price_micros <= 0 {
        return RiskVerdict::Defer {
            reason: ReasonCode::NoPriceAvailable,
        };
    }

    let symbol_cap = (input.equity_micros as f64 * cfg.max_position_pct) as i64;
    let symbol_after = input.existing_symbol_notional_micros + new_notional;
    if symbol_after > symbol_cap {
        let room = symbol_cap - input.existing_symbol_notional_micros;
        if room <= 0 {
            return RiskVerdict::Reject {
                reason: ReasonCode::MaxPositionPct,
                cooldown_secs: None,
            };
        }
        let max_qty = room / input.entry_price_micros;
        if max_qty <= 0 {
            return RiskVerdict::Reject {
                reason: ReasonCode::MaxPositionPct,
                cooldown_secs: None,
            };
        }
        return RiskVerdict::Modify {
            qty: max_qty,
            reason: ReasonCode::MaxPositionPct,
        };
    }

    RiskVerdict::Approve
}

fn check_sector_limits(
    input: &RiskCheckInput,
    cfg: &RiskConfig,
    sectors: &SectorExposure,
) -> Option<RiskVerdict> {
    let sector = match &input.sector {
        Some(s) => s,
        None => {
            return match cfg.unknown_sector_policy {
                UnknownSectorPolicy::Allow => None,
                UnknownSectorPolicy::Block => Some(RiskVerdict::Reject {
                    reason: ReasonCode::SectorBlocked,
                    cooldown_secs: None,
                }),
            };
        }
    };

    let new_notional = input.qty * input.entry_price_micros;
    let sector_cap = (input.equity_micros as f64 * cfg.max_sector_pct) as i64;
    if sectors.total_notional_micros(sector) + new_notional > sector_cap {
        return Some(RiskVerdict::Reject {
            reason: ReasonCode::MaxSectorPct,
            cooldown_secs: None,
        });
    }
    if sectors.total_count(sector) + 1 > cfg.max_sector_count {
        return Some(RiskVerdict::Reject {
            reason: ReasonCode::MaxSectorCount,
            cooldown_secs: None,
        });
    }
    None
}

fn check_strategy_budget(input: &RiskCheckInput, cfg: &RiskConfig, candidate_qty: i64) -> RiskVerdict {
    let budget = cfg.budget_for(&input.strategy_id);

    if input.existing_strategy_position_count + 1 > budget.max_positions {
        return RiskVerdict::Reject {
            reason: ReasonCode::StrategyMaxPositions,
            cooldown_secs: None,
        };
    }

    let stop = match input.stop_price_micros {
        Some(s) if s > 0 => s,
        _ => return RiskVerdict::Approve,
    };
    let risk_per_share = (input.entry_price_micros - stop).abs();
    if risk_per_share == 0 {
        return RiskVerdict::Approve;
    }

    let max_risk_budget = (input.equity_micros as f64 * budget.max_risk_pct) as i64;
    let remaining_budget = max_risk_budget - input.existing_strategy_risk_micros;
    let candidate_risk = candidate_qty * risk_per_share;

    if candidate_risk <= remaining_budget {
        return RiskVerdict::Approve;
    }

    if remaining_budget <= 0 {
        return RiskVerdict::Reject {
            reason: ReasonCode::StrategyRiskBudget,
            cooldown_secs: None,
        };
    }

    let scaled_qty = remaining_budget / risk_per_share;
    if scaled_qty <= 0 {
        RiskVerdict::Reject {
            reason: ReasonCode::StrategyRiskBudget,
            cooldown_secs: None,
        }
    } else {
        RiskVerdict::Modify {
            qty: scaled_qty,
            reason: ReasonCode::StrategyRiskBudget,
        }
    }
}

fn check_microstructure(input: &RiskCheckInput, _cfg: &RiskConfig) -> Option<RiskVerdict> {
    if let Some(until) = input.vi_cooldown_until {
        if input.now < until {
            return Some(RiskVerdict::Defer {
                reason: ReasonCode::ViCooldown,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Regime;

    fn base_input() -> RiskCheckInput {
        RiskCheckInput {
            request: RequestKind::Entry,
            strategy_id: "KMP".to_string(),
            symbol: "005930".to_string(),
            sector: Some("SEMIS".to_string()),
            qty: 300,
            entry_price_micros: 70_000 * crate::types::MICROS_SCALE,
            stop_price_micros: Some(69_000 * crate::types::MICROS_SCALE),
            equity_micros: 100_000_000 * crate::types::MICROS_SCALE,
            daily_pnl_pct: 0.0,
            current_regime: Regime::Normal,
            existing_gross_notional_micros: 0,
            existing_net_notional_micros: 0,
            existing_position_count: 0,
            existing_symbol_notional_micros: 0,
            existing_strategy_position_count: 0,
            existing_strategy_risk_micros: 0,
            now: chrono::Utc::now(),
            vi_cooldown_until: None,
        }
    }

    #[test]
    fn entry_scaled_down_to_fit_position_cap() {
        let cfg = RiskConfig::sane_defaults();
        let mut state = RiskState::new("2024-01-01");
        let sectors = SectorExposure::new();
        let verdict = evaluate(&base_input(), &cfg, &mut state, &sectors, false, false);
        match verdict {
            RiskVerdict::Modify { qty, .. } => assert_eq!(qty, 214),
            other => panic!("expected Modify, got {other:?}"),
        }
    }

    #[test]
    fn exits_always_bypass_exposure_checks() {
        let cfg = RiskConfig::sane_defaults();
        let mut state = RiskState::new("2024-01-01");
        let sectors = SectorExposure::new();
        let mut input = base_input();
        input.request = RequestKind::Exit;
        input.qty = 10_000; // would blow every cap if it were an entry
        assert_eq!(
            evaluate(&input, &cfg, &mut state, &sectors, false, false),
            RiskVerdict::Approve
        );
    }

    #[test]
    fn halted_state_rejects_entries_but_not_exits() {
        let cfg = RiskConfig::sane_defaults();
        let mut state = RiskState::new("2024-01-01");
        state.halted = true;
        let sectors = SectorExposure::new();
        let entry = base_input();
        assert!(matches!(
            evaluate(&entry, &cfg, &mut state, &sectors, false, false),
            RiskVerdict::Reject {
                reason: ReasonCode::HaltNewEntries,
                ..
            }
        ));
        let mut exit = base_input();
        exit.request = RequestKind::Exit;
        assert_eq!(
            evaluate(&exit, &cfg, &mut state, &sectors, false, false),
            RiskVerdict::Approve
        );
    }

    #[test]
    fn daily_loss_halt_trips_and_latches() {
        let cfg = RiskConfig::sane_defaults();
        let mut state = RiskState::new("2024-01-01");
        let sectors = SectorExposure::new();
        let mut input = base_input();
        input.daily_pnl_pct = -0.025; // breaches warn_pct (2%) but not halt_pct (3%)
        assert!(matches!(
            evaluate(&input, &cfg, &mut state, &sectors, false, false),
            RiskVerdict::Reject {
                reason: ReasonCode::DailyLossWarn,
                ..
            }
        ));
        assert!(state.halted);

        // latched halt now rejects even a fresh, otherwise-healthy entry.
        let mut healthy = base_input();
        healthy.daily_pnl_pct = 0.0;
        assert!(matches!(
            evaluate(&healthy, &cfg, &mut state, &sectors, false, false),
            RiskVerdict::Reject {
                reason: ReasonCode::HaltNewEntries,
                ..
            }
        ));
    }

    #[test]
    fn frozen_symbol_blocks_entries() {
        let cfg = RiskConfig::sane_defaults();
        let mut state = RiskState::new("2024-01-01");
        let sectors = SectorExposure::new();
        assert!(matches!(
            evaluate(&base_input(), &cfg, &mut state, &sectors, true, false),
            RiskVerdict::Reject {
                reason: ReasonCode::SymbolFrozen,
                ..
            }
        ));
    }

    #[test]
    fn active_vi_cooldown_defers_entry() {
        let cfg = RiskConfig::sane_defaults();
        let mut state = RiskState::new("2024-01-01");
        let sectors = SectorExposure::new();
        let mut input = base_input();
        input.vi_cooldown_until = Some(input.now + chrono::Duration::seconds(60));
        assert_eq!(
            evaluate(&input, &cfg, &mut state, &sectors, false, false),
            RiskVerdict::Defer {
                reason: ReasonCode::ViCooldown,
            }
        );
    }

    #[test]
    fn expired_vi_cooldown_does_not_defer() {
        let cfg = RiskConfig::sane_defaults();
        let mut state = RiskState::new("2024-01-01");
        let sectors = SectorExposure::new();
        let mut input = base_input();
        input.vi_cooldown_until = Some(input.now - chrono::Duration::seconds(1));
        match evaluate(&input, &cfg, &mut state, &sectors, false, false) {
            RiskVerdict::Modify { .. } => {}
            other => panic!("expected Modify (position cap still applies), got {other:?}"),
        }
    }
}
