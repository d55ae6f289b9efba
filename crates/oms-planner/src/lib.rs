//! Translates an approved intent into a concrete order plan: order type,
//! limit price and cancel-after timeout, per `original_source/oms/planner.py`.

use oms_schemas::{Side, Urgency};
use oms_state::OrderType;

#[derive(Clone, Debug, PartialEq)]
pub struct OrderPlan {
    pub side: Side,
    pub qty: i64,
    pub order_type: OrderType,
    pub limit_price_micros: Option<i64>,
    pub stop_price_micros: Option<i64>,
    pub cancel_after_secs: i64,
}

pub struct OrderPlanner;

impl OrderPlanner {
    /// `current_price_micros` is the latest quote; `stop_price_micros` and
    /// `limit_price_micros` come from the intent's constraints.
    pub fn create_plan(
        side: Side,
        qty: i64,
        urgency: Urgency,
        current_price_micros: i64,
        stop_price_micros: Option<i64>,
        limit_price_micros: Option<i64>,
    ) -> OrderPlan {
        if let (Side::Buy, Some(stop)) = (side, stop_price_micros) {
            let limit = limit_price_micros.unwrap_or_else(|| stop + stop * 3 / 1000);
            return OrderPlan {
                side,
                qty,
                order_type: OrderType::StopLimit,
                limit_price_micros: Some(limit),
                stop_price_micros: Some(stop),
                cancel_after_secs: 30,
            };
        }

        if matches!(urgency, Urgency::High) {
            let adjusted = match side {
                Side::Buy => current_price_micros + current_price_micros * 2 / 1000,
                Side::Sell => current_price_micros - current_price_micros * 2 / 1000,
            };
            return OrderPlan {
                side,
                qty,
                order_type: OrderType::MarketableLimit,
                limit_price_micros: Some(adjusted),
                stop_price_micros: None,
                cancel_after_secs: 10,
            };
        }

        OrderPlan {
            side,
            qty,
            order_type: OrderType::Limit,
            limit_price_micros: Some(limit_price_micros.unwrap_or(current_price_micros)),
            stop_price_micros: None,
            cancel_after_secs: 120,
        }
    }

    /// Exits are always sent as market orders with a short cancel-after, so
    /// a stuck exit never lingers behind a stale limit.
    pub fn create_exit_plan(side: Side, qty: i64) -> OrderPlan {
        OrderPlan {
            side,
            qty,
            order_type: OrderType::Market,
            limit_price_micros: None,
            stop_price_micros: None,
            cancel_after_secs: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_buy_produces_stop_limit_plan() {
        let plan = OrderPlanner::create_plan(
            Side::Buy,
            100,
            Urgency::Normal,
            72_000_000_000,
            Some(71_000_000_000),
            None,
        );
        assert_eq!(plan.order_type, OrderType::StopLimit);
        assert_eq!(plan.cancel_after_secs, 30);
    }

    #[test]
    fn high_urgency_produces_marketable_limit() {
        let plan = OrderPlanner::create_plan(Side::Buy, 100, Urgency::High, 72_000_000_000, None, None);
        assert_eq!(plan.order_type, OrderType::MarketableLimit);
        assert_eq!(plan.cancel_after_secs, 10);
    }

    #[test]
    fn exit_plan_is_always_market() {
        let plan = OrderPlanner::create_exit_plan(Side::Sell, 50);
        assert_eq!(plan.order_type, OrderType::Market);
        assert_eq!(plan.cancel_after_secs, 5);
    }
}
