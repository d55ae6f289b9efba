use chrono::{DateTime, Utc};
use oms_schemas::Side;
use oms_state::OrderType;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterError {
    None,
    RateLimit,
    TempError,
    RejectedInvalid,
    RejectedRisk,
    Unknown,
}

impl AdapterError {
    /// Classifies a broker error message by substring, the way
    /// `original_source/oms/adapter.py` decides whether a failure is worth
    /// retrying.
    pub fn classify(message: &str) -> AdapterError {
        let lower = message.to_lowercase();
        if lower.contains("rate limit") {
            AdapterError::RateLimit
        } else if lower.contains("timeout") || lower.contains("temporary") {
            AdapterError::TempError
        } else if lower.contains("invalid") {
            AdapterError::RejectedInvalid
        } else if lower.contains("risk") {
            AdapterError::RejectedRisk
        } else {
            AdapterError::Unknown
        }
    }

    pub fn is_transient(self) -> bool {
        matches!(self, AdapterError::RateLimit | AdapterError::TempError)
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdapterError::None => "none",
            AdapterError::RateLimit => "rate_limit",
            AdapterError::TempError => "temp_error",
            AdapterError::RejectedInvalid => "rejected_invalid",
            AdapterError::RejectedRisk => "rejected_risk",
            AdapterError::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug)]
pub struct AdapterResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub error: AdapterError,
    pub message: Option<String>,
}

impl AdapterResult {
    pub fn ok(order_id: impl Into<String>) -> Self {
        AdapterResult {
            success: true,
            order_id: Some(order_id.into()),
            error: AdapterError::None,
            message: None,
        }
    }

    pub fn fail(error: AdapterError, message: impl Into<String>) -> Self {
        AdapterResult {
            success: false,
            order_id: None,
            error,
            message: Some(message.into()),
        }
    }
}

/// Every broker query returns this shape rather than a bare `Vec`/`Option`
/// so an `ok=false` failure is never silently mistaken for "no data" by a
/// caller that only inspects `data`.
#[derive(Clone, Debug)]
pub struct BrokerQueryResult<T> {
    pub ok: bool,
    pub data: T,
    pub error_message: Option<String>,
}

impl<T: Default> BrokerQueryResult<T> {
    pub fn ok(data: T) -> Self {
        BrokerQueryResult {
            ok: true,
            data,
            error_message: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        BrokerQueryResult {
            ok: false,
            data: T::default(),
            error_message: Some(message.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerOrder {
    pub broker_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub qty: i64,
    pub filled_qty: i64,
    pub avg_fill_price_micros: Option<i64>,
    pub branch: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: i64,
    pub avg_price_micros: i64,
}

#[derive(Clone, Debug)]
pub struct BalanceSnapshot {
    pub positions: Vec<BrokerPosition>,
    pub equity_micros: i64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmitOrderRequest<'a> {
    pub symbol: &'a str,
    pub side: Side,
    pub qty: i64,
    pub order_type: OrderType,
    pub limit_price_micros: Option<i64>,
    pub stop_price_micros: Option<i64>,
}
