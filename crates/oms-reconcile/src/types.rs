use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftKind {
    Positive,
    Negative,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DriftEvent {
    pub symbol: String,
    pub kind: DriftKind,
    pub qty: i64,
    pub detected_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub orders_synced: u32,
    pub orders_filled: u32,
    pub orders_terminal: u32,
    pub orders_cancelled: u32,
    pub orders_timed_out: u32,
    pub positions_updated: u32,
    pub drift_events: Vec<DriftEvent>,
    pub cycle_failed: bool,
}

impl CycleReport {
    pub fn merge_drift(&mut self, event: DriftEvent) {
        self.drift_events.push(event);
    }
}
