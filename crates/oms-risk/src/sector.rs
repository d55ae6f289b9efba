use std::collections::BTreeMap;

/// Two parallel counters per sector: positions reserved ahead of submit and
/// positions actually open from fills. Cap checks sum both so an in-flight
/// order cannot be followed by another that would jointly overshoot the cap.
#[derive(Clone, Debug, Default)]
pub struct SectorExposure {
    reserved_notional_micros: BTreeMap<String, i64>,
    open_notional_micros: BTreeMap<String, i64>,
    reserved_count: BTreeMap<String, u32>,
    open_count: BTreeMap<String, u32>,
    sector_map: BTreeMap<String, String>,
}

impl SectorExposure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_sector_map(&mut self, symbol: impl Into<String>, sector: impl Into<String>) {
        self.sector_map.insert(symbol.into(), sector.into());
    }

    pub fn sector_of(&self, symbol: &str) -> Option<&String> {
        self.sector_map.get(symbol)
    }

    pub fn total_notional_micros(&self, sector: &str) -> i64 {
        self.reserved_notional_micros.get(sector).copied().unwrap_or(0)
            + self.open_notional_micros.get(sector).copied().unwrap_or(0)
    }

    pub fn total_count(&self, sector: &str) -> u32 {
        self.reserved_count.get(sector).copied().unwrap_or(0)
            + self.open_count.get(sector).copied().unwrap_or(0)
    }

    pub fn reserve_sector(&mut self, sector: &str, notional_micros: i64) {
        *self.reserved_notional_micros.entry(sector.to_string()).or_insert(0) += notional_micros;
        *self.reserved_count.entry(sector.to_string()).or_insert(0) += 1;
    }

    pub fn unreserve_sector(&mut self, sector: &str, notional_micros: i64) {
        if let Some(v) = self.reserved_notional_micros.get_mut(sector) {
            *v = (*v - notional_micros).max(0);
        }
        if let Some(c) = self.reserved_count.get_mut(sector) {
            *c = c.saturating_sub(1);
        }
    }

    pub fn on_sector_fill(&mut self, sector: &str, notional_micros: i64, reserved_notional_micros: i64) {
        self.unreserve_sector(sector, reserved_notional_micros);
        *self.open_notional_micros.entry(sector.to_string()).or_insert(0) += notional_micros;
        *self.open_count.entry(sector.to_string()).or_insert(0) += 1;
    }

    pub fn on_sector_close(&mut self, sector: &str, notional_micros: i64) {
        if let Some(v) = self.open_notional_micros.get_mut(sector) {
            *v = (*v - notional_micros).max(0);
        }
        if let Some(c) = self.open_count.get_mut(sector) {
            *c = c.saturating_sub(1);
        }
    }

    /// Resets a sector's counters to a broker-observed truth, used when the
    /// reconciliation loop discovers the in-memory counters have drifted.
    pub fn reconcile_sector_exposure(&mut self, sector: &str, open_notional_micros: i64, open_count: u32) {
        self.open_notional_micros.insert(sector.to_string(), open_notional_micros);
        self.open_count.insert(sector.to_string(), open_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_then_fill_preserves_total() {
        let mut sx = SectorExposure::new();
        sx.reserve_sector("SEMIS", 1_000_000);
        assert_eq!(sx.total_notional_micros("SEMIS"), 1_000_000);
        sx.on_sector_fill("SEMIS", 1_000_000, 1_000_000);
        assert_eq!(sx.total_notional_micros("SEMIS"), 1_000_000);
        assert_eq!(sx.total_count("SEMIS"), 1);
    }
}
