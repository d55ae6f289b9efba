//! Wire and in-process types shared across the OMS: intents, their results,
//! and the small value types every other crate builds on.

mod intent;

pub use intent::*;

use chrono::{DateTime, Utc};
use chrono_tz::Asia::Seoul;

/// Trade date in KST, formatted `YYYYMMDD`. Used as a component of the
/// idempotency key so stale keys roll over naturally at the Korean market's
/// own day boundary rather than UTC midnight.
pub fn kst_trade_date(now: DateTime<Utc>) -> String {
    now.with_timezone(&Seoul).format("%Y%m%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn trade_date_uses_seoul_offset() {
        // 2024-01-01T15:30:00Z is 2024-01-02T00:30 KST
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 15, 30, 0).unwrap();
        assert_eq!(kst_trade_date(ts), "20240102");
    }
}
