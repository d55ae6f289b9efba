use std::time::Duration;

const ACTIVE_INTERVAL_SECS: u64 = 5;
const IDLE_INTERVAL_SECS: u64 = 15;
const COOLDOWN_INTERVAL_SECS: u64 = 20;
const SLOW_CYCLE_THRESHOLD_SECS: u64 = 10;
const COOLDOWN_CYCLES: u32 = 2;
const SAFE_MODE_FAILURE_THRESHOLD: u32 = 5;

/// Computes the reconciliation loop's next sleep interval: 5s while
/// working orders exist, 15s when idle, 20s for two cycles after any cycle
/// slower than 10s, and flips to safe mode after five consecutive failures.
pub struct AdaptiveScheduler {
    cooldown_cycles_remaining: u32,
    consecutive_failures: u32,
}

impl AdaptiveScheduler {
    pub fn new() -> Self {
        AdaptiveScheduler {
            cooldown_cycles_remaining: 0,
            consecutive_failures: 0,
        }
    }

    /// Call after each cycle with its wall-clock duration and whether it
    /// failed. Returns the interval to sleep before the next cycle and
    /// whether safe mode should now be engaged.
    pub fn next_interval(&mut self, has_working_orders: bool, cycle_duration: Duration, cycle_failed: bool) -> (Duration, bool) {
        if cycle_failed {
            self.consecutive_failures += 1;
        } else {
            self.consecutive_failures = 0;
        }
        let trip_safe_mode = self.consecutive_failures >= SAFE_MODE_FAILURE_THRESHOLD;

        if cycle_duration.as_secs() > SLOW_CYCLE_THRESHOLD_SECS {
            self.cooldown_cycles_remaining = COOLDOWN_CYCLES;
        }

        if self.cooldown_cycles_remaining > 0 {
            self.cooldown_cycles_remaining -= 1;
            return (Duration::from_secs(COOLDOWN_INTERVAL_SECS), trip_safe_mode);
        }

        let interval = if has_working_orders {
            ACTIVE_INTERVAL_SECS
        } else {
            IDLE_INTERVAL_SECS
        };
        (Duration::from_secs(interval), trip_safe_mode)
    }
}

impl Default for AdaptiveScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_cycle_triggers_two_cooldown_cycles() {
        let mut sched = AdaptiveScheduler::new();
        let (interval, _) = sched.next_interval(true, Duration::from_secs(11), false);
        assert_eq!(interval, Duration::from_secs(20));
        let (interval, _) = sched.next_interval(true, Duration::from_secs(1), false);
        assert_eq!(interval, Duration::from_secs(20));
        let (interval, _) = sched.next_interval(true, Duration::from_secs(1), false);
        assert_eq!(interval, Duration::from_secs(5));
    }

    #[test]
    fn five_failures_trip_safe_mode() {
        let mut sched = AdaptiveScheduler::new();
        let mut tripped = false;
        for _ in 0..5 {
            let (_, trip) = sched.next_interval(false, Duration::from_secs(1), true);
            tripped = trip;
        }
        assert!(tripped);
    }
}
