//! Mutable daily counters and per-asset cooldown timestamps

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Counters owned by exactly one execution engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    pub daily_trade_count: u32,
    pub daily_volume: Decimal,
    pub daily_reset_date: NaiveDate,
    pub last_trade_time: HashMap<String, DateTime<Utc>>,
}

impl EngineState {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            daily_trade_count: 0,
            daily_volume: Decimal::ZERO,
            daily_reset_date: today,
            last_trade_time: HashMap::new(),
        }
    }

    /// Zero the daily counters if `today` is past the reset date
    ///
    /// Returns true when a reset happened. Calling it again on the same date is
    /// a no-op. Cooldown timestamps survive the reset.
    pub fn roll_day(&mut self, today: NaiveDate) -> bool {
        if today > self.daily_reset_date {
            self.daily_trade_count = 0;
            self.daily_volume = Decimal::ZERO;
            self.daily_reset_date = today;
            true
        } else {
            false
        }
    }

    /// Account for one executed trade
    pub fn record_trade(&mut self, asset: &str, usd_amount: Decimal, at: DateTime<Utc>) {
        self.daily_trade_count += 1;
        self.daily_volume += usd_amount;
        self.last_trade_time.insert(asset.to_string(), at);
    }

    /// Whole seconds left before `asset` may trade again, if any
    pub fn cooldown_remaining(
        &self,
        asset: &str,
        cooldown_seconds: u64,
        now: DateTime<Utc>,
    ) -> Option<u64> {
        let last = self.last_trade_time.get(asset)?;
        let elapsed_ms = (now - *last).num_milliseconds();
        let cooldown_ms = i64::try_from(cooldown_seconds)
            .unwrap_or(i64::MAX / 1000)
            .saturating_mul(1000);
        if elapsed_ms < cooldown_ms {
            let remaining_ms = cooldown_ms - elapsed_ms;
            Some(((remaining_ms + 999) / 1000) as u64)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    #[test]
    fn test_roll_day_is_idempotent() {
        let day1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();

        let mut state = EngineState::new(day1);
        state.record_trade("BTC", dec!(40), at);

        assert!(!state.roll_day(day1));
        assert_eq!(state.daily_trade_count, 1);

        assert!(state.roll_day(day2));
        assert_eq!(state.daily_trade_count, 0);
        assert_eq!(state.daily_volume, Decimal::ZERO);
        assert!(!state.roll_day(day2));

        // cooldowns are not a daily counter
        assert!(state.last_trade_time.contains_key("BTC"));
    }

    #[test]
    fn test_roll_day_ignores_earlier_dates() {
        let day2 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let mut state = EngineState::new(day2);
        state.daily_trade_count = 3;
        assert!(!state.roll_day(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
        assert_eq!(state.daily_trade_count, 3);
    }

    #[test]
    fn test_cooldown_rounds_up() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let mut state = EngineState::new(at.date_naive());
        state.record_trade("ETH", dec!(10), at);

        let now = at + Duration::milliseconds(59_500);
        assert_eq!(state.cooldown_remaining("ETH", 60, now), Some(1));
        assert_eq!(state.cooldown_remaining("ETH", 60, at + Duration::seconds(60)), None);
        assert_eq!(state.cooldown_remaining("BTC", 60, now), None);
    }
}
