//! Next-execution computation per cadence
//!
//! All hours are UTC. The result is always strictly after `now`.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use tracing::warn;

use super::types::{Cadence, DcaSchedule};

/// Monthly purchases never land past the 28th
pub const MAX_DAY_OF_MONTH: u32 = 28;

fn at_hour(date: NaiveDate, hour: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    Utc.from_utc_datetime(&date.and_time(time))
}

/// When a purchase with the given timing should fire next
///
/// `day_of_week` counts from Monday = 0.
pub fn next_execution(
    cadence: &Cadence,
    hour: u32,
    day_of_week: u32,
    day_of_month: u32,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    match cadence {
        Cadence::Hourly => {
            let top = now
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(now);
            top + Duration::hours(1)
        }
        Cadence::Daily => {
            let today = at_hour(now.date_naive(), hour);
            if today > now {
                today
            } else {
                today + Duration::days(1)
            }
        }
        Cadence::Weekly => next_weekday(now, hour, day_of_week, 7),
        Cadence::Biweekly => next_weekday(now, hour, day_of_week, 14),
        Cadence::Monthly => next_month_day(now, hour, day_of_month),
        Cadence::Unknown(name) => {
            warn!("Unknown cadence '{}', scheduling 24 hours out", name);
            now + Duration::hours(24)
        }
    }
}

/// Next execution for an existing schedule
pub fn next_for(schedule: &DcaSchedule, now: DateTime<Utc>) -> DateTime<Utc> {
    next_execution(
        &schedule.cadence,
        schedule.hour,
        schedule.day_of_week,
        schedule.day_of_month,
        now,
    )
}

fn next_weekday(now: DateTime<Utc>, hour: u32, day_of_week: u32, period_days: i64) -> DateTime<Utc> {
    let target = i64::from(day_of_week % 7);
    let today = i64::from(now.weekday().num_days_from_monday());
    let days_ahead = (target - today).rem_euclid(7);

    let candidate = at_hour(now.date_naive(), hour) + Duration::days(days_ahead);
    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(period_days)
    }
}

fn next_month_day(now: DateTime<Utc>, hour: u32, day_of_month: u32) -> DateTime<Utc> {
    let day = day_of_month.clamp(1, MAX_DAY_OF_MONTH);

    let this_month = NaiveDate::from_ymd_opt(now.year(), now.month(), day)
        .map(|date| at_hour(date, hour))
        .filter(|candidate| *candidate > now);
    if let Some(candidate) = this_month {
        return candidate;
    }

    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    // day <= 28 exists in every month
    NaiveDate::from_ymd_opt(year, month, day)
        .map(|date| at_hour(date, hour))
        .unwrap_or_else(|| now + Duration::days(30))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_hourly_top_of_next_hour() {
        let now = utc(2024, 3, 5, 14, 37);
        assert_eq!(next_execution(&Cadence::Hourly, 0, 0, 1, now), utc(2024, 3, 5, 15, 0));
        let on_the_hour = utc(2024, 3, 5, 15, 0);
        assert_eq!(
            next_execution(&Cadence::Hourly, 0, 0, 1, on_the_hour),
            utc(2024, 3, 5, 16, 0)
        );
    }

    #[test]
    fn test_daily_today_or_tomorrow() {
        assert_eq!(
            next_execution(&Cadence::Daily, 9, 0, 1, utc(2024, 3, 5, 8, 0)),
            utc(2024, 3, 5, 9, 0)
        );
        assert_eq!(
            next_execution(&Cadence::Daily, 9, 0, 1, utc(2024, 3, 5, 9, 0)),
            utc(2024, 3, 6, 9, 0)
        );
        assert_eq!(
            next_execution(&Cadence::Daily, 9, 0, 1, utc(2024, 12, 31, 23, 0)),
            utc(2025, 1, 1, 9, 0)
        );
    }

    #[test]
    fn test_weekly_lands_on_weekday_after_now() {
        // 2024-03-01 is a Friday; walk every hour of two weeks for every weekday
        let start = utc(2024, 3, 1, 0, 30);
        for dow in 0..7u32 {
            for step in 0..(14 * 24) {
                let now = start + Duration::hours(step);
                let next = next_execution(&Cadence::Weekly, 9, dow, 1, now);
                assert!(next > now);
                assert_eq!(next.weekday().num_days_from_monday(), dow);
                assert_eq!(next.hour(), 9);
                assert!(next - now <= Duration::days(7));
            }
        }
    }

    #[test]
    fn test_biweekly_rolls_two_weeks_once_passed() {
        // Monday 2024-03-04 10:00, configured Monday 09:00
        let now = utc(2024, 3, 4, 10, 0);
        let next = next_execution(&Cadence::Biweekly, 9, 0, 1, now);
        assert_eq!(next, utc(2024, 3, 18, 9, 0));
        assert_eq!(next.weekday(), Weekday::Mon);

        let before = utc(2024, 3, 4, 8, 0);
        assert_eq!(next_execution(&Cadence::Biweekly, 9, 0, 1, before), utc(2024, 3, 4, 9, 0));
    }

    #[test]
    fn test_monthly_clamps_to_28() {
        let now = utc(2024, 2, 15, 12, 0);
        assert_eq!(
            next_execution(&Cadence::Monthly, 9, 0, 31, now),
            utc(2024, 2, 28, 9, 0)
        );
    }

    #[test]
    fn test_monthly_rolls_over_year() {
        let now = utc(2024, 12, 20, 12, 0);
        assert_eq!(
            next_execution(&Cadence::Monthly, 9, 0, 15, now),
            utc(2025, 1, 15, 9, 0)
        );
    }

    #[test]
    fn test_unknown_cadence_defaults_to_a_day() {
        let now = utc(2024, 3, 5, 14, 37);
        let next = next_execution(&Cadence::Unknown("sometimes".into()), 9, 0, 1, now);
        assert_eq!(next, now + Duration::hours(24));
    }
}
