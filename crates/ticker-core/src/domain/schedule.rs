//! Business-day scheduling.
//!
//! The consumer gates jobs on wall-clock time in the configured zone and
//! enqueues each successor for the next business day. The holiday calendar
//! is pluggable; the default treats Monday through Friday as business days.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

/// Business-day predicate.
///
/// Implementations that consult an exchange holiday calendar can replace
/// [`WeekdayCalendar`] without touching the consumer.
pub trait BusinessCalendar: Send + Sync {
    /// True when the market trades on `date`.
    fn is_business_day(&self, date: NaiveDate) -> bool;
}

/// Monday–Friday calendar.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeekdayCalendar;

impl BusinessCalendar for WeekdayCalendar {
    fn is_business_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }
}

/// First business day strictly after `from`.
pub fn next_business_day(calendar: &dyn BusinessCalendar, from: NaiveDate) -> NaiveDate {
    let mut date = from + Duration::days(1);
    while !calendar.is_business_day(date) {
        date += Duration::days(1);
    }
    date
}

/// Next run instant: the next business day after `after` (zone-local) at
/// `execution_time`, returned in UTC.
///
/// The computation is entirely zone-local; only the final result is
/// converted. Around a DST gap the earliest valid local time is used.
pub fn next_run_at(
    calendar: &dyn BusinessCalendar,
    tz: Tz,
    after: DateTime<Utc>,
    execution_time: NaiveTime,
) -> DateTime<Utc> {
    let local_date = after.with_timezone(&tz).date_naive();
    let mut next_date = next_business_day(calendar, local_date);

    loop {
        let local_dt = next_date.and_time(execution_time);
        if let Some(resolved) = tz.from_local_datetime(&local_dt).earliest() {
            return resolved.with_timezone(&Utc);
        }
        // execution_time fell into a DST gap; try the following business day
        next_date = next_business_day(calendar, next_date);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn test_weekday_calendar() {
        let cal = WeekdayCalendar;
        // 2025-07-14 is a Monday
        assert!(cal.is_business_day(NaiveDate::from_ymd_opt(2025, 7, 14).unwrap()));
        assert!(cal.is_business_day(NaiveDate::from_ymd_opt(2025, 7, 18).unwrap()));
        assert!(!cal.is_business_day(NaiveDate::from_ymd_opt(2025, 7, 19).unwrap()));
        assert!(!cal.is_business_day(NaiveDate::from_ymd_opt(2025, 7, 20).unwrap()));
    }

    #[test]
    fn test_next_business_day_skips_weekend() {
        let cal = WeekdayCalendar;
        // Friday -> Monday
        let friday = NaiveDate::from_ymd_opt(2025, 7, 18).unwrap();
        assert_eq!(
            next_business_day(&cal, friday),
            NaiveDate::from_ymd_opt(2025, 7, 21).unwrap()
        );
        // Wednesday -> Thursday
        let wednesday = NaiveDate::from_ymd_opt(2025, 7, 16).unwrap();
        assert_eq!(
            next_business_day(&cal, wednesday),
            NaiveDate::from_ymd_opt(2025, 7, 17).unwrap()
        );
    }

    #[test]
    fn test_next_run_at_is_zone_local() {
        let cal = WeekdayCalendar;
        let tz: Tz = "America/Sao_Paulo".parse().unwrap();
        let exec = NaiveTime::from_hms_opt(16, 30, 0).unwrap();

        // Monday 2025-07-14 20:00 UTC = 17:00 local (-03:00)
        let after = Utc.with_ymd_and_hms(2025, 7, 14, 20, 0, 0).unwrap();
        let next = next_run_at(&cal, tz, after, exec);

        // Tuesday 16:30 local = 19:30 UTC
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 7, 15, 19, 30, 0).unwrap());
    }

    #[test]
    fn test_next_run_at_friday_rolls_to_monday() {
        let cal = WeekdayCalendar;
        let tz: Tz = "America/Sao_Paulo".parse().unwrap();
        let exec = NaiveTime::from_hms_opt(16, 30, 0).unwrap();

        // Friday 2025-07-18 local afternoon
        let after = Utc.with_ymd_and_hms(2025, 7, 18, 20, 0, 0).unwrap();
        let next = next_run_at(&cal, tz, after, exec);

        // Monday 2025-07-21 16:30 local
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 7, 21, 19, 30, 0).unwrap());
    }

    #[test]
    fn test_next_run_at_near_utc_midnight_uses_local_date() {
        let cal = WeekdayCalendar;
        let tz: Tz = "America/Sao_Paulo".parse().unwrap();
        let exec = NaiveTime::from_hms_opt(16, 30, 0).unwrap();

        // Tuesday 2025-07-15 01:00 UTC is still Monday 22:00 local;
        // the successor must land on local Tuesday, not Wednesday.
        let after = Utc.with_ymd_and_hms(2025, 7, 15, 1, 0, 0).unwrap();
        let next = next_run_at(&cal, tz, after, exec);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 7, 15, 19, 30, 0).unwrap());
    }
}
