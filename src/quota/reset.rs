//! Calendar-day boundaries in a named timezone.
//!
//! The daily message allowance resets at local midnight in the quota
//! timezone, which moves relative to UTC across DST changes.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

pub const QUOTA_TIMEZONE: Tz = chrono_tz::America::New_York;

/// The calendar date `now` falls on in `tz`.
pub fn calendar_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// The first instant strictly after `now` at which the calendar date in `tz`
/// changes, i.e. the next local midnight.
pub fn next_reset_boundary(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let today = calendar_date(now, tz);
    let tomorrow = today.succ_opt().unwrap_or(today);
    start_of_day(tomorrow, tz)
}

fn start_of_day(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(chrono::NaiveTime::MIN);

    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        // Clocks fell back across midnight: the day starts at the first one
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        // Clocks sprang forward over midnight: the day starts when they land
        LocalResult::None => {
            let mut probe = midnight;
            for _ in 0..4 * 24 {
                probe += Duration::minutes(15);
                if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
                    return dt.with_timezone(&Utc);
                }
            }
            Utc.from_utc_datetime(&midnight)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_calendar_date_uses_new_york_not_utc() {
        // 03:30 UTC on the 2nd is still the evening of the 1st in New York
        let now = utc(2024, 2, 2, 3, 30);
        assert_eq!(
            calendar_date(now, QUOTA_TIMEZONE),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
        );
        assert_eq!(
            calendar_date(now, chrono_tz::UTC),
            NaiveDate::from_ymd_opt(2024, 2, 2).unwrap()
        );
    }

    #[test]
    fn test_boundary_in_standard_time() {
        // EST is UTC-5
        let now = utc(2024, 1, 15, 18, 0);
        assert_eq!(next_reset_boundary(now, QUOTA_TIMEZONE), utc(2024, 1, 16, 5, 0));
    }

    #[test]
    fn test_boundary_in_daylight_time() {
        // EDT is UTC-4
        let now = utc(2024, 7, 4, 12, 0);
        assert_eq!(next_reset_boundary(now, QUOTA_TIMEZONE), utc(2024, 7, 5, 4, 0));
    }

    #[test]
    fn test_boundary_across_spring_forward() {
        // DST starts 2024-03-10 02:00 local; both neighbouring boundaries
        // are local midnight even though their UTC hour differs
        let before = utc(2024, 3, 9, 20, 0);
        let boundary = next_reset_boundary(before, QUOTA_TIMEZONE);
        assert_eq!(boundary, utc(2024, 3, 10, 5, 0));

        let after = next_reset_boundary(boundary, QUOTA_TIMEZONE);
        assert_eq!(after, utc(2024, 3, 11, 4, 0));
        assert_eq!(after - boundary, Duration::hours(23));

        for b in [boundary, after] {
            let local = b.with_timezone(&QUOTA_TIMEZONE);
            assert_eq!((local.hour(), local.minute()), (0, 0));
        }
    }

    #[test]
    fn test_boundary_across_fall_back() {
        // DST ends 2024-11-03 02:00 local; that day is 25 hours long
        let start = next_reset_boundary(utc(2024, 11, 2, 12, 0), QUOTA_TIMEZONE);
        assert_eq!(start, utc(2024, 11, 3, 4, 0));

        let end = next_reset_boundary(start, QUOTA_TIMEZONE);
        assert_eq!(end, utc(2024, 11, 4, 5, 0));
        assert_eq!(end - start, Duration::hours(25));
        assert_eq!(end.with_timezone(&QUOTA_TIMEZONE).hour(), 0);
    }

    #[test]
    fn test_boundary_is_strictly_after_now() {
        let midnight = utc(2024, 1, 16, 5, 0);
        assert_eq!(next_reset_boundary(midnight, QUOTA_TIMEZONE), utc(2024, 1, 17, 5, 0));

        let just_before = midnight - Duration::seconds(1);
        assert_eq!(next_reset_boundary(just_before, QUOTA_TIMEZONE), midnight);
    }

    #[test]
    fn test_midnight_gap_zone() {
        // Santiago skips from 00:00 to 01:00 on 2024-09-08
        let tz = chrono_tz::America::Santiago;
        let boundary = next_reset_boundary(utc(2024, 9, 7, 15, 0), tz);
        let local = boundary.with_timezone(&tz);
        assert_eq!(local.date_naive(), NaiveDate::from_ymd_opt(2024, 9, 8).unwrap());
        assert_eq!(local.hour(), 1);
    }
}
