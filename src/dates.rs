//! Listing date parsing and time windows.
//!
//! The store keeps dates as `day/month/yy` text. Every consumer (filters,
//! KPIs, charts) parses through [`parse_listing_date`] so the rules match.

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::Period;

/// Parses a `day/month/yy` (or `day/month/yyyy`) date to UTC midnight.
///
/// Returns `None` and logs a warning when the text is malformed.
pub fn parse_listing_date(raw: &str) -> Option<DateTime<Utc>> {
    let parsed = try_parse(raw);
    if parsed.is_none() {
        warn!("Unparseable listing date '{}'", raw);
    }
    parsed
}

fn try_parse(raw: &str) -> Option<DateTime<Utc>> {
    let mut parts = raw.trim().split('/');
    let day: u32 = parts.next()?.trim().parse().ok()?;
    let month: u32 = parts.next()?.trim().parse().ok()?;
    let year: i32 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let year = if (0..100).contains(&year) {
        2000 + year
    } else {
        year
    };
    NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
}

/// Calendar-day key (`YYYY-MM-DD`) used to bucket chart points.
pub fn day_key(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Inclusive `[start, end]` time window.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: &DateTime<Utc>) -> bool {
        *date >= self.start && *date <= self.end
    }

    /// The window of identical length ending where this one starts, or
    /// `None` when it would begin before the representable date range.
    pub fn previous(&self) -> Option<Self> {
        let length = self.end - self.start;
        Some(Self {
            start: self.start.checked_sub_signed(length)?,
            end: self.start,
        })
    }
}

/// Resolves a relative period to a window ending at `now`.
///
/// Weeks are seven days; months are calendar months. `Custom` has no
/// relative form and yields `None`, as does a count reaching past the
/// representable date range.
pub fn resolve_period(period: Period, count: u32, now: DateTime<Utc>) -> Option<TimeWindow> {
    let start = match period {
        Period::Day => now.checked_sub_signed(Duration::try_days(i64::from(count))?)?,
        Period::Week => now.checked_sub_signed(Duration::try_days(7 * i64::from(count))?)?,
        Period::Month => now.checked_sub_months(Months::new(count))?,
        Period::Custom => return None,
    };
    Some(TimeWindow::new(start, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    mod parse_listing_date_tests {
        use super::*;

        #[test]
        fn test_two_digit_year() {
            let date = parse_listing_date("5/3/24").unwrap();
            assert_eq!(date, Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap());
        }

        #[test]
        fn test_four_digit_year() {
            let date = parse_listing_date("31/12/2023").unwrap();
            assert_eq!(day_key(&date), "2023-12-31");
        }

        #[test]
        fn test_non_numeric_component_fails() {
            assert_eq!(parse_listing_date("5/March/24"), None);
            assert_eq!(parse_listing_date("x/3/24"), None);
        }

        #[test]
        fn test_wrong_shape_fails() {
            assert_eq!(parse_listing_date(""), None);
            assert_eq!(parse_listing_date("2024-03-05"), None);
            assert_eq!(parse_listing_date("5/3/24/1"), None);
            assert_eq!(parse_listing_date("5/3"), None);
        }

        #[test]
        fn test_impossible_date_fails() {
            assert_eq!(parse_listing_date("31/2/24"), None);
            assert_eq!(parse_listing_date("1/13/24"), None);
        }

        #[test]
        fn test_round_trip_day_key() {
            for (day, month, year) in [(1, 1, 0), (29, 2, 24), (15, 7, 9), (31, 12, 99)] {
                let raw = format!("{}/{}/{:02}", day, month, year);
                let date = parse_listing_date(&raw).unwrap();
                assert_eq!(date.day(), day);
                assert_eq!(date.month(), month);
                assert_eq!(date.year(), 2000 + year as i32);
                assert_eq!(
                    day_key(&date),
                    format!("{:04}-{:02}-{:02}", 2000 + year, month, day)
                );
            }
        }
    }

    mod time_window_tests {
        use super::*;

        #[test]
        fn test_contains_is_inclusive() {
            let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let end = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
            let window = TimeWindow::new(start, end);
            assert!(window.contains(&start));
            assert!(window.contains(&end));
            assert!(!window.contains(&(end + Duration::seconds(1))));
        }

        #[test]
        fn test_previous_has_same_length() {
            let start = Utc.with_ymd_and_hms(2024, 1, 11, 0, 0, 0).unwrap();
            let end = Utc.with_ymd_and_hms(2024, 1, 21, 0, 0, 0).unwrap();
            let previous = TimeWindow::new(start, end).previous().unwrap();
            assert_eq!(previous.end, start);
            assert_eq!(previous.start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        }

        #[test]
        fn test_previous_out_of_range() {
            let window = TimeWindow::new(DateTime::<Utc>::MIN_UTC, Utc::now());
            assert_eq!(window.previous(), None);
        }
    }

    mod resolve_period_tests {
        use super::*;

        fn now() -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap()
        }

        #[test]
        fn test_days_and_weeks() {
            let day = resolve_period(Period::Day, 3, now()).unwrap();
            assert_eq!(day.end, now());
            assert_eq!(day.start, now() - Duration::days(3));

            let week = resolve_period(Period::Week, 2, now()).unwrap();
            assert_eq!(week.start, now() - Duration::days(14));
        }

        #[test]
        fn test_months_clamp_to_month_end() {
            let month = resolve_period(Period::Month, 1, now()).unwrap();
            assert_eq!(month.start, Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap());
        }

        #[test]
        fn test_out_of_range_count_has_no_window() {
            assert_eq!(resolve_period(Period::Day, u32::MAX, now()), None);
            assert_eq!(resolve_period(Period::Day, 200_000_000, now()), None);
            assert_eq!(resolve_period(Period::Week, u32::MAX, now()), None);
            assert_eq!(resolve_period(Period::Month, u32::MAX, now()), None);
        }

        #[test]
        fn test_custom_has_no_relative_window() {
            assert_eq!(resolve_period(Period::Custom, 5, now()), None);
        }
    }
}
