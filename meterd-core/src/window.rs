//! Time-window calculus
//!
//! Every other subsystem keys its work off the window containing a
//! timestamp: counters, rollup aggregates and quota evaluation all share
//! the boundaries computed here. Windows are half-open `[start, end)` in
//! UTC with no DST handling.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ValidationError;

/// Metering period / aggregation window type.
///
/// `Yearly` is accepted for quota periods and counters; rollup computation
/// covers the first three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Hourly,
    Daily,
    Monthly,
    Yearly,
}

impl Period {
    /// Periods that receive hot-window counters on ingest.
    pub const COUNTER_PERIODS: [Period; 3] = [Period::Hourly, Period::Daily, Period::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Hourly => "hourly",
            Period::Daily => "daily",
            Period::Monthly => "monthly",
            Period::Yearly => "yearly",
        }
    }

    /// Counter TTL in seconds: one window longer than the period itself so
    /// consumers reading a just-closed window still find it.
    pub fn counter_ttl_secs(&self) -> u64 {
        match self {
            Period::Hourly => 3_600 * 2,
            Period::Daily => 86_400 * 2,
            Period::Monthly => 86_400 * 32,
            Period::Yearly => 86_400 * 366,
        }
    }

    /// Whether rollup aggregates are computed for this period.
    pub fn supports_rollup(&self) -> bool {
        !matches!(self, Period::Yearly)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Period::Hourly),
            "daily" => Ok(Period::Daily),
            "monthly" => Ok(Period::Monthly),
            "yearly" => Ok(Period::Yearly),
            other => Err(ValidationError::UnknownPeriod {
                value: other.to_string(),
            }),
        }
    }
}

/// A half-open UTC time interval `[start, end)` of one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// The window of `period` containing `ts`. Total for every representable
    /// UTC timestamp.
    pub fn containing(ts: DateTime<Utc>, period: Period) -> Self {
        let day_start = ts.date_naive().and_time(NaiveTime::MIN).and_utc();

        match period {
            Period::Hourly => {
                let start = day_start + Duration::hours(i64::from(ts.hour()));
                TimeWindow {
                    start,
                    end: start + Duration::hours(1),
                }
            }
            Period::Daily => TimeWindow {
                start: day_start,
                end: day_start + Duration::days(1),
            },
            Period::Monthly => {
                let start = month_first(ts.year(), ts.month());
                let end = if ts.month() == 12 {
                    month_first(ts.year() + 1, 1)
                } else {
                    month_first(ts.year(), ts.month() + 1)
                };
                TimeWindow { start, end }
            }
            Period::Yearly => TimeWindow {
                start: month_first(ts.year(), 1),
                end: month_first(ts.year() + 1, 1),
            },
        }
    }

    /// Last representable instant inside the window (`end` minus one
    /// microsecond). The wire format and the aggregate rows carry this
    /// closed upper bound; range predicates use the half-open `end`.
    pub fn inclusive_end(&self) -> DateTime<Utc> {
        self.end - Duration::microseconds(1)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// First instant of the given calendar month. Day 1 exists in every month
/// of the proleptic Gregorian calendar; the fallback only guards the far
/// edge of chrono's representable range.
fn month_first(year: i32, month: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .unwrap_or(NaiveDate::MIN)
        .and_time(NaiveTime::MIN)
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn hourly_window_truncates_to_hour() {
        let w = TimeWindow::containing(ts("2025-03-10T12:15:42.123456Z"), Period::Hourly);
        assert_eq!(w.start, ts("2025-03-10T12:00:00Z"));
        assert_eq!(w.end, ts("2025-03-10T13:00:00Z"));
        assert_eq!(w.inclusive_end(), ts("2025-03-10T12:59:59.999999Z"));
    }

    #[test]
    fn daily_window_spans_calendar_day() {
        let w = TimeWindow::containing(ts("2025-03-10T23:59:59.999999Z"), Period::Daily);
        assert_eq!(w.start, ts("2025-03-10T00:00:00Z"));
        assert_eq!(w.end, ts("2025-03-11T00:00:00Z"));
    }

    #[test]
    fn monthly_window_handles_december_rollover() {
        let w = TimeWindow::containing(ts("2024-12-31T23:59:00Z"), Period::Monthly);
        assert_eq!(w.start, ts("2024-12-01T00:00:00Z"));
        assert_eq!(w.end, ts("2025-01-01T00:00:00Z"));
    }

    #[test]
    fn monthly_window_handles_leap_february() {
        let w = TimeWindow::containing(ts("2024-02-15T08:00:00Z"), Period::Monthly);
        assert_eq!(w.start, ts("2024-02-01T00:00:00Z"));
        assert_eq!(w.end, ts("2024-03-01T00:00:00Z"));
    }

    #[test]
    fn yearly_window_spans_calendar_year() {
        let w = TimeWindow::containing(ts("2025-07-04T12:00:00Z"), Period::Yearly);
        assert_eq!(w.start, ts("2025-01-01T00:00:00Z"));
        assert_eq!(w.end, ts("2026-01-01T00:00:00Z"));
    }

    #[test]
    fn window_contains_its_own_timestamp() {
        let probe = Utc.with_ymd_and_hms(2025, 6, 30, 23, 0, 1).unwrap();
        for period in [Period::Hourly, Period::Daily, Period::Monthly, Period::Yearly] {
            let w = TimeWindow::containing(probe, period);
            assert!(w.contains(probe), "{period} window must contain its timestamp");
            assert!(w.start <= probe && probe < w.end);
        }
    }

    #[test]
    fn window_of_window_start_is_idempotent() {
        let probe = ts("2025-01-31T23:59:00Z");
        for period in [Period::Hourly, Period::Daily, Period::Monthly, Period::Yearly] {
            let w = TimeWindow::containing(probe, period);
            assert_eq!(TimeWindow::containing(w.start, period), w);
        }
    }

    #[test]
    fn adjacent_windows_tile_without_gap() {
        let w = TimeWindow::containing(ts("2025-01-31T23:59:00Z"), Period::Hourly);
        let next = TimeWindow::containing(w.end, Period::Hourly);
        assert_eq!(next.start, w.end);
    }

    #[test]
    fn period_round_trips_through_str() {
        for period in [Period::Hourly, Period::Daily, Period::Monthly, Period::Yearly] {
            assert_eq!(period.as_str().parse::<Period>().unwrap(), period);
        }
        assert!("weekly".parse::<Period>().is_err());
    }

    #[test]
    fn counter_ttl_exceeds_window_length() {
        assert_eq!(Period::Hourly.counter_ttl_secs(), 7_200);
        assert_eq!(Period::Daily.counter_ttl_secs(), 172_800);
        assert_eq!(Period::Monthly.counter_ttl_secs(), 2_764_800);
        assert_eq!(Period::Yearly.counter_ttl_secs(), 31_622_400);
    }
}
