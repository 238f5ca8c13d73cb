//! Time periods and date helpers
//!
//! Statistics are computed over a regular sequence of half-open time periods
//! built from a start date, an end date, a period duration and a step.
//! Durations and steps are written as `<n><unit>`: `d` and `w` advance by a
//! fixed number of days, `m` and `y` advance by calendar months and years.

use crate::errors::{Result, StatsError};
use chrono::{DateTime, Datelike, Days, Months, NaiveDate, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;

/// A length of time in calendar or fixed units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Days(u32),
    Weeks(u32),
    Months(u32),
    Years(u32),
}

impl Interval {
    /// Advance `t` by this interval
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the result overflows the calendar.
    pub fn add_to(self, t: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let shifted = match self {
            Self::Days(n) => t.checked_add_days(Days::new(u64::from(n))),
            Self::Weeks(n) => t.checked_add_days(Days::new(7 * u64::from(n))),
            Self::Months(n) => t.checked_add_months(Months::new(n)),
            Self::Years(n) => n
                .checked_mul(12)
                .and_then(|months| t.checked_add_months(Months::new(months))),
        };
        shifted.ok_or_else(|| StatsError::config(format!("date overflow adding {self} to {t}")))
    }

    /// Whether this interval is a calendar unit rather than a fixed count of days
    #[must_use]
    pub const fn is_calendar(self) -> bool {
        matches!(self, Self::Months(_) | Self::Years(_))
    }

    const fn count(self) -> u32 {
        match self {
            Self::Days(n) | Self::Weeks(n) | Self::Months(n) | Self::Years(n) => n,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Days(n) => write!(f, "{n}d"),
            Self::Weeks(n) => write!(f, "{n}w"),
            Self::Months(n) => write!(f, "{n}m"),
            Self::Years(n) => write!(f, "{n}y"),
        }
    }
}

impl FromStr for Interval {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| StatsError::config(format!("interval '{s}' has no unit")))?;
        let (count, unit) = s.split_at(split);
        let count: u32 = count
            .parse()
            .map_err(|_| StatsError::config(format!("interval '{s}' has no count")))?;

        let interval = match unit {
            "d" | "day" | "days" => Self::Days(count),
            "w" | "week" | "weeks" => Self::Weeks(count),
            "m" | "month" | "months" => Self::Months(count),
            "y" | "year" | "years" => Self::Years(count),
            other => {
                return Err(StatsError::config(format!(
                    "unknown interval unit '{other}' in '{s}'"
                )))
            }
        };
        if interval.count() == 0 {
            return Err(StatsError::config(format!("interval '{s}' must be positive")));
        }
        Ok(interval)
    }
}

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimePeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimePeriod {
    #[must_use]
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whether `t` falls inside this period
    #[must_use]
    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        self.start <= *t && *t < self.end
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// Generate the regular sequence of statistic periods
///
/// A period `[s, s + duration)` is produced for every step start `s` whose
/// period still ends on or before `end`.
///
/// # Errors
///
/// Returns a configuration error if either interval is zero or the calendar
/// arithmetic overflows.
pub fn date_sequence(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    duration: Interval,
    step: Interval,
) -> Result<Vec<TimePeriod>> {
    if let Some(zero) = [duration, step].into_iter().find(|i| i.count() == 0) {
        return Err(StatsError::config(format!("interval {zero} must be longer than zero")));
    }

    let mut periods = Vec::new();
    let mut period_start = start;
    let mut steps: u32 = 0;

    loop {
        let period_end = duration.add_to(period_start)?;
        if period_end > end {
            break;
        }
        periods.push(TimePeriod::new(period_start, period_end));

        // Calendar steps are taken from the original start so that month
        // ends do not drift (Jan 31 + 1m + 1m stays on the 31st where possible).
        steps = steps
            .checked_add(1)
            .ok_or_else(|| StatsError::config("too many periods"))?;
        period_start = if step.is_calendar() {
            scale(step, steps)?.add_to(start)?
        } else {
            step.add_to(period_start)?
        };
    }

    Ok(periods)
}

fn scale(interval: Interval, factor: u32) -> Result<Interval> {
    let n = interval
        .count()
        .checked_mul(factor)
        .ok_or_else(|| StatsError::config(format!("interval {interval} times {factor} overflows")))?;
    Ok(match interval {
        Interval::Days(_) => Interval::Days(n),
        Interval::Weeks(_) => Interval::Weeks(n),
        Interval::Months(_) => Interval::Months(n),
        Interval::Years(_) => Interval::Years(n),
    })
}

/// Encode the calendar date of `t` as a `YYYYMMDD` integer
///
/// For example, 2016-09-29 becomes `20160929`.
#[must_use]
pub fn datetime_to_inttime(t: &DateTime<Utc>) -> i32 {
    t.year() * 10_000 + t.month() as i32 * 100 + t.day() as i32
}

/// Decode a `YYYYMMDD` integer back into a calendar date
#[must_use]
pub fn inttime_to_date(value: i32) -> Option<NaiveDate> {
    let year = value / 10_000;
    let month = u32::try_from((value / 100) % 100).ok()?;
    let day = u32::try_from(value % 100).ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Seconds since the Unix epoch, the unit of the `observed` output variables
#[must_use]
pub fn epoch_seconds(t: &DateTime<Utc>) -> f64 {
    t.timestamp() as f64 + f64::from(t.timestamp_subsec_nanos()) * 1e-9
}

/// Parse a configuration date (`YYYY-MM-DD` or RFC 3339)
///
/// # Errors
///
/// Returns a configuration error when neither format matches.
pub fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| StatsError::config(format!("invalid date '{s}': {e}")))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| StatsError::config(format!("invalid date '{s}'")))?;
    Ok(Utc.from_utc_datetime(&midnight))
}
