//! Five-field cron expressions (minute hour day-of-month month day-of-week),
//! evaluated in UTC.
//!
//! Each field accepts `*`, a value, a range `a-b`, a step `*/n`, `a/n` or
//! `a-b/n`, and comma-separated lists of those. Day-of-week runs 0-7 with both
//! 0 and 7 meaning Sunday. When both day fields are restricted a day matches if
//! either does. The `@hourly`, `@daily`, `@weekly`, `@monthly` and `@yearly`
//! shorthands are accepted too.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CronError {
    #[error("cron expression must have 5 fields, found {0}")]
    FieldCount(usize),

    #[error("invalid {field} field: '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("{field} value {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
}

struct FieldBounds {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldBounds = FieldBounds { name: "minute", min: 0, max: 59 };
const HOUR: FieldBounds = FieldBounds { name: "hour", min: 0, max: 23 };
const DAY_OF_MONTH: FieldBounds = FieldBounds { name: "day-of-month", min: 1, max: 31 };
const MONTH: FieldBounds = FieldBounds { name: "month", min: 1, max: 12 };
const DAY_OF_WEEK: FieldBounds = FieldBounds { name: "day-of-week", min: 0, max: 7 };

/// Expressions with no match within this many days (`0 0 30 2 *`) never fire.
const SEARCH_HORIZON_DAYS: i64 = 366 * 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    source: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_wildcard: bool,
    dow_wildcard: bool,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let source = expr.trim();
        let expanded = match source {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other => other,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        let mut days_of_week = parse_field(fields[4], &DAY_OF_WEEK)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: source.to_string(),
            minutes: parse_field(fields[0], &MINUTE)?,
            hours: parse_field(fields[1], &HOUR)?,
            days_of_month: parse_field(fields[2], &DAY_OF_MONTH)?,
            months: parse_field(fields[3], &MONTH)?,
            days_of_week,
            dom_wildcard: fields[2].starts_with('*'),
            dow_wildcard: fields[4].starts_with('*'),
        })
    }

    /// The first matching minute strictly after `after`, or `None` if the
    /// expression can never fire.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let ts = after.timestamp();
        let mut t = DateTime::from_timestamp(ts - ts.rem_euclid(60) + 60, 0)?;
        let horizon = t + Duration::days(SEARCH_HORIZON_DAYS);

        while t <= horizon {
            if !has(self.months, t.month()) {
                t = start_of_next_month(t)?;
                continue;
            }
            if !self.matches_day(t) {
                t = start_of_next_day(t)?;
                continue;
            }
            if !has(self.hours, t.hour()) {
                t += Duration::minutes(i64::from(60 - t.minute()));
                continue;
            }
            if !has(self.minutes, t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }

    fn matches_day(&self, t: DateTime<Utc>) -> bool {
        let dom = has(self.days_of_month, t.day());
        let dow = has(self.days_of_week, t.weekday().num_days_from_sunday());
        if self.dom_wildcard || self.dow_wildcard {
            dom && dow
        } else {
            dom || dow
        }
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn has(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn start_of_next_day(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(t.date_naive().succ_opt()?.and_hms_opt(0, 0, 0)?.and_utc())
}

fn start_of_next_month(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    Some(NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?.and_utc())
}

fn parse_field(raw: &str, bounds: &FieldBounds) -> Result<u64, CronError> {
    let invalid = || CronError::InvalidField {
        field: bounds.name,
        value: raw.to_string(),
    };

    let mut mask = 0u64;
    for item in raw.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid())?;
                if step == 0 {
                    return Err(invalid());
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if range == "*" {
            (bounds.min, bounds.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, bounds, raw)?, parse_value(b, bounds, raw)?)
        } else {
            let value = parse_value(range, bounds, raw)?;
            match step {
                Some(_) => (value, bounds.max),
                None => (value, value),
            }
        };
        if start > end {
            return Err(invalid());
        }

        for value in (start..=end).step_by(step.unwrap_or(1) as usize) {
            mask |= 1u64 << value;
        }
    }
    Ok(mask)
}

fn parse_value(text: &str, bounds: &FieldBounds, raw: &str) -> Result<u32, CronError> {
    let value: u32 = text.parse().map_err(|_| CronError::InvalidField {
        field: bounds.name,
        value: raw.to_string(),
    })?;
    if value < bounds.min || value > bounds.max {
        return Err(CronError::OutOfRange {
            field: bounds.name,
            value,
            min: bounds.min,
            max: bounds.max,
        });
    }
    Ok(value)
}
