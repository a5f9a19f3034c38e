//! Cron expression parsing and due-time evaluation.
//!
//! Supports the five classic fields (minute, hour, day-of-month, month,
//! day-of-week) with `*`, `*/N`, comma lists, and single values, plus the
//! `@hourly`, `@daily`, and `@startup` shortcuts. All evaluation is in UTC.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;

use crate::{AppError, Result};

/// Minimum spacing between two runs of the same task.
pub const MIN_RUN_SPACING_SECONDS: i64 = 60;

/// Parsed schedule; each vector holds the sorted set of matching values.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CronSchedule {
    /// Minutes 0–59.
    pub minutes: Vec<u32>,
    /// Hours 0–23.
    pub hours: Vec<u32>,
    /// Days of month 1–31.
    pub days_of_month: Vec<u32>,
    /// Months 1–12.
    pub months: Vec<u32>,
    /// Days of week 0–6, Sunday first.
    pub days_of_week: Vec<u32>,
    /// Runs once at scheduler start instead of on a clock.
    pub startup: bool,
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 6,
};

fn full(spec: &FieldSpec) -> Vec<u32> {
    (spec.min..=spec.max).collect()
}

/// Parse a cron expression or shortcut.
///
/// # Errors
///
/// Returns `AppError::Cron` when the expression does not have exactly five
/// fields, a step is not a positive integer, or a value is out of range.
pub fn parse_cron_expression(expr: &str) -> Result<CronSchedule> {
    let trimmed = expr.trim();
    match trimmed {
        "@startup" => {
            return Ok(CronSchedule {
                startup: true,
                ..CronSchedule::default()
            })
        }
        "@hourly" => {
            return Ok(CronSchedule {
                minutes: vec![0],
                hours: full(&HOUR),
                days_of_month: full(&DAY_OF_MONTH),
                months: full(&MONTH),
                days_of_week: full(&DAY_OF_WEEK),
                startup: false,
            })
        }
        "@daily" => {
            return Ok(CronSchedule {
                minutes: vec![0],
                hours: vec![9],
                days_of_month: full(&DAY_OF_MONTH),
                months: full(&MONTH),
                days_of_week: full(&DAY_OF_WEEK),
                startup: false,
            })
        }
        _ => {}
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(AppError::Cron(format!(
            "expected 5 fields but found {} in '{trimmed}'",
            fields.len()
        )));
    }

    Ok(CronSchedule {
        minutes: parse_field(fields[0], &MINUTE)?,
        hours: parse_field(fields[1], &HOUR)?,
        days_of_month: parse_field(fields[2], &DAY_OF_MONTH)?,
        months: parse_field(fields[3], &MONTH)?,
        days_of_week: parse_field(fields[4], &DAY_OF_WEEK)?,
        startup: false,
    })
}

fn parse_field(raw: &str, spec: &FieldSpec) -> Result<Vec<u32>> {
    if raw == "*" {
        return Ok(full(spec));
    }

    if let Some(step_raw) = raw.strip_prefix("*/") {
        let step = step_raw.parse::<usize>().ok().filter(|s| *s >= 1).ok_or_else(|| {
            AppError::Cron(format!(
                "invalid step value '{step_raw}' in {} field; expected an integer of at least 1",
                spec.name
            ))
        })?;
        return Ok((spec.min..=spec.max).step_by(step).collect());
    }

    let mut values = raw
        .split(',')
        .map(|part| parse_value(part, spec))
        .collect::<Result<Vec<u32>>>()?;
    values.sort_unstable();
    values.dedup();
    Ok(values)
}

fn parse_value(raw: &str, spec: &FieldSpec) -> Result<u32> {
    let value = raw.trim().parse::<u32>().map_err(|_| {
        AppError::Cron(format!("invalid value '{raw}' in {} field", spec.name))
    })?;
    if value < spec.min || value > spec.max {
        return Err(AppError::Cron(format!(
            "{} value {value} out of range {}-{}",
            spec.name, spec.min, spec.max
        )));
    }
    Ok(value)
}

/// Whether a clock-driven schedule should fire at `now`.
///
/// Startup schedules never fire here. A task that ran less than
/// [`MIN_RUN_SPACING_SECONDS`] ago is not due even if the minute matches.
#[must_use]
pub fn is_due(schedule: &CronSchedule, now: DateTime<Utc>, last_run: Option<i64>) -> bool {
    if schedule.startup {
        return false;
    }

    let matches = schedule.minutes.contains(&now.minute())
        && schedule.hours.contains(&now.hour())
        && schedule.days_of_month.contains(&now.day())
        && schedule.months.contains(&now.month())
        && schedule
            .days_of_week
            .contains(&now.weekday().num_days_from_sunday());
    if !matches {
        return false;
    }

    last_run.is_none_or(|last| now.timestamp() - last >= MIN_RUN_SPACING_SECONDS)
}
