//! Cron expressions for recurring schedules.
//!
//! Accepts the classic 5-field form (`minute hour day-of-month month
//! day-of-week`) and the `@hourly`/`@daily`/... macros. Parsing and occurrence
//! search are delegated to the `cron` crate, which expects a leading seconds
//! field and numbers days of the week 1-7 from Sunday, so expressions are
//! normalized before they are handed over.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("expected 5 fields (minute hour day-of-month month day-of-week), got {found} in '{expression}'")]
    FieldCount { expression: String, found: usize },

    #[error("'{expression}': {reason}")]
    Syntax { expression: String, reason: String },

    #[error("'{0}' has no upcoming occurrence")]
    NoUpcoming(String),
}

const WEEKDAYS: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// A parsed, validated cron expression.
///
/// When both day-of-month and day-of-week are restricted, a day matches if
/// either field matches (classic cron). The `cron` crate requires both, so
/// such expressions are split into two schedules and the earlier occurrence
/// wins.
#[derive(Clone)]
pub struct CronExpression {
    source: String,
    schedule: ::cron::Schedule,
    /// Day-of-week half of an expression restricting both day fields.
    by_weekday: Option<::cron::Schedule>,
}

impl CronExpression {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let trimmed = expression.trim();
        if trimmed.starts_with('@') {
            return Ok(Self {
                source: trimmed.to_string(),
                schedule: compile(expression, trimmed)?,
                by_weekday: None,
            });
        }

        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        let [minute, hour, day_of_month, month, day_of_week] = fields[..] else {
            return Err(CronError::FieldCount {
                expression: expression.to_string(),
                found: fields.len(),
            });
        };
        let day_of_week = normalize_day_of_week(day_of_week);

        let (schedule, by_weekday) = if is_restricted(day_of_month) && is_restricted(&day_of_week)
        {
            let by_day = compile(
                expression,
                &format!("0 {minute} {hour} {day_of_month} {month} *"),
            )?;
            let by_weekday = compile(
                expression,
                &format!("0 {minute} {hour} * {month} {day_of_week}"),
            )?;
            (by_day, Some(by_weekday))
        } else {
            let schedule = compile(
                expression,
                &format!("0 {minute} {hour} {day_of_month} {month} {day_of_week}"),
            )?;
            (schedule, None)
        };

        Ok(Self {
            source: trimmed.to_string(),
            schedule,
            by_weekday,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let next = self.schedule.after(&after).next();
        let Some(by_weekday) = &self.by_weekday else {
            return next;
        };
        match (next, by_weekday.after(&after).next()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

fn compile(expression: &str, normalized: &str) -> Result<::cron::Schedule, CronError> {
    ::cron::Schedule::from_str(normalized).map_err(|e| CronError::Syntax {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// `*`, `*/n` and `?` leave a day field unrestricted.
fn is_restricted(field: &str) -> bool {
    !(field.starts_with('*') || field == "?")
}

impl fmt::Debug for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpression").field(&self.source).finish()
    }
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Result of [`parse_cron_expression`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    pub expression: String,
    pub next_run_time: DateTime<Utc>,
}

/// Parse `expression` and compute its next run time from the current time.
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, CronError> {
    parse_cron_expression_at(expression, Utc::now())
}

/// Same as [`parse_cron_expression`] with an explicit reference time.
pub fn parse_cron_expression_at(
    expression: &str,
    now: DateTime<Utc>,
) -> Result<CronSchedule, CronError> {
    let parsed = CronExpression::parse(expression)?;
    let next_run_time = parsed
        .next_after(now)
        .ok_or_else(|| CronError::NoUpcoming(expression.to_string()))?;
    Ok(CronSchedule {
        expression: parsed.source,
        next_run_time,
    })
}

/// Rewrites numeric days of week (0-7, Sunday = 0 or 7) as names.
fn normalize_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            let range = match range.split_once('-') {
                Some((start, "7")) => match weekday_name(start) {
                    // `5-7` would wrap past SAT, so spell Sunday separately.
                    Some(start) if step.is_none() => format!("{start}-SAT,SUN"),
                    Some(start) => format!("{start}-SAT"),
                    None => range.to_string(),
                },
                Some((start, end)) => format!(
                    "{}-{}",
                    weekday_name(start).unwrap_or(start),
                    weekday_name(end).unwrap_or(end)
                ),
                None => weekday_name(range).unwrap_or(range).to_string(),
            };
            match step {
                Some(step) => format!("{range}/{step}"),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn weekday_name(value: &str) -> Option<&'static str> {
    value
        .parse::<usize>()
        .ok()
        .and_then(|n| WEEKDAYS.get(n).copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};
    use rstest::rstest;

    #[test]
    fn top_of_the_hour_is_strictly_in_the_future() {
        let now = Utc::now();
        let parsed = parse_cron_expression("0 * * * *").unwrap();

        assert_eq!(parsed.next_run_time.minute(), 0);
        assert!(parsed.next_run_time > now);
    }

    #[test]
    fn next_after_steps_to_the_following_match() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let parsed = parse_cron_expression_at("0 * * * *", now).unwrap();

        assert_eq!(parsed.next_run_time, Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap());
    }

    #[rstest]
    #[case::word("invalid")]
    #[case::too_few("* * * *")]
    #[case::too_many("0 0 * * * *")]
    #[case::bad_minute("61 * * * *")]
    #[case::empty("")]
    fn malformed_expressions_fail(#[case] expression: &str) {
        assert!(parse_cron_expression(expression).is_err());
    }

    #[test]
    fn sunday_can_be_zero_or_seven() {
        // 2024-01-01 is a Monday.
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        for expression in ["30 9 * * 0", "30 9 * * 7"] {
            let next = parse_cron_expression_at(expression, now).unwrap().next_run_time;
            assert_eq!(next.weekday(), Weekday::Sun, "{expression}");
            assert_eq!((next.hour(), next.minute()), (9, 30));
        }
    }

    #[test]
    fn weekday_ranges_use_standard_numbering() {
        // Saturday 2024-01-06 -> next weekday run is Monday.
        let now = Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap();
        let next = parse_cron_expression_at("0 8 * * 1-5", now).unwrap().next_run_time;

        assert_eq!(next.weekday(), Weekday::Mon);
    }

    #[test]
    fn macros_are_accepted() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 15, 0).unwrap();
        let next = parse_cron_expression_at("@hourly", now).unwrap().next_run_time;

        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap());
    }

    #[rstest]
    // 2024-01-01 is a Monday; the first Friday is the 5th.
    #[case::friday_or_13th("0 0 13 * 5", (2024, 1, 5))]
    #[case::twentieth_or_monday("0 9 20 * MON", (2024, 1, 1))]
    #[case::day_of_month_first("0 9 2 * FRI", (2024, 1, 2))]
    #[case::month_still_applies("0 0 13 3 5", (2024, 3, 1))]
    fn restricted_day_fields_match_either(#[case] expression: &str, #[case] ymd: (i32, u32, u32)) {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = parse_cron_expression_at(expression, now).unwrap().next_run_time;

        assert_eq!((next.year(), next.month(), next.day()), ymd);
    }

    #[test]
    fn single_restricted_day_field_is_unchanged() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let monthly = parse_cron_expression_at("0 0 13 * *", now).unwrap().next_run_time;
        assert_eq!(monthly, Utc.with_ymd_and_hms(2024, 1, 13, 0, 0, 0).unwrap());

        let every_other_day = parse_cron_expression_at("0 0 */2 * 5", now).unwrap().next_run_time;
        assert_eq!(every_other_day, Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap());
    }

    #[test]
    fn normalizes_numeric_days() {
        assert_eq!(normalize_day_of_week("*"), "*");
        assert_eq!(normalize_day_of_week("0,3"), "SUN,WED");
        assert_eq!(normalize_day_of_week("1-5"), "MON-FRI");
        assert_eq!(normalize_day_of_week("5-7"), "FRI-SAT,SUN");
        assert_eq!(normalize_day_of_week("MON"), "MON");
    }
}
