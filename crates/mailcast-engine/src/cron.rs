//! Cron expression parser and next-fire evaluator.
//! Supports the 5-field form: "MIN HOUR DOM MON DOW".
//! Field syntax: *, */N, N, N-M, and comma lists of those.
//! Day-of-week is 0-7 with both 0 and 7 meaning Sunday.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDateTime, TimeZone, Timelike, Utc};

use mailcast_core::error::{MailcastError, Result};

/// Scan horizon for the next matching day. Covers leap-day patterns
/// ("0 0 29 2 *") without looping forever on impossible dates.
const MAX_SCAN_DAYS: i64 = 4 * 366;

/// A parsed 5-field cron expression.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    /// Parse an expression, failing with `InvalidPattern` on malformed input.
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(MailcastError::InvalidPattern(format!(
                "'{expression}' has {} fields, need 5 (MIN HOUR DOM MON DOW)",
                parts.len()
            )));
        }

        let minutes = parse_field(parts[0], 0, 59).map_err(|e| field_err("minute", e))?;
        let hours = parse_field(parts[1], 0, 23).map_err(|e| field_err("hour", e))?;
        let days_of_month = parse_field(parts[2], 1, 31).map_err(|e| field_err("day-of-month", e))?;
        let months = parse_field(parts[3], 1, 12).map_err(|e| field_err("month", e))?;
        // 7 is accepted as an alias for Sunday and normalized to 0.
        let mut days_of_week = parse_field(parts[4], 0, 7).map_err(|e| field_err("day-of-week", e))?;
        for d in days_of_week.iter_mut() {
            if *d == 7 {
                *d = 0;
            }
        }
        days_of_week.sort_unstable();
        days_of_week.dedup();

        Ok(Self {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: parts[2] != "*",
            dow_restricted: parts[4] != "*",
        })
    }

    /// Compute the first fire time strictly after `after`, evaluating the
    /// calendar fields in the given UTC offset. Returns None when no day
    /// within the scan horizon matches.
    pub fn next_after(&self, after: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
        let start = (after + Duration::minutes(1))
            .with_timezone(&offset)
            .with_second(0)?
            .with_nanosecond(0)?;

        for day in 0..MAX_SCAN_DAYS {
            let date = start.date_naive() + Duration::days(day);
            if !self.day_matches(date) {
                continue;
            }
            // Minutes already elapsed only constrain the starting day.
            let (min_hour, min_minute) = if day == 0 {
                (start.hour(), start.minute())
            } else {
                (0, 0)
            };
            for &h in &self.hours {
                if h < min_hour {
                    continue;
                }
                for &m in &self.minutes {
                    if h == min_hour && m < min_minute {
                        continue;
                    }
                    let naive = NaiveDateTime::new(
                        date,
                        chrono::NaiveTime::from_hms_opt(h, m, 0)?,
                    );
                    if let Some(local) = offset.from_local_datetime(&naive).single() {
                        return Some(local.with_timezone(&Utc));
                    }
                }
            }
        }
        None
    }

    /// Standard cron day rule: when both day-of-month and day-of-week are
    /// restricted, a day matches if EITHER does; otherwise the restricted
    /// field (if any) must match.
    fn day_matches(&self, date: chrono::NaiveDate) -> bool {
        if !self.months.contains(&date.month()) {
            return false;
        }
        let dom_ok = self.days_of_month.contains(&date.day());
        let dow_ok = self
            .days_of_week
            .contains(&date.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom_ok || dow_ok,
            (true, false) => dom_ok,
            (false, true) => dow_ok,
            (false, false) => true,
        }
    }
}

/// Validate a pattern, returning a non-empty reason on failure.
pub fn validate(expression: &str) -> std::result::Result<(), String> {
    CronSchedule::parse(expression).map(|_| ()).map_err(|e| e.to_string())
}

fn field_err(name: &str, detail: String) -> MailcastError {
    MailcastError::InvalidPattern(format!("{name} field: {detail}"))
}

/// Parse one cron field into a sorted list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> std::result::Result<Vec<u32>, String> {
    if field.is_empty() {
        return Err("empty".into());
    }
    let mut values = Vec::new();
    for part in field.split(',') {
        values.extend(parse_part(part, min, max)?);
    }
    values.sort_unstable();
    values.dedup();
    Ok(values)
}

fn parse_part(part: &str, min: u32, max: u32) -> std::result::Result<Vec<u32>, String> {
    if part == "*" {
        return Ok((min..=max).collect());
    }

    // */N — every N
    if let Some(step) = part.strip_prefix("*/") {
        let n: u32 = step
            .parse()
            .map_err(|_| format!("bad step '{step}'"))?;
        if n == 0 {
            return Err("step must be > 0".into());
        }
        return Ok((min..=max).step_by(n as usize).collect());
    }

    // N-M range
    if let Some((lo, hi)) = part.split_once('-') {
        let lo: u32 = lo.parse().map_err(|_| format!("bad range start '{lo}'"))?;
        let hi: u32 = hi.parse().map_err(|_| format!("bad range end '{hi}'"))?;
        if lo > hi {
            return Err(format!("range {lo}-{hi} is inverted"));
        }
        if lo < min || hi > max {
            return Err(format!("range {lo}-{hi} outside {min}-{max}"));
        }
        return Ok((lo..=hi).collect());
    }

    // Single number
    let n: u32 = part.parse().map_err(|_| format!("bad value '{part}'"))?;
    if n < min || n > max {
        return Err(format!("value {n} outside {min}-{max}"));
    }
    Ok(vec![n])
}
