//! Parsed cron expressions.

use chrono::{DateTime, Utc};
use croner::Cron;

use crate::error::{Error, Result};

/// A validated 5-field cron expression (minute, hour, day-of-month, month,
/// day-of-week), or one of the `@hourly`-style nicknames.
#[derive(Clone)]
pub struct Schedule {
    expr: String,
    cron: Cron,
}

impl Schedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let trimmed = expr.trim();
        let invalid = |reason: String| Error::InvalidCron {
            expr: expr.to_string(),
            reason,
        };

        if !trimmed.starts_with('@') {
            let fields = trimmed.split_whitespace().count();
            if fields != 5 {
                return Err(invalid(format!("expected 5 fields, found {fields}")));
            }
        }

        let cron = Cron::new(trimmed)
            .parse()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            expr: trimmed.to_string(),
            cron,
        })
    }

    /// First matching time strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cron.find_next_occurrence(after, false).ok()
    }

    /// The next `count` matching times strictly after `after`.
    pub fn upcoming(&self, after: &DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = *after;
        while times.len() < count {
            let Some(next) = self.next_after(&cursor) else {
                break;
            };
            times.push(next);
            cursor = next;
        }
        times
    }

    pub fn as_str(&self) -> &str {
        &self.expr
    }
}

impl std::fmt::Debug for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Schedule").field(&self.expr).finish()
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, h, m, s).unwrap()
    }

    #[test]
    fn every_minute_fires_on_next_minute_boundary() {
        let schedule = Schedule::parse("* * * * *").unwrap();
        assert_eq!(schedule.next_after(&at(10, 15, 30)), Some(at(10, 16, 0)));
    }

    #[test]
    fn matching_time_in_the_past_is_not_returned() {
        let schedule = Schedule::parse("*/5 * * * *").unwrap();
        assert_eq!(schedule.next_after(&at(10, 15, 0)), Some(at(10, 20, 0)));
    }

    #[test]
    fn upcoming_is_strictly_increasing() {
        let schedule = Schedule::parse("0 */6 * * *").unwrap();
        let times = schedule.upcoming(&at(1, 0, 0), 3);
        assert_eq!(times, vec![at(6, 0, 0), at(12, 0, 0), at(18, 0, 0)]);
    }

    #[test]
    fn rejects_garbage() {
        let err = Schedule::parse("not-a-cron").unwrap_err();
        assert!(matches!(err, Error::InvalidCron { .. }));
    }

    #[test]
    fn rejects_seconds_field() {
        assert!(Schedule::parse("0 * * * * *").is_err());
        assert!(Schedule::parse("* * * *").is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(Schedule::parse("61 * * * *").is_err());
        assert!(Schedule::parse("* 25 * * *").is_err());
    }

    #[test]
    fn accepts_nicknames() {
        let schedule = Schedule::parse("@hourly").unwrap();
        assert_eq!(schedule.next_after(&at(10, 15, 0)), Some(at(11, 0, 0)));
    }
}
