//! Cron next-fire computation.
//!
//! Kept as a pure value type — `(schedule, reference time) → next instant` —
//! decoupled from the tasks that sleep on it, so fire times are testable
//! without a scheduler.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{Result, RuntimeError};

/// A parsed cron start expression.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    /// Parse a cron expression.
    ///
    /// Accepts six-field (with seconds) expressions; a five-field expression
    /// is interpreted with a seconds field of `0`.
    pub fn parse(expression: &str) -> Result<Self> {
        let normalized = if expression.split_whitespace().count() == 5 {
            format!("0 {expression}")
        } else {
            expression.to_string()
        };

        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|e| RuntimeError::InvalidCron {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// The next fire time strictly after `after`, if the schedule has one.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// The expression as supplied at parse time.
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_fire_is_strictly_after_reference() {
        let schedule = CronSchedule::parse("0 0 * * * *").unwrap();
        let on_the_hour = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let next = schedule.next_after(on_the_hour).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_five_field_expression_gets_zero_seconds() {
        let schedule = CronSchedule::parse("30 2 * * *").unwrap();
        let reference = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let next = schedule.next_after(reference).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 1, 2, 30, 0).unwrap());
    }

    #[test]
    fn test_invalid_expression_reports_the_expression() {
        let err = CronSchedule::parse("not a cron").unwrap_err();
        match err {
            RuntimeError::InvalidCron { expression, reason } => {
                assert_eq!(expression, "not a cron");
                assert!(!reason.is_empty());
            }
            other => panic!("expected InvalidCron, got: {other:?}"),
        }
    }

    #[test]
    fn test_expression_is_preserved_verbatim() {
        let schedule = CronSchedule::parse("*/5 * * * *").unwrap();
        assert_eq!(schedule.expression(), "*/5 * * * *");
    }
}
