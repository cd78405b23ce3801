// Cron schedule evaluation for job definitions
//
// Expressions use second precision (six or seven fields, seconds first).

use crate::config::validate_cron;
use crate::errors::ValidationError;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// A job's parsed cron expression
#[derive(Debug, Clone)]
pub struct JobSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl JobSchedule {
    pub fn parse(expression: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            expression: expression.to_string(),
            schedule: validate_cron(expression)?,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`; None once the schedule is exhausted
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Next fire time after `now` and how long to wait for it
    pub fn next_fire(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, Duration)> {
        let next = self.next_after(now)?;
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        Some((next, wait))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Timelike};

    #[test]
    fn test_parse_valid_cron_expression() {
        let schedule = JobSchedule::parse("0 0 12 * * * *").unwrap();
        assert_eq!(schedule.expression(), "0 0 12 * * * *");
    }

    #[test]
    fn test_parse_invalid_cron_expression() {
        assert!(matches!(
            JobSchedule::parse("invalid"),
            Err(ValidationError::InvalidCronExpression { .. })
        ));
    }

    #[test]
    fn test_next_after_is_strictly_later() {
        let schedule = JobSchedule::parse("0 */5 * * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 0).unwrap();
        let next = schedule.next_after(at).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 10, 10, 0).unwrap());
    }

    #[test]
    fn test_next_fire_reports_wait() {
        let schedule = JobSchedule::parse("30 * * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 10).unwrap();
        let (next, wait) = schedule.next_fire(now).unwrap();
        assert_eq!(next.second(), 30);
        assert_eq!(wait, Duration::from_secs(20));
    }

    #[test]
    fn test_schedule_with_past_year_is_exhausted() {
        let schedule = JobSchedule::parse("0 0 0 1 1 * 2020").unwrap();
        let now = Utc::now() + ChronoDuration::days(1);
        assert!(schedule.next_fire(now).is_none());
    }
}
