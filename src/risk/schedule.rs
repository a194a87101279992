use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};

use crate::error::{Result, TradeflowError};

/// Trading-day boundary at a fixed UTC time of day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyResetSchedule {
    reset_time: NaiveTime,
}

impl DailyResetSchedule {
    pub fn new(reset_time: NaiveTime) -> Self {
        Self { reset_time }
    }

    /// Parse "HH:MM" or "HH:MM:SS"
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let time = NaiveTime::parse_from_str(raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
            .map_err(|e| {
                TradeflowError::Validation(format!("invalid daily reset time '{}': {}", raw, e))
            })?;
        Ok(Self::new(time))
    }

    pub fn reset_time(&self) -> NaiveTime {
        self.reset_time
    }

    /// The trading day `now` belongs to. A day starts at the reset time.
    pub fn trading_day(&self, now: DateTime<Utc>) -> NaiveDate {
        let offset = Duration::seconds(i64::from(self.reset_time.num_seconds_from_midnight()));
        (now - offset).date_naive()
    }
}

impl Default for DailyResetSchedule {
    fn default() -> Self {
        Self::new(NaiveTime::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_midnight_schedule() {
        let schedule = DailyResetSchedule::default();
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        assert_eq!(schedule.trading_day(ts), NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
    }

    #[test]
    fn test_new_york_close_schedule() {
        let schedule = DailyResetSchedule::parse("22:00").unwrap();
        let before = Utc.with_ymd_and_hms(2024, 3, 5, 21, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 5, 22, 0, 0).unwrap();
        assert_eq!(schedule.trading_day(before), NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_eq!(schedule.trading_day(after), NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(DailyResetSchedule::parse("25:00").is_err());
        assert!(DailyResetSchedule::parse("noon").is_err());
        assert!(DailyResetSchedule::parse("17:30:15").is_ok());
    }
}
