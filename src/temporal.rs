// ⏰ Temporal Helpers - explicit time windows and reporting periods
// "Time must be explicit": every window says exactly which instants it holds.
//
// TimeWindow is half-open at the start: (start, end]. Two adjacent windows
// built with `preceding` never share an instant.

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// TIME WINDOW
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Exclusive
    pub start: DateTime<Utc>,
    /// Inclusive
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        TimeWindow { start, end }
    }

    /// (end − days, end]
    pub fn ending_at(end: DateTime<Utc>, days: u32) -> Self {
        TimeWindow {
            start: end - Duration::days(days as i64),
            end,
        }
    }

    /// The `days`-long window that ends where this one starts
    pub fn preceding(&self, days: u32) -> Self {
        TimeWindow::ending_at(self.start, days)
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start < t && t <= self.end
    }

    /// Length in days (fractional), never below `min_days`
    pub fn length_days(&self, min_days: f64) -> f64 {
        let secs = (self.end - self.start).num_seconds() as f64;
        (secs / 86_400.0).max(min_days)
    }
}

// ============================================================================
// PERIOD
// ============================================================================

/// Bucketing granularity for trends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Day,
    Week,
    Month,
}

impl Period {
    /// "2025-03-04", "2025-W10" (ISO week), "2025-03"
    pub fn bucket(&self, t: DateTime<Utc>) -> String {
        match self {
            Period::Day => t.format("%Y-%m-%d").to_string(),
            Period::Week => {
                let week = t.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Period::Month => t.format("%Y-%m").to_string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "day" | "daily" => Ok(Period::Day),
            "week" | "weekly" => Ok(Period::Week),
            "month" | "monthly" => Ok(Period::Month),
            other => Err(format!("unknown period: {}", other)),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_is_half_open() {
        let end = Utc.with_ymd_and_hms(2025, 4, 30, 0, 0, 0).unwrap();
        let recent = TimeWindow::ending_at(end, 30);
        let baseline = recent.preceding(30);

        assert!(recent.contains(end));
        assert!(!recent.contains(recent.start));
        assert!(baseline.contains(recent.start));
        assert_eq!(baseline.end, recent.start);
        assert!((recent.length_days(1.0) - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_period_buckets() {
        let t = Utc.with_ymd_and_hms(2025, 3, 4, 15, 0, 0).unwrap();
        assert_eq!(Period::Day.bucket(t), "2025-03-04");
        assert_eq!(Period::Week.bucket(t), "2025-W10");
        assert_eq!(Period::Month.bucket(t), "2025-03");
        assert_eq!("Weekly".parse::<Period>().unwrap(), Period::Week);
        assert!("hourly".parse::<Period>().is_err());
    }
}
