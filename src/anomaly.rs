// 📈 Anomaly Detector - rating and volume shifts between two windows
//
// Baseline window vs recent window over one business's rating series:
//   rating: |recent mean − baseline mean| > k·σ   (σ floored at min_std_dev)
//   volume: per-day review rate differs by more than volume_ratio, either way
// Too few reviews in either window → InsufficientData, never NoAnomaly.

use crate::config::{AnomalyConfig, AnomalyWindowMode};
use crate::temporal::TimeWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingPoint {
    pub posted_at: DateTime<Utc>,
    pub rating: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Rating,
    Volume,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::Rating => "rating",
            AnomalyKind::Volume => "volume",
        }
    }

    pub fn from_str_lossy(s: &str) -> AnomalyKind {
        if s == "volume" {
            AnomalyKind::Volume
        } else {
            AnomalyKind::Rating
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increase,
    Decrease,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Increase => "increase",
            Direction::Decrease => "decrease",
        }
    }

    pub fn from_str_lossy(s: &str) -> Direction {
        if s == "increase" {
            Direction::Increase
        } else {
            Direction::Decrease
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    pub fn from_str_lossy(s: &str) -> Severity {
        if s == "high" {
            Severity::High
        } else {
            Severity::Medium
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    pub business_id: String,
    pub kind: AnomalyKind,
    pub direction: Direction,
    pub severity: Severity,

    /// Mean rating (rating) or reviews per day (volume)
    pub baseline_value: f64,
    pub recent_value: f64,

    /// |Δ| in stars (rating) or the rate ratio (volume)
    pub magnitude: f64,
    pub threshold: f64,

    pub baseline_count: usize,
    pub recent_count: usize,
    pub recent_window: TimeWindow,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckOutcome {
    InsufficientData {
        baseline_count: usize,
        recent_count: usize,
    },
    NoAnomaly,
    Anomaly(AnomalyFlag),
}

impl CheckOutcome {
    pub fn flag(&self) -> Option<&AnomalyFlag> {
        match self {
            CheckOutcome::Anomaly(flag) => Some(flag),
            _ => None,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, CheckOutcome::InsufficientData { .. })
    }
}

/// Both checks for one business at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAssessment {
    pub business_id: String,
    pub rating: CheckOutcome,
    pub volume: CheckOutcome,
}

impl AnomalyAssessment {
    pub fn flags(&self) -> Vec<AnomalyFlag> {
        [&self.rating, &self.volume]
            .into_iter()
            .filter_map(|o| o.flag().cloned())
            .collect()
    }
}

// ============================================================================
// DETECTOR
// ============================================================================

pub struct AnomalyDetector {
    config: AnomalyConfig,
}

struct Windows<'a> {
    baseline: TimeWindow,
    recent: TimeWindow,
    baseline_points: Vec<&'a RatingPoint>,
    recent_points: Vec<&'a RatingPoint>,
}

impl Windows<'_> {
    fn insufficient(&self) -> CheckOutcome {
        CheckOutcome::InsufficientData {
            baseline_count: self.baseline_points.len(),
            recent_count: self.recent_points.len(),
        }
    }
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        AnomalyDetector { config }
    }

    /// Assess one business's series as of `as_of`. Points after `as_of` are
    /// ignored, so a scan is repeatable for a fixed instant.
    pub fn assess(
        &self,
        business_id: &str,
        series: &[RatingPoint],
        as_of: DateTime<Utc>,
    ) -> AnomalyAssessment {
        let mut points: Vec<&RatingPoint> = series.iter().filter(|p| p.posted_at <= as_of).collect();
        points.sort_by_key(|p| p.posted_at);

        let windows = match self.config.mode {
            AnomalyWindowMode::Days => self.day_windows(&points, as_of),
            AnomalyWindowMode::LatestReviews => self.latest_windows(&points, as_of),
        };

        let baseline_count = windows.baseline_points.len();
        let recent_count = windows.recent_points.len();

        if baseline_count < self.config.min_reviews || recent_count < self.config.min_reviews {
            let insufficient = CheckOutcome::InsufficientData {
                baseline_count,
                recent_count,
            };
            return AnomalyAssessment {
                business_id: business_id.to_string(),
                rating: insufficient.clone(),
                volume: insufficient,
            };
        }

        AnomalyAssessment {
            business_id: business_id.to_string(),
            rating: self.rating_check(business_id, &windows, as_of),
            volume: self.volume_check(business_id, &windows, as_of),
        }
    }

    fn day_windows<'a>(&self, points: &[&'a RatingPoint], as_of: DateTime<Utc>) -> Windows<'a> {
        let recent = TimeWindow::ending_at(as_of, self.config.recent_days);
        let baseline = recent.preceding(self.config.baseline_days);

        Windows {
            baseline,
            recent,
            baseline_points: points.iter().copied().filter(|p| baseline.contains(p.posted_at)).collect(),
            recent_points: points.iter().copied().filter(|p| recent.contains(p.posted_at)).collect(),
        }
    }

    fn latest_windows<'a>(&self, points: &[&'a RatingPoint], as_of: DateTime<Utc>) -> Windows<'a> {
        let split = points.len().saturating_sub(self.config.recent_reviews);
        let recent_points: Vec<&RatingPoint> = points[split..].to_vec();

        let Some(first_recent) = recent_points.first().map(|p| p.posted_at) else {
            let recent = TimeWindow::ending_at(as_of, self.config.recent_days);
            return Windows {
                baseline: recent.preceding(self.config.baseline_days),
                recent,
                baseline_points: Vec::new(),
                recent_points,
            };
        };

        // Baseline ends just before the first recent review
        let baseline = TimeWindow::ending_at(first_recent, self.config.baseline_days);
        let baseline_points = points[..split]
            .iter()
            .copied()
            .filter(|p| p.posted_at > baseline.start)
            .collect();

        Windows {
            baseline,
            recent: TimeWindow::new(first_recent, as_of),
            baseline_points,
            recent_points,
        }
    }

    fn rating_check(&self, business_id: &str, w: &Windows, as_of: DateTime<Utc>) -> CheckOutcome {
        if w.baseline_points.is_empty() || w.recent_points.is_empty() {
            return w.insufficient();
        }

        let (baseline_mean, baseline_std) = mean_std(&w.baseline_points);
        let (recent_mean, _) = mean_std(&w.recent_points);

        let sigma = baseline_std.max(self.config.min_std_dev);
        let threshold = self.config.k_sigma * sigma;
        let delta = recent_mean - baseline_mean;

        if delta.abs() <= threshold {
            return CheckOutcome::NoAnomaly;
        }

        CheckOutcome::Anomaly(AnomalyFlag {
            business_id: business_id.to_string(),
            kind: AnomalyKind::Rating,
            direction: if delta > 0.0 { Direction::Increase } else { Direction::Decrease },
            severity: if delta.abs() >= 1.0 { Severity::High } else { Severity::Medium },
            baseline_value: baseline_mean,
            recent_value: recent_mean,
            magnitude: delta.abs(),
            threshold,
            baseline_count: w.baseline_points.len(),
            recent_count: w.recent_points.len(),
            recent_window: w.recent,
            detected_at: as_of,
        })
    }

    fn volume_check(&self, business_id: &str, w: &Windows, as_of: DateTime<Utc>) -> CheckOutcome {
        if w.baseline_points.is_empty() || w.recent_points.is_empty() {
            return w.insufficient();
        }

        let baseline_rate = w.baseline_points.len() as f64 / w.baseline.length_days(1.0);
        let recent_rate = w.recent_points.len() as f64 / w.recent.length_days(1.0);

        let ratio = if recent_rate >= baseline_rate {
            recent_rate / baseline_rate
        } else {
            baseline_rate / recent_rate
        };

        if ratio <= self.config.volume_ratio {
            return CheckOutcome::NoAnomaly;
        }

        CheckOutcome::Anomaly(AnomalyFlag {
            business_id: business_id.to_string(),
            kind: AnomalyKind::Volume,
            direction: if recent_rate > baseline_rate { Direction::Increase } else { Direction::Decrease },
            severity: if ratio >= 2.0 * self.config.volume_ratio { Severity::High } else { Severity::Medium },
            baseline_value: baseline_rate,
            recent_value: recent_rate,
            magnitude: ratio,
            threshold: self.config.volume_ratio,
            baseline_count: w.baseline_points.len(),
            recent_count: w.recent_points.len(),
            recent_window: w.recent,
            detected_at: as_of,
        })
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        AnomalyDetector::new(AnomalyConfig::default())
    }
}

/// Mean and population standard deviation
fn mean_std(points: &[&RatingPoint]) -> (f64, f64) {
    if points.is_empty() {
        return (0.0, 0.0);
    }
    let n = points.len() as f64;
    let mean = points.iter().map(|p| p.rating as f64).sum::<f64>() / n;
    let variance = points
        .iter()
        .map(|p| (p.rating as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}

// ============================================================================
// TESTS
// ============================================================================
