// ⚙️ Configuration - every threshold, weight and lexicon lives here
//
// Loaded from TOML. Every section is optional; missing sections fall back to
// the defaults below, so an empty file is a valid configuration.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding `database.path`
pub const DB_PATH_ENV: &str = "LOCAL_PULSE_DB";

// ============================================================================
// TOP-LEVEL CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub resolver: ResolverConfig,
    pub sentiment: SentimentConfig,
    pub keywords: KeywordConfig,
    pub anomaly: AnomalyConfig,
    pub analytics: AnalyticsConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load config from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, else defaults; then apply env overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => AppConfig::default(),
        };

        if let Ok(db_path) = std::env::var(DB_PATH_ENV) {
            config.database.path = PathBuf::from(db_path);
        }

        Ok(config)
    }

    /// Reject inconsistent values before any engine sees them
    pub fn validate(&self) -> Result<()> {
        let r = &self.resolver;
        if !(0.0..=1.0).contains(&r.tau_low) || !(0.0..=1.0).contains(&r.tau_high) {
            bail!("resolver thresholds must be within [0, 1]");
        }
        if r.tau_low >= r.tau_high {
            bail!(
                "resolver.tau_low ({}) must be below resolver.tau_high ({})",
                r.tau_low,
                r.tau_high
            );
        }
        if r.max_radius_m <= 0.0 {
            bail!("resolver.max_radius_m must be positive");
        }
        if r.name_weight < 0.0 || r.address_weight < 0.0 || r.geo_weight < 0.0 {
            bail!("resolver weights must be non-negative");
        }
        if r.name_weight + r.address_weight + r.geo_weight <= 0.0 {
            bail!("resolver weights must not all be zero");
        }

        let s = &self.sentiment;
        if s.rating_weight < 0.0 || s.text_weight < 0.0 || s.rating_weight + s.text_weight <= 0.0 {
            bail!("sentiment weights must be non-negative and not both zero");
        }
        if s.positive_threshold < s.negative_threshold {
            bail!("sentiment.positive_threshold must not be below negative_threshold");
        }
        if !(0.0..=1.0).contains(&s.empty_text_confidence_ceiling) {
            bail!("sentiment.empty_text_confidence_ceiling must be within [0, 1]");
        }
        if s.length_cutoff_tokens == 0 {
            bail!("sentiment.length_cutoff_tokens must be positive");
        }

        if self.keywords.window_days == 0 {
            bail!("keywords.window_days must be positive");
        }

        let a = &self.anomaly;
        if a.baseline_days == 0 || a.recent_days == 0 {
            bail!("anomaly windows must be positive");
        }
        if a.k_sigma <= 0.0 {
            bail!("anomaly.k_sigma must be positive");
        }
        if a.volume_ratio <= 1.0 {
            bail!("anomaly.volume_ratio must be greater than 1.0");
        }
        // an empty window has no rate to compare against
        if a.min_reviews == 0 {
            bail!("anomaly.min_reviews must be at least 1");
        }
        if a.recent_reviews == 0 {
            bail!("anomaly.recent_reviews must be at least 1");
        }
        if a.retention_days == 0 {
            bail!("anomaly.retention_days must be positive");
        }

        if self.analytics.workers == 0 {
            bail!("analytics.workers must be at least 1");
        }

        Ok(())
    }
}

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// Upper bound on waiting for a SQLite lock
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: PathBuf::from("localpulse.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

/// IdentityResolver weights and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub name_weight: f64,
    pub address_weight: f64,
    pub geo_weight: f64,
    pub tau_low: f64,
    pub tau_high: f64,
    /// Geo similarity decays linearly to 0 at this distance
    pub max_radius_m: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            name_weight: 0.5,
            address_weight: 0.3,
            geo_weight: 0.2,
            tau_low: 0.55,
            tau_high: 0.80,
            max_radius_m: 500.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentConfig {
    pub rating_weight: f64,
    pub text_weight: f64,
    pub positive_threshold: f64,
    pub negative_threshold: f64,
    pub length_cutoff_tokens: usize,
    pub empty_text_confidence_ceiling: f64,
    pub positive_terms: BTreeSet<String>,
    pub negative_terms: BTreeSet<String>,
    pub negators: BTreeSet<String>,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        SentimentConfig {
            rating_weight: 0.5,
            text_weight: 0.5,
            positive_threshold: 0.2,
            negative_threshold: -0.2,
            length_cutoff_tokens: 50,
            empty_text_confidence_ceiling: 0.6,
            positive_terms: to_set(DEFAULT_POSITIVE_TERMS),
            negative_terms: to_set(DEFAULT_NEGATIVE_TERMS),
            negators: to_set(DEFAULT_NEGATORS),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    pub stop_words: BTreeSet<String>,
    pub min_token_len: usize,
    pub max_keywords_per_review: usize,
    pub window_days: u32,
    /// Day buckets older than this are pruned by the store
    pub retention_days: u32,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        KeywordConfig {
            stop_words: to_set(DEFAULT_STOP_WORDS),
            min_token_len: 3,
            max_keywords_per_review: 10,
            window_days: 7,
            retention_days: 400,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyWindowMode {
    Days,
    LatestReviews,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub mode: AnomalyWindowMode,
    pub baseline_days: u32,
    pub recent_days: u32,
    /// Used by `latest_reviews` mode
    pub recent_reviews: usize,
    pub k_sigma: f64,
    pub volume_ratio: f64,
    pub min_reviews: usize,
    pub min_std_dev: f64,
    /// Flags detected longer ago than this are pruned by the scan
    pub retention_days: u32,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        AnomalyConfig {
            mode: AnomalyWindowMode::Days,
            baseline_days: 30,
            recent_days: 30,
            recent_reviews: 15,
            k_sigma: 2.0,
            volume_ratio: 2.0,
            min_reviews: 5,
            min_std_dev: 0.1,
            retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub workers: usize,
    /// Examples kept per failure category in batch reports
    pub report_samples: usize,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        AnalyticsConfig {
            workers: 4,
            report_samples: 5,
            retry_attempts: 3,
            retry_base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter directive, overridden by RUST_LOG
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

// ============================================================================
// DEFAULT LEXICONS
// ============================================================================

const DEFAULT_POSITIVE_TERMS: &[&str] = &[
    "amazing", "awesome", "excellent", "great", "good", "delicious", "friendly", "fantastic",
    "perfect", "love", "loved", "best", "wonderful", "tasty", "fresh", "clean", "helpful",
    "recommend", "outstanding", "cozy", "pleasant", "fast", "attentive", "beautiful", "superb",
];

const DEFAULT_NEGATIVE_TERMS: &[&str] = &[
    "terrible", "awful", "bad", "horrible", "rude", "dirty", "slow", "cold", "worst", "disgusting",
    "overpriced", "bland", "stale", "disappointing", "disappointed", "poor", "mediocre", "noisy",
    "unfriendly", "avoid", "gross", "expensive", "broken", "wrong", "hate",
];

const DEFAULT_NEGATORS: &[&str] = &[
    "not", "no", "never", "dont", "didnt", "isnt", "wasnt", "arent", "werent", "cant", "wont",
];

const DEFAULT_STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "of", "at", "by", "for", "with", "about", "to",
    "from", "in", "on", "up", "out", "over", "under", "again", "then", "once", "here", "there",
    "when", "where", "why", "how", "all", "any", "both", "each", "few", "more", "most", "other",
    "some", "such", "only", "own", "same", "so", "than", "too", "very", "can", "will", "just",
    "should", "now", "i", "me", "my", "we", "our", "you", "your", "he", "him", "his", "she",
    "her", "it", "its", "they", "them", "their", "what", "which", "who", "this", "that",
    "these", "those", "am", "is", "are", "was", "were", "be", "been", "being", "have", "has",
    "had", "do", "does", "did", "would", "could", "also", "get", "got", "went", "came", "back",
    "really", "place", "definitely", "highly", "ordered", "not", "no",
];

fn to_set(words: &[&str]) -> BTreeSet<String> {
    words.iter().map(|w| w.to_string()).collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resolver.tau_low, 0.55);
        assert_eq!(config.resolver.tau_high, 0.80);
        assert_eq!(config.anomaly.min_reviews, 5);
        assert_eq!(config.anomaly.retention_days, 90);
        assert_eq!(config.keywords.window_days, 7);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.resolver.name_weight, 0.5);
        assert_eq!(config.sentiment.length_cutoff_tokens, 50);
    }

    #[test]
    fn test_partial_section_override() {
        let config = AppConfig::from_toml_str(
            r#"
            [resolver]
            tau_high = 0.9
            max_radius_m = 250.0

            [anomaly]
            mode = "latest_reviews"
            recent_reviews = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.resolver.tau_high, 0.9);
        assert_eq!(config.resolver.tau_low, 0.55);
        assert_eq!(config.resolver.max_radius_m, 250.0);
        assert_eq!(config.anomaly.mode, AnomalyWindowMode::LatestReviews);
        assert_eq!(config.anomaly.recent_reviews, 10);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let result = AppConfig::from_toml_str(
            r#"
            [resolver]
            tau_low = 0.9
            tau_high = 0.8
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_empty_anomaly_windows() {
        let result = AppConfig::from_toml_str(
            r#"
            [anomaly]
            min_reviews = 0
            "#,
        );
        assert!(result.is_err());

        let mut config = AppConfig::default();
        config.anomaly.recent_reviews = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_workers() {
        let mut config = AppConfig::default();
        config.analytics.workers = 0;
        assert!(config.validate().is_err());
    }
}
