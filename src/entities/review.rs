// 📝 Review Entity - one customer review attached to a business
//
// Identity is (business_id, source, external_review_id): re-ingesting the same
// external review updates the row in place instead of duplicating it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// ============================================================================
// SENTIMENT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }

    pub fn from_str_lossy(s: &str) -> SentimentLabel {
        match s {
            "positive" => SentimentLabel::Positive,
            "negative" => SentimentLabel::Negative,
            _ => SentimentLabel::Neutral,
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the sentiment engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    /// In [-1.0, 1.0]
    pub score: f64,
    pub label: SentimentLabel,
    /// In [0.0, 1.0]
    pub confidence: f64,
}

// ============================================================================
// CANDIDATE REVIEW (normalized, not yet attached to a business)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateReview {
    pub external_review_id: String,
    pub rating: u8,
    pub text: String,
    pub author: String,
    pub posted_at: DateTime<Utc>,
    pub relative_time_desc: Option<String>,
    pub helpful_votes: Option<u32>,

    /// posted_at came from the record; false when it was filled from the fetch time
    #[serde(default)]
    pub posted_at_declared: bool,
}

/// Deterministic review id for sources that do not supply one.
///
/// Only a date the source declared takes part; a filled-in date changes
/// from batch to batch and would mint a new id on every re-ingest.
pub fn derive_review_id(
    source: &str,
    author: &str,
    posted_at: Option<&DateTime<Utc>>,
    text: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"|");
    hasher.update(author.as_bytes());
    hasher.update(b"|");
    if let Some(posted_at) = posted_at {
        hasher.update(posted_at.to_rfc3339().as_bytes());
    }
    hasher.update(b"|");
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// REVIEW ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub business_id: String,
    pub source: String,
    pub external_review_id: String,
    /// 1..=5
    pub rating: u8,
    pub text: String,
    pub author: String,
    pub posted_at: DateTime<Utc>,
    pub relative_time_desc: Option<String>,
    pub helpful_votes: Option<u32>,

    // Derived (written by the analytics engines)
    pub sentiment: Option<Sentiment>,
    pub keywords: Vec<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Review {
    /// Attach a candidate review to its resolved business
    pub fn from_candidate(business_id: &str, source: &str, candidate: &CandidateReview) -> Self {
        Review {
            id: uuid::Uuid::new_v4().to_string(),
            business_id: business_id.to_string(),
            source: source.to_string(),
            external_review_id: candidate.external_review_id.clone(),
            rating: candidate.rating,
            text: candidate.text.clone(),
            author: candidate.author.clone(),
            posted_at: candidate.posted_at,
            relative_time_desc: candidate.relative_time_desc.clone(),
            helpful_votes: candidate.helpful_votes,
            sentiment: None,
            keywords: Vec::new(),
            processed_at: None,
        }
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_derived_id_is_deterministic() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let a = derive_review_id("scrape", "Ana", Some(&at), "Great tacos");
        let b = derive_review_id("scrape", "Ana", Some(&at), "Great tacos");
        let c = derive_review_id("scrape", "Ana", Some(&at), "Great tacos!");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_undated_id_ignores_fill_in_date() {
        let undated = derive_review_id("scrape", "Ana", None, "Great tacos");
        let dated = derive_review_id(
            "scrape",
            "Ana",
            Some(&Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()),
            "Great tacos",
        );

        assert_eq!(undated, derive_review_id("scrape", "Ana", None, "Great tacos"));
        assert_ne!(undated, dated);
    }

    #[test]
    fn test_from_candidate_starts_unprocessed() {
        let candidate = CandidateReview {
            external_review_id: "r1".to_string(),
            rating: 4,
            text: "   ".to_string(),
            author: "Bo".to_string(),
            posted_at: Utc::now(),
            relative_time_desc: Some("a week ago".to_string()),
            helpful_votes: None,
            posted_at_declared: true,
        };

        let review = Review::from_candidate("biz-1", "google_places", &candidate);
        assert_eq!(review.business_id, "biz-1");
        assert!(!review.has_text());
        assert!(!review.is_processed());
        assert!(review.keywords.is_empty());
    }

    #[test]
    fn test_label_names() {
        assert_eq!(SentimentLabel::from_str_lossy("positive"), SentimentLabel::Positive);
        assert_eq!(SentimentLabel::from_str_lossy("??"), SentimentLabel::Neutral);
        assert_eq!(SentimentLabel::Negative.to_string(), "negative");
    }
}
