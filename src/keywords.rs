// 🔑 Keyword Engine - per-review terms and rolling day-bucket tallies
//
// A review contributes its keyword list to the day bucket of its posted_at,
// once per business scope and once globally. Re-processing a review applies
// only the difference (retract old terms, add new ones), so tallies never need
// a full-history rebuild and deltas from different businesses commute.

use crate::config::KeywordConfig;
use crate::text::tokenize;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// TYPES
// ============================================================================

/// Which tally a count belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeywordScope {
    Global,
    Business(String),
}

impl KeywordScope {
    /// Storage key: "global" or "business:<id>"
    pub fn key(&self) -> String {
        match self {
            KeywordScope::Global => "global".to_string(),
            KeywordScope::Business(id) => format!("business:{}", id),
        }
    }
}

/// One change to one (day, term) bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordDelta {
    pub day: NaiveDate,
    pub term: String,
    pub change: i64,
    /// Candidate for the bucket's first-observed timestamp
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingKeyword {
    pub term: String,
    pub count: i64,
    pub first_seen: DateTime<Utc>,
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct KeywordEngine {
    config: KeywordConfig,
}

impl KeywordEngine {
    pub fn new(config: KeywordConfig) -> Self {
        KeywordEngine { config }
    }

    pub fn window_days(&self) -> u32 {
        self.config.window_days
    }

    fn keep(&self, token: &str) -> bool {
        token.chars().count() >= self.config.min_token_len
            && !token.chars().all(|c| c.is_ascii_digit())
            && !self.config.stop_words.contains(token)
    }

    /// Unigrams and bigrams of a review, most frequent first, ties by first
    /// position, capped at `max_keywords_per_review`.
    pub fn extract(&self, text: &str) -> Vec<String> {
        let tokens = tokenize(text);
        let kept: Vec<bool> = tokens.iter().map(|t| self.keep(t)).collect();

        // term → (frequency, first position)
        let mut stats: HashMap<String, (usize, usize)> = HashMap::new();
        let mut bump = |term: String, position: usize| {
            let entry = stats.entry(term).or_insert((0, position));
            entry.0 += 1;
        };

        for (i, token) in tokens.iter().enumerate() {
            if !kept[i] {
                continue;
            }
            bump(token.clone(), i);
            if i + 1 < tokens.len() && kept[i + 1] {
                bump(format!("{} {}", token, tokens[i + 1]), i);
            }
        }

        let mut ranked: Vec<(String, usize, usize)> = stats
            .into_iter()
            .map(|(term, (freq, pos))| (term, freq, pos))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| a.2.cmp(&b.2))
                // unigram before the bigram that starts at the same position
                .then_with(|| a.0.len().cmp(&b.0.len()))
        });

        ranked
            .into_iter()
            .take(self.config.max_keywords_per_review)
            .map(|(term, _, _)| term)
            .collect()
    }

    /// Net change between a review's stored contribution and its new one
    pub fn diff(
        previous: Option<(&[String], DateTime<Utc>)>,
        current: (&[String], DateTime<Utc>),
    ) -> Vec<KeywordDelta> {
        let mut net: BTreeMap<(NaiveDate, String), (i64, DateTime<Utc>)> = BTreeMap::new();

        if let Some((terms, posted_at)) = previous {
            for term in dedup(terms) {
                let entry = net
                    .entry((posted_at.date_naive(), term.to_string()))
                    .or_insert((0, posted_at));
                entry.0 -= 1;
            }
        }

        let (terms, posted_at) = current;
        for term in dedup(terms) {
            let entry = net
                .entry((posted_at.date_naive(), term.to_string()))
                .or_insert((0, posted_at));
            entry.0 += 1;
            entry.1 = entry.1.min(posted_at);
        }

        net.into_iter()
            .filter(|(_, (change, _))| *change != 0)
            .map(|((day, term), (change, observed_at))| KeywordDelta {
                day,
                term,
                change,
                observed_at,
            })
            .collect()
    }
}

impl Default for KeywordEngine {
    fn default() -> Self {
        KeywordEngine::new(KeywordConfig::default())
    }
}

fn dedup(terms: &[String]) -> Vec<&str> {
    let mut seen: Vec<&str> = terms.iter().map(|t| t.as_str()).collect();
    seen.sort_unstable();
    seen.dedup();
    seen
}

/// Inclusive day range of a trailing window ending at `as_of`
pub fn window_bounds(as_of: DateTime<Utc>, days: u32) -> (NaiveDate, NaiveDate) {
    let end = as_of.date_naive();
    let start = end - Duration::days(days.max(1) as i64 - 1);
    (start, end)
}

/// Frequency desc, then earliest first_seen, then term
pub fn rank(mut terms: Vec<TrendingKeyword>, limit: usize) -> Vec<TrendingKeyword> {
    terms.retain(|t| t.count > 0);
    terms.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.first_seen.cmp(&b.first_seen))
            .then_with(|| a.term.cmp(&b.term))
    });
    terms.truncate(limit);
    terms
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_extract_orders_by_frequency_then_position() {
        let engine = KeywordEngine::default();
        let keywords = engine.extract("Great pizza. The pizza crust was great, pizza again!");

        assert_eq!(keywords[0], "pizza");
        assert_eq!(keywords[1], "great");
        assert!(keywords.contains(&"great pizza".to_string()));
        assert!(keywords.contains(&"pizza crust".to_string()));
    }

    #[test]
    fn test_no_stop_words_in_output() {
        let engine = KeywordEngine::default();
        let config = KeywordConfig::default();
        let keywords = engine.extract(
            "We really went back to the place and ordered the same thing, it was not bad at all",
        );

        for keyword in &keywords {
            for token in keyword.split(' ') {
                assert!(!config.stop_words.contains(token), "stop word {} leaked", token);
                assert!(token.len() >= 3);
            }
        }
    }

    #[test]
    fn test_extract_caps_and_handles_empty() {
        let engine = KeywordEngine::default();
        assert!(engine.extract("").is_empty());

        let long = "alpha bravo charlie delta echo foxtrot golf hotel india juliet kilo lima";
        assert_eq!(engine.extract(long).len(), 10);
    }

    #[test]
    fn test_diff_is_idempotent_for_unchanged_review() {
        let terms = vec!["pizza".to_string(), "crust".to_string()];
        let deltas = KeywordEngine::diff(Some((&terms, at(3))), (&terms, at(3)));
        assert!(deltas.is_empty());
    }

    #[test]
    fn test_diff_retracts_and_adds() {
        let old = vec!["pizza".to_string(), "cold".to_string()];
        let new = vec!["pizza".to_string(), "hot".to_string()];

        let deltas = KeywordEngine::diff(Some((&old, at(3))), (&new, at(3)));
        let changes: Vec<(&str, i64)> = deltas.iter().map(|d| (d.term.as_str(), d.change)).collect();
        assert_eq!(changes, vec![("cold", -1), ("hot", 1)]);

        // First ingest: everything is an addition
        let fresh = KeywordEngine::diff(None, (&new, at(4)));
        assert!(fresh.iter().all(|d| d.change == 1 && d.day == at(4).date_naive()));
    }

    #[test]
    fn test_rank_tie_breaks() {
        let terms = vec![
            TrendingKeyword { term: "tacos".into(), count: 3, first_seen: at(2) },
            TrendingKeyword { term: "salsa".into(), count: 3, first_seen: at(1) },
            TrendingKeyword { term: "churros".into(), count: 3, first_seen: at(1) },
            TrendingKeyword { term: "queso".into(), count: 5, first_seen: at(5) },
            TrendingKeyword { term: "gone".into(), count: 0, first_seen: at(1) },
        ];

        let ranked: Vec<String> = rank(terms, 10).into_iter().map(|t| t.term).collect();
        assert_eq!(ranked, vec!["queso", "churros", "salsa", "tacos"]);
    }

    #[test]
    fn test_window_bounds() {
        let (start, end) = window_bounds(at(10), 7);
        assert_eq!(end, at(10).date_naive());
        assert_eq!(start, at(4).date_naive());
    }
}
