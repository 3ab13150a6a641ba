// 💬 Sentiment Engine - rating + lexicon text score with a confidence estimate
//
// score      = weighted mean of the available sub-scores, clipped to [-1, 1]
// confidence = how much the two signals agree, how one-sided the text is,
//              and how much text there was to read

use crate::config::SentimentConfig;
use crate::entities::{Sentiment, SentimentLabel};
use crate::text::tokenize;
use serde::{Deserialize, Serialize};

/// How far back a negator reaches ("not very good" flips "good")
const NEGATION_REACH: usize = 2;

// ============================================================================
// TEXT SIGNAL
// ============================================================================

/// Lexicon hits in one review text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextSignal {
    pub positive: usize,
    pub negative: usize,
    pub tokens: usize,
}

impl TextSignal {
    /// (pos − neg) / max(1, pos + neg)
    pub fn score(&self) -> f64 {
        let hits = self.positive + self.negative;
        (self.positive as f64 - self.negative as f64) / hits.max(1) as f64
    }

    /// 0 when one-sided (or no hits), 1 when evenly split
    pub fn mixedness(&self) -> f64 {
        let hits = self.positive + self.negative;
        if hits == 0 {
            return 0.0;
        }
        2.0 * self.positive.min(self.negative) as f64 / hits as f64
    }
}

// ============================================================================
// CONFIDENCE BAND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
}

impl ConfidenceBand {
    /// < 0.4 low, < 0.7 medium, else high
    pub fn of(confidence: f64) -> ConfidenceBand {
        if confidence < 0.4 {
            ConfidenceBand::Low
        } else if confidence < 0.7 {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::High
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct SentimentEngine {
    config: SentimentConfig,
}

impl SentimentEngine {
    pub fn new(config: SentimentConfig) -> Self {
        SentimentEngine { config }
    }

    /// (rating − 3) / 2: −1.0 at one star, +1.0 at five
    pub fn rating_score(rating: u8) -> f64 {
        ((rating.clamp(1, 5) as f64) - 3.0) / 2.0
    }

    /// Lexicon hits, or None when there is no text to read
    pub fn text_signal(&self, text: &str) -> Option<TextSignal> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return None;
        }

        let mut signal = TextSignal {
            tokens: tokens.len(),
            ..TextSignal::default()
        };

        for (i, token) in tokens.iter().enumerate() {
            let positive = self.config.positive_terms.contains(token);
            let negative = self.config.negative_terms.contains(token);
            if !positive && !negative {
                continue;
            }

            let negated = tokens[i.saturating_sub(NEGATION_REACH)..i]
                .iter()
                .any(|t| self.config.negators.contains(t));

            match (positive, negated) {
                (true, false) | (false, true) => signal.positive += 1,
                (true, true) | (false, false) => signal.negative += 1,
            }
        }

        Some(signal)
    }

    pub fn analyze(&self, rating: u8, text: &str) -> Sentiment {
        let r = Self::rating_score(rating);
        let signal = self.text_signal(text);

        let (score, confidence) = match signal {
            Some(signal) => {
                let k = signal.score();
                let weights = self.config.rating_weight + self.config.text_weight;
                let score = if weights > 0.0 {
                    (self.config.rating_weight * r + self.config.text_weight * k) / weights
                } else {
                    r
                };

                let agreement = 1.0 - (r - k).abs() / 2.0;
                let cutoff = self.config.length_cutoff_tokens.max(1);
                let richness = signal.tokens.min(cutoff) as f64 / cutoff as f64;
                let confidence =
                    0.2 + 0.5 * agreement * (1.0 - 0.5 * signal.mixedness()) + 0.3 * richness;

                (score, confidence)
            }
            None => {
                let confidence =
                    (0.3 + 0.3 * r.abs()).min(self.config.empty_text_confidence_ceiling);
                (r, confidence)
            }
        };

        let score = score.clamp(-1.0, 1.0);
        Sentiment {
            score,
            label: self.label(score),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn label(&self, score: f64) -> SentimentLabel {
        if score > self.config.positive_threshold {
            SentimentLabel::Positive
        } else if score < self.config.negative_threshold {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }
}

impl Default for SentimentEngine {
    fn default() -> Self {
        SentimentEngine::new(SentimentConfig::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================
