// 📊 Batch Reports - what a task did, as counts plus a few sampled failures
//
// Failures are never re-raised out of a batch; they are counted here with up
// to `report_samples` example messages per category.

use crate::resolver::{ResolveOutcome, Resolution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// SAMPLED FAILURES
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureSamples {
    pub count: usize,
    pub samples: Vec<String>,
}

impl FailureSamples {
    pub fn record(&mut self, cap: usize, message: impl Into<String>) {
        self.count += 1;
        if self.samples.len() < cap {
            self.samples.push(message.into());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

// ============================================================================
// INGEST REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub source_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    pub records_fetched: usize,
    pub records_processed: usize,

    pub businesses_created: usize,
    pub businesses_refreshed: usize,
    pub businesses_merged: usize,
    pub businesses_absorbed: usize,
    pub flagged_merges: usize,

    pub reviews_inserted: usize,
    pub reviews_updated: usize,
    pub reviews_unchanged: usize,
    pub reviews_dropped: FailureSamples,

    pub validation_errors: FailureSamples,
    pub queued_ambiguities: FailureSamples,
    pub persistence_errors: FailureSamples,

    pub cancelled: bool,

    #[serde(skip)]
    sample_cap: usize,
}

impl IngestReport {
    pub fn new(source_name: &str, sample_cap: usize, started_at: DateTime<Utc>) -> Self {
        IngestReport {
            source_name: source_name.to_string(),
            started_at,
            finished_at: None,
            records_fetched: 0,
            records_processed: 0,
            businesses_created: 0,
            businesses_refreshed: 0,
            businesses_merged: 0,
            businesses_absorbed: 0,
            flagged_merges: 0,
            reviews_inserted: 0,
            reviews_updated: 0,
            reviews_unchanged: 0,
            reviews_dropped: FailureSamples::default(),
            validation_errors: FailureSamples::default(),
            queued_ambiguities: FailureSamples::default(),
            persistence_errors: FailureSamples::default(),
            cancelled: false,
            sample_cap,
        }
    }

    pub fn record_outcome(&mut self, label: &str, outcome: &ResolveOutcome) {
        self.records_processed += 1;
        match &outcome.resolution {
            Resolution::Created { .. } => self.businesses_created += 1,
            Resolution::Refreshed { .. } => self.businesses_refreshed += 1,
            Resolution::Merged { absorbed, flagged, .. } => {
                self.businesses_merged += 1;
                self.businesses_absorbed += absorbed.len();
                if flagged.is_some() {
                    self.flagged_merges += 1;
                }
            }
            Resolution::FlaggedMerge { .. } => self.flagged_merges += 1,
            Resolution::Queued { tied_with } => {
                self.queued_ambiguities
                    .record(self.sample_cap, format!("{} tied between {:?}", label, tied_with));
            }
        }
        self.reviews_inserted += outcome.reviews.inserted;
        self.reviews_updated += outcome.reviews.updated;
        self.reviews_unchanged += outcome.reviews.unchanged;
    }

    pub fn record_validation(&mut self, message: impl Into<String>) {
        self.validation_errors.record(self.sample_cap, message);
    }

    pub fn record_dropped_review(&mut self, message: impl Into<String>) {
        self.reviews_dropped.record(self.sample_cap, message);
    }

    pub fn record_persistence(&mut self, message: impl Into<String>) {
        self.persistence_errors.record(self.sample_cap, message);
    }

    pub fn summary(&self) -> String {
        format!(
            "Ingest {}: {}/{} records, {} created, {} refreshed, {} merged ({} absorbed), {} flagged, {} queued, {} invalid, {} failed; reviews +{} ~{} ={} ({} dropped){}",
            self.source_name,
            self.records_processed,
            self.records_fetched,
            self.businesses_created,
            self.businesses_refreshed,
            self.businesses_merged,
            self.businesses_absorbed,
            self.flagged_merges,
            self.queued_ambiguities.count,
            self.validation_errors.count,
            self.persistence_errors.count,
            self.reviews_inserted,
            self.reviews_updated,
            self.reviews_unchanged,
            self.reviews_dropped.count,
            if self.cancelled { " [cancelled]" } else { "" }
        )
    }
}

// ============================================================================
// ANALYTICS REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub scope: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    pub businesses_selected: usize,
    pub businesses_processed: usize,
    pub reviews_analyzed: usize,
    pub reviews_unchanged: usize,
    /// Rows that changed under the analysis; picked up by the next run
    pub reviews_stale: usize,
    pub keyword_deltas: usize,
    pub keyword_buckets_pruned: usize,

    pub computation_errors: FailureSamples,
    pub persistence_errors: FailureSamples,

    pub cancelled: bool,

    #[serde(skip)]
    sample_cap: usize,
}

impl AnalyticsReport {
    pub fn new(scope: &str, sample_cap: usize, started_at: DateTime<Utc>) -> Self {
        AnalyticsReport {
            scope: scope.to_string(),
            started_at,
            finished_at: None,
            businesses_selected: 0,
            businesses_processed: 0,
            reviews_analyzed: 0,
            reviews_unchanged: 0,
            reviews_stale: 0,
            keyword_deltas: 0,
            keyword_buckets_pruned: 0,
            computation_errors: FailureSamples::default(),
            persistence_errors: FailureSamples::default(),
            cancelled: false,
            sample_cap,
        }
    }

    pub fn record_computation(&mut self, message: impl Into<String>) {
        self.computation_errors.record(self.sample_cap, message);
    }

    pub fn record_persistence(&mut self, message: impl Into<String>) {
        self.persistence_errors.record(self.sample_cap, message);
    }

    pub fn summary(&self) -> String {
        format!(
            "Analytics ({}): {}/{} businesses, {} reviews analyzed, {} unchanged, {} stale, {} keyword deltas, {} buckets pruned, {} computation errors, {} persistence errors{}",
            self.scope,
            self.businesses_processed,
            self.businesses_selected,
            self.reviews_analyzed,
            self.reviews_unchanged,
            self.reviews_stale,
            self.keyword_deltas,
            self.keyword_buckets_pruned,
            self.computation_errors.count,
            self.persistence_errors.count,
            if self.cancelled { " [cancelled]" } else { "" }
        )
    }
}

// ============================================================================
// ANOMALY SCAN REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyScanReport {
    pub as_of: DateTime<Utc>,
    pub businesses_scanned: usize,
    pub insufficient_data: usize,
    pub without_anomaly: usize,
    pub rating_flags: usize,
    pub volume_flags: usize,
    /// Flags not already recorded for the same window
    pub new_flags: usize,
    /// Flags past anomaly.retention_days, deleted at the end of the scan
    pub flags_pruned: usize,

    pub errors: FailureSamples,
    pub cancelled: bool,

    #[serde(skip)]
    sample_cap: usize,
}

impl AnomalyScanReport {
    pub fn new(as_of: DateTime<Utc>, sample_cap: usize) -> Self {
        AnomalyScanReport {
            as_of,
            businesses_scanned: 0,
            insufficient_data: 0,
            without_anomaly: 0,
            rating_flags: 0,
            volume_flags: 0,
            new_flags: 0,
            flags_pruned: 0,
            errors: FailureSamples::default(),
            cancelled: false,
            sample_cap,
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.record(self.sample_cap, message);
    }

    pub fn summary(&self) -> String {
        format!(
            "Anomaly scan as of {}: {} businesses, {} insufficient data, {} clean, {} rating flags, {} volume flags ({} new), {} pruned, {} errors{}",
            self.as_of.to_rfc3339(),
            self.businesses_scanned,
            self.insufficient_data,
            self.without_anomaly,
            self.rating_flags,
            self.volume_flags,
            self.new_flags,
            self.flags_pruned,
            self.errors.count,
            if self.cancelled { " [cancelled]" } else { "" }
        )
    }
}
