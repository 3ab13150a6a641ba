// ⚙️ Tasks - the three externally triggered jobs
//
//   ingest_batch         adapter → normalize → resolve → persist
//   recompute_analytics  sentiment + keywords for a scope of businesses
//   anomaly_scan         rating/volume shifts for every business
//
// Every task is idempotent and keeps whatever it finished before a
// cancellation or a failure. Cancellation is checked between records
// (ingest) or between businesses (analytics, anomaly scan).

use crate::anomaly::{AnomalyDetector, AnomalyKind};
use crate::config::AppConfig;
use crate::db::{ReviewAnalysis, Store};
use crate::error::{PipelineError, Result};
use crate::keywords::KeywordEngine;
use crate::normalizer::SourceNormalizer;
use crate::report::{AnalyticsReport, AnomalyScanReport, IngestReport};
use crate::resolver::IdentityResolver;
use crate::rules::CategoryRules;
use crate::sentiment::SentimentEngine;
use crate::sources::SourceAdapter;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// ============================================================================
// CANCELLATION
// ============================================================================

/// Shared flag checked between units of work
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// RETRY
// ============================================================================

/// Run `op`, retrying transient persistence failures with exponential backoff.
///
/// Non-transient errors and the last failed attempt are returned unchanged.
pub fn with_retry<T, F>(attempts: u32, base_delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    let mut delay = base_delay;

    loop {
        match op() {
            Err(err) if err.is_transient() && attempt < attempts => {
                warn!(
                    attempt,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                thread::sleep(delay);
                delay *= 2;
                attempt += 1;
            }
            result => return result,
        }
    }
}

// ============================================================================
// ANALYTICS SCOPE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsScope {
    Business(String),
    /// Businesses with a review inserted or changed at or after the instant
    Since(DateTime<Utc>),
    All,
}

impl fmt::Display for AnalyticsScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyticsScope::Business(id) => write!(f, "business {}", id),
            AnalyticsScope::Since(t) => write!(f, "since {}", t.to_rfc3339()),
            AnalyticsScope::All => f.write_str("all"),
        }
    }
}

/// What one business contributed to an analytics run
#[derive(Debug, Default)]
struct BusinessTally {
    analyzed: usize,
    unchanged: usize,
    stale: usize,
    deltas: usize,
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    config: AppConfig,
    store: Store,
    normalizer: SourceNormalizer,
    resolver: IdentityResolver,
    sentiment: SentimentEngine,
    keywords: KeywordEngine,
    detector: AnomalyDetector,
}

impl Pipeline {
    pub fn new(config: AppConfig, store: Store) -> Self {
        Pipeline::with_rules(config, store, CategoryRules::default())
    }

    pub fn with_rules(config: AppConfig, store: Store, rules: CategoryRules) -> Self {
        Pipeline {
            normalizer: SourceNormalizer::new(rules),
            resolver: IdentityResolver::new(config.resolver.clone()),
            sentiment: SentimentEngine::new(config.sentiment.clone()),
            keywords: KeywordEngine::new(config.keywords.clone()),
            detector: AnomalyDetector::new(config.anomaly.clone()),
            config,
            store,
        }
    }

    /// Open the configured database and build every engine from `config`
    pub fn open(config: AppConfig) -> Result<Self> {
        let store = Store::from_config(&config.database)?;
        Ok(Pipeline::new(config, store))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn retry<T, F>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let analytics = &self.config.analytics;
        with_retry(
            analytics.retry_attempts,
            Duration::from_millis(analytics.retry_base_delay_ms),
            op,
        )
    }

    // ========================================================================
    // INGEST
    // ========================================================================

    /// Fetch one batch from `adapter` and reconcile every record into the store.
    ///
    /// Only a failed fetch fails the task; per-record problems are counted in
    /// the report.
    pub fn ingest_batch(&self, adapter: &dyn SourceAdapter, cancel: &CancelToken) -> Result<IngestReport> {
        let batch_ts = Utc::now();
        let mut report = IngestReport::new(
            adapter.source_name(),
            self.config.analytics.report_samples,
            batch_ts,
        );

        let records = adapter
            .fetch()
            .map_err(|e| PipelineError::Source(format!("{}: {:#}", adapter.source_name(), e)))?;
        report.records_fetched = records.len();
        info!(source = adapter.source_name(), records = records.len(), "📥 ingesting batch");

        for record in &records {
            if cancel.is_cancelled() {
                warn!(source = adapter.source_name(), position = record.position, "ingest cancelled");
                report.cancelled = true;
                break;
            }

            let candidate = match self.normalizer.normalize(
                record,
                adapter.field_mapping(),
                adapter.source_kind(),
                batch_ts,
            ) {
                Ok(candidate) => candidate,
                Err(err) => {
                    warn!(
                        source = %record.source_name,
                        position = record.position,
                        error = %err,
                        "skipping invalid record"
                    );
                    report.record_validation(format!("record {}: {}", record.position, err));
                    continue;
                }
            };

            let label = candidate.label();
            for dropped in &candidate.dropped_reviews {
                report.record_dropped_review(format!("{}: {}", label, dropped));
            }

            match self.retry(|| self.resolver.resolve(&self.store, &candidate, Utc::now())) {
                Ok(outcome) => report.record_outcome(&label, &outcome),
                Err(err) => {
                    error!(candidate = %label, error = %err, "failed to persist candidate");
                    report.record_persistence(format!("{}: {}", label, err));
                }
            }
        }

        report.finished_at = Some(Utc::now());
        info!("{}", report.summary());
        Ok(report)
    }

    // ========================================================================
    // ANALYTICS
    // ========================================================================

    /// Score sentiment and extract keywords for every review in `scope`.
    ///
    /// Businesses are spread over `analytics.workers` threads; each business's
    /// reviews run in (posted_at, external_review_id) order on one thread.
    pub fn recompute_analytics(&self, scope: &AnalyticsScope, cancel: &CancelToken) -> Result<AnalyticsReport> {
        let started_at = Utc::now();
        let mut report = AnalyticsReport::new(
            &scope.to_string(),
            self.config.analytics.report_samples,
            started_at,
        );

        let ids = match scope {
            AnalyticsScope::Business(id) => match self.store.get_business(id)? {
                Some(business) => vec![business.id],
                None => return Err(PipelineError::NotFound(id.clone())),
            },
            AnalyticsScope::Since(since) => self.store.business_ids_touched_since(*since)?,
            AnalyticsScope::All => self.store.business_ids()?,
        };
        report.businesses_selected = ids.len();
        info!(scope = %scope, businesses = ids.len(), "🧮 recomputing analytics");

        let next = AtomicUsize::new(0);
        let shared = Mutex::new(report);
        let workers = self.config.analytics.workers.clamp(1, ids.len().max(1));

        thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let Some(id) = ids.get(next.fetch_add(1, Ordering::SeqCst)) else {
                        break;
                    };

                    let result = self.analyze_business(id);
                    let mut report = shared.lock().unwrap_or_else(|p| p.into_inner());
                    match result {
                        Ok(tally) => {
                            report.businesses_processed += 1;
                            report.reviews_analyzed += tally.analyzed;
                            report.reviews_unchanged += tally.unchanged;
                            report.reviews_stale += tally.stale;
                            report.keyword_deltas += tally.deltas;
                        }
                        Err(err @ PipelineError::Computation { .. }) => {
                            warn!(business_id = %id, error = %err, "analytics failed for business");
                            report.record_computation(err.to_string());
                        }
                        Err(err) => {
                            error!(business_id = %id, error = %err, "analytics write failed");
                            report.record_persistence(format!("{}: {}", id, err));
                        }
                    }
                });
            }
        });

        let mut report = shared.into_inner().unwrap_or_else(|p| p.into_inner());
        let finished = report.businesses_processed
            + report.computation_errors.count
            + report.persistence_errors.count;
        report.cancelled = cancel.is_cancelled() && finished < report.businesses_selected;

        if !report.cancelled {
            let retention = ChronoDuration::days(self.config.keywords.retention_days as i64);
            let cutoff = (Utc::now() - retention).date_naive();
            match self.retry(|| self.store.prune_keyword_buckets(cutoff)) {
                Ok(pruned) => report.keyword_buckets_pruned = pruned,
                Err(err) => report.record_persistence(format!("pruning keyword buckets: {}", err)),
            }
        }

        report.finished_at = Some(Utc::now());
        info!("{}", report.summary());
        Ok(report)
    }

    fn analyze_business(&self, business_id: &str) -> Result<BusinessTally> {
        let mut tally = BusinessTally::default();

        for stored in self.store.reviews_for_processing(business_id)? {
            let review = &stored.review;
            let sentiment = self.sentiment.analyze(review.rating, &review.text);
            if !sentiment.score.is_finite() || !sentiment.confidence.is_finite() {
                return Err(PipelineError::computation(
                    business_id,
                    format!("non-finite sentiment for review {}", review.id),
                ));
            }

            let keywords = self.keywords.extract(&review.text);
            let analysis = ReviewAnalysis::new(&stored, sentiment, keywords);

            if review.is_processed()
                && review.sentiment == Some(analysis.sentiment)
                && review.keywords == analysis.keywords
                && analysis.deltas.is_empty()
            {
                tally.unchanged += 1;
                continue;
            }

            let saved = self.retry(|| {
                self.store
                    .save_review_analysis(business_id, &analysis, Utc::now())
            })?;
            if saved {
                tally.analyzed += 1;
                tally.deltas += analysis.deltas.len();
            } else {
                debug!(business_id, review_id = %review.id, "review changed during analysis");
                tally.stale += 1;
            }
        }

        Ok(tally)
    }

    // ========================================================================
    // ANOMALY SCAN
    // ========================================================================

    /// Assess every business as of `as_of` and record new flags.
    ///
    /// Re-running for the same instant records nothing new.
    pub fn anomaly_scan(&self, as_of: DateTime<Utc>, cancel: &CancelToken) -> Result<AnomalyScanReport> {
        let mut report = AnomalyScanReport::new(as_of, self.config.analytics.report_samples);
        let ids = self.store.business_ids()?;
        info!(as_of = %as_of.to_rfc3339(), businesses = ids.len(), "🔎 scanning for anomalies");

        for id in &ids {
            if cancel.is_cancelled() {
                warn!(business_id = %id, "anomaly scan cancelled");
                report.cancelled = true;
                break;
            }
            report.businesses_scanned += 1;

            let series = match self.retry(|| self.store.rating_series(id)) {
                Ok(series) => series,
                Err(err) => {
                    error!(business_id = %id, error = %err, "failed to load rating series");
                    report.record_error(format!("{}: {}", id, err));
                    continue;
                }
            };

            let assessment = self.detector.assess(id, &series, as_of);
            let flags = assessment.flags();

            if assessment.rating.is_insufficient() && assessment.volume.is_insufficient() {
                report.insufficient_data += 1;
            } else if flags.is_empty() {
                report.without_anomaly += 1;
            }

            for flag in &flags {
                match flag.kind {
                    AnomalyKind::Rating => report.rating_flags += 1,
                    AnomalyKind::Volume => report.volume_flags += 1,
                }
                match self.retry(|| self.store.record_anomaly_flag(flag)) {
                    Ok(true) => {
                        report.new_flags += 1;
                        info!(
                            business_id = %id,
                            kind = flag.kind.as_str(),
                            direction = flag.direction.as_str(),
                            magnitude = flag.magnitude,
                            "🚨 anomaly flagged"
                        );
                    }
                    Ok(false) => {}
                    Err(err) => {
                        error!(business_id = %id, error = %err, "failed to record anomaly flag");
                        report.record_error(format!("{}: {}", id, err));
                    }
                }
            }
        }

        if !report.cancelled {
            let cutoff = as_of - ChronoDuration::days(self.config.anomaly.retention_days as i64);
            match self.retry(|| self.store.prune_anomaly_flags(cutoff)) {
                Ok(pruned) => report.flags_pruned = pruned,
                Err(err) => {
                    error!(error = %err, "failed to prune anomaly flags");
                    report.record_error(format!("pruning anomaly flags: {}", err));
                }
            }
        }

        info!("{}", report.summary());
        Ok(report)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::SourceKind;
    use crate::keywords::KeywordScope;
    use crate::sources::{Field, FieldMapping, RawRecord, ReviewField};
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use std::cell::Cell;

    /// In-memory adapter over prepared payloads
    struct StaticAdapter {
        records: Vec<Value>,
        mapping: FieldMapping,
    }

    impl StaticAdapter {
        fn new(records: Vec<Value>) -> Self {
            let mapping = FieldMapping::new()
                .with(Field::ExternalId, "id")
                .with(Field::Name, "name")
                .with(Field::Address, "address")
                .with(Field::Category, "category")
                .with(Field::Latitude, "lat")
                .with(Field::Longitude, "lon")
                .with(Field::Reviews, "reviews")
                .with_review(ReviewField::ExternalId, "id")
                .with_review(ReviewField::Rating, "rating")
                .with_review(ReviewField::Text, "text")
                .with_review(ReviewField::Author, "author")
                .with_review(ReviewField::PostedAt, "posted_at");
            StaticAdapter { records, mapping }
        }
    }

    impl SourceAdapter for StaticAdapter {
        fn fetch(&self) -> anyhow::Result<Vec<RawRecord>> {
            Ok(self
                .records
                .iter()
                .enumerate()
                .map(|(i, payload)| RawRecord {
                    source_name: "static".to_string(),
                    payload: payload.clone(),
                    position: i + 1,
                })
                .collect())
        }

        fn field_mapping(&self) -> &FieldMapping {
            &self.mapping
        }

        fn source_name(&self) -> &str {
            "static"
        }

        fn source_kind(&self) -> SourceKind {
            SourceKind::Scrape
        }
    }

    fn pipeline() -> Pipeline {
        let store = Store::open_in_memory().unwrap();
        let mut config = AppConfig::default();
        config.keywords.retention_days = 3650;
        Pipeline::new(config, store)
    }

    fn pizza_record() -> Value {
        json!({
            "id": "s-1",
            "name": "Joe's Pizza",
            "address": "7 Carmine St, New York, NY",
            "category": "pizza restaurant",
            "lat": 40.7306,
            "lon": -74.0021,
            "reviews": [
                {"id": "r1", "rating": 5, "text": "Great pizza, friendly staff", "author": "ana", "posted_at": "2026-01-05T12:00:00Z"},
                {"id": "r2", "rating": 2, "text": "Cold pizza and slow service", "author": "ben", "posted_at": "2026-01-06T18:30:00Z"}
            ]
        })
    }

    #[test]
    fn test_retry_recovers_from_busy() {
        let calls = Cell::new(0);
        let result = with_retry(3, Duration::from_millis(1), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(PipelineError::Persistence(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                    None,
                )))
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_does_not_repeat_permanent_errors() {
        let calls = Cell::new(0);
        let result: Result<()> = with_retry(5, Duration::from_millis(1), || {
            calls.set(calls.get() + 1);
            Err(PipelineError::NotFound("b-1".into()))
        });

        assert!(matches!(result, Err(PipelineError::NotFound(_))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_ingest_counts_invalid_records() {
        let pipeline = pipeline();
        let adapter = StaticAdapter::new(vec![pizza_record(), json!({"id": "s-2", "name": "No Where"})]);

        let report = pipeline.ingest_batch(&adapter, &CancelToken::new()).unwrap();

        assert_eq!(report.records_fetched, 2);
        assert_eq!(report.businesses_created, 1);
        assert_eq!(report.reviews_inserted, 2);
        assert_eq!(report.validation_errors.count, 1);
        assert_eq!(pipeline.store().business_count().unwrap(), 1);
    }

    #[test]
    fn test_cancelled_ingest_keeps_nothing_it_did_not_start() {
        let pipeline = pipeline();
        let adapter = StaticAdapter::new(vec![pizza_record()]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = pipeline.ingest_batch(&adapter, &cancel).unwrap();

        assert!(report.cancelled);
        assert_eq!(report.records_processed, 0);
        assert_eq!(pipeline.store().business_count().unwrap(), 0);
    }

    #[test]
    fn test_analytics_is_idempotent() {
        let pipeline = pipeline();
        let cancel = CancelToken::new();
        pipeline
            .ingest_batch(&StaticAdapter::new(vec![pizza_record()]), &cancel)
            .unwrap();
        assert_eq!(pipeline.store().unprocessed_review_count().unwrap(), 2);

        let first = pipeline.recompute_analytics(&AnalyticsScope::All, &cancel).unwrap();
        assert_eq!(first.businesses_processed, 1);
        assert_eq!(first.reviews_analyzed, 2);
        assert!(first.keyword_deltas > 0);
        assert_eq!(pipeline.store().unprocessed_review_count().unwrap(), 0);

        let global_before = pipeline.store().keyword_buckets(&KeywordScope::Global).unwrap();

        let second = pipeline.recompute_analytics(&AnalyticsScope::All, &cancel).unwrap();
        assert_eq!(second.reviews_analyzed, 0);
        assert_eq!(second.reviews_unchanged, 2);
        assert_eq!(second.keyword_deltas, 0);

        let global_after = pipeline.store().keyword_buckets(&KeywordScope::Global).unwrap();
        assert_eq!(global_before, global_after);

        let as_of = Utc.with_ymd_and_hms(2026, 1, 7, 0, 0, 0).unwrap();
        let trending = pipeline
            .store()
            .trending_keywords(&KeywordScope::Global, 7, as_of, 5)
            .unwrap();
        assert_eq!(trending[0].term, "pizza");
        assert_eq!(trending[0].count, 2);
    }

    #[test]
    fn test_analytics_for_unknown_business() {
        let pipeline = pipeline();
        let result = pipeline.recompute_analytics(&AnalyticsScope::Business("nope".into()), &CancelToken::new());
        assert!(matches!(result, Err(PipelineError::NotFound(_))));
    }

    #[test]
    fn test_anomaly_scan_with_few_reviews() {
        let pipeline = pipeline();
        let cancel = CancelToken::new();
        pipeline
            .ingest_batch(&StaticAdapter::new(vec![pizza_record()]), &cancel)
            .unwrap();

        let as_of = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        let report = pipeline.anomaly_scan(as_of, &cancel).unwrap();

        assert_eq!(report.businesses_scanned, 1);
        assert_eq!(report.insufficient_data, 1);
        assert_eq!(report.new_flags, 0);
    }
}
