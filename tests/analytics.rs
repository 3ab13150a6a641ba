// Analytics end to end: ingest → sentiment/keywords → anomaly scan → queries

mod common;

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{file_with, pipeline};
use local_pulse::sentiment::ConfidenceBand;
use local_pulse::{
    AnalyticsScope, AnomalyKind, CancelToken, KeywordScope, Period, Pipeline, ScrapeAdapter,
    SentimentLabel,
};
use serde_json::{json, Value};

fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0).unwrap()
}

fn review(id: String, rating: u8, text: &str, posted_at: DateTime<Utc>) -> Value {
    json!({
        "source_review_id": id,
        "rating": rating,
        "review_text": text,
        "reviewer_name": "guest",
        "review_date": posted_at.to_rfc3339(),
    })
}

/// 60 baseline reviews averaging 4.5, then 15 recent reviews at 2 stars
fn declining_bistro() -> Value {
    let mut reviews = Vec::new();
    for i in 0..60i64 {
        let posted_at = as_of() - Duration::days(31 + (i % 29)) - Duration::minutes(i);
        let rating = if i % 2 == 0 { 4 } else { 5 };
        reviews.push(review(format!("b{}", i), rating, "Solid food", posted_at));
    }
    for i in 0..15i64 {
        let posted_at = as_of() - Duration::days(1 + i);
        reviews.push(review(format!("r{}", i), 2, "Cold food and rude staff", posted_at));
    }

    json!({
        "source_id": "bistro",
        "name": "Harbor Bistro",
        "address": "12 Pier Rd, Portland",
        "category": "restaurant",
        "latitude": 45.5200,
        "longitude": -122.6700,
        "reviews": reviews,
    })
}

/// Three reviews only, one of them mixed
fn quiet_cafe() -> Value {
    json!({
        "source_id": "cafe",
        "name": "Quiet Cafe",
        "address": "400 Elm St, Boston",
        "category": "cafe",
        "latitude": 42.3500,
        "longitude": -71.0600,
        "reviews": [
            review("c1".into(), 3, "Amazing food, terrible service", as_of() - Duration::days(2)),
            review("c2".into(), 5, "", as_of() - Duration::days(3)),
            review("c3".into(), 1, "", as_of() - Duration::days(4)),
        ],
    })
}

fn ingest_fixtures(pipeline: &Pipeline) -> (String, String) {
    let jsonl = format!("{}\n{}\n", declining_bistro(), quiet_cafe());
    let file = file_with(&jsonl);
    let report = pipeline
        .ingest_batch(&ScrapeAdapter::new(file.path()), &CancelToken::new())
        .unwrap();
    assert_eq!(report.businesses_created, 2);
    assert_eq!(report.reviews_inserted, 78);

    let bistro = pipeline.store().businesses_near(45.52, -122.67, 50.0, 1).unwrap();
    let cafe = pipeline.store().businesses_near(42.35, -71.06, 50.0, 1).unwrap();
    (bistro[0].business.id.clone(), cafe[0].business.id.clone())
}

#[test]
fn test_mixed_review_scores_neutral_with_medium_confidence() {
    let pipeline = pipeline();
    let (_, cafe) = ingest_fixtures(&pipeline);

    pipeline
        .recompute_analytics(&AnalyticsScope::Business(cafe.clone()), &CancelToken::new())
        .unwrap();

    let reviews = pipeline.store().reviews_for_business(&cafe, 10).unwrap();
    let mixed = reviews
        .iter()
        .find(|r| r.external_review_id == "c1")
        .expect("mixed review");
    let sentiment = mixed.sentiment.expect("processed");
    assert_eq!(sentiment.label, SentimentLabel::Neutral);
    assert_eq!(ConfidenceBand::of(sentiment.confidence), ConfidenceBand::Medium);

    // empty texts fall back to the rating, still bounded
    for r in &reviews {
        let s = r.sentiment.expect("processed");
        assert!((-1.0..=1.0).contains(&s.score));
        assert!((0.0..=1.0).contains(&s.confidence));
    }

    println!("✅ Mixed review sentiment: PASSED");
}

#[test]
fn test_rating_drop_is_flagged_once() {
    let pipeline = pipeline();
    let (bistro, cafe) = ingest_fixtures(&pipeline);
    let cancel = CancelToken::new();

    let first = pipeline.anomaly_scan(as_of(), &cancel).unwrap();
    assert_eq!(first.businesses_scanned, 2);
    assert_eq!(first.insufficient_data, 1);
    assert_eq!(first.rating_flags, 1);
    // 2 reviews/day before, 0.5/day after
    assert_eq!(first.volume_flags, 1);
    assert_eq!(first.new_flags, 2);

    let again = pipeline.anomaly_scan(as_of(), &cancel).unwrap();
    assert_eq!(again.new_flags, 0);

    let flags = pipeline.store().anomaly_flags(&bistro).unwrap();
    assert_eq!(flags.len(), 2);
    let rating = flags
        .iter()
        .find(|f| f.kind == AnomalyKind::Rating)
        .expect("rating flag");
    assert!((rating.baseline_value - 4.5).abs() < 1e-9);
    assert!((rating.recent_value - 2.0).abs() < 1e-9);
    assert_eq!(rating.recent_count, 15);

    assert!(pipeline.store().anomaly_flags(&cafe).unwrap().is_empty());

    println!("✅ Rating anomaly: PASSED");
}

#[test]
fn test_expired_flags_pruned_by_later_scan() {
    let pipeline = pipeline();
    let (bistro, _) = ingest_fixtures(&pipeline);
    let cancel = CancelToken::new();

    let first = pipeline.anomaly_scan(as_of(), &cancel).unwrap();
    assert_eq!(first.new_flags, 2);
    assert_eq!(first.flags_pruned, 0);

    // 91 days on, every review has left the windows and the old flags expire
    let later = pipeline.anomaly_scan(as_of() + Duration::days(91), &cancel).unwrap();
    assert_eq!(later.new_flags, 0);
    assert_eq!(later.flags_pruned, 2);
    assert!(pipeline.store().anomaly_flags(&bistro).unwrap().is_empty());
}

#[test]
fn test_competitors_and_review_ranges() {
    let pipeline = pipeline();
    let (bistro, cafe) = ingest_fixtures(&pipeline);
    pipeline
        .recompute_analytics(&AnalyticsScope::All, &CancelToken::new())
        .unwrap();

    let metrics = pipeline
        .store()
        .competitor_metrics(&[bistro.clone(), cafe.clone()])
        .unwrap();
    assert_eq!(metrics.competitors.len(), 2);
    assert_eq!(metrics.competitors[0].name, "Harbor Bistro");
    assert_eq!(metrics.competitors[0].review_count, 75);
    assert_eq!(metrics.competitors[1].review_count, 3);
    // (75 + 3) / 2
    assert_eq!(metrics.market_averages.review_count, 39);
    for competitor in &metrics.competitors {
        assert!(competitor.avg_sentiment.is_some());
    }

    // the cafe's reviews are 2, 3 and 4 days old
    let window = pipeline
        .store()
        .reviews_between(as_of() - Duration::days(3), as_of(), Some(&cafe))
        .unwrap();
    let ids: Vec<&str> = window.iter().map(|r| r.external_review_id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2"]);

    // across businesses: 1-3 days back holds 3 bistro reviews and 2 cafe reviews
    let everywhere = pipeline
        .store()
        .reviews_between(as_of() - Duration::days(3), as_of() - Duration::days(1), None)
        .unwrap();
    assert_eq!(everywhere.len(), 5);
    assert!(everywhere.windows(2).all(|w| w[0].posted_at >= w[1].posted_at));
}

#[test]
fn test_keywords_and_business_analytics() {
    let pipeline = pipeline();
    let (bistro, _) = ingest_fixtures(&pipeline);
    let cancel = CancelToken::new();

    let report = pipeline.recompute_analytics(&AnalyticsScope::All, &cancel).unwrap();
    assert_eq!(report.businesses_processed, 2);
    assert_eq!(report.reviews_analyzed, 78);
    assert!(report.computation_errors.is_empty());
    assert_eq!(pipeline.store().unprocessed_review_count().unwrap(), 0);

    let trending = pipeline
        .store()
        .trending_keywords(&KeywordScope::Business(bistro.clone()), 90, as_of(), 5)
        .unwrap();
    assert_eq!(trending[0].term, "food");
    assert_eq!(trending[0].count, 75);

    let analytics = pipeline.store().business_analytics(&bistro).unwrap();
    assert_eq!(analytics.total_reviews, 75);
    assert_eq!(analytics.avg_rating, Some(4.0));
    assert_eq!(analytics.rating_distribution[&2], 15);
    assert_eq!(analytics.rating_distribution[&4], 30);
    assert_eq!(analytics.rating_distribution[&5], 30);
    assert_eq!(analytics.rating_distribution[&1], 0);
    assert_eq!(analytics.monthly_review_counts.values().sum::<u32>(), 75);

    let trend = pipeline.store().sentiment_trend(&bistro, Period::Month).unwrap();
    assert_eq!(trend.iter().map(|p| p.review_count).sum::<u32>(), 75);
}

#[test]
fn test_since_scope_only_touches_recent_changes() {
    let pipeline = pipeline();
    ingest_fixtures(&pipeline);
    let cancel = CancelToken::new();

    pipeline.recompute_analytics(&AnalyticsScope::All, &cancel).unwrap();

    let later = Utc::now() + Duration::hours(1);
    let report = pipeline
        .recompute_analytics(&AnalyticsScope::Since(later), &cancel)
        .unwrap();
    assert_eq!(report.businesses_selected, 0);
    assert_eq!(report.reviews_analyzed, 0);
}

#[test]
fn test_cancelled_analytics_keeps_nothing_half_done() {
    let pipeline = pipeline();
    ingest_fixtures(&pipeline);
    let cancel = CancelToken::new();
    cancel.cancel();

    let report = pipeline.recompute_analytics(&AnalyticsScope::All, &cancel).unwrap();
    assert!(report.cancelled);
    assert_eq!(report.businesses_processed, 0);
    assert_eq!(report.keyword_buckets_pruned, 0);
    assert_eq!(pipeline.store().unprocessed_review_count().unwrap(), 78);
}
