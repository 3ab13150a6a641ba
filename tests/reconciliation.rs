// End-to-end reconciliation: adapters → normalizer → resolver → store

mod common;

use common::{
    file_with, pipeline, DIRECTORY_CSV, HARBOR_DIRECTORY_CSV, HARBOR_PLACES_JSON,
    HARBOR_SCRAPE_JSONL, PLACES_JSON, SCRAPE_B_JSONL, SCRAPE_JSONL,
};
use local_pulse::{
    Business, CancelToken, Category, DirectoryAdapter, HoursSchedule, Location, Pipeline,
    PlacesApiAdapter, ScrapeAdapter, SourceAdapter,
};
use std::collections::BTreeSet;

fn pizza_sources() -> BTreeSet<(String, String)> {
    [
        ("directory", "dir-77"),
        ("google_places", "ChIJ-1"),
        ("scrape", "sc-5"),
    ]
    .iter()
    .map(|(s, e)| (s.to_string(), e.to_string()))
    .collect()
}

fn find_pizza(pipeline: &Pipeline) -> Business {
    let store = pipeline.store();
    let id = store
        .businesses_near(40.7306, -74.0021, 200.0, 10)
        .unwrap()
        .into_iter()
        .map(|n| n.business.id)
        .next()
        .expect("pizza business near Carmine St");
    store.get_business(&id).unwrap().unwrap()
}

#[test]
fn test_two_sources_become_one_business() {
    let places = file_with(PLACES_JSON);
    let directory = file_with(DIRECTORY_CSV);
    let pipeline = pipeline();
    let cancel = CancelToken::new();

    let first = pipeline
        .ingest_batch(&PlacesApiAdapter::new(places.path()), &cancel)
        .unwrap();
    let second = pipeline
        .ingest_batch(&DirectoryAdapter::new(directory.path()), &cancel)
        .unwrap();

    assert_eq!(first.businesses_created, 1);
    assert_eq!(second.businesses_created, 0);
    assert_eq!(second.businesses_merged, 1);
    assert_eq!(pipeline.store().business_count().unwrap(), 1);

    let business = find_pizza(&pipeline);
    assert_eq!(business.canonical_name, "Joe's Pizza");
    assert_eq!(business.sources.len(), 2);
    assert!(business.has_source("google_places", "ChIJ-1"));
    assert!(business.has_source("directory", "dir-77"));
    // directory fills what the places record lacks
    assert_eq!(business.phone.as_deref(), Some("212-555-0101"));

    println!("✅ Two sources, one business: PASSED");
}

/// Everything a reader of the business sees, rating aside
#[derive(Debug, PartialEq)]
struct Canonical {
    business_count: u64,
    name: String,
    address: Option<String>,
    category: Category,
    location: Option<Location>,
    phone: Option<String>,
    website: Option<String>,
    hours: Option<HoursSchedule>,
    review_count: u32,
    sources: BTreeSet<(String, String)>,
    review_ids: BTreeSet<String>,
}

fn canonical(pipeline: &Pipeline, business: &Business) -> (Canonical, f64) {
    let store = pipeline.store();
    let review_ids = store
        .reviews_for_business(&business.id, 50)
        .unwrap()
        .into_iter()
        .map(|r| r.external_review_id)
        .collect();
    (
        Canonical {
            business_count: store.business_count().unwrap(),
            name: business.canonical_name.clone(),
            address: business.normalized_address.clone(),
            category: business.category,
            location: business.location,
            phone: business.phone.clone(),
            website: business.website.clone(),
            hours: business.hours.clone(),
            review_count: business.review_count(),
            sources: business.source_keys(),
            review_ids,
        },
        business.aggregate_rating(),
    )
}

/// Ingest the adapters in every order and check each run lands on the same state
fn assert_order_independent(
    adapters: &[Box<dyn SourceAdapter>],
    find: impl Fn(&Pipeline) -> Business,
) -> Canonical {
    let orders = common::permutations(adapters.len());
    let mut outcomes = Vec::new();

    for order in &orders {
        let pipeline = pipeline();
        let cancel = CancelToken::new();
        for &i in order {
            pipeline.ingest_batch(adapters[i].as_ref(), &cancel).unwrap();
        }
        outcomes.push(canonical(&pipeline, &find(&pipeline)));
    }

    let (first, rating) = outcomes.remove(0);
    for (i, (outcome, other_rating)) in outcomes.iter().enumerate() {
        assert_eq!(outcome, &first, "order {:?}", orders[i + 1]);
        assert!(
            (other_rating - rating).abs() < 1e-9,
            "order {:?}: rating {} vs {}",
            orders[i + 1],
            other_rating,
            rating
        );
    }
    println!("✅ Order independence over {} permutations: PASSED", orders.len());
    first
}

#[test]
fn test_ingest_order_does_not_matter() {
    let places = file_with(PLACES_JSON);
    let directory = file_with(DIRECTORY_CSV);
    let scrape = file_with(SCRAPE_JSONL);
    let scrape_b = file_with(SCRAPE_B_JSONL);

    let adapters: Vec<Box<dyn SourceAdapter>> = vec![
        Box::new(PlacesApiAdapter::new(places.path())),
        Box::new(DirectoryAdapter::new(directory.path())),
        Box::new(ScrapeAdapter::new(scrape.path())),
        Box::new(ScrapeAdapter::new(scrape_b.path()).with_source_name("scrape_b")),
    ];

    let pizza = assert_order_independent(&adapters, find_pizza);
    let mut expected_sources = pizza_sources();
    expected_sources.insert(("scrape_b".to_string(), "sb-1".to_string()));

    assert_eq!(pizza.business_count, 2);
    assert_eq!(pizza.name, "Joe's Pizza");
    assert_eq!(pizza.sources, expected_sources);
    assert_eq!(pizza.phone.as_deref(), Some("212-555-0101"));
    assert_eq!(pizza.website.as_deref(), Some("http://joes.example"));
    assert_eq!(pizza.review_ids.len(), 3);
}

#[test]
fn test_grey_zone_match_is_order_independent() {
    let places = file_with(HARBOR_PLACES_JSON);
    let directory = file_with(HARBOR_DIRECTORY_CSV);
    let scrape = file_with(HARBOR_SCRAPE_JSONL);

    let adapters: Vec<Box<dyn SourceAdapter>> = vec![
        Box::new(PlacesApiAdapter::new(places.path())),
        Box::new(DirectoryAdapter::new(directory.path())),
        Box::new(ScrapeAdapter::new(scrape.path())),
    ];

    let harbor = assert_order_independent(&adapters, |pipeline| {
        let near = pipeline.store().businesses_near(45.52, -122.67, 50.0, 1).unwrap();
        near[0].business.clone()
    });

    assert_eq!(harbor.business_count, 1);
    assert_eq!(harbor.name, "Harbor Grill");
    assert_eq!(harbor.sources.len(), 3);
    assert_eq!(harbor.phone.as_deref(), Some("503-555-0199"));
    assert_eq!(harbor.website.as_deref(), Some("http://grillbar.example"));
}

#[test]
fn test_same_kind_sources_do_not_race_on_batch_clock() {
    let luz_a = file_with(
        r#"{"source_id": "t-1", "name": "Taqueria Luz", "address": "40 Elm St, Austin", "latitude": 30.27, "longitude": -97.74, "website": "http://luz-a.example"}
"#,
    );
    let luz_b = file_with(
        r#"{"source_id": "t-1", "name": "Taqueria La Luz", "address": "40 Elm Street, Austin", "latitude": 30.27005, "longitude": -97.74, "website": "http://luz-b.example"}
"#,
    );

    let adapters: Vec<Box<dyn SourceAdapter>> = vec![
        Box::new(ScrapeAdapter::new(luz_a.path())),
        Box::new(ScrapeAdapter::new(luz_b.path()).with_source_name("scrape_b")),
    ];

    // neither record says when it was fetched, so the later batch must not win
    let luz = assert_order_independent(&adapters, |pipeline| {
        let near = pipeline.store().businesses_near(30.27, -97.74, 50.0, 1).unwrap();
        near[0].business.clone()
    });

    assert_eq!(luz.business_count, 1);
    assert_eq!(luz.name, "Taqueria Luz");
    assert_eq!(luz.address.as_deref(), Some("40 Elm St, Austin"));
    assert_eq!(luz.website.as_deref(), Some("http://luz-a.example"));
}

#[test]
fn test_undated_review_survives_reingest() {
    let scrape_b = file_with(SCRAPE_B_JSONL);
    let pipeline = pipeline();
    let cancel = CancelToken::new();
    let adapter = ScrapeAdapter::new(scrape_b.path()).with_source_name("scrape_b");

    let first = pipeline.ingest_batch(&adapter, &cancel).unwrap();
    let second = pipeline.ingest_batch(&adapter, &cancel).unwrap();

    assert_eq!(first.reviews_inserted, 1);
    assert_eq!(second.reviews_inserted, 0);
    assert_eq!(second.reviews_unchanged, 1);
    assert_eq!(pipeline.store().review_count().unwrap(), 1);
}

#[test]
fn test_merged_business_keeps_every_input_source() {
    let places = file_with(PLACES_JSON);
    let directory = file_with(DIRECTORY_CSV);
    let scrape = file_with(SCRAPE_JSONL);
    let pipeline = pipeline();
    let cancel = CancelToken::new();

    pipeline
        .ingest_batch(&ScrapeAdapter::new(scrape.path()), &cancel)
        .unwrap();
    pipeline
        .ingest_batch(&DirectoryAdapter::new(directory.path()), &cancel)
        .unwrap();
    pipeline
        .ingest_batch(&PlacesApiAdapter::new(places.path()), &cancel)
        .unwrap();

    let pizza = find_pizza(&pipeline);
    assert!(pizza.source_keys().is_superset(&pizza_sources()));

    // every snapshot is reachable through the business
    let snapshots = pipeline.store().snapshots(&pizza.id).unwrap();
    assert_eq!(snapshots.len(), 3);

    let dragon = pipeline
        .store()
        .businesses_near(40.78, -73.95, 100.0, 5)
        .unwrap();
    assert_eq!(dragon.len(), 1);
    assert_eq!(dragon[0].business.canonical_name, "Golden Dragon");
    assert!(dragon[0].business.has_source("scrape", "sc-9"));
}

#[test]
fn test_reingesting_a_batch_is_idempotent() {
    let scrape = file_with(SCRAPE_JSONL);
    let pipeline = pipeline();
    let cancel = CancelToken::new();
    let adapter = ScrapeAdapter::new(scrape.path());

    let first = pipeline.ingest_batch(&adapter, &cancel).unwrap();
    let second = pipeline.ingest_batch(&adapter, &cancel).unwrap();

    assert_eq!(first.businesses_created, 2);
    assert_eq!(first.reviews_inserted, 1);
    assert_eq!(second.businesses_refreshed, 2);
    assert_eq!(second.reviews_inserted, 0);
    assert_eq!(second.reviews_unchanged, 1);
    assert_eq!(pipeline.store().business_count().unwrap(), 2);
    assert_eq!(pipeline.store().review_count().unwrap(), 1);
}

#[test]
fn test_changed_review_is_updated_in_place() {
    let pipeline = pipeline();
    let cancel = CancelToken::new();

    let original = file_with(SCRAPE_JSONL);
    pipeline
        .ingest_batch(&ScrapeAdapter::new(original.path()), &cancel)
        .unwrap();
    pipeline
        .recompute_analytics(&local_pulse::AnalyticsScope::All, &cancel)
        .unwrap();
    assert_eq!(pipeline.store().unprocessed_review_count().unwrap(), 0);

    let edited = file_with(&SCRAPE_JSONL.replace(
        "Great crust, friendly staff",
        "Crust was soggy this time",
    ));
    let report = pipeline
        .ingest_batch(&ScrapeAdapter::new(edited.path()), &cancel)
        .unwrap();

    assert_eq!(report.reviews_updated, 1);
    assert_eq!(pipeline.store().review_count().unwrap(), 1);
    // the edit invalidates the derived fields until the next analytics run
    assert_eq!(pipeline.store().unprocessed_review_count().unwrap(), 1);

    let pizza = find_pizza(&pipeline);
    let reviews = pipeline.store().reviews_for_business(&pizza.id, 10).unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].text, "Crust was soggy this time");
}

#[test]
fn test_invalid_rows_are_counted_not_fatal() {
    let csv = "\
id,name,address,lat,lon
d-1,,\"1 Nowhere St\",,
d-2,Corner Deli,,,
d-3,Blue Bottle Coffee,\"66 Mint St, San Francisco\",,
";
    let file = file_with(csv);
    let pipeline = pipeline();

    let report = pipeline
        .ingest_batch(&DirectoryAdapter::new(file.path()), &CancelToken::new())
        .unwrap();

    assert_eq!(report.records_fetched, 3);
    assert_eq!(report.validation_errors.count, 2);
    assert_eq!(report.businesses_created, 1);
    assert_eq!(report.validation_errors.samples.len(), 2);
}

#[test]
fn test_missing_file_fails_the_batch() {
    let pipeline = pipeline();
    let result = pipeline.ingest_batch(
        &ScrapeAdapter::new("/nonexistent/scrape.jsonl"),
        &CancelToken::new(),
    );

    assert!(matches!(result, Err(local_pulse::PipelineError::Source(_))));
    assert_eq!(pipeline.store().business_count().unwrap(), 0);
}
