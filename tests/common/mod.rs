// Shared fixtures for the integration tests: source files on disk + a pipeline
// over an in-memory store.

#![allow(dead_code)]

use local_pulse::{AppConfig, Pipeline, Store};
use std::io::Write;
use tempfile::NamedTempFile;

pub fn pipeline() -> Pipeline {
    let mut config = AppConfig::default();
    // fixtures carry fixed dates; keep their keyword buckets out of pruning
    config.keywords.retention_days = 3650;
    Pipeline::new(config, Store::open_in_memory().unwrap())
}

pub fn file_with(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Joe's Pizza as the places API reports it
pub const PLACES_JSON: &str = r#"{"places": [{
    "id": "ChIJ-1",
    "displayName": {"text": "Joe's Pizza"},
    "formattedAddress": "7 Carmine Street, New York",
    "types": ["pizza_restaurant", "restaurant"],
    "location": {"latitude": 40.730610, "longitude": -74.002080},
    "rating": 4.5,
    "userRatingCount": 1200,
    "reviews": [{
        "name": "places/ChIJ-1/reviews/a",
        "rating": 5,
        "text": {"text": "Best slice in the city"},
        "authorAttribution": {"displayName": "Ana"},
        "publishTime": "2026-01-03T12:00:00Z"
    }]
}]}"#;

/// Same shop from the directory export, ~30 m north
pub const DIRECTORY_CSV: &str = "\
id,name,address,phone,category,lat,lon
dir-77,Joes Pizza,\"7 Carmine St, New York\",212-555-0101,pizza,40.730880,-74.002080
";

/// Same shop again from the scraper, plus an unrelated restaurant across town
pub const SCRAPE_JSONL: &str = r#"{"source_id": "sc-5", "name": "JOES PIZZA", "address": "7 Carmine St, New York", "latitude": 40.7307, "longitude": -74.0021, "reviews": [{"source_review_id": "x1", "rating": 4, "review_text": "Great crust, friendly staff", "reviewer_name": "Ben", "review_date": "2026-01-04"}]}
{"source_id": "sc-9", "name": "Golden Dragon", "address": "88 Harbor Blvd, New York", "latitude": 40.7800, "longitude": -73.9500, "reviews": []}
"#;

/// Joe's Pizza from a second scraper: same kind as `scrape`, no fetch time,
/// one review with neither id nor date
pub const SCRAPE_B_JSONL: &str = r#"{"source_id": "sb-1", "name": "Joe's Pizza", "address": "7 Carmine St., New York, NY", "latitude": 40.73065, "longitude": -74.00205, "website": "http://joes.example", "reviews": [{"rating": 5, "review_text": "Worth the line", "reviewer_name": "Cy"}]}
"#;

/// Harbor Grill (places) and Harbor Grill & Bar (directory) are a sure
/// match; The Grill Bar (scrape, 150 m north) is a grey-zone match for the
/// second only
pub const HARBOR_PLACES_JSON: &str = r#"{"places": [{
    "id": "hg-1",
    "displayName": {"text": "Harbor Grill"},
    "formattedAddress": "15 Pier Rd, Portland",
    "location": {"latitude": 45.52, "longitude": -122.67}
}]}"#;

pub const HARBOR_DIRECTORY_CSV: &str = "\
id,name,address,phone,category,lat,lon
hg-2,Harbor Grill & Bar,\"15 Pier Road, Portland\",503-555-0199,restaurant,45.52,-122.67
";

pub const HARBOR_SCRAPE_JSONL: &str = r#"{"source_id": "gb-3", "name": "The Grill Bar", "address": "300 Dock St, Portland", "latitude": 45.521349, "longitude": -122.67, "website": "http://grillbar.example", "reviews": []}
"#;

/// Every ordering of `0..n`
pub fn permutations(n: usize) -> Vec<Vec<usize>> {
    if n == 0 {
        return vec![Vec::new()];
    }
    let mut out = Vec::new();
    for rest in permutations(n - 1) {
        for slot in 0..=rest.len() {
            let mut order = rest.clone();
            order.insert(slot, n - 1);
            out.push(order);
        }
    }
    out
}
