// 🧹 Source Normalizer - raw record + field mapping → canonical candidate
//
// Pure: the same raw record and batch timestamp always produce the same
// candidate. Bad coordinates are dropped, bad reviews are dropped; only a
// record with no usable identity (name + address, or name + location) fails.

use crate::entities::{
    derive_review_id, CandidateReview, Category, HoursSchedule, Location, OpenInterval, Provenance,
    SourceKind, SourceSnapshot,
};
use crate::error::ValidationError;
use crate::rules::CategoryRules;
use crate::sources::{Field, FieldMapping, RawRecord, ReviewField};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, warn};

// ============================================================================
// CANDIDATE
// ============================================================================

/// A normalized business record waiting for identity resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub snapshot: SourceSnapshot,
    pub reviews: Vec<CandidateReview>,

    /// Nested reviews that failed validation (the business itself survived)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped_reviews: Vec<ValidationError>,
}

impl Candidate {
    pub fn label(&self) -> String {
        format!(
            "{}:{} ({})",
            self.snapshot.provenance.source_name,
            self.snapshot.provenance.external_id,
            self.snapshot.name
        )
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

pub struct SourceNormalizer {
    rules: CategoryRules,
}

impl SourceNormalizer {
    pub fn new(rules: CategoryRules) -> Self {
        SourceNormalizer { rules }
    }

    /// Normalize one raw record.
    ///
    /// `batch_ts` stands in for `fetched_at` when the source does not carry one.
    pub fn normalize(
        &self,
        record: &RawRecord,
        mapping: &FieldMapping,
        kind: SourceKind,
        batch_ts: DateTime<Utc>,
    ) -> Result<Candidate, ValidationError> {
        let payload = &record.payload;
        if !payload.is_object() {
            return Err(ValidationError::new("record", "expected a JSON object"));
        }

        let name = mapping
            .get(payload, Field::Name)
            .and_then(text_of)
            .ok_or_else(|| ValidationError::new("name", "required field is empty"))?;

        let address = mapping.get(payload, Field::Address).and_then(text_of);
        let location = self.location_of(payload, mapping, &record.source_name, &name);

        if address.is_none() && location.is_none() {
            return Err(ValidationError::new(
                "address",
                "either an address or a valid location is required",
            ));
        }

        let declared_fetched_at = mapping.get(payload, Field::FetchedAt).and_then(parse_timestamp);
        let fetched_at = declared_fetched_at.unwrap_or(batch_ts);

        let external_id = mapping
            .get(payload, Field::ExternalId)
            .and_then(text_of)
            .unwrap_or_else(|| {
                derived_external_id(&record.source_name, &name, address.as_deref(), location.as_ref())
            });

        let snapshot = SourceSnapshot {
            provenance: Provenance {
                source_name: record.source_name.clone(),
                external_id,
                fetched_at,
            },
            kind,
            category: self.category_of(payload, mapping),
            rating: mapping.get(payload, Field::Rating).and_then(parse_rating),
            review_count: mapping.get(payload, Field::ReviewCount).and_then(parse_count),
            hours: mapping.get(payload, Field::Hours).and_then(parse_hours),
            phone: mapping.get(payload, Field::Phone).and_then(text_of),
            website: mapping.get(payload, Field::Website).and_then(text_of),
            price_range: mapping.get(payload, Field::PriceRange).and_then(parse_price_range),
            name,
            address,
            location,
            fetched_at_declared: declared_fetched_at.is_some(),
        };

        let mut reviews = Vec::new();
        let mut dropped_reviews = Vec::new();
        if let Some(Value::Array(items)) = mapping.get(payload, Field::Reviews) {
            for (i, item) in items.iter().enumerate() {
                match normalize_review(item, mapping, &record.source_name, fetched_at) {
                    Ok(review) => reviews.push(review),
                    Err(err) => {
                        warn!(
                            source = %record.source_name,
                            position = record.position,
                            review = i,
                            error = %err,
                            "dropping invalid review"
                        );
                        dropped_reviews.push(err);
                    }
                }
            }
        }

        Ok(Candidate {
            snapshot,
            reviews,
            dropped_reviews,
        })
    }

    fn location_of(
        &self,
        payload: &Value,
        mapping: &FieldMapping,
        source: &str,
        name: &str,
    ) -> Option<Location> {
        let lat = mapping.get(payload, Field::Latitude).and_then(number_of);
        let lon = mapping.get(payload, Field::Longitude).and_then(number_of);

        match (lat, lon) {
            (Some(lat), Some(lon)) => {
                let location = Location::new_checked(lat, lon);
                if location.is_none() {
                    debug!(source, name, lat, lon, "dropping invalid coordinates");
                }
                location
            }
            (None, None) => None,
            _ => {
                debug!(source, name, "dropping lone coordinate");
                None
            }
        }
    }

    fn category_of(&self, payload: &Value, mapping: &FieldMapping) -> Category {
        let from_types = match mapping.get(payload, Field::Types) {
            Some(Value::Array(items)) => {
                let labels: Vec<String> = items.iter().filter_map(text_of).collect();
                self.rules.classify_all(&labels)
            }
            Some(other) => text_of(other)
                .map(|t| self.rules.classify(&t))
                .unwrap_or(Category::Other),
            None => Category::Other,
        };
        if from_types != Category::Other {
            return from_types;
        }

        mapping
            .get(payload, Field::Category)
            .and_then(text_of)
            .map(|t| self.rules.classify(&t))
            .unwrap_or(Category::Other)
    }
}

impl Default for SourceNormalizer {
    fn default() -> Self {
        SourceNormalizer::new(CategoryRules::default())
    }
}

fn normalize_review(
    item: &Value,
    mapping: &FieldMapping,
    source: &str,
    fetched_at: DateTime<Utc>,
) -> Result<CandidateReview, ValidationError> {
    let rating = mapping
        .get_review(item, ReviewField::Rating)
        .ok_or_else(|| ValidationError::new("review.rating", "missing"))
        .and_then(parse_star_rating)?;

    let text = mapping
        .get_review(item, ReviewField::Text)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let author = mapping
        .get_review(item, ReviewField::Author)
        .and_then(text_of)
        .unwrap_or_else(|| "Anonymous".to_string());

    let declared_posted_at = mapping
        .get_review(item, ReviewField::PostedAt)
        .and_then(parse_timestamp);

    let external_review_id = mapping
        .get_review(item, ReviewField::ExternalId)
        .and_then(text_of)
        .unwrap_or_else(|| derive_review_id(source, &author, declared_posted_at.as_ref(), &text));

    Ok(CandidateReview {
        external_review_id,
        rating,
        text,
        author,
        posted_at: declared_posted_at.unwrap_or(fetched_at),
        posted_at_declared: declared_posted_at.is_some(),
        relative_time_desc: mapping
            .get_review(item, ReviewField::RelativeTime)
            .and_then(text_of),
        helpful_votes: mapping
            .get_review(item, ReviewField::HelpfulVotes)
            .and_then(parse_count),
    })
}

// ============================================================================
// FIELD PARSERS
// ============================================================================

/// Trimmed text; numbers are stringified, whitespace-only is missing
fn text_of(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn number_of(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if n.is_finite() {
        Some(n)
    } else {
        None
    }
}

/// Business rating: number or numeric string, clamped to [0, 5]
pub fn parse_rating(value: &Value) -> Option<f64> {
    number_of(value).map(|r| r.clamp(0.0, 5.0))
}

/// Count from a number or a string with thousands separators ("1,234")
pub fn parse_count(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => {
            let digits: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, ',' | '_' | ' ' | '\u{a0}'))
                .collect();
            digits.parse::<u32>().ok()
        }
        _ => None,
    }
}

/// Review star rating: integer 1..=5, nothing else
fn parse_star_rating(value: &Value) -> Result<u8, ValidationError> {
    let n = number_of(value)
        .ok_or_else(|| ValidationError::new("review.rating", format!("not a number: {}", value)))?;

    if n.fract() != 0.0 || !(1.0..=5.0).contains(&n) {
        return Err(ValidationError::new(
            "review.rating",
            format!("must be an integer 1-5, got {}", n),
        ));
    }
    Ok(n as u8)
}

/// RFC 3339, `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, or Unix seconds
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
            }
            if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
                return s
                    .parse::<i64>()
                    .ok()
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
            }
            None
        }
        _ => None,
    }
}

/// "$".."$$$$" from places price levels, numeric levels, or dollar strings
fn parse_price_range(value: &Value) -> Option<String> {
    let dollars = |n: usize| Some("$".repeat(n));

    match value {
        Value::Number(n) => match n.as_u64() {
            Some(level @ 1..=4) => dollars(level as usize),
            _ => None,
        },
        Value::String(s) => match s.trim() {
            "PRICE_LEVEL_FREE" | "PRICE_LEVEL_INEXPENSIVE" => dollars(1),
            "PRICE_LEVEL_MODERATE" => dollars(2),
            "PRICE_LEVEL_EXPENSIVE" => dollars(3),
            "PRICE_LEVEL_VERY_EXPENSIVE" => dollars(4),
            "PRICE_LEVEL_UNSPECIFIED" | "" => None,
            other => match other.parse::<usize>() {
                Ok(level @ 1..=4) => dollars(level),
                Ok(_) => None,
                Err(_) => Some(other.to_string()),
            },
        },
        _ => None,
    }
}

const DAY_NAMES: [&str; 7] = [
    "sunday",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
];

fn day_name(key: &str) -> Option<&'static str> {
    let key = key.trim().to_lowercase();
    if key.len() < 3 {
        return None;
    }
    DAY_NAMES.iter().copied().find(|d| d.starts_with(&key) || key.starts_with(d))
}

/// "9:00" → "09:00"
fn clock(text: &str) -> Option<String> {
    let (h, m) = text.trim().split_once(':')?;
    let h: u32 = h.trim().parse().ok()?;
    let m: u32 = m.trim().parse().ok()?;
    if h > 24 || m > 59 {
        return None;
    }
    Some(format!("{:02}:{:02}", h, m))
}

fn interval(text: &str) -> Option<OpenInterval> {
    let (open, close) = text.split_once('-')?;
    Some(OpenInterval {
        open: clock(open)?,
        close: clock(close)?,
    })
}

fn places_clock(point: &Value) -> Option<(usize, String)> {
    let day = point.get("day")?.as_u64()? as usize;
    let hour = point.get("hour").and_then(|v| v.as_u64()).unwrap_or(0);
    let minute = point.get("minute").and_then(|v| v.as_u64()).unwrap_or(0);
    if day > 6 {
        return None;
    }
    Some((day, format!("{:02}:{:02}", hour, minute)))
}

/// Places `regularOpeningHours`, a `{day: "HH:MM-HH:MM"}` object, or free text
pub fn parse_hours(value: &Value) -> Option<HoursSchedule> {
    let mut schedule = HoursSchedule::default();

    match value {
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() {
                schedule.raw = Some(s.to_string());
            }
        }
        Value::Object(map) if map.contains_key("periods") || map.contains_key("weekdayDescriptions") => {
            if let Some(Value::Array(periods)) = map.get("periods") {
                for period in periods {
                    let Some((day, open)) = period.get("open").and_then(places_clock) else {
                        continue;
                    };
                    let close = period
                        .get("close")
                        .and_then(places_clock)
                        .map(|(_, c)| c)
                        .unwrap_or_else(|| "24:00".to_string());
                    schedule
                        .weekly
                        .entry(DAY_NAMES[day].to_string())
                        .or_default()
                        .push(OpenInterval { open, close });
                }
            }
            if schedule.weekly.is_empty() {
                if let Some(Value::Array(lines)) = map.get("weekdayDescriptions") {
                    let text: Vec<String> = lines.iter().filter_map(text_of).collect();
                    if !text.is_empty() {
                        schedule.raw = Some(text.join("; "));
                    }
                }
            }
        }
        Value::Object(map) => {
            let mut weekly: BTreeMap<String, Vec<OpenInterval>> = BTreeMap::new();
            for (key, spec) in map {
                let Some(day) = day_name(key) else { continue };
                let pieces: Vec<String> = match spec {
                    Value::String(s) => s.split(',').map(|p| p.to_string()).collect(),
                    Value::Array(items) => items.iter().filter_map(text_of).collect(),
                    _ => continue,
                };
                let intervals: Vec<OpenInterval> = pieces.iter().filter_map(|p| interval(p)).collect();
                // "closed" days keep an empty entry
                weekly.entry(day.to_string()).or_default().extend(intervals);
            }
            if weekly.values().all(|v| v.is_empty()) {
                schedule.raw = Some(value.to_string());
            } else {
                schedule.weekly = weekly;
            }
        }
        _ => {}
    }

    for intervals in schedule.weekly.values_mut() {
        intervals.sort_by(|a, b| a.open.cmp(&b.open));
    }

    if schedule.is_empty() {
        None
    } else {
        Some(schedule)
    }
}

/// Stable provenance id for sources that do not supply one
fn derived_external_id(
    source: &str,
    name: &str,
    address: Option<&str>,
    location: Option<&Location>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"|");
    hasher.update(name.to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(address.unwrap_or("").to_lowercase().as_bytes());
    if let Some(loc) = location {
        hasher.update(format!("|{:.5},{:.5}", loc.latitude, loc.longitude).as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("derived-{}", &digest[..16])
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{DirectoryAdapter, PlacesApiAdapter, ScrapeAdapter, SourceAdapter};
    use serde_json::json;

    fn batch_ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn raw(source: &str, payload: Value) -> RawRecord {
        RawRecord {
            source_name: source.to_string(),
            payload,
            position: 1,
        }
    }

    fn places_mapping() -> FieldMapping {
        PlacesApiAdapter::new("unused.json").field_mapping().clone()
    }

    fn scrape_mapping() -> FieldMapping {
        ScrapeAdapter::new("unused.jsonl").field_mapping().clone()
    }

    #[test]
    fn test_places_record_normalizes() {
        let normalizer = SourceNormalizer::default();
        let record = raw(
            "google_places",
            json!({
                "id": "ChIJ123",
                "displayName": {"text": "  Joe's Pizza "},
                "formattedAddress": "123 Main St, New York, NY",
                "location": {"latitude": 40.7128, "longitude": -74.0060},
                "rating": 4.6,
                "userRatingCount": 1523,
                "types": ["pizza_restaurant", "restaurant", "food"],
                "priceLevel": "PRICE_LEVEL_MODERATE",
                "reviews": [
                    {
                        "name": "places/ChIJ123/reviews/r1",
                        "rating": 5,
                        "text": {"text": "Best slice in town"},
                        "authorAttribution": {"displayName": "Ana"},
                        "publishTime": "2025-05-20T18:30:00Z",
                        "relativePublishTimeDescription": "a week ago"
                    }
                ]
            }),
        );

        let candidate = normalizer
            .normalize(&record, &places_mapping(), SourceKind::PlacesApi, batch_ts())
            .unwrap();

        let snap = &candidate.snapshot;
        assert_eq!(snap.name, "Joe's Pizza");
        assert_eq!(snap.category, Category::Restaurant);
        assert_eq!(snap.review_count, Some(1523));
        assert_eq!(snap.price_range.as_deref(), Some("$$"));
        assert_eq!(snap.provenance.fetched_at, batch_ts());
        assert!(!snap.fetched_at_declared);
        assert_eq!(candidate.reviews.len(), 1);
        assert!(candidate.reviews[0].posted_at_declared);
        assert_eq!(candidate.reviews[0].author, "Ana");
        assert_eq!(
            candidate.reviews[0].relative_time_desc.as_deref(),
            Some("a week ago")
        );
    }

    #[test]
    fn test_requires_name() {
        let normalizer = SourceNormalizer::default();
        let record = raw("scrape", json!({"name": "   ", "address": "1 Elm St"}));

        let err = normalizer
            .normalize(&record, &scrape_mapping(), SourceKind::Scrape, batch_ts())
            .unwrap_err();
        assert_eq!(err.field, "name");
    }

    #[test]
    fn test_requires_address_or_location() {
        let normalizer = SourceNormalizer::default();

        // Invalid coordinates are dropped, leaving nothing to identify by
        let record = raw("scrape", json!({"name": "Ghost Cafe", "latitude": 0.0, "longitude": 0.0}));
        let err = normalizer
            .normalize(&record, &scrape_mapping(), SourceKind::Scrape, batch_ts())
            .unwrap_err();
        assert_eq!(err.field, "address");

        // Name + valid location is enough
        let record = raw("scrape", json!({"name": "Real Cafe", "latitude": 30.1, "longitude": -97.7}));
        assert!(normalizer
            .normalize(&record, &scrape_mapping(), SourceKind::Scrape, batch_ts())
            .is_ok());
    }

    #[test]
    fn test_invalid_coordinates_dropped_not_rejected() {
        let normalizer = SourceNormalizer::default();
        for (lat, lon) in [(json!(95.0), json!(10.0)), (json!(40.0), Value::Null), (json!("abc"), json!(1.0))] {
            let record = raw(
                "scrape",
                json!({"name": "Corner Shop", "address": "9 Pine Rd", "latitude": lat, "longitude": lon}),
            );
            let candidate = normalizer
                .normalize(&record, &scrape_mapping(), SourceKind::Scrape, batch_ts())
                .unwrap();
            assert!(candidate.snapshot.location.is_none());
        }
    }

    #[test]
    fn test_bad_review_dropped_business_kept() {
        let normalizer = SourceNormalizer::default();
        let record = raw(
            "scrape",
            json!({
                "source_id": "s-9",
                "name": "Taco Stand",
                "address": "5 Oak Ave",
                "reviews": [
                    {"source_review_id": "a", "rating": 6, "review_text": "??"},
                    {"source_review_id": "b", "rating": 3.5, "review_text": "ok"},
                    {"source_review_id": "c", "rating": "4", "review_text": "good", "review_date": "2025-05-02"}
                ]
            }),
        );

        let candidate = normalizer
            .normalize(&record, &scrape_mapping(), SourceKind::Scrape, batch_ts())
            .unwrap();

        assert_eq!(candidate.reviews.len(), 1);
        assert_eq!(candidate.dropped_reviews.len(), 2);
        assert_eq!(candidate.reviews[0].rating, 4);
        assert_eq!(
            candidate.reviews[0].posted_at,
            Utc.with_ymd_and_hms(2025, 5, 2, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_review_id_derived_and_posted_at_falls_back() {
        let normalizer = SourceNormalizer::default();
        let record = raw(
            "scrape",
            json!({
                "name": "Taco Stand",
                "address": "5 Oak Ave",
                "last_updated": "2025-05-30T12:00:00Z",
                "reviews": [{"rating": 5, "review_text": "Great", "reviewer_name": "Li"}]
            }),
        );

        let first = normalizer
            .normalize(&record, &scrape_mapping(), SourceKind::Scrape, batch_ts())
            .unwrap();
        let second = normalizer
            .normalize(&record, &scrape_mapping(), SourceKind::Scrape, batch_ts())
            .unwrap();

        assert_eq!(first, second);
        let fetched = Utc.with_ymd_and_hms(2025, 5, 30, 12, 0, 0).unwrap();
        assert_eq!(first.snapshot.provenance.fetched_at, fetched);
        assert_eq!(first.reviews[0].posted_at, fetched);
        assert_eq!(first.reviews[0].external_review_id.len(), 64);
        assert!(first.snapshot.provenance.external_id.starts_with("derived-"));
        assert!(first.snapshot.fetched_at_declared);
        assert!(!first.reviews[0].posted_at_declared);
    }

    #[test]
    fn test_undated_review_keeps_id_across_batches() {
        let normalizer = SourceNormalizer::default();
        // No review date, no record fetch time: both fall back to the batch clock
        let record = raw(
            "scrape",
            json!({
                "source_id": "s-4",
                "name": "Taco Stand",
                "address": "5 Oak Ave",
                "reviews": [{"rating": 4, "review_text": "Solid", "reviewer_name": "Li"}]
            }),
        );
        let later = batch_ts() + chrono::Duration::days(7);

        let monday = normalizer
            .normalize(&record, &scrape_mapping(), SourceKind::Scrape, batch_ts())
            .unwrap();
        let next_week = normalizer
            .normalize(&record, &scrape_mapping(), SourceKind::Scrape, later)
            .unwrap();

        assert_eq!(
            monday.reviews[0].external_review_id,
            next_week.reviews[0].external_review_id
        );
        assert_eq!(monday.reviews[0].posted_at, batch_ts());
        assert_eq!(next_week.reviews[0].posted_at, later);
        assert!(!monday.snapshot.fetched_at_declared);
    }

    #[test]
    fn test_directory_strings_parse() {
        let normalizer = SourceNormalizer::default();
        let mapping = DirectoryAdapter::new("unused.csv").field_mapping().clone();
        let record = raw(
            "directory",
            json!({
                "id": "d-1",
                "name": "Joes Pizza",
                "address": "123 Main Street",
                "category": "Pizza Restaurant",
                "lat": "40.71307",
                "lon": "-74.0060",
                "rating": "7.5",
                "review_count": "1,204",
                "hours": "Mon-Fri 11am-10pm"
            }),
        );

        let candidate = normalizer
            .normalize(&record, &mapping, SourceKind::Directory, batch_ts())
            .unwrap();
        let snap = candidate.snapshot;

        assert_eq!(snap.category, Category::Restaurant);
        assert_eq!(snap.rating, Some(5.0));
        assert_eq!(snap.review_count, Some(1204));
        assert!(snap.location.is_some());
        assert_eq!(
            snap.hours.and_then(|h| h.raw).as_deref(),
            Some("Mon-Fri 11am-10pm")
        );
    }

    #[test]
    fn test_parse_places_hours() {
        let hours = parse_hours(&json!({
            "periods": [
                {"open": {"day": 1, "hour": 9, "minute": 0}, "close": {"day": 1, "hour": 17, "minute": 30}},
                {"open": {"day": 0, "hour": 0, "minute": 0}}
            ]
        }))
        .unwrap();

        assert_eq!(hours.weekly["monday"][0].close, "17:30");
        assert_eq!(hours.weekly["sunday"][0].close, "24:00");
    }

    #[test]
    fn test_parse_day_object_hours() {
        let hours = parse_hours(&json!({"Mon": "9:00-12:00, 13:00-17:00", "sunday": "closed"})).unwrap();
        assert_eq!(hours.weekly["monday"].len(), 2);
        assert_eq!(hours.weekly["monday"][0].open, "09:00");
        assert!(hours.weekly["sunday"].is_empty());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp(&json!("2025-01-02")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2025-01-02T00:00:00+00:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!(expected.timestamp())), Some(expected));
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
    }
}
