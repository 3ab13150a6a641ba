// 🏗️ Source Adapters - one per upstream source
// Pluggable system: places API payloads, directory CSV exports, scraped JSON Lines
//
// Every adapter yields untyped `RawRecord`s plus an explicit `FieldMapping`
// (canonical field → dot path). The normalizer is the only consumer of the
// untyped shape; nothing downstream sees raw JSON.

use crate::entities::SourceKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

// ============================================================================
// CORE TYPES
// ============================================================================

/// One record as fetched, before normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source_name: String,
    pub payload: Value,
    /// 1-based position in the fetched batch (line or array index)
    pub position: usize,
}

/// Canonical business fields a source can map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    ExternalId,
    Name,
    Address,
    Category,
    /// List of type labels (places API)
    Types,
    Latitude,
    Longitude,
    Rating,
    ReviewCount,
    Hours,
    Phone,
    Website,
    PriceRange,
    FetchedAt,
    Reviews,
}

/// Fields of one nested review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewField {
    ExternalId,
    Rating,
    Text,
    Author,
    PostedAt,
    RelativeTime,
    HelpfulVotes,
}

/// Explicit table from canonical field → dot-separated JSON path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub business: BTreeMap<Field, String>,
    pub review: BTreeMap<ReviewField, String>,
}

impl FieldMapping {
    pub fn new() -> Self {
        FieldMapping::default()
    }

    /// Builder pattern: map a business field
    pub fn with(mut self, field: Field, path: &str) -> Self {
        self.business.insert(field, path.to_string());
        self
    }

    /// Builder pattern: map a nested review field
    pub fn with_review(mut self, field: ReviewField, path: &str) -> Self {
        self.review.insert(field, path.to_string());
        self
    }

    /// Mapped value, treating JSON null as absent
    pub fn get<'a>(&self, record: &'a Value, field: Field) -> Option<&'a Value> {
        self.business
            .get(&field)
            .and_then(|path| value_at(record, path))
    }

    pub fn get_review<'a>(&self, review: &'a Value, field: ReviewField) -> Option<&'a Value> {
        self.review
            .get(&field)
            .and_then(|path| value_at(review, path))
    }
}

/// Resolve a dot path: object keys by name, array elements by index
pub fn value_at<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

// ============================================================================
// ADAPTER TRAIT
// ============================================================================

/// SourceAdapter - the capability every source provides
///
/// Adding a source = implementing this trait; the normalizer, resolver and
/// tasks stay untouched.
pub trait SourceAdapter: Send + Sync {
    /// Fetch the raw records of one batch
    fn fetch(&self) -> Result<Vec<RawRecord>>;

    fn field_mapping(&self) -> &FieldMapping;

    /// Provenance name stored with every snapshot and review
    fn source_name(&self) -> &str;

    fn source_kind(&self) -> SourceKind;
}

/// Build the adapter for a CLI source label
pub fn adapter_for(label: &str, path: &Path) -> Result<Box<dyn SourceAdapter>> {
    match label.to_lowercase().as_str() {
        "places" | "places_api" | "google_places" => Ok(Box::new(PlacesApiAdapter::new(path))),
        "directory" | "csv" => Ok(Box::new(DirectoryAdapter::new(path))),
        "scrape" | "scraper" | "jsonl" => Ok(Box::new(ScrapeAdapter::new(path))),
        other => anyhow::bail!(
            "Unknown source '{}': expected one of places, directory, scrape",
            other
        ),
    }
}

// ============================================================================
// PLACES API ADAPTER
// ============================================================================

/// Places API search/detail payloads saved as a JSON array (or `{"places": [...]}`)
pub struct PlacesApiAdapter {
    path: PathBuf,
    source_name: String,
    mapping: FieldMapping,
}

impl PlacesApiAdapter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let mapping = FieldMapping::new()
            .with(Field::ExternalId, "id")
            .with(Field::Name, "displayName.text")
            .with(Field::Address, "formattedAddress")
            .with(Field::Types, "types")
            .with(Field::Latitude, "location.latitude")
            .with(Field::Longitude, "location.longitude")
            .with(Field::Rating, "rating")
            .with(Field::ReviewCount, "userRatingCount")
            .with(Field::Hours, "regularOpeningHours")
            .with(Field::Phone, "nationalPhoneNumber")
            .with(Field::Website, "websiteUri")
            .with(Field::PriceRange, "priceLevel")
            .with(Field::FetchedAt, "fetchedAt")
            .with(Field::Reviews, "reviews")
            .with_review(ReviewField::ExternalId, "name")
            .with_review(ReviewField::Rating, "rating")
            .with_review(ReviewField::Text, "text.text")
            .with_review(ReviewField::Author, "authorAttribution.displayName")
            .with_review(ReviewField::PostedAt, "publishTime")
            .with_review(ReviewField::RelativeTime, "relativePublishTimeDescription");

        PlacesApiAdapter {
            path: path.as_ref().to_path_buf(),
            source_name: "google_places".to_string(),
            mapping,
        }
    }

    pub fn with_source_name(mut self, name: &str) -> Self {
        self.source_name = name.to_string();
        self
    }
}

impl SourceAdapter for PlacesApiAdapter {
    fn fetch(&self) -> Result<Vec<RawRecord>> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read places file: {}", self.path.display()))?;
        let document: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse places JSON: {}", self.path.display()))?;

        let items = match document {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("places") {
                Some(Value::Array(items)) => items,
                _ => vec![Value::Object(map)],
            },
            _ => anyhow::bail!("Places file must hold an array or an object"),
        };

        Ok(items
            .into_iter()
            .enumerate()
            .map(|(i, payload)| RawRecord {
                source_name: self.source_name.clone(),
                payload,
                position: i + 1,
            })
            .collect())
    }

    fn field_mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::PlacesApi
    }
}

// ============================================================================
// DIRECTORY ADAPTER (CSV export)
// ============================================================================

/// Directory listing export: name,address,phone,website,category,hours,lat,lon,id
pub struct DirectoryAdapter {
    path: PathBuf,
    source_name: String,
    mapping: FieldMapping,
}

impl DirectoryAdapter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let mapping = FieldMapping::new()
            .with(Field::ExternalId, "id")
            .with(Field::Name, "name")
            .with(Field::Address, "address")
            .with(Field::Phone, "phone")
            .with(Field::Website, "website")
            .with(Field::Category, "category")
            .with(Field::Hours, "hours")
            .with(Field::Latitude, "lat")
            .with(Field::Longitude, "lon")
            .with(Field::Rating, "rating")
            .with(Field::ReviewCount, "review_count")
            .with(Field::PriceRange, "price_range")
            .with(Field::FetchedAt, "fetched_at");

        DirectoryAdapter {
            path: path.as_ref().to_path_buf(),
            source_name: "directory".to_string(),
            mapping,
        }
    }

    pub fn with_source_name(mut self, name: &str) -> Self {
        self.source_name = name.to_string();
        self
    }
}

impl SourceAdapter for DirectoryAdapter {
    fn fetch(&self) -> Result<Vec<RawRecord>> {
        use csv::ReaderBuilder;

        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open file: {}", self.path.display()))?;

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let headers: Vec<String> = reader
            .headers()
            .context("Failed to read CSV headers")?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        let mut records = Vec::new();
        for (line_num, result) in reader.records().enumerate() {
            let row = result.with_context(|| {
                format!(
                    "Failed to parse CSV line {} in {}",
                    line_num + 2,
                    self.path.display()
                )
            })?;

            // Empty cells stay absent so the normalizer treats them as missing
            let mut payload = serde_json::Map::new();
            for (header, cell) in headers.iter().zip(row.iter()) {
                if !cell.is_empty() {
                    payload.insert(header.clone(), Value::String(cell.to_string()));
                }
            }

            records.push(RawRecord {
                source_name: self.source_name.clone(),
                payload: Value::Object(payload),
                position: line_num + 2, // 1-indexed + header row
            });
        }

        Ok(records)
    }

    fn field_mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::Directory
    }
}

// ============================================================================
// SCRAPE ADAPTER (JSON Lines)
// ============================================================================

/// Scraper output, one business item per line with nested review items
pub struct ScrapeAdapter {
    path: PathBuf,
    source_name: String,
    mapping: FieldMapping,
}

impl ScrapeAdapter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let mapping = FieldMapping::new()
            .with(Field::ExternalId, "source_id")
            .with(Field::Name, "name")
            .with(Field::Address, "address")
            .with(Field::Category, "category")
            .with(Field::Latitude, "latitude")
            .with(Field::Longitude, "longitude")
            .with(Field::Rating, "rating")
            .with(Field::ReviewCount, "review_count")
            .with(Field::Hours, "hours")
            .with(Field::Phone, "phone")
            .with(Field::Website, "website")
            .with(Field::PriceRange, "price_range")
            .with(Field::FetchedAt, "last_updated")
            .with(Field::Reviews, "reviews")
            .with_review(ReviewField::ExternalId, "source_review_id")
            .with_review(ReviewField::Rating, "rating")
            .with_review(ReviewField::Text, "review_text")
            .with_review(ReviewField::Author, "reviewer_name")
            .with_review(ReviewField::PostedAt, "review_date")
            .with_review(ReviewField::HelpfulVotes, "helpful_votes");

        ScrapeAdapter {
            path: path.as_ref().to_path_buf(),
            source_name: "scrape".to_string(),
            mapping,
        }
    }

    pub fn with_source_name(mut self, name: &str) -> Self {
        self.source_name = name.to_string();
        self
    }
}

impl SourceAdapter for ScrapeAdapter {
    fn fetch(&self) -> Result<Vec<RawRecord>> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read scrape file: {}", self.path.display()))?;

        let mut records = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let payload: Value = serde_json::from_str(line).with_context(|| {
                format!(
                    "Failed to parse JSON line {} in {}",
                    line_num + 1,
                    self.path.display()
                )
            })?;
            records.push(RawRecord {
                source_name: self.source_name.clone(),
                payload,
                position: line_num + 1,
            });
        }

        Ok(records)
    }

    fn field_mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::Scrape
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_value_at_paths() {
        let value = json!({
            "displayName": {"text": "Joe's Pizza"},
            "types": ["restaurant", "food"],
            "rating": null
        });

        assert_eq!(value_at(&value, "displayName.text"), Some(&json!("Joe's Pizza")));
        assert_eq!(value_at(&value, "types.1"), Some(&json!("food")));
        assert_eq!(value_at(&value, "rating"), None);
        assert_eq!(value_at(&value, "missing.path"), None);
    }

    #[test]
    fn test_places_adapter_reads_wrapped_array() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"places": [{{"id": "p1", "displayName": {{"text": "Joe's Pizza"}}}}, {{"id": "p2"}}]}}"#
        )
        .unwrap();

        let adapter = PlacesApiAdapter::new(file.path());
        let records = adapter.fetch().unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source_name, "google_places");
        assert_eq!(
            adapter.field_mapping().get(&records[0].payload, Field::Name),
            Some(&json!("Joe's Pizza"))
        );
        assert_eq!(adapter.source_kind(), SourceKind::PlacesApi);
    }

    #[test]
    fn test_directory_adapter_reads_csv() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "id,name,address,phone,website,category,hours,lat,lon").unwrap();
        writeln!(file, "d-1,Joes Pizza,123 Main St,555-0100,,Pizza Restaurant,,40.71307,-74.0060").unwrap();

        let adapter = DirectoryAdapter::new(file.path());
        let records = adapter.fetch().unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].position, 2);
        let mapping = adapter.field_mapping();
        assert_eq!(mapping.get(&records[0].payload, Field::Latitude), Some(&json!("40.71307")));
        // Empty cells are absent, not empty strings
        assert_eq!(mapping.get(&records[0].payload, Field::Website), None);
    }

    #[test]
    fn test_scrape_adapter_skips_blank_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"source_id": "s1", "name": "Taco Stand"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"source_id": "s2", "name": "Burger Barn"}}"#).unwrap();

        let records = ScrapeAdapter::new(file.path()).fetch().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].position, 3);
    }

    #[test]
    fn test_scrape_adapter_rejects_malformed_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{not json").unwrap();

        let err = ScrapeAdapter::new(file.path()).fetch().unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_adapter_for_labels() {
        let path = Path::new("whatever.json");
        assert_eq!(adapter_for("places", path).unwrap().source_kind(), SourceKind::PlacesApi);
        assert_eq!(adapter_for("Directory", path).unwrap().source_kind(), SourceKind::Directory);
        assert!(adapter_for("fax", path).is_err());
    }
}
