// 🏪 Business Entity - stable identity over many source snapshots
//
// "The business UUID is IDENTITY (never changes), every field is a VALUE
//  derived from whatever sources have told us about it."
//
// Problem solved:
// - "Joe's Pizza" from the places API and "Joes Pizza" from a directory are
//   one business with two provenance entries
// - Canonical fields are recomputed from ALL snapshots on every change, so the
//   result never depends on the order sources arrived in
// - aggregate_rating is derived, never set by callers

use super::category::Category;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

// ============================================================================
// SOURCE KIND
// ============================================================================

/// Provenance precedence: authoritative API > directory > generic scrape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    PlacesApi,
    Directory,
    Scrape,
}

impl SourceKind {
    pub fn precedence(&self) -> u8 {
        match self {
            SourceKind::PlacesApi => 3,
            SourceKind::Directory => 2,
            SourceKind::Scrape => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::PlacesApi => "places_api",
            SourceKind::Directory => "directory",
            SourceKind::Scrape => "scrape",
        }
    }

    pub fn from_str_lossy(s: &str) -> SourceKind {
        match s {
            "places_api" => SourceKind::PlacesApi,
            "directory" => SourceKind::Directory,
            _ => SourceKind::Scrape,
        }
    }
}

// ============================================================================
// VALUE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// Both coordinates finite and inside geographic ranges, and not (0, 0)
    pub fn new_checked(latitude: f64, longitude: f64) -> Option<Location> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude)
            && !(latitude == 0.0 && longitude == 0.0);

        if valid {
            Some(Location {
                latitude,
                longitude,
            })
        } else {
            None
        }
    }
}

/// One contributing source record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    pub source_name: String,
    pub external_id: String,
    pub fetched_at: DateTime<Utc>,
}

impl Provenance {
    pub fn key(&self) -> (String, String) {
        (self.source_name.clone(), self.external_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInterval {
    /// "HH:MM"
    pub open: String,
    pub close: String,
}

/// Weekly schedule keyed by lowercase day name ("monday" ...)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoursSchedule {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub weekly: BTreeMap<String, Vec<OpenInterval>>,

    /// Unparsed text when a source only gives a free-form string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl HoursSchedule {
    pub fn is_empty(&self) -> bool {
        self.weekly.is_empty() && self.raw.as_deref().map_or(true, |r| r.trim().is_empty())
    }
}

// ============================================================================
// SOURCE SNAPSHOT
// ============================================================================

/// The latest normalized values one provenance contributed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub provenance: Provenance,
    pub kind: SourceKind,
    pub name: String,
    pub address: Option<String>,
    pub category: Category,
    pub location: Option<Location>,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub hours: Option<HoursSchedule>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub price_range: Option<String>,

    /// fetched_at came from the record; false when it is the batch clock
    #[serde(default)]
    pub fetched_at_declared: bool,
}

impl SourceSnapshot {
    /// Declared completeness: number of non-null fields
    pub fn completeness(&self) -> usize {
        let mut count = 1; // name is always present
        count += self.address.is_some() as usize;
        count += (self.category != Category::Other) as usize;
        count += self.location.is_some() as usize;
        count += self.rating.is_some() as usize;
        count += self.review_count.is_some() as usize;
        count += self.hours.is_some() as usize;
        count += self.phone.is_some() as usize;
        count += self.website.is_some() as usize;
        count += self.price_range.is_some() as usize;
        count
    }

    /// Fetch time the source itself reported. A batch-clock default says
    /// when we ingested, not how fresh the data is, so it never ranks.
    pub fn declared_fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at_declared.then_some(self.provenance.fetched_at)
    }

    /// Canonical precedence order; total, so sorting is deterministic
    pub fn precedence_cmp(&self, other: &SourceSnapshot) -> Ordering {
        other
            .kind
            .precedence()
            .cmp(&self.kind.precedence())
            .then_with(|| other.completeness().cmp(&self.completeness()))
            .then_with(|| other.declared_fetched_at().cmp(&self.declared_fetched_at()))
            .then_with(|| self.provenance.source_name.cmp(&other.provenance.source_name))
            .then_with(|| self.provenance.external_id.cmp(&other.provenance.external_id))
    }
}

/// Per-source review stats read back from stored reviews
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReviewStats {
    pub count: u32,
    pub mean_rating: f64,
}

// ============================================================================
// BUSINESS ENTITY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business {
    // ========================================================================
    // IDENTITY (never changes)
    // ========================================================================
    pub id: String,

    // ========================================================================
    // VALUES (derived from snapshots)
    // ========================================================================
    pub canonical_name: String,
    pub normalized_address: Option<String>,
    pub category: Category,
    pub location: Option<Location>,
    pub hours: Option<HoursSchedule>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub price_range: Option<String>,

    /// Sorted by (source_name, external_id); one entry per contributing source
    pub sources: Vec<Provenance>,

    pub(crate) aggregate_rating: f64,
    pub(crate) review_count: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Business {
    /// Build a business from its snapshots and stored review stats
    pub fn from_snapshots(
        id: String,
        created_at: DateTime<Utc>,
        snapshots: &[SourceSnapshot],
        review_stats: &HashMap<String, ReviewStats>,
    ) -> Business {
        let mut business = Business {
            id,
            canonical_name: String::new(),
            normalized_address: None,
            category: Category::Other,
            location: None,
            hours: None,
            phone: None,
            website: None,
            price_range: None,
            sources: Vec::new(),
            aggregate_rating: 0.0,
            review_count: 0,
            created_at,
            updated_at: created_at,
        };
        business.rebuild(snapshots, review_stats);
        business
    }

    /// Recompute every derived value from the full snapshot set
    pub fn rebuild(
        &mut self,
        snapshots: &[SourceSnapshot],
        review_stats: &HashMap<String, ReviewStats>,
    ) {
        let mut ordered: Vec<&SourceSnapshot> = snapshots.iter().collect();
        ordered.sort_by(|a, b| a.precedence_cmp(b));

        if let Some(first) = ordered.first() {
            self.canonical_name = first.name.clone();
        }
        self.normalized_address = ordered.iter().find_map(|s| s.address.clone());
        self.category = ordered
            .iter()
            .map(|s| s.category)
            .find(|c| *c != Category::Other)
            .unwrap_or(Category::Other);
        self.location = ordered.iter().find_map(|s| s.location);
        self.hours = ordered.iter().find_map(|s| s.hours.clone());
        self.phone = ordered.iter().find_map(|s| s.phone.clone());
        self.website = ordered.iter().find_map(|s| s.website.clone());
        self.price_range = ordered.iter().find_map(|s| s.price_range.clone());

        let mut sources: Vec<Provenance> = snapshots.iter().map(|s| s.provenance.clone()).collect();
        sources.sort_by(|a, b| {
            a.source_name
                .cmp(&b.source_name)
                .then_with(|| a.external_id.cmp(&b.external_id))
        });
        sources.dedup_by(|a, b| a.source_name == b.source_name && a.external_id == b.external_id);
        self.sources = sources;

        let (rating, count) = weighted_rating(snapshots, review_stats);
        self.aggregate_rating = rating;
        self.review_count = count;
    }

    pub fn aggregate_rating(&self) -> f64 {
        self.aggregate_rating
    }

    pub fn review_count(&self) -> u32 {
        self.review_count
    }

    /// (source_name, external_id) pairs
    pub fn source_keys(&self) -> BTreeSet<(String, String)> {
        self.sources.iter().map(|p| p.key()).collect()
    }

    pub fn has_source(&self, source_name: &str, external_id: &str) -> bool {
        self.sources
            .iter()
            .any(|p| p.source_name == source_name && p.external_id == external_id)
    }
}

/// Review-count-weighted mean across contributing sources.
///
/// A snapshot that declares both rating and a positive count contributes
/// `(rating, count)`. A source name with no such declaration falls back to the
/// mean/count of its stored reviews; failing that, a bare declared rating
/// counts with weight 1.
pub(crate) fn weighted_rating(
    snapshots: &[SourceSnapshot],
    review_stats: &HashMap<String, ReviewStats>,
) -> (f64, u32) {
    let mut by_source: BTreeMap<&str, Vec<&SourceSnapshot>> = BTreeMap::new();
    for snapshot in snapshots {
        by_source
            .entry(snapshot.provenance.source_name.as_str())
            .or_default()
            .push(snapshot);
    }

    let mut contributions: Vec<(f64, u32)> = Vec::new();

    for (source_name, group) in by_source {
        let mut declared: Vec<(f64, u32)> = group
            .iter()
            .filter_map(|s| match (s.rating, s.review_count) {
                (Some(r), Some(c)) if c > 0 => Some((r, c)),
                _ => None,
            })
            .collect();

        if !declared.is_empty() {
            declared.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            contributions.extend(declared);
            continue;
        }

        if let Some(stats) = review_stats.get(source_name).filter(|s| s.count > 0) {
            contributions.push((stats.mean_rating, stats.count));
            continue;
        }

        let mut bare: Vec<f64> = group.iter().filter_map(|s| s.rating).collect();
        bare.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        contributions.extend(bare.into_iter().map(|r| (r, 1)));
    }

    let total: u64 = contributions.iter().map(|(_, c)| *c as u64).sum();
    if total == 0 {
        return (0.0, 0);
    }

    let weighted: f64 = contributions.iter().map(|(r, c)| r * (*c as f64)).sum();
    (weighted / total as f64, total.min(u32::MAX as u64) as u32)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(source: &str, kind: SourceKind, name: &str, fetched_day: u32) -> SourceSnapshot {
        SourceSnapshot {
            provenance: Provenance {
                source_name: source.to_string(),
                external_id: format!("{}-1", source),
                fetched_at: Utc.with_ymd_and_hms(2025, 1, fetched_day, 12, 0, 0).unwrap(),
            },
            kind,
            name: name.to_string(),
            address: None,
            category: Category::Other,
            location: None,
            rating: None,
            review_count: None,
            hours: None,
            phone: None,
            website: None,
            price_range: None,
            fetched_at_declared: true,
        }
    }

    #[test]
    fn test_location_validation() {
        assert!(Location::new_checked(40.7, -74.0).is_some());
        assert!(Location::new_checked(91.0, -74.0).is_none());
        assert!(Location::new_checked(40.7, 181.0).is_none());
        assert!(Location::new_checked(f64::NAN, 10.0).is_none());
        assert!(Location::new_checked(0.0, 0.0).is_none());
    }

    #[test]
    fn test_precedence_prefers_authoritative_source() {
        let mut scrape = snapshot("scrape", SourceKind::Scrape, "Joes Pizza Shop", 5);
        scrape.phone = Some("555-0100".to_string());
        let mut api = snapshot("google_places", SourceKind::PlacesApi, "Joe's Pizza", 1);
        api.address = Some("123 Main St".to_string());

        let business = Business::from_snapshots(
            "b1".to_string(),
            Utc::now(),
            &[scrape, api],
            &HashMap::new(),
        );

        assert_eq!(business.canonical_name, "Joe's Pizza");
        assert_eq!(business.normalized_address.as_deref(), Some("123 Main St"));
        // Field missing from the API snapshot falls through to the scrape
        assert_eq!(business.phone.as_deref(), Some("555-0100"));
        assert_eq!(business.sources.len(), 2);
    }

    #[test]
    fn test_rebuild_is_order_independent() {
        let mut a = snapshot("yellowpages", SourceKind::Directory, "Cafe Luna", 3);
        a.category = Category::Cafe;
        a.rating = Some(4.0);
        a.review_count = Some(10);
        let mut b = snapshot("google_places", SourceKind::PlacesApi, "Café Luna", 2);
        b.rating = Some(5.0);
        b.review_count = Some(30);

        let stats = HashMap::new();
        let forward = Business::from_snapshots("x".into(), Utc::now(), &[a.clone(), b.clone()], &stats);
        let backward = Business::from_snapshots("x".into(), Utc::now(), &[b, a], &stats);

        assert_eq!(forward.canonical_name, backward.canonical_name);
        assert_eq!(forward.category, Category::Cafe);
        assert_eq!(forward.source_keys(), backward.source_keys());
        assert!((forward.aggregate_rating() - backward.aggregate_rating()).abs() < 1e-9);
        // (4.0*10 + 5.0*30) / 40
        assert!((forward.aggregate_rating() - 4.75).abs() < 1e-9);
        assert_eq!(forward.review_count(), 40);
    }

    #[test]
    fn test_batch_clock_does_not_pick_canonical_values() {
        // Two scrapes of the same shop, neither carrying its own fetch time;
        // scrape_b merely landed in a later batch
        let mut a = snapshot("scrape_a", SourceKind::Scrape, "Joes Pizza", 1);
        let mut b = snapshot("scrape_b", SourceKind::Scrape, "JOE'S PIZZA", 9);
        a.fetched_at_declared = false;
        b.fetched_at_declared = false;
        let stats = HashMap::new();

        let forward = Business::from_snapshots("x".into(), Utc::now(), &[a.clone(), b.clone()], &stats);
        let backward = Business::from_snapshots("x".into(), Utc::now(), &[b.clone(), a.clone()], &stats);
        assert_eq!(forward.canonical_name, "Joes Pizza");
        assert_eq!(backward.canonical_name, "Joes Pizza");

        // A declared fetch time still ranks
        b.fetched_at_declared = true;
        let declared = Business::from_snapshots("x".into(), Utc::now(), &[a, b], &stats);
        assert_eq!(declared.canonical_name, "JOE'S PIZZA");
    }

    #[test]
    fn test_weighted_rating_falls_back_to_stored_reviews() {
        let snap = snapshot("scrape", SourceKind::Scrape, "Taco Stand", 1);
        let mut stats = HashMap::new();
        stats.insert(
            "scrape".to_string(),
            ReviewStats {
                count: 4,
                mean_rating: 3.5,
            },
        );

        let (rating, count) = weighted_rating(&[snap], &stats);
        assert_eq!(count, 4);
        assert!((rating - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_rating_empty() {
        let snap = snapshot("scrape", SourceKind::Scrape, "Nowhere", 1);
        assert_eq!(weighted_rating(&[snap], &HashMap::new()), (0.0, 0));
    }

    #[test]
    fn test_completeness_counts_non_null_fields() {
        let mut snap = snapshot("scrape", SourceKind::Scrape, "Gym", 1);
        assert_eq!(snap.completeness(), 1);
        snap.category = Category::Fitness;
        snap.location = Location::new_checked(30.0, -97.0);
        assert_eq!(snap.completeness(), 3);
    }
}
