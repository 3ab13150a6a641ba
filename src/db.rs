// 🗄️ Store - SQLite persistence for businesses, reviews and derived signals
//
// One connection behind a mutex, WAL journal, bounded busy timeout.
// Every timestamp column holds RFC 3339 with microseconds and a `Z` suffix,
// so string order is time order and MIN()/range filters work on TEXT.
//
// Free functions take `&Connection` so the resolver and tasks can compose
// them inside one transaction; `Store` methods are the locked entry points.

use crate::anomaly::{AnomalyFlag, AnomalyKind, Direction, RatingPoint, Severity};
use crate::config::DatabaseConfig;
use crate::entities::{
    Business, CandidateReview, Category, Location, Provenance, Review, ReviewStats, Sentiment,
    SentimentLabel, SourceSnapshot,
};
use crate::error::{PipelineError, Result};
use crate::geo::{bounding_box, haversine_m, name_prefix, GeoIndex};
use crate::keywords::{rank, window_bounds, KeywordDelta, KeywordEngine, KeywordScope, TrendingKeyword};
use crate::normalizer::Candidate;
use crate::temporal::{Period, TimeWindow};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

// ============================================================================
// STORE
// ============================================================================

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout_ms: u64) -> Result<Store> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
        setup_database(&conn)?;
        info!(path = %path.as_ref().display(), "store opened");
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    pub fn from_config(config: &DatabaseConfig) -> Result<Store> {
        Store::open(&config.path, config.busy_timeout_ms)
    }

    pub fn open_in_memory() -> Result<Store> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panicked writer leaves SQLite consistent (its transaction rolled back)
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` inside an IMMEDIATE transaction; any error rolls back
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run a read-only closure against the connection
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock();
        f(&conn)
    }
}

impl GeoIndex for Store {
    fn near(&self, latitude: f64, longitude: f64, max_distance_m: f64) -> Result<Vec<String>> {
        self.read(|conn| conn.near(latitude, longitude, max_distance_m))
    }
}

impl GeoIndex for Connection {
    fn near(&self, latitude: f64, longitude: f64, max_distance_m: f64) -> Result<Vec<String>> {
        let center = Location {
            latitude,
            longitude,
        };
        Ok(nearby(self, &center, max_distance_m, None)?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Businesses (canonical values, recomputed from snapshots)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS businesses (
            id TEXT PRIMARY KEY,
            canonical_name TEXT NOT NULL,
            normalized_address TEXT,
            category TEXT NOT NULL,
            latitude REAL,
            longitude REAL,
            aggregate_rating REAL NOT NULL DEFAULT 0,
            review_count INTEGER NOT NULL DEFAULT 0,
            hours TEXT,
            phone TEXT,
            website TEXT,
            price_range TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Provenance snapshots (one row per source record)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS business_sources (
            source_name TEXT NOT NULL,
            external_id TEXT NOT NULL,
            business_id TEXT NOT NULL,
            source_kind TEXT NOT NULL,
            name_key TEXT NOT NULL,
            fetched_at TEXT NOT NULL,
            snapshot TEXT NOT NULL,
            PRIMARY KEY (source_name, external_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Reviews (unique per business/source/external id)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS reviews (
            id TEXT PRIMARY KEY,
            business_id TEXT NOT NULL,
            source TEXT NOT NULL,
            external_review_id TEXT NOT NULL,
            rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
            text TEXT NOT NULL,
            author TEXT NOT NULL,
            posted_at TEXT NOT NULL,
            relative_time_desc TEXT,
            helpful_votes INTEGER,
            sentiment_score REAL,
            sentiment_label TEXT,
            confidence REAL,
            keywords TEXT NOT NULL DEFAULT '[]',
            keywords_at TEXT,
            processed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (business_id, source, external_review_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Keyword day buckets (scope = 'global' | 'business:<id>')
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS keyword_counts (
            scope TEXT NOT NULL,
            day TEXT NOT NULL,
            term TEXT NOT NULL,
            count INTEGER NOT NULL,
            first_seen TEXT NOT NULL,
            PRIMARY KEY (scope, day, term)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS anomaly_flags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            business_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            direction TEXT NOT NULL,
            severity TEXT NOT NULL,
            baseline_value REAL NOT NULL,
            recent_value REAL NOT NULL,
            magnitude REAL NOT NULL,
            threshold REAL NOT NULL,
            baseline_count INTEGER NOT NULL,
            recent_count INTEGER NOT NULL,
            window_start TEXT NOT NULL,
            window_end TEXT NOT NULL,
            detected_at TEXT NOT NULL,
            UNIQUE (business_id, kind, window_start, window_end)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS manual_review_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_name TEXT NOT NULL,
            external_id TEXT NOT NULL,
            candidate TEXT NOT NULL,
            reason TEXT NOT NULL,
            tied_with TEXT NOT NULL,
            queued_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            UNIQUE (source_name, external_id)
        )",
        [],
    )?;

    // Absorbed ids keep resolving to their survivor
    conn.execute(
        "CREATE TABLE IF NOT EXISTS retired_businesses (
            id TEXT PRIMARY KEY,
            merged_into TEXT NOT NULL,
            retired_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_businesses_lat_lon ON businesses(latitude, longitude)",
        "CREATE INDEX IF NOT EXISTS idx_businesses_category ON businesses(category)",
        "CREATE INDEX IF NOT EXISTS idx_sources_business ON business_sources(business_id)",
        "CREATE INDEX IF NOT EXISTS idx_sources_name_key ON business_sources(name_key)",
        "CREATE INDEX IF NOT EXISTS idx_reviews_business_posted ON reviews(business_id, posted_at)",
        "CREATE INDEX IF NOT EXISTS idx_reviews_updated ON reviews(updated_at)",
        "CREATE INDEX IF NOT EXISTS idx_keyword_scope_day ON keyword_counts(scope, day)",
        "CREATE INDEX IF NOT EXISTS idx_flags_business ON anomaly_flags(business_id)",
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
    ];
    for sql in indexes {
        conn.execute(sql, [])?;
    }

    Ok(())
}

// ============================================================================
// COLUMN HELPERS
// ============================================================================

/// Canonical TEXT form of a timestamp
pub(crate) fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_ts(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(idx, &s)).transpose()
}

fn parse_json<T: DeserializeOwned>(idx: usize, s: &str) -> rusqlite::Result<T> {
    serde_json::from_str(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_day(idx: usize, s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const BUSINESS_COLUMNS: &str = "id, canonical_name, normalized_address, category, latitude, \
     longitude, aggregate_rating, review_count, hours, phone, website, price_range, \
     created_at, updated_at";

fn business_from_row(row: &Row) -> rusqlite::Result<Business> {
    let category: String = row.get(3)?;
    let latitude: Option<f64> = row.get(4)?;
    let longitude: Option<f64> = row.get(5)?;
    let hours: Option<String> = row.get(8)?;
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;

    Ok(Business {
        id: row.get(0)?,
        canonical_name: row.get(1)?,
        normalized_address: row.get(2)?,
        category: Category::from_str_lossy(&category),
        location: match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => Some(Location {
                latitude,
                longitude,
            }),
            _ => None,
        },
        hours: hours.map(|h| parse_json(8, &h)).transpose()?,
        phone: row.get(9)?,
        website: row.get(10)?,
        price_range: row.get(11)?,
        sources: Vec::new(),
        aggregate_rating: row.get(6)?,
        review_count: row.get(7)?,
        created_at: parse_ts(12, &created_at)?,
        updated_at: parse_ts(13, &updated_at)?,
    })
}

const REVIEW_COLUMNS: &str = "id, business_id, source, external_review_id, rating, text, author, \
     posted_at, relative_time_desc, helpful_votes, sentiment_score, sentiment_label, confidence, \
     keywords, processed_at, keywords_at, updated_at";

fn review_from_row(row: &Row) -> rusqlite::Result<StoredReview> {
    let posted_at: String = row.get(7)?;
    let score: Option<f64> = row.get(10)?;
    let label: Option<String> = row.get(11)?;
    let confidence: Option<f64> = row.get(12)?;
    let keywords: String = row.get(13)?;
    let updated_at: String = row.get(16)?;

    let sentiment = match (score, label, confidence) {
        (Some(score), Some(label), Some(confidence)) => Some(Sentiment {
            score,
            label: SentimentLabel::from_str_lossy(&label),
            confidence,
        }),
        _ => None,
    };

    Ok(StoredReview {
        review: Review {
            id: row.get(0)?,
            business_id: row.get(1)?,
            source: row.get(2)?,
            external_review_id: row.get(3)?,
            rating: row.get(4)?,
            text: row.get(5)?,
            author: row.get(6)?,
            posted_at: parse_ts(7, &posted_at)?,
            relative_time_desc: row.get(8)?,
            helpful_votes: row.get(9)?,
            sentiment,
            keywords: parse_json(13, &keywords)?,
            processed_at: parse_opt_ts(14, row.get(14)?)?,
        },
        keywords_at: parse_opt_ts(15, row.get(15)?)?,
        updated_at,
    })
}

const FLAG_COLUMNS: &str = "business_id, kind, direction, severity, baseline_value, recent_value, \
     magnitude, threshold, baseline_count, recent_count, window_start, window_end, detected_at";

fn flag_from_row(row: &Row) -> rusqlite::Result<AnomalyFlag> {
    let kind: String = row.get(1)?;
    let direction: String = row.get(2)?;
    let severity: String = row.get(3)?;
    let baseline_count: i64 = row.get(8)?;
    let recent_count: i64 = row.get(9)?;
    let window_start: String = row.get(10)?;
    let window_end: String = row.get(11)?;
    let detected_at: String = row.get(12)?;

    Ok(AnomalyFlag {
        business_id: row.get(0)?,
        kind: AnomalyKind::from_str_lossy(&kind),
        direction: Direction::from_str_lossy(&direction),
        severity: Severity::from_str_lossy(&severity),
        baseline_value: row.get(4)?,
        recent_value: row.get(5)?,
        magnitude: row.get(6)?,
        threshold: row.get(7)?,
        baseline_count: baseline_count.max(0) as usize,
        recent_count: recent_count.max(0) as usize,
        recent_window: TimeWindow::new(parse_ts(10, &window_start)?, parse_ts(11, &window_end)?),
        detected_at: parse_ts(12, &detected_at)?,
    })
}

// ============================================================================
// QUERY RESULT TYPES
// ============================================================================

/// A review row plus the bookkeeping the analytics pass needs
#[derive(Debug, Clone)]
pub struct StoredReview {
    pub review: Review,
    /// posted_at the stored keywords were counted under
    pub keywords_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token for analytics writes
    pub updated_at: String,
}

/// Derived fields for one review, ready to be written back.
///
/// Carries the row state it was computed from; the write is refused when the
/// row no longer matches, so a delta is never applied twice.
#[derive(Debug, Clone)]
pub struct ReviewAnalysis {
    pub review_id: String,
    pub sentiment: Sentiment,
    pub keywords: Vec<String>,
    pub keywords_at: DateTime<Utc>,
    pub deltas: Vec<KeywordDelta>,
    expected_updated_at: String,
    expected_keywords: Vec<String>,
    expected_keywords_at: Option<DateTime<Utc>>,
}

impl ReviewAnalysis {
    pub fn new(stored: &StoredReview, sentiment: Sentiment, keywords: Vec<String>) -> Self {
        let keywords_at = stored.review.posted_at;
        let previous = stored
            .keywords_at
            .map(|at| (stored.review.keywords.as_slice(), at));
        let deltas = KeywordEngine::diff(previous, (&keywords, keywords_at));

        ReviewAnalysis {
            review_id: stored.review.id.clone(),
            sentiment,
            keywords,
            keywords_at,
            deltas,
            expected_updated_at: stored.updated_at.clone(),
            expected_keywords: stored.review.keywords.clone(),
            expected_keywords_at: stored.keywords_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewWrite {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyBusiness {
    #[serde(flatten)]
    pub business: Business,
    pub distance_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessAnalytics {
    pub business_id: String,
    pub name: String,
    pub avg_rating: Option<f64>,
    pub total_reviews: u32,
    pub avg_sentiment: Option<f64>,
    pub earliest_review: Option<DateTime<Utc>>,
    pub latest_review: Option<DateTime<Utc>>,
    /// Star → count, every star 1..=5 present
    pub rating_distribution: BTreeMap<u8, u32>,
    /// "YYYY-MM" → count
    pub monthly_review_counts: BTreeMap<String, u32>,
    pub sentiment_breakdown: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryAnalytics {
    pub category: Category,
    pub business_count: u32,
    pub total_reviews: u32,
    pub avg_rating: Option<f64>,
    pub avg_sentiment: Option<f64>,
}

/// One business in a side-by-side comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitorEntry {
    pub business_id: String,
    pub name: String,
    pub category: Category,
    /// None when the business has no rating yet
    pub rating: Option<f64>,
    pub review_count: u32,
    pub avg_sentiment: Option<f64>,
    pub price_range: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketAverages {
    /// Two decimals
    pub rating: Option<f64>,
    pub review_count: u32,
    /// Three decimals
    pub sentiment: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitorMetrics {
    pub competitors: Vec<CompetitorEntry>,
    pub market_averages: MarketAverages,
}

impl CompetitorMetrics {
    fn from_entries(competitors: Vec<CompetitorEntry>) -> Self {
        let ratings: Vec<f64> = competitors.iter().filter_map(|c| c.rating).collect();
        let sentiments: Vec<f64> = competitors.iter().filter_map(|c| c.avg_sentiment).collect();

        let market_averages = MarketAverages {
            rating: mean(&ratings).map(|m| round_to(m, 2)),
            review_count: if competitors.is_empty() {
                0
            } else {
                let total: u64 = competitors.iter().map(|c| c.review_count as u64).sum();
                (total / competitors.len() as u64) as u32
            },
            sentiment: mean(&sentiments).map(|m| round_to(m, 3)),
        };

        CompetitorMetrics {
            competitors,
            market_averages,
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentPoint {
    pub period: String,
    pub average_sentiment: f64,
    pub average_confidence: f64,
    pub review_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedCandidate {
    pub id: i64,
    pub candidate: Candidate,
    pub reason: String,
    pub tied_with: Vec<String>,
    pub queued_at: DateTime<Utc>,
    pub status: String,
}

/// Event for audit trail ("every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            ts(&event.timestamp),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp: String = row.get(1)?;
            let data: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_ts(1, &timestamp)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: parse_json(5, &data)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(events)
}

// ============================================================================
// BUSINESS READS
// ============================================================================

/// Bounding-box prefilter, then exact haversine. Nearest first, ties by id.
fn nearby(
    conn: &Connection,
    center: &Location,
    max_distance_m: f64,
    limit: Option<usize>,
) -> Result<Vec<(String, f64)>> {
    let (min_lat, max_lat, min_lon, max_lon) = bounding_box(center, max_distance_m);

    let mut stmt = conn.prepare(
        "SELECT id, latitude, longitude FROM businesses
         WHERE latitude BETWEEN ?1 AND ?2 AND longitude BETWEEN ?3 AND ?4",
    )?;

    let mut hits: Vec<(String, f64)> = stmt
        .query_map(params![min_lat, max_lat, min_lon, max_lon], |row| {
            Ok((
                row.get::<_, String>(0)?,
                Location {
                    latitude: row.get(1)?,
                    longitude: row.get(2)?,
                },
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .map(|(id, loc)| (id, haversine_m(center, &loc)))
        .filter(|(_, d)| *d <= max_distance_m)
        .collect();

    hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    if let Some(limit) = limit {
        hits.truncate(limit);
    }
    Ok(hits)
}

/// Owner of a provenance key, if it has been seen before
pub fn find_owner(conn: &Connection, source_name: &str, external_id: &str) -> Result<Option<String>> {
    let owner = conn
        .query_row(
            "SELECT business_id FROM business_sources WHERE source_name = ?1 AND external_id = ?2",
            params![source_name, external_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(owner)
}

/// Businesses with a snapshot whose name shares the candidate's prefix
pub fn businesses_with_name_key(conn: &Connection, name: &str) -> Result<Vec<String>> {
    let key = name_prefix(name);
    if key.is_empty() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT DISTINCT business_id FROM business_sources WHERE name_key = ?1 ORDER BY business_id",
    )?;
    let ids = stmt
        .query_map([key], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

pub fn load_snapshots(conn: &Connection, business_id: &str) -> Result<Vec<SourceSnapshot>> {
    let mut stmt = conn.prepare(
        "SELECT snapshot FROM business_sources WHERE business_id = ?1
         ORDER BY source_name, external_id",
    )?;
    let snapshots = stmt
        .query_map([business_id], |row| {
            let json: String = row.get(0)?;
            parse_json(0, &json)
        })?
        .collect::<rusqlite::Result<Vec<SourceSnapshot>>>()?;
    Ok(snapshots)
}

fn load_sources(conn: &Connection, business_id: &str) -> Result<Vec<Provenance>> {
    let mut stmt = conn.prepare(
        "SELECT source_name, external_id, fetched_at FROM business_sources
         WHERE business_id = ?1 ORDER BY source_name, external_id",
    )?;
    let sources = stmt
        .query_map([business_id], |row| {
            let fetched_at: String = row.get(2)?;
            Ok(Provenance {
                source_name: row.get(0)?,
                external_id: row.get(1)?,
                fetched_at: parse_ts(2, &fetched_at)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(sources)
}

/// Load one live business by exact id (no retired-id redirect)
pub fn load_business(conn: &Connection, business_id: &str) -> Result<Option<Business>> {
    let business = conn
        .query_row(
            &format!("SELECT {} FROM businesses WHERE id = ?1", BUSINESS_COLUMNS),
            [business_id],
            business_from_row,
        )
        .optional()?;

    match business {
        Some(mut business) => {
            business.sources = load_sources(conn, &business.id)?;
            Ok(Some(business))
        }
        None => Ok(None),
    }
}

fn load_businesses(
    conn: &Connection,
    where_clause: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Business>> {
    let sql = format!("SELECT {} FROM businesses {}", BUSINESS_COLUMNS, where_clause);
    let mut stmt = conn.prepare(&sql)?;
    let mut businesses = stmt
        .query_map(args, business_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for business in &mut businesses {
        business.sources = load_sources(conn, &business.id)?;
    }
    Ok(businesses)
}

/// Live id for `id`, following a merge redirect when it was absorbed
pub fn resolve_business_id(conn: &Connection, id: &str) -> Result<Option<String>> {
    let live: Option<String> = conn
        .query_row("SELECT id FROM businesses WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    if live.is_some() {
        return Ok(live);
    }

    let survivor: Option<String> = conn
        .query_row(
            "SELECT r.merged_into FROM retired_businesses r
             JOIN businesses b ON b.id = r.merged_into
             WHERE r.id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(survivor)
}

/// Per-source count and mean of stored reviews
pub fn review_stats(conn: &Connection, business_id: &str) -> Result<HashMap<String, ReviewStats>> {
    let mut stmt = conn.prepare(
        "SELECT source, COUNT(*), AVG(rating) FROM reviews WHERE business_id = ?1 GROUP BY source",
    )?;
    let stats = stmt
        .query_map([business_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                ReviewStats {
                    count: row.get(1)?,
                    mean_rating: row.get(2)?,
                },
            ))
        })?
        .collect::<rusqlite::Result<HashMap<_, _>>>()?;
    Ok(stats)
}

// ============================================================================
// BUSINESS WRITES
// ============================================================================

pub fn write_business(conn: &Connection, business: &Business) -> Result<()> {
    let hours = business
        .hours
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO businesses (
            id, canonical_name, normalized_address, category, latitude, longitude,
            aggregate_rating, review_count, hours, phone, website, price_range,
            created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        ON CONFLICT(id) DO UPDATE SET
            canonical_name = excluded.canonical_name,
            normalized_address = excluded.normalized_address,
            category = excluded.category,
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            aggregate_rating = excluded.aggregate_rating,
            review_count = excluded.review_count,
            hours = excluded.hours,
            phone = excluded.phone,
            website = excluded.website,
            price_range = excluded.price_range,
            updated_at = excluded.updated_at",
        params![
            business.id,
            business.canonical_name,
            business.normalized_address,
            business.category.as_str(),
            business.location.map(|l| l.latitude),
            business.location.map(|l| l.longitude),
            business.aggregate_rating,
            business.review_count,
            hours,
            business.phone,
            business.website,
            business.price_range,
            ts(&business.created_at),
            ts(&business.updated_at),
        ],
    )?;
    Ok(())
}

/// Insert or refresh one provenance snapshot. An older fetch never
/// overwrites a newer one.
pub fn upsert_snapshot(conn: &Connection, business_id: &str, snapshot: &SourceSnapshot) -> Result<()> {
    let json = serde_json::to_string(snapshot)?;

    conn.execute(
        "INSERT INTO business_sources (
            source_name, external_id, business_id, source_kind, name_key, fetched_at, snapshot
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(source_name, external_id) DO UPDATE SET
            business_id = excluded.business_id,
            source_kind = excluded.source_kind,
            name_key = excluded.name_key,
            fetched_at = excluded.fetched_at,
            snapshot = excluded.snapshot
        WHERE excluded.fetched_at >= business_sources.fetched_at",
        params![
            snapshot.provenance.source_name,
            snapshot.provenance.external_id,
            business_id,
            snapshot.kind.as_str(),
            name_prefix(&snapshot.name),
            ts(&snapshot.provenance.fetched_at),
            json,
        ],
    )?;
    Ok(())
}

/// Recompute a business's canonical values from its snapshots and review
/// stats, then persist them.
pub fn refresh_business(conn: &Connection, business_id: &str, now: DateTime<Utc>) -> Result<Business> {
    let created_at: Option<String> = conn
        .query_row(
            "SELECT created_at FROM businesses WHERE id = ?1",
            [business_id],
            |row| row.get(0),
        )
        .optional()?;
    let created_at = created_at.ok_or_else(|| PipelineError::NotFound(business_id.to_string()))?;
    let created_at = parse_ts(0, &created_at)?;

    let snapshots = load_snapshots(conn, business_id)?;
    let stats = review_stats(conn, business_id)?;

    let mut business = Business::from_snapshots(business_id.to_string(), created_at, &snapshots, &stats);
    business.updated_at = now;
    write_business(conn, &business)?;
    Ok(business)
}

/// Move everything owned by `absorbed` onto `survivor` and retire `absorbed`.
///
/// Keyword buckets are summed into the survivor's scope. A review that
/// already exists on the survivor under the same (source, external id) is
/// dropped, and its keyword contribution is retracted.
pub fn absorb_business(
    conn: &Connection,
    survivor: &str,
    absorbed: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE business_sources SET business_id = ?1 WHERE business_id = ?2",
        params![survivor, absorbed],
    )?;

    let survivor_scope = KeywordScope::Business(survivor.to_string()).key();
    let absorbed_scope = KeywordScope::Business(absorbed.to_string()).key();
    conn.execute(
        "INSERT INTO keyword_counts (scope, day, term, count, first_seen)
         SELECT ?1, day, term, count, first_seen FROM keyword_counts WHERE scope = ?2
         ON CONFLICT(scope, day, term) DO UPDATE SET
            count = count + excluded.count,
            first_seen = MIN(first_seen, excluded.first_seen)",
        params![survivor_scope, absorbed_scope],
    )?;
    conn.execute("DELETE FROM keyword_counts WHERE scope = ?1", [&absorbed_scope])?;

    conn.execute(
        "UPDATE OR IGNORE reviews SET business_id = ?1 WHERE business_id = ?2",
        params![survivor, absorbed],
    )?;

    let leftovers = {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM reviews WHERE business_id = ?1",
            REVIEW_COLUMNS
        ))?;
        let rows = stmt
            .query_map([absorbed], review_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };
    for stored in &leftovers {
        retract_keywords(conn, Some(survivor), stored)?;
    }
    conn.execute("DELETE FROM reviews WHERE business_id = ?1", [absorbed])?;

    conn.execute(
        "UPDATE OR IGNORE anomaly_flags SET business_id = ?1 WHERE business_id = ?2",
        params![survivor, absorbed],
    )?;
    conn.execute("DELETE FROM anomaly_flags WHERE business_id = ?1", [absorbed])?;

    conn.execute("DELETE FROM businesses WHERE id = ?1", [absorbed])?;
    conn.execute(
        "INSERT OR REPLACE INTO retired_businesses (id, merged_into, retired_at) VALUES (?1, ?2, ?3)",
        params![absorbed, survivor, ts(&now)],
    )?;
    // Earlier redirects to the absorbed id now point at the survivor
    conn.execute(
        "UPDATE retired_businesses SET merged_into = ?1 WHERE merged_into = ?2",
        params![survivor, absorbed],
    )?;

    insert_event(
        conn,
        &Event::new(
            "business_merged",
            "business",
            survivor,
            serde_json::json!({
                "absorbed": absorbed,
                "dropped_duplicate_reviews": leftovers.len(),
            }),
            "identity_resolver",
        ),
    )?;

    debug!(survivor, absorbed, "business absorbed");
    Ok(())
}

/// Retract a stored review's keyword contribution from global and, when
/// given, a business scope.
fn retract_keywords(conn: &Connection, business_id: Option<&str>, stored: &StoredReview) -> Result<()> {
    let Some(at) = stored.keywords_at else {
        return Ok(());
    };
    if stored.review.keywords.is_empty() {
        return Ok(());
    }

    let nothing: &[String] = &[];
    let deltas = KeywordEngine::diff(Some((&stored.review.keywords, at)), (nothing, at));
    apply_keyword_deltas(conn, &KeywordScope::Global, &deltas)?;
    if let Some(id) = business_id {
        apply_keyword_deltas(conn, &KeywordScope::Business(id.to_string()), &deltas)?;
    }
    Ok(())
}

// ============================================================================
// REVIEW WRITES
// ============================================================================

/// Insert a review or update it in place.
///
/// Derived fields are reset (`processed_at = NULL`) only when something they
/// depend on (rating, text, posted_at) changed. An undeclared posted_at never
/// replaces the stored one: it is only the fetch clock of this batch.
pub fn upsert_review(
    conn: &Connection,
    business_id: &str,
    source: &str,
    candidate: &CandidateReview,
    now: DateTime<Utc>,
) -> Result<ReviewWrite> {
    type Existing = (String, u8, String, String, String, Option<String>, Option<u32>);

    let existing: Option<Existing> = conn
        .query_row(
            "SELECT id, rating, text, author, posted_at, relative_time_desc, helpful_votes
             FROM reviews
             WHERE business_id = ?1 AND source = ?2 AND external_review_id = ?3",
            params![business_id, source, candidate.external_review_id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            },
        )
        .optional()?;

    let posted_at = ts(&candidate.posted_at);

    let Some((id, rating, text, author, stored_posted_at, relative, helpful)) = existing else {
        let review = Review::from_candidate(business_id, source, candidate);
        conn.execute(
            "INSERT INTO reviews (
                id, business_id, source, external_review_id, rating, text, author,
                posted_at, relative_time_desc, helpful_votes, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                review.id,
                review.business_id,
                review.source,
                review.external_review_id,
                review.rating,
                review.text,
                review.author,
                posted_at,
                review.relative_time_desc,
                review.helpful_votes,
                ts(&now),
            ],
        )?;
        return Ok(ReviewWrite::Inserted);
    };

    let posted_at = if candidate.posted_at_declared {
        posted_at
    } else {
        stored_posted_at.clone()
    };
    let content_changed =
        rating != candidate.rating || text != candidate.text || stored_posted_at != posted_at;
    let meta_changed = author != candidate.author
        || relative != candidate.relative_time_desc
        || helpful != candidate.helpful_votes;

    if !content_changed && !meta_changed {
        return Ok(ReviewWrite::Unchanged);
    }

    conn.execute(
        "UPDATE reviews SET
            rating = ?2, text = ?3, author = ?4, posted_at = ?5,
            relative_time_desc = ?6, helpful_votes = ?7, updated_at = ?8,
            processed_at = CASE WHEN ?9 THEN NULL ELSE processed_at END
         WHERE id = ?1",
        params![
            id,
            candidate.rating,
            candidate.text,
            candidate.author,
            posted_at,
            candidate.relative_time_desc,
            candidate.helpful_votes,
            ts(&now),
            content_changed,
        ],
    )?;
    Ok(ReviewWrite::Updated)
}

// ============================================================================
// KEYWORD TALLIES
// ============================================================================

pub fn apply_keyword_deltas(conn: &Connection, scope: &KeywordScope, deltas: &[KeywordDelta]) -> Result<()> {
    if deltas.is_empty() {
        return Ok(());
    }
    let scope_key = scope.key();

    let mut stmt = conn.prepare_cached(
        "INSERT INTO keyword_counts (scope, day, term, count, first_seen)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(scope, day, term) DO UPDATE SET
            count = count + excluded.count,
            first_seen = MIN(first_seen, excluded.first_seen)",
    )?;
    for delta in deltas {
        stmt.execute(params![
            scope_key,
            delta.day.format("%Y-%m-%d").to_string(),
            delta.term,
            delta.change,
            ts(&delta.observed_at),
        ])?;
    }

    conn.execute(
        "DELETE FROM keyword_counts WHERE scope = ?1 AND count <= 0",
        [&scope_key],
    )?;
    Ok(())
}

// ============================================================================
// MANUAL REVIEW QUEUE
// ============================================================================

pub fn enqueue_manual_review(
    conn: &Connection,
    candidate: &Candidate,
    reason: &str,
    tied_with: &[String],
    now: DateTime<Utc>,
) -> Result<()> {
    let provenance = &candidate.snapshot.provenance;
    conn.execute(
        "INSERT INTO manual_review_queue (
            source_name, external_id, candidate, reason, tied_with, queued_at, status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending')
        ON CONFLICT(source_name, external_id) DO UPDATE SET
            candidate = excluded.candidate,
            reason = excluded.reason,
            tied_with = excluded.tied_with,
            status = 'pending'",
        params![
            provenance.source_name,
            provenance.external_id,
            serde_json::to_string(candidate)?,
            reason,
            serde_json::to_string(tied_with)?,
            ts(&now),
        ],
    )?;
    Ok(())
}

/// Mark a queued provenance as resolved once it lands on a business
pub fn resolve_queued(conn: &Connection, source_name: &str, external_id: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE manual_review_queue SET status = 'resolved'
         WHERE source_name = ?1 AND external_id = ?2 AND status = 'pending'",
        params![source_name, external_id],
    )?;
    Ok(changed > 0)
}

// ============================================================================
// STORE: READ PATH (query interface, side-effect free)
// ============================================================================

impl Store {
    /// Business by id; an absorbed id resolves to its survivor
    pub fn get_business(&self, id: &str) -> Result<Option<Business>> {
        self.read(|conn| match resolve_business_id(conn, id)? {
            Some(live) => load_business(conn, &live),
            None => Ok(None),
        })
    }

    pub fn snapshots(&self, business_id: &str) -> Result<Vec<SourceSnapshot>> {
        self.read(|conn| load_snapshots(conn, business_id))
    }

    /// Rating desc, review count desc, id asc
    pub fn businesses_by_category(&self, category: Category, limit: usize) -> Result<Vec<Business>> {
        self.read(|conn| {
            load_businesses(
                conn,
                "WHERE category = ?1
                 ORDER BY aggregate_rating DESC, review_count DESC, id ASC
                 LIMIT ?2",
                &[&category.as_str(), &(limit as i64)],
            )
        })
    }

    /// Best-rated businesses that have at least one rating, optionally in one category
    pub fn top_rated(&self, category: Option<Category>, limit: usize) -> Result<Vec<Business>> {
        self.read(|conn| match category {
            Some(category) => load_businesses(
                conn,
                "WHERE review_count > 0 AND category = ?1
                 ORDER BY aggregate_rating DESC, review_count DESC, id ASC
                 LIMIT ?2",
                &[&category.as_str(), &(limit as i64)],
            ),
            None => load_businesses(
                conn,
                "WHERE review_count > 0
                 ORDER BY aggregate_rating DESC, review_count DESC, id ASC
                 LIMIT ?1",
                &[&(limit as i64)],
            ),
        })
    }

    /// Newest first
    pub fn reviews_for_business(&self, business_id: &str, limit: usize) -> Result<Vec<Review>> {
        self.read(|conn| {
            let Some(id) = resolve_business_id(conn, business_id)? else {
                return Ok(Vec::new());
            };
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM reviews WHERE business_id = ?1
                 ORDER BY posted_at DESC, external_review_id ASC LIMIT ?2",
                REVIEW_COLUMNS
            ))?;
            let reviews = stmt
                .query_map(params![id, limit as i64], review_from_row)?
                .map(|r| r.map(|stored| stored.review))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(reviews)
        })
    }

    /// Reviews posted within [start, end], newest first; all businesses
    /// when `business_id` is None
    pub fn reviews_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        business_id: Option<&str>,
    ) -> Result<Vec<Review>> {
        self.read(|conn| {
            let (start, end) = (ts(&start), ts(&end));
            let rows = match business_id {
                Some(business_id) => {
                    let Some(id) = resolve_business_id(conn, business_id)? else {
                        return Ok(Vec::new());
                    };
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM reviews
                         WHERE business_id = ?1 AND posted_at >= ?2 AND posted_at <= ?3
                         ORDER BY posted_at DESC, external_review_id ASC",
                        REVIEW_COLUMNS
                    ))?;
                    let rows = stmt
                        .query_map(params![id, start, end], review_from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM reviews
                         WHERE posted_at >= ?1 AND posted_at <= ?2
                         ORDER BY posted_at DESC, business_id ASC, external_review_id ASC",
                        REVIEW_COLUMNS
                    ))?;
                    let rows = stmt
                        .query_map(params![start, end], review_from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
            };
            Ok(rows.into_iter().map(|stored| stored.review).collect())
        })
    }

    /// Side-by-side metrics for the given businesses plus their averages.
    ///
    /// Absorbed ids count as their survivor; unknown ids are skipped.
    pub fn competitor_metrics(&self, business_ids: &[String]) -> Result<CompetitorMetrics> {
        self.read(|conn| {
            let mut seen = BTreeSet::new();
            let mut competitors = Vec::new();

            for requested in business_ids {
                let Some(id) = resolve_business_id(conn, requested)? else {
                    debug!(business_id = %requested, "competitor not found");
                    continue;
                };
                if !seen.insert(id.clone()) {
                    continue;
                }
                let Some(business) = load_business(conn, &id)? else {
                    continue;
                };
                let avg_sentiment: Option<f64> = conn.query_row(
                    "SELECT AVG(sentiment_score) FROM reviews WHERE business_id = ?1",
                    [&id],
                    |row| row.get(0),
                )?;

                competitors.push(CompetitorEntry {
                    rating: (business.review_count() > 0).then(|| business.aggregate_rating()),
                    review_count: business.review_count(),
                    business_id: business.id,
                    name: business.canonical_name,
                    category: business.category,
                    avg_sentiment,
                    price_range: business.price_range,
                });
            }

            Ok(CompetitorMetrics::from_entries(competitors))
        })
    }

    pub fn businesses_near(
        &self,
        latitude: f64,
        longitude: f64,
        max_distance_m: f64,
        limit: usize,
    ) -> Result<Vec<NearbyBusiness>> {
        self.read(|conn| {
            let center = Location {
                latitude,
                longitude,
            };
            let mut out = Vec::new();
            for (id, distance_m) in nearby(conn, &center, max_distance_m, Some(limit))? {
                if let Some(business) = load_business(conn, &id)? {
                    out.push(NearbyBusiness {
                        business,
                        distance_m,
                    });
                }
            }
            Ok(out)
        })
    }

    /// Terms summed over the day buckets of the trailing window ending at `as_of`
    pub fn trending_keywords(
        &self,
        scope: &KeywordScope,
        window_days: u32,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TrendingKeyword>> {
        let (start, end) = window_bounds(as_of, window_days);
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT term, SUM(count), MIN(first_seen) FROM keyword_counts
                 WHERE scope = ?1 AND day >= ?2 AND day <= ?3
                 GROUP BY term
                 HAVING SUM(count) > 0",
            )?;
            let terms = stmt
                .query_map(
                    params![
                        scope.key(),
                        start.format("%Y-%m-%d").to_string(),
                        end.format("%Y-%m-%d").to_string()
                    ],
                    |row| {
                        let first_seen: String = row.get(2)?;
                        Ok(TrendingKeyword {
                            term: row.get(0)?,
                            count: row.get(1)?,
                            first_seen: parse_ts(2, &first_seen)?,
                        })
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rank(terms, limit))
        })
    }

    /// Newest flags first
    pub fn anomaly_flags(&self, business_id: &str) -> Result<Vec<AnomalyFlag>> {
        self.read(|conn| {
            let Some(id) = resolve_business_id(conn, business_id)? else {
                return Ok(Vec::new());
            };
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM anomaly_flags WHERE business_id = ?1
                 ORDER BY detected_at DESC, window_end DESC, kind ASC",
                FLAG_COLUMNS
            ))?;
            let flags = stmt
                .query_map([id], flag_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(flags)
        })
    }

    pub fn business_analytics(&self, business_id: &str) -> Result<BusinessAnalytics> {
        self.read(|conn| {
            let id = resolve_business_id(conn, business_id)?
                .ok_or_else(|| PipelineError::NotFound(business_id.to_string()))?;
            let name: String = conn.query_row(
                "SELECT canonical_name FROM businesses WHERE id = ?1",
                [&id],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT rating, posted_at, sentiment_score, sentiment_label
                 FROM reviews WHERE business_id = ?1 ORDER BY posted_at",
            )?;
            let rows = stmt
                .query_map([&id], |row| {
                    let posted_at: String = row.get(1)?;
                    Ok((
                        row.get::<_, u8>(0)?,
                        parse_ts(1, &posted_at)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut analytics = BusinessAnalytics {
                business_id: id.clone(),
                name,
                avg_rating: None,
                total_reviews: rows.len() as u32,
                avg_sentiment: None,
                earliest_review: rows.first().map(|r| r.1),
                latest_review: rows.last().map(|r| r.1),
                rating_distribution: (1..=5u8).map(|star| (star, 0)).collect(),
                monthly_review_counts: BTreeMap::new(),
                sentiment_breakdown: BTreeMap::new(),
            };

            if rows.is_empty() {
                return Ok(analytics);
            }

            let rating_sum: u32 = rows.iter().map(|r| r.0 as u32).sum();
            analytics.avg_rating = Some(rating_sum as f64 / rows.len() as f64);

            let scores: Vec<f64> = rows.iter().filter_map(|r| r.2).collect();
            if !scores.is_empty() {
                analytics.avg_sentiment = Some(scores.iter().sum::<f64>() / scores.len() as f64);
            }

            for (rating, posted_at, _, label) in &rows {
                *analytics.rating_distribution.entry(*rating).or_insert(0) += 1;
                *analytics
                    .monthly_review_counts
                    .entry(Period::Month.bucket(*posted_at))
                    .or_insert(0) += 1;
                if let Some(label) = label {
                    *analytics.sentiment_breakdown.entry(label.clone()).or_insert(0) += 1;
                }
            }

            Ok(analytics)
        })
    }

    pub fn category_analytics(&self, category: Category) -> Result<CategoryAnalytics> {
        self.read(|conn| {
            let business_count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM businesses WHERE category = ?1",
                [category.as_str()],
                |row| row.get(0),
            )?;
            let (total_reviews, avg_rating, avg_sentiment): (u32, Option<f64>, Option<f64>) = conn
                .query_row(
                    "SELECT COUNT(r.id), AVG(r.rating), AVG(r.sentiment_score)
                     FROM reviews r JOIN businesses b ON b.id = r.business_id
                     WHERE b.category = ?1",
                    [category.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?;

            Ok(CategoryAnalytics {
                category,
                business_count,
                total_reviews,
                avg_rating,
                avg_sentiment,
            })
        })
    }

    /// Average sentiment of processed reviews per period bucket, oldest first
    pub fn sentiment_trend(&self, business_id: &str, period: Period) -> Result<Vec<SentimentPoint>> {
        self.read(|conn| {
            let Some(id) = resolve_business_id(conn, business_id)? else {
                return Ok(Vec::new());
            };
            let mut stmt = conn.prepare(
                "SELECT posted_at, sentiment_score, confidence FROM reviews
                 WHERE business_id = ?1 AND sentiment_score IS NOT NULL
                 ORDER BY posted_at",
            )?;
            let rows = stmt
                .query_map([id], |row| {
                    let posted_at: String = row.get(0)?;
                    Ok((parse_ts(0, &posted_at)?, row.get::<_, f64>(1)?, row.get::<_, f64>(2)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            // bucket → (score sum, confidence sum, n)
            let mut buckets: BTreeMap<String, (f64, f64, u32)> = BTreeMap::new();
            for (posted_at, score, confidence) in rows {
                let entry = buckets.entry(period.bucket(posted_at)).or_insert((0.0, 0.0, 0));
                entry.0 += score;
                entry.1 += confidence;
                entry.2 += 1;
            }

            Ok(buckets
                .into_iter()
                .map(|(period, (score, confidence, n))| SentimentPoint {
                    period,
                    average_sentiment: score / n as f64,
                    average_confidence: confidence / n as f64,
                    review_count: n,
                })
                .collect())
        })
    }

    /// Pending candidates, oldest first
    pub fn manual_review_queue(&self) -> Result<Vec<QueuedCandidate>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, candidate, reason, tied_with, queued_at, status
                 FROM manual_review_queue WHERE status = 'pending'
                 ORDER BY queued_at, id",
            )?;
            let queued = stmt
                .query_map([], |row| {
                    let candidate: String = row.get(1)?;
                    let tied_with: String = row.get(3)?;
                    let queued_at: String = row.get(4)?;
                    Ok(QueuedCandidate {
                        id: row.get(0)?,
                        candidate: parse_json(1, &candidate)?,
                        reason: row.get(2)?,
                        tied_with: parse_json(3, &tied_with)?,
                        queued_at: parse_ts(4, &queued_at)?,
                        status: row.get(5)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(queued)
        })
    }

    pub fn events_for(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        self.read(|conn| get_events_for_entity(conn, entity_type, entity_id))
    }

    pub fn business_count(&self) -> Result<u64> {
        self.read(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM businesses", [], |row| row.get(0))?;
            Ok(n as u64)
        })
    }

    pub fn review_count(&self) -> Result<u64> {
        self.read(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM reviews", [], |row| row.get(0))?;
            Ok(n as u64)
        })
    }

    /// Reviews whose derived fields are missing or stale
    pub fn unprocessed_review_count(&self) -> Result<u64> {
        self.read(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM reviews WHERE processed_at IS NULL",
                [],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }
}

// ============================================================================
// STORE: ANALYTICS SUPPORT
// ============================================================================

impl Store {
    pub fn business_ids(&self) -> Result<Vec<String>> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM businesses ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
    }

    /// Businesses with a review inserted or changed at or after `since`
    pub fn business_ids_touched_since(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT business_id FROM reviews WHERE updated_at >= ?1 ORDER BY business_id",
            )?;
            let ids = stmt
                .query_map([ts(&since)], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
    }

    /// All reviews of a business in processing order (posted_at, external id)
    pub fn reviews_for_processing(&self, business_id: &str) -> Result<Vec<StoredReview>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM reviews WHERE business_id = ?1
                 ORDER BY posted_at ASC, external_review_id ASC",
                REVIEW_COLUMNS
            ))?;
            let reviews = stmt
                .query_map([business_id], review_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(reviews)
        })
    }

    /// Write derived fields and apply keyword deltas in one transaction.
    ///
    /// Returns false (and writes nothing) when the review changed or moved
    /// since it was read.
    pub fn save_review_analysis(
        &self,
        business_id: &str,
        analysis: &ReviewAnalysis,
        processed_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.transaction(|tx| {
            let changed = tx.execute(
                "UPDATE reviews SET
                    sentiment_score = ?1, sentiment_label = ?2, confidence = ?3,
                    keywords = ?4, keywords_at = ?5, processed_at = ?6
                 WHERE id = ?7 AND business_id = ?8 AND updated_at = ?9
                   AND keywords = ?10 AND keywords_at IS ?11",
                params![
                    analysis.sentiment.score,
                    analysis.sentiment.label.as_str(),
                    analysis.sentiment.confidence,
                    serde_json::to_string(&analysis.keywords)?,
                    ts(&analysis.keywords_at),
                    ts(&processed_at),
                    analysis.review_id,
                    business_id,
                    analysis.expected_updated_at,
                    serde_json::to_string(&analysis.expected_keywords)?,
                    analysis.expected_keywords_at.as_ref().map(ts),
                ],
            )?;

            if changed == 0 {
                return Ok(false);
            }

            apply_keyword_deltas(tx, &KeywordScope::Business(business_id.to_string()), &analysis.deltas)?;
            apply_keyword_deltas(tx, &KeywordScope::Global, &analysis.deltas)?;
            Ok(true)
        })
    }

    pub fn rating_series(&self, business_id: &str) -> Result<Vec<RatingPoint>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT posted_at, rating FROM reviews WHERE business_id = ?1 ORDER BY posted_at",
            )?;
            let points = stmt
                .query_map([business_id], |row| {
                    let posted_at: String = row.get(0)?;
                    Ok(RatingPoint {
                        posted_at: parse_ts(0, &posted_at)?,
                        rating: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(points)
        })
    }

    /// Persist a flag; false when the same (business, kind, window) is already recorded
    pub fn record_anomaly_flag(&self, flag: &AnomalyFlag) -> Result<bool> {
        self.read(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO anomaly_flags (
                    business_id, kind, direction, severity, baseline_value, recent_value,
                    magnitude, threshold, baseline_count, recent_count,
                    window_start, window_end, detected_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    flag.business_id,
                    flag.kind.as_str(),
                    flag.direction.as_str(),
                    flag.severity.as_str(),
                    flag.baseline_value,
                    flag.recent_value,
                    flag.magnitude,
                    flag.threshold,
                    flag.baseline_count as i64,
                    flag.recent_count as i64,
                    ts(&flag.recent_window.start),
                    ts(&flag.recent_window.end),
                    ts(&flag.detected_at),
                ],
            )?;
            Ok(inserted > 0)
        })
    }

    /// Drop anomaly flags detected strictly before `before`
    pub fn prune_anomaly_flags(&self, before: DateTime<Utc>) -> Result<usize> {
        self.read(|conn| {
            Ok(conn.execute(
                "DELETE FROM anomaly_flags WHERE detected_at < ?1",
                [ts(&before)],
            )?)
        })
    }

    /// Drop keyword day buckets strictly older than `before`
    pub fn prune_keyword_buckets(&self, before: NaiveDate) -> Result<usize> {
        self.read(|conn| {
            Ok(conn.execute(
                "DELETE FROM keyword_counts WHERE day < ?1",
                [before.format("%Y-%m-%d").to_string()],
            )?)
        })
    }

    /// Per-day keyword rows for one scope (oldest day first)
    pub fn keyword_buckets(&self, scope: &KeywordScope) -> Result<Vec<(NaiveDate, String, i64)>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT day, term, count FROM keyword_counts WHERE scope = ?1 ORDER BY day, term",
            )?;
            let rows = stmt
                .query_map([scope.key()], |row| {
                    let day: String = row.get(0)?;
                    Ok((parse_day(0, &day)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}

// ============================================================================
// STORE: ADMINISTRATION
// ============================================================================

impl Store {
    /// Remove a business with its snapshots, reviews, keyword tallies and
    /// flags. Its reviews' keywords are retracted from the global tally.
    pub fn delete_business(&self, business_id: &str, actor: &str) -> Result<bool> {
        self.transaction(|tx| {
            let Some(id) = resolve_business_id(tx, business_id)? else {
                return Ok(false);
            };

            let reviews = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {} FROM reviews WHERE business_id = ?1",
                    REVIEW_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([&id], review_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };
            for stored in &reviews {
                retract_keywords(tx, None, stored)?;
            }

            tx.execute("DELETE FROM reviews WHERE business_id = ?1", [&id])?;
            tx.execute("DELETE FROM business_sources WHERE business_id = ?1", [&id])?;
            tx.execute(
                "DELETE FROM keyword_counts WHERE scope = ?1",
                [KeywordScope::Business(id.clone()).key()],
            )?;
            tx.execute("DELETE FROM anomaly_flags WHERE business_id = ?1", [&id])?;
            tx.execute("DELETE FROM retired_businesses WHERE merged_into = ?1", [&id])?;
            tx.execute("DELETE FROM businesses WHERE id = ?1", [&id])?;

            insert_event(
                tx,
                &Event::new(
                    "business_deleted",
                    "business",
                    &id,
                    serde_json::json!({ "reviews_removed": reviews.len() }),
                    actor,
                ),
            )?;

            info!(business_id = %id, reviews = reviews.len(), "business deleted");
            Ok(true)
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
