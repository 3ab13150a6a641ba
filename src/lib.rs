// LocalPulse - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod error;
pub mod logging;

pub mod entities;       // Business, Review, Category
pub mod sources;        // Source adapters + field mappings
pub mod rules;          // Category rules as data
pub mod normalizer;     // Raw record → candidate
pub mod similarity;     // Name/address similarity
pub mod geo;            // Distances, GeoIndex, match keys
pub mod locks;          // Match-key mutual exclusion
pub mod resolver;       // Identity resolution + merge
pub mod text;
pub mod sentiment;      // Rating + lexicon sentiment
pub mod keywords;       // Keyword extraction + day buckets
pub mod temporal;       // Time windows + reporting periods
pub mod anomaly;        // Rating/volume anomaly detection
pub mod db;             // SQLite store + query interface
pub mod report;         // Batch reports
pub mod tasks;          // ingest / analytics / anomaly scan

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{
    BusinessAnalytics, CategoryAnalytics, CompetitorEntry, CompetitorMetrics, Event,
    MarketAverages, NearbyBusiness, QueuedCandidate, SentimentPoint, Store,
};
pub use entities::{
    Business, CandidateReview, Category, HoursSchedule, Location, Provenance, Review, Sentiment,
    SentimentLabel, SourceKind, SourceSnapshot,
};
pub use error::{PipelineError, Result, ValidationError};
pub use geo::GeoIndex;
pub use normalizer::{Candidate, SourceNormalizer};
pub use resolver::{IdentityResolver, Resolution, ResolveOutcome};
pub use sources::{
    adapter_for, DirectoryAdapter, FieldMapping, PlacesApiAdapter, RawRecord, ScrapeAdapter,
    SourceAdapter,
};
pub use sentiment::SentimentEngine;
pub use keywords::{KeywordEngine, KeywordScope, TrendingKeyword};
pub use anomaly::{AnomalyAssessment, AnomalyDetector, AnomalyFlag, AnomalyKind, CheckOutcome};
pub use temporal::{Period, TimeWindow};
pub use report::{AnalyticsReport, AnomalyScanReport, IngestReport};
pub use tasks::{with_retry, AnalyticsScope, CancelToken, Pipeline};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
