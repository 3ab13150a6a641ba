// Entity Models
// "Identity persists, values change"
//
// - Business: stable UUID identity, values derived from source snapshots
// - Review: unique per (business, source, external review id)
// - Category: fixed taxonomy with `other` fallback

pub mod business;
pub mod category;
pub mod review;

pub use business::{
    Business, HoursSchedule, Location, OpenInterval, Provenance, ReviewStats, SourceKind,
    SourceSnapshot,
};
pub use category::Category;
pub use review::{derive_review_id, CandidateReview, Review, Sentiment, SentimentLabel};
