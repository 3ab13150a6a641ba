// ⚠️ Error Types - what can go wrong while reconciling and scoring
//
// Each variant maps to one failure policy:
//   Validation       → skip the record, keep the batch going
//   MergeAmbiguity   → queue the candidate for manual resolution
//   Computation      → isolate to one business
//   Persistence      → surfaced to the caller, who retries with backoff
//   Source           → the whole batch fails before any record is touched

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A raw record that cannot become a canonical candidate.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Grey-zone tie that completeness and fetch time could not break.
    #[error("merge ambiguity for {candidate}: tied between {tied_with:?}")]
    MergeAmbiguity {
        candidate: String,
        tied_with: Vec<String>,
    },

    #[error("computation error for business {business_id}: {message}")]
    Computation { business_id: String, message: String },

    #[error("persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The adapter could not produce its batch (missing file, bad export)
    #[error("source fetch failed: {0}")]
    Source(String),

    #[error("business not found: {0}")]
    NotFound(String),

    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn computation(business_id: &str, message: impl Into<String>) -> Self {
        PipelineError::Computation {
            business_id: business_id.to_string(),
            message: message.into(),
        }
    }

    /// Transient errors worth retrying (SQLite busy/locked).
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Persistence(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
