//! Error taxonomy for the caching layer.
//!
//! Only `CapacityInvariantViolation` is meant to stop a component. The other
//! variants are produced deep inside the archive/reconciler, logged, and
//! turned into "less data available" before they reach a caller.

use thiserror::Error;

use crate::domain::SeriesKey;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CacheError {
    /// Network/timeout failure talking to the remote history source.
    /// Retried by the next reconciliation pass.
    #[error("transient fetch failure for {key}: {reason}")]
    TransientFetch { key: SeriesKey, reason: String },

    /// An archived row failed numeric coercion and was dropped.
    #[error("malformed archive row {line} in {table}: {reason}")]
    MalformedRecord {
        table: String,
        line: u64,
        reason: String,
    },

    /// A store was configured with a non-positive capacity.
    #[error("{component} capacity must be positive (got {capacity})")]
    CapacityInvariantViolation {
        component: &'static str,
        capacity: usize,
    },

    /// Query for a key the catalog has never seen.
    #[error("no series registered for {0}")]
    MissingSeriesKey(String),

    #[error("unsupported interval: {0}")]
    UnsupportedInterval(String),

    #[error("archive I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

impl CacheError {
    pub fn capacity(component: &'static str, capacity: usize) -> Self {
        CacheError::CapacityInvariantViolation {
            component,
            capacity,
        }
    }

    /// True for failures that a later pass may succeed at.
    pub fn is_transient(&self) -> bool {
        matches!(self, CacheError::TransientFetch { .. } | CacheError::Io(_))
    }
}
