//! Error types for quota decisions and counter stores
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a [`CounterStore`](crate::rate_limit::store::CounterStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backend could not be reached or answered with an error.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    /// No live record exists for the key.
    #[error("no live counter for key {0}")]
    KeyMissing(String),
    /// The stored value is not an integer counter.
    #[error("counter {key} holds a non-integer value {value:?}")]
    Corrupt { key: String, value: String },
    /// The record exists but carries no expiry, so its window would never close.
    #[error("counter {0} has no expiry")]
    MissingExpiry(String),
}

impl StoreError {
    /// Build an `Unavailable` error from any backend error.
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    /// Check if the record was absent.
    pub fn is_key_missing(&self) -> bool {
        matches!(self, Self::KeyMissing(_))
    }
}

/// Infrastructure failure that aborted a quota decision.
///
/// Input faults (missing identity, unknown rank) and exhausted quotas are not errors; they are
/// reported through [`Decision`](crate::rate_limit::Decision).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaError {
    /// A counter store operation failed. Not retried.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The decision did not finish within the configured store timeout.
    #[error("quota decision timed out after {elapsed:?} (limit: {timeout:?})")]
    Timeout { elapsed: Duration, timeout: Duration },
}

impl QuotaError {
    /// Check if this error is due to timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Borrow the store error if present.
    pub fn as_store(&self) -> Option<&StoreError> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}
