//! Rank to quota mapping.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("unknown rank {0:?}")]
    UnknownRank(String),
}

/// Immutable mapping from rank to the number of requests allowed per window.
///
/// Built once at startup and shared read-only by every decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaPolicy {
    limits: HashMap<String, u32>,
}

impl QuotaPolicy {
    /// Create a policy from `(rank, limit)` pairs. A repeated rank keeps the last limit.
    pub fn new<I, R>(limits: I) -> Self
    where
        I: IntoIterator<Item = (R, u32)>,
        R: Into<String>,
    {
        Self { limits: limits.into_iter().map(|(rank, limit)| (rank.into(), limit)).collect() }
    }

    /// Quota configured for `rank`.
    pub fn limit_for(&self, rank: &str) -> Result<u32, PolicyError> {
        self.limits.get(rank).copied().ok_or_else(|| PolicyError::UnknownRank(rank.to_string()))
    }

    pub fn contains(&self, rank: &str) -> bool {
        self.limits.contains_key(rank)
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    pub fn ranks(&self) -> impl Iterator<Item = (&str, u32)> {
        self.limits.iter().map(|(rank, limit)| (rank.as_str(), *limit))
    }
}
