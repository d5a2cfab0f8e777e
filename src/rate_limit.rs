//! Fixed-window quota enforcement.
//!
//! This module provides the building blocks:
//! - [`QuotaLimiter`]: the decision engine.
//! - [`QuotaLayer`]: Tower middleware that maps decisions onto HTTP responses.
//! - [`Decision`]: the result of a quota check (Allow/Deny/Reject).
//!
//! # Architecture
//!
//! - **Middleware**: `QuotaLayer` wraps your service. It only extracts a [`Subject`] and asks the
//!   limiter; it never touches counters.
//! - **Logic**: `QuotaLimiter` (in `fixed_window`) opens, consumes and denies windows.
//! - **Storage**: [`CounterStore`] (in `store`) holds one expiring counter per identity, enabling
//!   in-memory or distributed backends (e.g. Redis). Every mutation goes through the store's
//!   atomic operations, so many server instances can share one store.

use std::time::Duration;
use thiserror::Error;

pub mod fixed_window;
pub mod middleware;
pub mod store;
pub use fixed_window::QuotaLimiter;
pub use middleware::{QuotaLayer, QuotaService};
pub use store::{CounterStore, CountingStore, InMemoryCounterStore, InitOutcome, StoreCalls};

/// Authenticated quota subject, attached to the request by upstream auth.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject {
    identity: String,
    rank: String,
}

impl Subject {
    /// Create a subject from an authenticated identity and its rank.
    pub fn new(identity: impl Into<String>, rank: impl Into<String>) -> Self {
        Self { identity: identity.into(), rank: rank.into() }
    }

    /// The identity whose quota is charged. Empty means unauthenticated.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The rank used to look up the quota.
    pub fn rank(&self) -> &str {
        &self.rank
    }
}

/// Why a request was refused before any counter was touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("missing identity")]
    MissingIdentity,
    #[error("unknown rank {0:?}")]
    UnknownRank(String),
}

/// The decision returned by the limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The request is admitted and has been charged.
    Allow {
        /// Requests still permitted in the current window.
        /// Useful for `X-RateLimit-Remaining` headers.
        remaining: u64,
    },
    /// The window's quota is spent.
    Deny {
        /// Time left until the window's record expires.
        /// Useful for `Retry-After` headers.
        retry_after: Duration,
    },
    /// The request could not be evaluated.
    Reject(RejectReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Decision::Deny { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Decision::Reject(_))
    }

    /// Whole seconds to advertise in `Retry-After`: rounded up, never zero.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Decision::Deny { retry_after } => {
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                Some(secs.max(1))
            }
            _ => None,
        }
    }
}
