//! Convenient re-exports for common quotagate types.
pub use crate::{
    config::{QuotaConfig, DEFAULT_WINDOW},
    error::{QuotaError, StoreError},
    rate_limit::{
        middleware::X_RATELIMIT_REMAINING, CounterStore, Decision, InMemoryCounterStore, QuotaLayer,
        QuotaLimiter, RejectReason, Subject,
    },
};
