#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # quotagate
//!
//! Per-identity request quotas over a fixed time window, with counters kept in a shared
//! key-value store so that every server instance enforces the same limit.
//!
//! ## Features
//!
//! - **Fixed-window counters** anchored to an identity's first request
//! - **Rank-based quotas** from a static rank → limit map
//! - **Race-safe** via atomic conditional-create and decrement in the [`CounterStore`]
//! - **Accurate `Retry-After`** from the counter's remaining time-to-live
//! - **Tower middleware** mapping decisions onto HTTP responses
//!
//! ## Quick Start
//!
//! ```rust
//! use quotagate::{Decision, InMemoryCounterStore, QuotaConfig, QuotaLimiter, Subject};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = QuotaConfig::builder()
//!         .quota("free", 2)
//!         .window(Duration::from_secs(60))
//!         .build()
//!         .unwrap();
//!     let limiter = QuotaLimiter::new(InMemoryCounterStore::new(), config);
//!
//!     let alice = Subject::new("alice", "free");
//!     assert_eq!(limiter.decide(&alice).await.unwrap(), Decision::Allow { remaining: 1 });
//!     assert_eq!(limiter.decide(&alice).await.unwrap(), Decision::Allow { remaining: 0 });
//!     assert!(limiter.decide(&alice).await.unwrap().is_denied());
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod policy;
pub mod prelude;
pub mod rate_limit;

// Re-exports
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{BuildError, QuotaConfig, QuotaConfigBuilder};
#[cfg(feature = "serde")]
pub use config::QuotaConfigFile;
pub use error::{QuotaError, StoreError};
pub use policy::{PolicyError, QuotaPolicy};
pub use rate_limit::{
    CounterStore, CountingStore, Decision, InMemoryCounterStore, InitOutcome, QuotaLayer,
    QuotaLimiter, QuotaService, RejectReason, StoreCalls, Subject,
};
