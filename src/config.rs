//! Limiter configuration.
//!
//! ```rust
//! use quotagate::QuotaConfig;
//! use std::time::Duration;
//!
//! let config = QuotaConfig::builder()
//!     .quota("free", 100)
//!     .quota("pro", 10_000)
//!     .window(Duration::from_secs(3600))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.identity_key_name(), "userID");
//! ```

use crate::policy::QuotaPolicy;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Window applied when none is configured.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_IDENTITY_KEY_NAME: &str = "userID";
pub const DEFAULT_RANK_KEY_NAME: &str = "rank";
/// Prefix prepended to every identity to form its counter key.
pub const DEFAULT_NAMESPACE: &str = "rate:";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Counter stores expire records with millisecond precision.
    #[error("window must be at least 1ms (got {0:?})")]
    InvalidWindow(Duration),
    #[error("{0} must not be empty")]
    EmptyKeyName(&'static str),
    #[error("namespace must not be empty")]
    EmptyNamespace,
    #[error("store timeout must be > 0")]
    ZeroTimeout,
}

/// Validated limiter configuration, supplied once at construction.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    policy: QuotaPolicy,
    window: Duration,
    identity_key_name: String,
    rank_key_name: String,
    namespace: String,
    store_timeout: Option<Duration>,
}

impl QuotaConfig {
    pub fn builder() -> QuotaConfigBuilder {
        QuotaConfigBuilder::new()
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Name of the request field carrying the identity.
    pub fn identity_key_name(&self) -> &str {
        &self.identity_key_name
    }

    /// Name of the request field carrying the rank.
    pub fn rank_key_name(&self) -> &str {
        &self.rank_key_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Deadline applied to the store calls of a single decision.
    pub fn store_timeout(&self) -> Option<Duration> {
        self.store_timeout
    }
}

#[derive(Debug, Clone)]
pub struct QuotaConfigBuilder {
    quotas: HashMap<String, u32>,
    window: Duration,
    identity_key_name: String,
    rank_key_name: String,
    namespace: String,
    store_timeout: Option<Duration>,
}

impl QuotaConfigBuilder {
    /// Create a builder with the documented defaults and no ranks.
    pub fn new() -> Self {
        Self {
            quotas: HashMap::new(),
            window: DEFAULT_WINDOW,
            identity_key_name: DEFAULT_IDENTITY_KEY_NAME.to_string(),
            rank_key_name: DEFAULT_RANK_KEY_NAME.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            store_timeout: None,
        }
    }

    /// Allow `limit` requests per window for `rank`. A limit of zero blocks the rank.
    pub fn quota(mut self, rank: impl Into<String>, limit: u32) -> Self {
        self.quotas.insert(rank.into(), limit);
        self
    }

    pub fn quotas<I, R>(mut self, quotas: I) -> Self
    where
        I: IntoIterator<Item = (R, u32)>,
        R: Into<String>,
    {
        self.quotas.extend(quotas.into_iter().map(|(rank, limit)| (rank.into(), limit)));
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn identity_key_name(mut self, name: impl Into<String>) -> Self {
        self.identity_key_name = name.into();
        self
    }

    pub fn rank_key_name(mut self, name: impl Into<String>) -> Self {
        self.rank_key_name = name.into();
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn store_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<QuotaConfig, BuildError> {
        if self.window < Duration::from_millis(1) {
            return Err(BuildError::InvalidWindow(self.window));
        }
        if self.identity_key_name.is_empty() {
            return Err(BuildError::EmptyKeyName("identity_key_name"));
        }
        if self.rank_key_name.is_empty() {
            return Err(BuildError::EmptyKeyName("rank_key_name"));
        }
        if self.namespace.is_empty() {
            return Err(BuildError::EmptyNamespace);
        }
        if self.store_timeout == Some(Duration::ZERO) {
            return Err(BuildError::ZeroTimeout);
        }
        Ok(QuotaConfig {
            policy: QuotaPolicy::new(self.quotas),
            window: self.window,
            identity_key_name: self.identity_key_name,
            rank_key_name: self.rank_key_name,
            namespace: self.namespace,
            store_timeout: self.store_timeout,
        })
    }
}

impl Default for QuotaConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialized configuration shape, e.g. loaded from a JSON file.
///
/// Omitted fields take the builder defaults.
#[cfg(feature = "serde")]
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaConfigFile {
    pub quotas: HashMap<String, u32>,
    #[serde(default)]
    pub window_secs: Option<u64>,
    #[serde(default)]
    pub identity_key_name: Option<String>,
    #[serde(default)]
    pub rank_key_name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub store_timeout_ms: Option<u64>,
}

#[cfg(feature = "serde")]
impl TryFrom<QuotaConfigFile> for QuotaConfig {
    type Error = BuildError;

    fn try_from(file: QuotaConfigFile) -> Result<Self, Self::Error> {
        let mut builder = QuotaConfig::builder()
            .quotas(file.quotas)
            .store_timeout(file.store_timeout_ms.map(Duration::from_millis));
        if let Some(secs) = file.window_secs {
            builder = builder.window(Duration::from_secs(secs));
        }
        if let Some(name) = file.identity_key_name {
            builder = builder.identity_key_name(name);
        }
        if let Some(name) = file.rank_key_name {
            builder = builder.rank_key_name(name);
        }
        if let Some(namespace) = file.namespace {
            builder = builder.namespace(namespace);
        }
        builder.build()
    }
}
