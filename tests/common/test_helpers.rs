use async_trait::async_trait;
use quotagate::{
    CounterStore, InMemoryCounterStore, InitOutcome, ManualClock, QuotaConfig, QuotaLimiter,
    StoreError,
};
use std::time::Duration;

/// Limiter over an in-memory store driven by a manual clock.
pub fn limiter_with_clock(
    quotas: &[(&str, u32)],
    window: Duration,
) -> (QuotaLimiter<InMemoryCounterStore>, ManualClock) {
    let clock = ManualClock::new();
    let store = InMemoryCounterStore::with_clock(clock.clone());
    let config = QuotaConfig::builder()
        .quotas(quotas.iter().copied())
        .window(window)
        .build()
        .expect("valid config");
    (QuotaLimiter::new(store, config), clock)
}

/// Store whose every operation fails as if the backend were down.
#[derive(Debug, Clone, Default)]
pub struct FailingStore;

#[async_trait]
impl CounterStore for FailingStore {
    async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn initialize_if_absent(
        &self,
        _key: &str,
        _initial: i64,
        _ttl: Duration,
    ) -> Result<InitOutcome, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn decrement(&self, _key: &str) -> Result<i64, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn read(&self, _key: &str) -> Result<i64, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn ttl(&self, _key: &str) -> Result<Duration, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

/// Store that answers after `delay`, to exercise request deadlines.
#[derive(Debug, Clone)]
pub struct SlowStore {
    pub inner: InMemoryCounterStore,
    pub delay: Duration,
}

#[async_trait]
impl CounterStore for SlowStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.exists(key).await
    }

    async fn initialize_if_absent(
        &self,
        key: &str,
        initial: i64,
        ttl: Duration,
    ) -> Result<InitOutcome, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.initialize_if_absent(key, initial, ttl).await
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.decrement(key).await
    }

    async fn read(&self, key: &str) -> Result<i64, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.read(key).await
    }

    async fn ttl(&self, key: &str) -> Result<Duration, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.ttl(key).await
    }
}

/// Store whose reads always report `stale`, as if another instance decremented the counter
/// between this instance's read and decrement.
#[derive(Debug, Clone)]
pub struct StaleReadStore {
    pub inner: InMemoryCounterStore,
    pub stale: i64,
}

#[async_trait]
impl CounterStore for StaleReadStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.exists(key).await
    }

    async fn initialize_if_absent(
        &self,
        key: &str,
        initial: i64,
        ttl: Duration,
    ) -> Result<InitOutcome, StoreError> {
        self.inner.initialize_if_absent(key, initial, ttl).await
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        self.inner.decrement(key).await
    }

    async fn read(&self, key: &str) -> Result<i64, StoreError> {
        self.inner.read(key).await.map(|_| self.stale)
    }

    async fn ttl(&self, key: &str) -> Result<Duration, StoreError> {
        self.inner.ttl(key).await
    }
}

/// Store whose record vanishes right after being read, as if its window closed mid-decision.
#[derive(Debug, Clone)]
pub struct ExpiringStore {
    pub inner: InMemoryCounterStore,
    pub clock: ManualClock,
    pub expire_after_read: Duration,
}

#[async_trait]
impl CounterStore for ExpiringStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.exists(key).await
    }

    async fn initialize_if_absent(
        &self,
        key: &str,
        initial: i64,
        ttl: Duration,
    ) -> Result<InitOutcome, StoreError> {
        self.inner.initialize_if_absent(key, initial, ttl).await
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        self.inner.decrement(key).await
    }

    async fn read(&self, key: &str) -> Result<i64, StoreError> {
        let value = self.inner.read(key).await;
        self.clock.advance(self.expire_after_read);
        value
    }

    async fn ttl(&self, key: &str) -> Result<Duration, StoreError> {
        self.inner.ttl(key).await
    }
}
