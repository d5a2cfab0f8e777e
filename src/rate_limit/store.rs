use crate::clock::{Clock, MonotonicClock};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Result of [`CounterStore::initialize_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitOutcome {
    /// `true` if this call created the record.
    pub created: bool,
    /// Counter value right after the call.
    pub value: i64,
}

/// Abstract storage for per-identity window counters.
///
/// Every operation is a (potentially) remote call and may fail with
/// [`StoreError::Unavailable`]; implementations must not retry internally.
/// `initialize_if_absent` and `decrement` must be linearizable per key, since independent server
/// instances race on the same record.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// `true` if a live (non-expired) record exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomically create the record with `initial` and expiry `ttl` unless a live one exists.
    ///
    /// An existing record is left untouched (value and expiry) and reported with `created = false`.
    async fn initialize_if_absent(
        &self,
        key: &str,
        initial: i64,
        ttl: Duration,
    ) -> Result<InitOutcome, StoreError>;

    /// Atomically decrement and return the new value. Never refreshes the expiry.
    ///
    /// Fails with [`StoreError::KeyMissing`] instead of creating the record.
    async fn decrement(&self, key: &str) -> Result<i64, StoreError>;

    async fn read(&self, key: &str) -> Result<i64, StoreError>;

    /// Remaining time-to-live of the record.
    async fn ttl(&self, key: &str) -> Result<Duration, StoreError>;
}

#[async_trait]
impl<S> CounterStore for Arc<S>
where
    S: CounterStore + ?Sized,
{
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        (**self).exists(key).await
    }

    async fn initialize_if_absent(
        &self,
        key: &str,
        initial: i64,
        ttl: Duration,
    ) -> Result<InitOutcome, StoreError> {
        (**self).initialize_if_absent(key, initial, ttl).await
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        (**self).decrement(key).await
    }

    async fn read(&self, key: &str) -> Result<i64, StoreError> {
        (**self).read(key).await
    }

    async fn ttl(&self, key: &str) -> Result<Duration, StoreError> {
        (**self).ttl(key).await
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: i64,
    expires_at: u64,
}

/// Map size below which no size-triggered sweep happens.
const MIN_SWEEP_LEN: usize = 1024;
/// Longest time between sweeps while windows are being opened.
const SWEEP_INTERVAL_MILLIS: u64 = 60_000;

#[derive(Debug)]
struct Records {
    entries: HashMap<String, Entry>,
    sweep_at_len: usize,
    sweep_at_millis: u64,
}

impl Records {
    fn new(now: u64) -> Self {
        Self {
            entries: HashMap::new(),
            sweep_at_len: MIN_SWEEP_LEN,
            sweep_at_millis: now.saturating_add(SWEEP_INTERVAL_MILLIS),
        }
    }

    /// Drop every expired entry once the map has doubled or the interval has passed.
    ///
    /// Each sweep is paid for by the inserts since the previous one.
    fn sweep_if_due(&mut self, now: u64) {
        if self.entries.len() < self.sweep_at_len && now < self.sweep_at_millis {
            return;
        }
        self.entries.retain(|_, entry| entry.expires_at > now);
        self.sweep_at_len = (self.entries.len() * 2).max(MIN_SWEEP_LEN);
        self.sweep_at_millis = now.saturating_add(SWEEP_INTERVAL_MILLIS);
    }
}

/// In-process counter store.
///
/// Every operation runs under a single lock, which makes it linearizable per key. An expired
/// record is dropped when its key is touched, and opening a window periodically sweeps the
/// records nobody came back for. Useful for tests and single-instance deployments; clones share
/// the same records.
#[derive(Clone, Debug)]
pub struct InMemoryCounterStore {
    data: Arc<Mutex<Records>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::default())
    }

    /// Create a store that expires records against `clock`.
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        let records = Records::new(clock.now_millis());
        Self { data: Arc::new(Mutex::new(records)), clock: Arc::new(clock) }
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.data
            .lock()
            .map(|data| data.entries.values().filter(|entry| entry.expires_at > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, Records>, StoreError> {
        self.data.lock().map_err(|_| StoreError::Unavailable("counter map lock poisoned".into()))
    }

    /// Live entry for `key`, evicting it first if it has expired.
    fn live<'a>(
        data: &'a mut HashMap<String, Entry>,
        key: &str,
        now: u64,
    ) -> Option<&'a mut Entry> {
        if data.get(key).is_some_and(|entry| entry.expires_at <= now) {
            data.remove(key);
        }
        data.get_mut(key)
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        let mut data = self.lock()?;
        Ok(Self::live(&mut data.entries, key, now).is_some())
    }

    async fn initialize_if_absent(
        &self,
        key: &str,
        initial: i64,
        ttl: Duration,
    ) -> Result<InitOutcome, StoreError> {
        let now = self.clock.now_millis();
        let mut data = self.lock()?;
        if let Some(entry) = Self::live(&mut data.entries, key, now) {
            return Ok(InitOutcome { created: false, value: entry.value });
        }
        data.sweep_if_due(now);
        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let entry = Entry { value: initial, expires_at: now.saturating_add(ttl_millis) };
        data.entries.insert(key.to_string(), entry);
        Ok(InitOutcome { created: true, value: initial })
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        let now = self.clock.now_millis();
        let mut data = self.lock()?;
        let entry = Self::live(&mut data.entries, key, now)
            .ok_or_else(|| StoreError::KeyMissing(key.to_string()))?;
        entry.value = entry.value.saturating_sub(1);
        Ok(entry.value)
    }

    async fn read(&self, key: &str) -> Result<i64, StoreError> {
        let now = self.clock.now_millis();
        let mut data = self.lock()?;
        Self::live(&mut data.entries, key, now)
            .map(|entry| entry.value)
            .ok_or_else(|| StoreError::KeyMissing(key.to_string()))
    }

    async fn ttl(&self, key: &str) -> Result<Duration, StoreError> {
        let now = self.clock.now_millis();
        let mut data = self.lock()?;
        Self::live(&mut data.entries, key, now)
            .map(|entry| Duration::from_millis(entry.expires_at - now))
            .ok_or_else(|| StoreError::KeyMissing(key.to_string()))
    }
}

/// Snapshot of per-operation call counts recorded by [`CountingStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub exists: usize,
    pub initialize: usize,
    pub decrement: usize,
    pub read: usize,
    pub ttl: usize,
}

impl StoreCalls {
    pub fn total(&self) -> usize {
        self.exists + self.initialize + self.decrement + self.read + self.ttl
    }
}

#[derive(Debug, Default)]
struct CallCounters {
    exists: AtomicUsize,
    initialize: AtomicUsize,
    decrement: AtomicUsize,
    read: AtomicUsize,
    ttl: AtomicUsize,
}

/// Store wrapper that counts calls, for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct CountingStore<S> {
    inner: S,
    counters: Arc<CallCounters>,
}

impl<S> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, counters: Arc::new(CallCounters::default()) }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn calls(&self) -> StoreCalls {
        StoreCalls {
            exists: self.counters.exists.load(Ordering::Relaxed),
            initialize: self.counters.initialize.load(Ordering::Relaxed),
            decrement: self.counters.decrement.load(Ordering::Relaxed),
            read: self.counters.read.load(Ordering::Relaxed),
            ttl: self.counters.ttl.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl<S> CounterStore for CountingStore<S>
where
    S: CounterStore,
{
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.counters.exists.fetch_add(1, Ordering::Relaxed);
        self.inner.exists(key).await
    }

    async fn initialize_if_absent(
        &self,
        key: &str,
        initial: i64,
        ttl: Duration,
    ) -> Result<InitOutcome, StoreError> {
        self.counters.initialize.fetch_add(1, Ordering::Relaxed);
        self.inner.initialize_if_absent(key, initial, ttl).await
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        self.counters.decrement.fetch_add(1, Ordering::Relaxed);
        self.inner.decrement(key).await
    }

    async fn read(&self, key: &str) -> Result<i64, StoreError> {
        self.counters.read.fetch_add(1, Ordering::Relaxed);
        self.inner.read(key).await
    }

    async fn ttl(&self, key: &str) -> Result<Duration, StoreError> {
        self.counters.ttl.fetch_add(1, Ordering::Relaxed);
        self.inner.ttl(key).await
    }
}
