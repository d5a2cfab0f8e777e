use crate::config::QuotaConfig;
use crate::error::{QuotaError, StoreError};
use crate::policy::PolicyError;
use crate::rate_limit::store::CounterStore;
use crate::rate_limit::{Decision, RejectReason, Subject};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Attempts per decision when the record expires between store calls.
const MAX_ATTEMPTS: usize = 3;

/// Fixed-window quota limiter.
///
/// Each identity owns one counter in the shared [`CounterStore`], created with the rank's quota
/// on the first request of a window and expiring `window` later. Admitted requests decrement it;
/// the expiry is never extended, so the window stays anchored to its first request.
///
/// There is no in-process locking. Consistency across tasks and server instances comes from the
/// store's atomic conditional-create and decrement, and from treating the post-decrement value as
/// authoritative: a request whose decrement lands below zero is denied even if it read a positive
/// count a moment earlier.
#[derive(Debug)]
pub struct QuotaLimiter<S> {
    store: S,
    config: Arc<QuotaConfig>,
}

impl<S: Clone> Clone for QuotaLimiter<S> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), config: Arc::clone(&self.config) }
    }
}

impl<S> QuotaLimiter<S>
where
    S: CounterStore,
{
    /// Create a limiter over `store` enforcing `config`.
    pub fn new(store: S, config: QuotaConfig) -> Self {
        Self { store, config: Arc::new(config) }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// The underlying counter store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Counter key for `identity`.
    pub fn key_for(&self, identity: &str) -> String {
        format!("{}{}", self.config.namespace(), identity)
    }

    /// Decide whether `subject` may make one more request, charging it if so.
    ///
    /// Missing identities and unknown ranks are rejected without touching the store. Store
    /// failures abort the decision and are returned as-is; nothing is retried and a failure is
    /// never turned into an allow or a deny.
    pub async fn decide(&self, subject: &Subject) -> Result<Decision, QuotaError> {
        if subject.identity().is_empty() {
            return Ok(Decision::Reject(RejectReason::MissingIdentity));
        }
        let limit = match self.config.policy().limit_for(subject.rank()) {
            Ok(limit) => limit,
            Err(PolicyError::UnknownRank(rank)) => {
                tracing::debug!(target: "quotagate::engine", rank = %rank, "rejecting unknown rank");
                return Ok(Decision::Reject(RejectReason::UnknownRank(rank)));
            }
        };
        let key = self.key_for(subject.identity());

        let Some(timeout) = self.config.store_timeout() else {
            return self.consume(&key, subject, limit).await;
        };
        let start = Instant::now();
        match tokio::time::timeout(timeout, self.consume(&key, subject, limit)).await {
            Ok(result) => result,
            Err(_) => {
                let elapsed = start.elapsed();
                tracing::warn!(
                    target: "quotagate::engine",
                    identity = %subject.identity(),
                    ?elapsed,
                    "quota decision timed out"
                );
                Err(QuotaError::Timeout { elapsed, timeout })
            }
        }
    }

    async fn consume(&self, key: &str, subject: &Subject, limit: u32) -> Result<Decision, QuotaError> {
        let mut attempt = 1;
        loop {
            match self.try_consume(key, subject, limit).await {
                Ok(decision) => return Ok(decision),
                Err(StoreError::KeyMissing(_)) if attempt < MAX_ATTEMPTS => {
                    tracing::debug!(
                        target: "quotagate::engine",
                        identity = %subject.identity(),
                        attempt,
                        "window expired mid-decision, starting over"
                    );
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        target: "quotagate::engine",
                        identity = %subject.identity(),
                        error = %e,
                        "counter store failed"
                    );
                    return Err(e.into());
                }
            }
        }
    }

    async fn try_consume(
        &self,
        key: &str,
        subject: &Subject,
        limit: u32,
    ) -> Result<Decision, StoreError> {
        let window = self.config.window();
        let opened = self.store.initialize_if_absent(key, i64::from(limit), window).await?;
        if opened.created {
            tracing::debug!(
                target: "quotagate::engine",
                identity = %subject.identity(),
                rank = %subject.rank(),
                limit,
                ?window,
                "quota window opened"
            );
        } else if self.store.read(key).await? <= 0 {
            return self.deny(key, subject, window).await;
        }

        let remaining = self.store.decrement(key).await?;
        if remaining < 0 {
            // Lost a race for the last unit after reading a positive count.
            return self.deny(key, subject, window).await;
        }
        tracing::debug!(
            target: "quotagate::engine",
            identity = %subject.identity(),
            remaining,
            "request admitted"
        );
        Ok(Decision::Allow { remaining: remaining.unsigned_abs() })
    }

    async fn deny(&self, key: &str, subject: &Subject, window: Duration) -> Result<Decision, StoreError> {
        // Retry-After is rounded up to whole seconds, so cap at whole seconds of the window.
        let cap = Duration::from_secs(window.as_secs().max(1));
        let retry_after = self.store.ttl(key).await?.min(window).min(cap);
        tracing::debug!(
            target: "quotagate::engine",
            identity = %subject.identity(),
            retry_after_secs = retry_after.as_secs(),
            "quota exceeded"
        );
        Ok(Decision::Deny { retry_after })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rate_limit::store::{CountingStore, InMemoryCounterStore};
    use std::sync::Mutex;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;

    fn limiter(limit: u32, window: Duration) -> (QuotaLimiter<InMemoryCounterStore>, ManualClock) {
        let clock = ManualClock::new();
        let store = InMemoryCounterStore::with_clock(clock.clone());
        let config = QuotaConfig::builder().quota("free", limit).window(window).build().unwrap();
        (QuotaLimiter::new(store, config), clock)
    }

    #[tokio::test]
    async fn first_request_opens_window_and_is_charged() {
        let (limiter, _) = limiter(3, Duration::from_secs(60));
        let d = limiter.decide(&Subject::new("u1", "free")).await.unwrap();
        assert_eq!(d, Decision::Allow { remaining: 2 });
        assert_eq!(limiter.store().read("rate:u1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn key_uses_namespace() {
        let clock = ManualClock::new();
        let config = QuotaConfig::builder().quota("free", 1).namespace("quota/").build().unwrap();
        let limiter = QuotaLimiter::new(InMemoryCounterStore::with_clock(clock), config);
        assert_eq!(limiter.key_for("alice"), "quota/alice");

        limiter.decide(&Subject::new("alice", "free")).await.unwrap();
        assert!(limiter.store().exists("quota/alice").await.unwrap());
    }

    #[tokio::test]
    async fn zero_quota_denies_first_request() {
        let (limiter, _) = limiter(0, Duration::from_secs(60));
        let d = limiter.decide(&Subject::new("u1", "free")).await.unwrap();
        assert_eq!(d, Decision::Deny { retry_after: Duration::from_secs(60) });
    }

    #[tokio::test]
    async fn denial_does_not_consume() {
        let (limiter, _) = limiter(1, Duration::from_secs(60));
        let subject = Subject::new("u1", "free");
        assert!(limiter.decide(&subject).await.unwrap().is_allowed());
        assert!(limiter.decide(&subject).await.unwrap().is_denied());
        assert!(limiter.decide(&subject).await.unwrap().is_denied());
        assert_eq!(limiter.store().read("rate:u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rejected_requests_skip_the_store() {
        let clock = ManualClock::new();
        let store = CountingStore::new(InMemoryCounterStore::with_clock(clock));
        let config = QuotaConfig::builder().quota("free", 1).build().unwrap();
        let limiter = QuotaLimiter::new(store, config);

        let d = limiter.decide(&Subject::new("", "free")).await.unwrap();
        assert_eq!(d, Decision::Reject(RejectReason::MissingIdentity));
        let d = limiter.decide(&Subject::new("u1", "gold")).await.unwrap();
        assert_eq!(d, Decision::Reject(RejectReason::UnknownRank("gold".into())));

        assert_eq!(limiter.store().calls().total(), 0);
    }

    #[derive(Clone)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);
    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedWriter {
        type Writer = SharedGuard;
        fn make_writer(&'a self) -> Self::Writer {
            SharedGuard(self.0.clone())
        }
    }

    struct SharedGuard(Arc<Mutex<Vec<u8>>>);
    impl std::io::Write for SharedGuard {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut guard = self.0.lock().unwrap();
            guard.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn denial_is_logged() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
            .with_target(true)
            .with_max_level(tracing::Level::DEBUG)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (limiter, _) = limiter(1, Duration::from_secs(60));
        let subject = Subject::new("u1", "free");
        limiter.decide(&subject).await.unwrap();
        limiter.decide(&subject).await.unwrap();

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("quota exceeded"), "denial should be logged: {logs}");
        assert!(logs.contains("quotagate::engine"));
    }

    #[tokio::test]
    async fn denial_is_quiet_at_info_level() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
            .with_max_level(tracing::Level::INFO)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (limiter, _) = limiter(1, Duration::from_secs(60));
        let subject = Subject::new("u1", "free");
        for _ in 0..5 {
            limiter.decide(&subject).await.unwrap();
        }

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(!logs.contains("quota exceeded"), "denials should stay below info: {logs}");
    }

    #[tokio::test]
    async fn retry_after_fits_a_fractional_window() {
        let (limiter, clock) = limiter(1, Duration::from_millis(1500));
        let subject = Subject::new("u1", "free");
        assert!(limiter.decide(&subject).await.unwrap().is_allowed());

        let denied = limiter.decide(&subject).await.unwrap();
        assert_eq!(denied, Decision::Deny { retry_after: Duration::from_secs(1) });
        assert_eq!(denied.retry_after_secs(), Some(1));

        clock.advance(Duration::from_millis(700));
        let denied = limiter.decide(&subject).await.unwrap();
        assert_eq!(denied, Decision::Deny { retry_after: Duration::from_millis(800) });
        assert_eq!(denied.retry_after_secs(), Some(1));
    }

    #[tokio::test]
    async fn retry_after_never_exceeds_whole_second_window() {
        let (limiter, clock) = limiter(1, Duration::from_millis(2999));
        let subject = Subject::new("u1", "free");
        limiter.decide(&subject).await.unwrap();

        for _ in 0..5 {
            let secs = limiter.decide(&subject).await.unwrap().retry_after_secs().unwrap();
            assert!(secs <= 2, "advertised {secs}s for a 2.999s window");
            clock.advance(Duration::from_millis(500));
        }
    }
}
