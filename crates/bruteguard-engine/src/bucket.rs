//! Continuous-refill token bucket over a shared store
//!
//! Refill is computed lazily on each call: `limit / window` tokens per second,
//! capped at `limit`. A call is one read followed by one conditional write; if
//! a concurrent caller wrote the key in between, the write is rejected and the
//! whole read-refill-decrement is redone against the fresh state, after a
//! short jittered pause so that colliding callers spread out.

use bruteguard_core::{BucketLimit, GuardError, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::store::{BucketState, BucketStore};

/// Conditional-write attempts before giving up with `StoreContention`.
///
/// Running out fails the check closed; the HTTP layer reports it as 503.
pub const MAX_SWAP_ATTEMPTS: usize = 16;

/// Upper bound of the linear part of the retry pause.
const MAX_BACKOFF: Duration = Duration::from_millis(8);

pub struct TokenBucket {
    store: Arc<dyn BucketStore>,
    clock: Arc<dyn Clock>,
    key: String,
    limit: BucketLimit,
}

impl TokenBucket {
    pub fn new(
        store: Arc<dyn BucketStore>,
        clock: Arc<dyn Clock>,
        key: impl Into<String>,
        limit: BucketLimit,
    ) -> Self {
        Self {
            store,
            clock,
            key: key.into(),
            limit,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Idle keys expire one second after they would have refilled completely.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.limit.window_secs + 1)
    }

    /// Take one token. `Ok(false)` means the bucket is empty.
    pub async fn allow(&self) -> Result<bool> {
        for attempt in 1..=MAX_SWAP_ATTEMPTS {
            let current = self.store.load(&self.key).await?;
            let now = self.clock.now_epoch_secs();
            let (allowed, next) = refill_and_take(current, now, self.limit);

            if self
                .store
                .compare_and_swap(&self.key, current.as_ref(), &next, self.ttl())
                .await?
            {
                return Ok(allowed);
            }

            if attempt < MAX_SWAP_ATTEMPTS {
                let pause = retry_backoff(attempt);
                debug!(key = %self.key, attempt, ?pause, "Bucket changed concurrently, retrying");
                tokio::time::sleep(pause).await;
            }
        }

        warn!(key = %self.key, "Giving up on contended bucket");
        Err(GuardError::StoreContention(self.key.clone()))
    }
}

/// Pause before retry `attempt + 1`: grows by 1ms per attempt up to
/// [`MAX_BACKOFF`], plus up to 1ms of jitter from the wall clock.
fn retry_backoff(attempt: usize) -> Duration {
    let linear = Duration::from_millis(attempt as u64).min(MAX_BACKOFF);
    let jitter = Duration::from_micros(u64::from(Utc::now().timestamp_subsec_micros() % 1000));
    linear + jitter
}

/// Pure bucket transition: returns whether a token was granted and the state to persist.
///
/// An absent bucket is full as of `now`. When less than one token is available
/// the bucket is drained to zero, so fractional remainders cannot accumulate
/// across rapid calls.
pub fn refill_and_take(current: Option<BucketState>, now: i64, limit: BucketLimit) -> (bool, BucketState) {
    let capacity = f64::from(limit.limit);
    let (allowance, last_refill) = match current {
        Some(state) => (state.allowance, state.last_refill),
        None => (capacity, now),
    };

    let elapsed = now.saturating_sub(last_refill).max(0) as f64;
    let refilled = (allowance + elapsed * capacity / limit.window_secs as f64).min(capacity);

    if refilled < 1.0 {
        (false, BucketState::new(0.0, now))
    } else {
        (true, BucketState::new(refilled - 1.0, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NOW: i64 = 1_700_000_000;

    fn bucket(store: Arc<MemoryStore>, clock: Arc<ManualClock>, key: &str, limit: u32, window: u64) -> TokenBucket {
        TokenBucket::new(store, clock, key, BucketLimit::new(limit, window))
    }

    #[test]
    fn test_absent_bucket_is_full() {
        let (allowed, next) = refill_and_take(None, NOW, BucketLimit::new(3, 60));
        assert!(allowed);
        assert_eq!(next, BucketState::new(2.0, NOW));
    }

    #[test]
    fn test_refill_is_linear_and_capped() {
        let limit = BucketLimit::new(10, 10);

        let (allowed, next) = refill_and_take(Some(BucketState::new(0.0, NOW - 5)), NOW, limit);
        assert!(allowed);
        assert!((next.allowance - 4.0).abs() < 1e-9);

        let (_, next) = refill_and_take(Some(BucketState::new(3.0, NOW - 3600)), NOW, limit);
        assert!((next.allowance - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_fractional_allowance_is_denied_and_drained() {
        let (allowed, next) = refill_and_take(Some(BucketState::new(0.3, NOW)), NOW, BucketLimit::new(5, 60));
        assert!(!allowed);
        assert_eq!(next, BucketState::new(0.0, NOW));
    }

    #[test]
    fn test_clock_going_backwards_does_not_drain() {
        let (allowed, next) = refill_and_take(Some(BucketState::new(2.0, NOW)), NOW - 30, BucketLimit::new(5, 60));
        assert!(allowed);
        assert_eq!(next.allowance, 1.0);
    }

    #[tokio::test]
    async fn test_limit_three_allows_three() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let bucket = bucket(store, clock, "test:basic", 3, 60);

        for _ in 0..3 {
            assert!(bucket.allow().await.unwrap());
        }
        assert!(!bucket.allow().await.unwrap());
    }

    #[tokio::test]
    async fn test_refill_from_stored_state() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let bucket = bucket(store.clone(), clock, "test:refill", 10, 10);

        let drained = BucketState::new(0.0, NOW - 5);
        store
            .compare_and_swap("test:refill", None, &drained, bucket.ttl())
            .await
            .unwrap();

        assert!(bucket.allow().await.unwrap());
        let state = store.load("test:refill").await.unwrap().unwrap();
        assert!((state.allowance - 4.0).abs() < 0.1);
        assert_eq!(state.last_refill, NOW);
    }

    #[tokio::test]
    async fn test_refills_over_time() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let bucket = bucket(store, clock.clone(), "test:time", 2, 60);

        assert!(bucket.allow().await.unwrap());
        assert!(bucket.allow().await.unwrap());
        assert!(!bucket.allow().await.unwrap());

        // 2 tokens per 60s: one token after 30s.
        clock.advance(30);
        assert!(bucket.allow().await.unwrap());
        assert!(!bucket.allow().await.unwrap());
    }

    #[tokio::test]
    async fn test_independent_buckets() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let first = bucket(store.clone(), clock.clone(), "test:bucket1", 2, 60);
        let second = bucket(store, clock, "test:bucket2", 2, 60);

        first.allow().await.unwrap();
        first.allow().await.unwrap();
        assert!(!first.allow().await.unwrap());

        assert!(second.allow().await.unwrap());
        assert!(second.allow().await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_is_window_plus_one() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(NOW));
        assert_eq!(bucket(store, clock, "k", 5, 60).ttl(), Duration::from_secs(61));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_callers_never_double_spend() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let bucket = Arc::new(bucket(store, clock, "test:race", 20, 3600));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..50 {
            let bucket = bucket.clone();
            tasks.spawn(async move { bucket.allow().await });
        }

        let mut granted = 0;
        while let Some(result) = tasks.join_next().await {
            match result.unwrap() {
                Ok(true) => granted += 1,
                Ok(false) => {}
                // Heavy contention may exhaust the retry budget; that is a
                // failed check, never an extra token.
                Err(GuardError::StoreContention(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(granted <= 20, "granted {granted} tokens from a bucket of 20");
    }

    /// Store whose conditional writes always lose
    struct AlwaysContended;

    #[async_trait]
    impl BucketStore for AlwaysContended {
        async fn load(&self, _key: &str) -> Result<Option<BucketState>> {
            Ok(None)
        }

        async fn compare_and_swap(
            &self,
            _key: &str,
            _expected: Option<&BucketState>,
            _new: &BucketState,
            _ttl: Duration,
        ) -> Result<bool> {
            Ok(false)
        }

        async fn delete(&self, _keys: &[String]) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_gives_up_under_permanent_contention() {
        let bucket = TokenBucket::new(
            Arc::new(AlwaysContended),
            Arc::new(ManualClock::new(NOW)),
            "test:contended",
            BucketLimit::new(5, 60),
        );
        assert!(matches!(
            bucket.allow().await,
            Err(GuardError::StoreContention(ref key)) if key == "test:contended"
        ));
    }

    #[test]
    fn test_retry_backoff_is_bounded() {
        assert!(retry_backoff(1) >= Duration::from_millis(1));
        assert!(retry_backoff(1) < Duration::from_millis(2));
        assert!(retry_backoff(MAX_SWAP_ATTEMPTS) < MAX_BACKOFF + Duration::from_millis(1));

        let worst: Duration = (1..MAX_SWAP_ATTEMPTS)
            .map(|attempt| Duration::from_millis(attempt as u64).min(MAX_BACKOFF) + Duration::from_millis(1))
            .sum();
        assert!(worst < Duration::from_millis(200), "worst-case retry pauses total {worst:?}");
    }

    /// Store that loses the first few conditional writes, then behaves
    struct LosesFirstSwaps {
        inner: MemoryStore,
        remaining_losses: AtomicUsize,
        swaps: AtomicUsize,
    }

    #[async_trait]
    impl BucketStore for LosesFirstSwaps {
        async fn load(&self, key: &str) -> Result<Option<BucketState>> {
            self.inner.load(key).await
        }

        async fn compare_and_swap(
            &self,
            key: &str,
            expected: Option<&BucketState>,
            new: &BucketState,
            ttl: Duration,
        ) -> Result<bool> {
            self.swaps.fetch_add(1, Ordering::SeqCst);
            let lose = self
                .remaining_losses
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lose {
                return Ok(false);
            }
            self.inner.compare_and_swap(key, expected, new, ttl).await
        }

        async fn delete(&self, keys: &[String]) -> Result<()> {
            self.inner.delete(keys).await
        }
    }

    #[tokio::test]
    async fn test_retries_after_lost_swaps() {
        let store = Arc::new(LosesFirstSwaps {
            inner: MemoryStore::new(),
            remaining_losses: AtomicUsize::new(5),
            swaps: AtomicUsize::new(0),
        });
        let bucket = TokenBucket::new(
            store.clone(),
            Arc::new(ManualClock::new(NOW)),
            "test:flaky",
            BucketLimit::new(2, 60),
        );

        assert!(bucket.allow().await.unwrap());
        assert_eq!(store.swaps.load(Ordering::SeqCst), 6);
        assert_eq!(
            store.inner.load("test:flaky").await.unwrap(),
            Some(BucketState::new(1.0, NOW))
        );
    }

    /// Store that is down
    struct Unreachable;

    #[async_trait]
    impl BucketStore for Unreachable {
        async fn load(&self, _key: &str) -> Result<Option<BucketState>> {
            Err(GuardError::StoreUnavailable("connection refused".into()))
        }

        async fn compare_and_swap(
            &self,
            _key: &str,
            _expected: Option<&BucketState>,
            _new: &BucketState,
            _ttl: Duration,
        ) -> Result<bool> {
            Err(GuardError::StoreUnavailable("connection refused".into()))
        }

        async fn delete(&self, _keys: &[String]) -> Result<()> {
            Err(GuardError::StoreUnavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let bucket = TokenBucket::new(
            Arc::new(Unreachable),
            Arc::new(ManualClock::new(NOW)),
            "test:down",
            BucketLimit::new(5, 60),
        );
        assert!(matches!(bucket.allow().await, Err(GuardError::StoreUnavailable(_))));
    }
}
