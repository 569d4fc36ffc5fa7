use bruteguard_core::{Dimension, GuardError, RateLimitConfig, Result};
use std::sync::Arc;
use tracing::{debug, info};

use crate::bucket::TokenBucket;
use crate::clock::Clock;
use crate::store::BucketStore;

/// Login, password and IP buckets checked as one unit
pub struct RateLimiter {
    store: Arc<dyn BucketStore>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn BucketStore>, clock: Arc<dyn Clock>, config: RateLimitConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn bucket(&self, dimension: Dimension, value: &str) -> TokenBucket {
        TokenBucket::new(
            self.store.clone(),
            self.clock.clone(),
            dimension.bucket_key(value),
            self.config.for_dimension(dimension),
        )
    }

    /// Take one token from each bucket in order login, password, ip.
    ///
    /// Stops at the first empty bucket with `BucketExceeded`. Tokens already
    /// taken from earlier buckets are not returned.
    pub async fn check(&self, login: &str, password: &str, ip: &str) -> Result<()> {
        for (dimension, value) in [
            (Dimension::Login, login),
            (Dimension::Password, password),
            (Dimension::Ip, ip),
        ] {
            if !self.bucket(dimension, value).allow().await? {
                debug!(%dimension, "Rate limit bucket empty");
                return Err(GuardError::BucketExceeded { dimension });
            }
        }

        Ok(())
    }

    /// Drop the login and IP buckets so they start full again.
    ///
    /// The password bucket is left alone even though `check` debits it.
    pub async fn reset_buckets(&self, login: Option<&str>, ip: Option<&str>) -> Result<()> {
        let keys: Vec<String> = [(Dimension::Login, login), (Dimension::Ip, ip)]
            .into_iter()
            .filter_map(|(dimension, value)| value.map(|v| dimension.bucket_key(v)))
            .collect();

        if keys.is_empty() {
            return Err(GuardError::InvalidRequest(
                "either login or ip must be provided".to_string(),
            ));
        }

        self.store.delete(&keys).await?;
        info!(login = ?login, ip = ?ip, "Rate limit buckets reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use bruteguard_core::BucketLimit;

    const NOW: i64 = 1_700_000_000;

    fn build_limiter(store: Arc<MemoryStore>, login: u32, password: u32, ip: u32) -> RateLimiter {
        RateLimiter::new(
            store,
            Arc::new(ManualClock::new(NOW)),
            RateLimitConfig {
                login: BucketLimit::new(login, 60),
                password: BucketLimit::new(password, 60),
                ip: BucketLimit::new(ip, 60),
            },
        )
    }

    fn exceeded(result: Result<()>) -> Option<Dimension> {
        match result {
            Err(GuardError::BucketExceeded { dimension }) => Some(dimension),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_all_buckets_with_capacity() {
        let limiter = build_limiter(Arc::new(MemoryStore::new()), 2, 2, 2);
        limiter.check("alice", "pw", "10.0.0.1").await.unwrap();
        limiter.check("alice", "pw", "10.0.0.1").await.unwrap();
    }

    #[tokio::test]
    async fn test_login_dimension_reported() {
        let limiter = build_limiter(Arc::new(MemoryStore::new()), 1, 100, 100);

        limiter.check("alice", "pw1", "10.0.0.1").await.unwrap();
        let result = limiter.check("alice", "pw2", "10.0.0.2").await;
        assert_eq!(exceeded(result), Some(Dimension::Login));

        // Another login is unaffected.
        limiter.check("bob", "pw3", "10.0.0.3").await.unwrap();
    }

    #[tokio::test]
    async fn test_password_and_ip_dimensions_reported() {
        let limiter = build_limiter(Arc::new(MemoryStore::new()), 100, 1, 100);
        limiter.check("alice", "123456", "10.0.0.1").await.unwrap();
        assert_eq!(
            exceeded(limiter.check("bob", "123456", "10.0.0.2").await),
            Some(Dimension::Password)
        );

        let limiter = build_limiter(Arc::new(MemoryStore::new()), 100, 100, 1);
        limiter.check("alice", "a", "10.0.0.1").await.unwrap();
        assert_eq!(
            exceeded(limiter.check("bob", "b", "10.0.0.1").await),
            Some(Dimension::Ip)
        );
    }

    #[tokio::test]
    async fn test_earlier_buckets_are_debited_on_later_denial() {
        let store = Arc::new(MemoryStore::new());
        let limiter = build_limiter(store.clone(), 5, 1, 5);

        limiter.check("alice", "pw", "10.0.0.1").await.unwrap();
        assert_eq!(
            exceeded(limiter.check("bob", "pw", "10.0.0.2").await),
            Some(Dimension::Password)
        );

        // bob's login bucket paid for the denied attempt, his IP bucket did not.
        let login = store.load("ratelimit:login:bob").await.unwrap().unwrap();
        assert_eq!(login.allowance, 4.0);
        assert!(store.load("ratelimit:ip:10.0.0.2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_restores_login_and_ip_only() {
        let store = Arc::new(MemoryStore::new());
        let limiter = build_limiter(store.clone(), 1, 5, 1);

        limiter.check("alice", "pw", "10.0.0.1").await.unwrap();
        assert!(exceeded(limiter.check("alice", "pw", "10.0.0.1").await).is_some());

        limiter
            .reset_buckets(Some("alice"), Some("10.0.0.1"))
            .await
            .unwrap();
        limiter.check("alice", "pw", "10.0.0.1").await.unwrap();

        // Password bucket kept its history: two attempts reached it.
        let password = store.load("ratelimit:password:pw").await.unwrap().unwrap();
        assert_eq!(password.allowance, 3.0);
    }

    #[tokio::test]
    async fn test_reset_login_only() {
        let store = Arc::new(MemoryStore::new());
        let limiter = build_limiter(store.clone(), 1, 5, 5);
        limiter.check("alice", "pw", "10.0.0.1").await.unwrap();

        limiter.reset_buckets(Some("alice"), None).await.unwrap();
        assert!(store.load("ratelimit:login:alice").await.unwrap().is_none());
        assert!(store.load("ratelimit:ip:10.0.0.1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reset_requires_a_key() {
        let limiter = build_limiter(Arc::new(MemoryStore::new()), 1, 1, 1);
        assert!(matches!(
            limiter.reset_buckets(None, None).await,
            Err(GuardError::InvalidRequest(_))
        ));
    }
}
