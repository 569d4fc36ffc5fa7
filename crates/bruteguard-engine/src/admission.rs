//! Admission decisions for authentication attempts
//!
//! An attempt is first resolved against the IP lists: blacklisted addresses are
//! denied and whitelisted ones admitted without touching the rate limiter.
//! Everything else must get a token from the login, password and IP buckets.
//!
//! Faults anywhere on this path are returned as errors. Callers treat an error
//! as a denial, so a broken repository or store fails closed.

use bruteguard_core::{
    AuthRequest, GuardError, IpListStatus, ListKind, ResetRequest, Result, ServiceConfig, Subnet,
    SubnetRepository, Verdict,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::clock::SystemClock;
use crate::deadline::with_deadline;
use crate::ip_cache::{CacheStats, IpListCache};
use crate::limiter::RateLimiter;
use crate::store::BucketStore;

pub struct AdmissionController {
    repository: Arc<dyn SubnetRepository>,
    cache: IpListCache,
    limiter: RateLimiter,
    // Held for the duration of a refresh so concurrent callers share one.
    refresh_gate: Mutex<()>,
    request_timeout: Duration,
}

impl AdmissionController {
    pub fn new(
        repository: Arc<dyn SubnetRepository>,
        limiter: RateLimiter,
        cache_ttl: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            repository,
            cache: IpListCache::new(cache_ttl),
            limiter,
            refresh_gate: Mutex::new(()),
            request_timeout,
        }
    }

    pub fn from_config(
        config: &ServiceConfig,
        repository: Arc<dyn SubnetRepository>,
        store: Arc<dyn BucketStore>,
    ) -> Self {
        let limiter = RateLimiter::new(store, Arc::new(SystemClock), config.limits);
        Self::new(
            repository,
            limiter,
            config.cache.ttl(),
            config.request_timeout(),
        )
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.request_timeout
    }

    /// Decide whether an authentication attempt may proceed.
    pub async fn check_auth(&self, req: &AuthRequest) -> Result<Verdict> {
        self.check_auth_until(req, self.deadline()).await
    }

    /// Like [`check_auth`](Self::check_auth) with a caller-supplied deadline.
    pub async fn check_auth_until(&self, req: &AuthRequest, deadline: Instant) -> Result<Verdict> {
        let status = match self.ip_status(&req.ip, deadline).await {
            Ok(status) => status,
            Err(e) => {
                if e.is_client_error() {
                    debug!(ip = %req.ip, error = %e, "Rejected malformed address");
                } else {
                    error!(event = "auth_check_failed", ip = %req.ip, error = %e, "IP list lookup failed");
                }
                return Err(e);
            }
        };

        match status {
            IpListStatus::InBlacklist => {
                info!(event = "auth_denied", ip = %req.ip, reason = "blacklist", "IP blocked by blacklist");
                return Ok(Verdict::blacklisted());
            }
            IpListStatus::InWhitelist => {
                info!(event = "auth_allowed", ip = %req.ip, reason = "whitelist", "IP allowed by whitelist");
                return Ok(Verdict::whitelisted());
            }
            IpListStatus::NotInList => {}
        }

        let check = self.limiter.check(&req.login, &req.password, &req.ip);
        match with_deadline(deadline, "rate limit check", check).await {
            Ok(()) => {
                debug!(event = "auth_allowed", login = %req.login, ip = %req.ip, "Auth request within limits");
                Ok(Verdict::within_limits())
            }
            Err(GuardError::BucketExceeded { dimension }) => {
                warn!(
                    event = "auth_denied",
                    login = %req.login,
                    ip = %req.ip,
                    reason = "rate_limit",
                    %dimension,
                    "Rate limit exceeded"
                );
                Ok(Verdict::rate_limited(dimension))
            }
            Err(e) => {
                error!(event = "auth_check_failed", login = %req.login, ip = %req.ip, error = %e, "Rate limit check failed");
                Err(e)
            }
        }
    }

    /// Membership of `ip`, refreshing the lists first when they are stale.
    async fn ip_status(&self, ip: &str, deadline: Instant) -> Result<IpListStatus> {
        if self.cache.needs_refresh().await {
            with_deadline(deadline, "IP list refresh", self.refresh_lists(false)).await?;
        }
        self.cache.check_ip(ip).await
    }

    /// Reload both lists from the repository right away.
    pub async fn refresh_ip_lists(&self) -> Result<()> {
        with_deadline(self.deadline(), "IP list refresh", self.refresh_lists(true)).await
    }

    async fn refresh_lists(&self, force: bool) -> Result<()> {
        let _gate = self.refresh_gate.lock().await;

        // Someone else refreshed while we waited for the gate.
        if !force && !self.cache.needs_refresh().await {
            return Ok(());
        }

        let blacklist = self.repository.list_by_kind(ListKind::Blacklist).await?;
        let whitelist = self.repository.list_by_kind(ListKind::Whitelist).await?;
        self.cache.refresh(&blacklist, &whitelist).await?;

        info!(
            blacklist_count = blacklist.len(),
            whitelist_count = whitelist.len(),
            "IP lists cache reloaded"
        );
        Ok(())
    }

    /// Add a subnet. Enforcement picks it up at the next cache refresh.
    pub async fn create_subnet(&self, subnet: &Subnet) -> Result<()> {
        info!(list = %subnet.list_kind, cidr = %subnet.cidr, "Creating subnet");
        with_deadline(self.deadline(), "create subnet", self.repository.create(subnet)).await
    }

    pub async fn delete_subnet(&self, list_kind: ListKind, cidr: &str) -> Result<()> {
        info!(list = %list_kind, cidr = %cidr, "Deleting subnet");
        with_deadline(
            self.deadline(),
            "delete subnet",
            self.repository.delete(list_kind, cidr),
        )
        .await
    }

    pub async fn list_subnets(&self, list_kind: ListKind) -> Result<Vec<Subnet>> {
        debug!(list = %list_kind, "Listing subnets");
        with_deadline(
            self.deadline(),
            "list subnets",
            self.repository.list_by_kind(list_kind),
        )
        .await
    }

    /// Reset the login and/or IP buckets named in `req`.
    pub async fn reset_buckets(&self, req: &ResetRequest) -> Result<()> {
        let reset = self.limiter.reset_buckets(req.login(), req.ip());
        match with_deadline(self.deadline(), "reset buckets", reset).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if !e.is_client_error() {
                    error!(login = ?req.login(), ip = ?req.ip(), error = %e, "Failed to reset buckets");
                }
                Err(e)
            }
        }
    }

    pub async fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.stats().await
    }
}
