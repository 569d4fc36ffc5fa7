//! Shared key-value storage for token-bucket state
//!
//! A bucket is a hash with two fields, `allowance` and `timestamp`. The only
//! write primitive is a compare-and-swap that replaces both fields and resets
//! the key's expiry in one atomic step, so a decrement is always conditioned on
//! the exact state it was computed from.

mod memory_store;
mod redis_store;

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use bruteguard_core::{GuardError, Result};
use std::collections::HashMap;
use std::time::Duration;

pub const ALLOWANCE_FIELD: &str = "allowance";
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Persisted state of one token bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Tokens currently available, `0..=limit`
    pub allowance: f64,
    /// Epoch seconds of the last refill
    pub last_refill: i64,
}

impl BucketState {
    pub fn new(allowance: f64, last_refill: i64) -> Self {
        Self {
            allowance,
            last_refill,
        }
    }

    /// Canonical field encoding. Allowance is fixed to six decimals so that
    /// decode followed by encode reproduces the stored text exactly.
    pub fn encode(&self) -> (String, String) {
        (
            format!("{:.6}", self.allowance),
            self.last_refill.to_string(),
        )
    }

    /// Decode a hash read from the store. An empty hash means the key is absent.
    pub fn decode(key: &str, fields: &HashMap<String, String>) -> Result<Option<Self>> {
        if fields.is_empty() {
            return Ok(None);
        }

        let corrupt = |what: &str| {
            GuardError::StoreUnavailable(format!("corrupt bucket state at {}: {}", key, what))
        };

        let allowance = fields
            .get(ALLOWANCE_FIELD)
            .ok_or_else(|| corrupt("missing allowance"))?
            .parse::<f64>()
            .map_err(|_| corrupt("unparsable allowance"))?;
        let last_refill = fields
            .get(TIMESTAMP_FIELD)
            .ok_or_else(|| corrupt("missing timestamp"))?
            .parse::<i64>()
            .map_err(|_| corrupt("unparsable timestamp"))?;

        if !allowance.is_finite() {
            return Err(corrupt("non-finite allowance"));
        }

        Ok(Some(Self::new(allowance, last_refill)))
    }
}

#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Current state of `key`, `None` when the key does not exist.
    async fn load(&self, key: &str) -> Result<Option<BucketState>>;

    /// Atomically replace the state of `key` with `new` and set its expiry to
    /// `ttl`, but only if the stored state still equals `expected` (`None`
    /// meaning "key absent"). Returns `false` when another writer got there first.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&BucketState>,
        new: &BucketState,
        ttl: Duration,
    ) -> Result<bool>;

    /// Remove the given keys. Missing keys are ignored.
    async fn delete(&self, keys: &[String]) -> Result<()>;
}
