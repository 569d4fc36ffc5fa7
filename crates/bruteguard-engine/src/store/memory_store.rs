use async_trait::async_trait;
use bruteguard_core::Result;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{BucketState, BucketStore};

struct Entry {
    state: BucketState,
    expires_at: Instant,
}

#[derive(Default)]
struct Entries {
    map: HashMap<String, Entry>,
    /// Expiry queue; may hold outdated deadlines for keys that were rewritten.
    expiry: BinaryHeap<Reverse<(Instant, String)>>,
}

impl Entries {
    /// Drop every entry whose TTL has passed.
    fn purge_expired(&mut self, now: Instant) {
        while let Some(Reverse((at, _))) = self.expiry.peek() {
            if *at > now {
                break;
            }
            let Some(Reverse((_, key))) = self.expiry.pop() else {
                break;
            };
            if self.map.get(&key).is_some_and(|e| e.expires_at <= now) {
                self.map.remove(&key);
            }
        }
    }

    fn insert(&mut self, key: &str, state: BucketState, expires_at: Instant) {
        self.expiry.push(Reverse((expires_at, key.to_string())));
        self.map.insert(key.to_string(), Entry { state, expires_at });
    }
}

/// Process-local bucket store with the same semantics as [`RedisStore`](super::RedisStore)
///
/// Expired buckets are evicted on every access, so keys that are never read
/// again do not accumulate.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let mut entries = self.entries.lock().await;
        entries.purge_expired(Instant::now());
        entries.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<BucketState>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.purge_expired(now);
        Ok(entries
            .map
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.state))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&BucketState>,
        new: &BucketState,
        ttl: Duration,
    ) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.purge_expired(now);

        let current = entries
            .map
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| &e.state);
        if current != expected {
            return Ok(false);
        }

        entries.insert(key, *new, now + ttl);
        Ok(true)
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        let mut entries = self.entries.lock().await;
        for key in keys {
            entries.map.remove(key);
        }
        Ok(())
    }
}
