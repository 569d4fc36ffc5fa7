use async_trait::async_trait;
use bruteguard_core::{GuardError, Result};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use super::{BucketState, BucketStore};

// KEYS[1] bucket key
// ARGV[1], ARGV[2] expected allowance/timestamp ("" when the key must be absent)
// ARGV[3], ARGV[4] new allowance/timestamp
// ARGV[5] expiry in seconds
const COMPARE_AND_SWAP: &str = r#"
if ARGV[1] == '' then
    if redis.call('EXISTS', KEYS[1]) == 1 then
        return 0
    end
else
    local allowance = redis.call('HGET', KEYS[1], 'allowance')
    local timestamp = redis.call('HGET', KEYS[1], 'timestamp')
    if allowance ~= ARGV[1] or timestamp ~= ARGV[2] then
        return 0
    end
end
redis.call('HSET', KEYS[1], 'allowance', ARGV[3], 'timestamp', ARGV[4])
redis.call('EXPIRE', KEYS[1], ARGV[5])
return 1
"#;

/// Bucket store shared by every service instance through Redis
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    compare_and_swap: Script,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;
        info!("Connected to Redis bucket store");

        Ok(Self {
            conn,
            compare_and_swap: Script::new(COMPARE_AND_SWAP),
        })
    }
}

#[async_trait]
impl BucketStore for RedisStore {
    async fn load(&self, key: &str) -> Result<Option<BucketState>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(key).await.map_err(unavailable)?;
        BucketState::decode(key, &fields)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&BucketState>,
        new: &BucketState,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let (expected_allowance, expected_timestamp) =
            expected.map(BucketState::encode).unwrap_or_default();
        let (new_allowance, new_timestamp) = new.encode();

        let swapped: i64 = self
            .compare_and_swap
            .key(key)
            .arg(expected_allowance)
            .arg(expected_timestamp)
            .arg(new_allowance)
            .arg(new_timestamp)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(swapped == 1)
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        let _: () = conn.del(keys.to_vec()).await.map_err(unavailable)?;
        Ok(())
    }
}

fn unavailable(err: RedisError) -> GuardError {
    GuardError::StoreUnavailable(err.to_string())
}
