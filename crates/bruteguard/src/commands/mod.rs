pub mod check;
pub mod migrate;
pub mod reset;
pub mod server;
pub mod subnet;

use anyhow::{Context, Result};
use bruteguard_core::{ServiceConfig, StoreBackend};
use bruteguard_engine::{BucketStore, MemoryStore, RedisStore};
use std::sync::Arc;
use tracing::warn;

/// Open the bucket store selected by `store.backend`.
pub async fn connect_store(config: &ServiceConfig) -> Result<Arc<dyn BucketStore>> {
    match config.store.backend {
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.store.redis_url)
                .await
                .context("Failed to connect to Redis")?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using in-process bucket store; limits are not shared between instances");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
