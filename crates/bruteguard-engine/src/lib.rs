//! Bruteguard decision engine
//!
//! Holds the in-memory IP list cache, the token buckets behind the rate
//! limiter, and the [`AdmissionController`] that combines them.

pub mod admission;
pub mod bucket;
pub mod clock;
pub mod deadline;
pub mod ip_cache;
pub mod limiter;
pub mod memory_repository;
pub mod store;

pub use admission::AdmissionController;
pub use bucket::TokenBucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use ip_cache::{CacheStats, IpListCache};
pub use limiter::RateLimiter;
pub use memory_repository::MemoryRepository;
pub use store::{BucketState, BucketStore, MemoryStore, RedisStore};
