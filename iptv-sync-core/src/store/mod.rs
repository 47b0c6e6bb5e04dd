//! Shared key/value state for coordination across instances
//!
//! The sync lock and the progress record live here. Redis backs
//! multi-instance deployments; the in-memory store serves single-process
//! runs and tests.

mod memory;
mod redis_store;

use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Key of the sync lock record.
pub const SYNC_LOCK_KEY: &str = "sync:lock";
/// Key of the sync progress record.
pub const SYNC_PROGRESS_KEY: &str = "sync:progress";
/// Key of the lock serializing database migrations across replicas.
pub const MIGRATION_LOCK_KEY: &str = "migration:lock";

/// String-valued store with an atomic compare-and-swap.
///
/// No native expiry is required from implementations; records that expire
/// carry their own deadline.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Replace the value of `key` with `new` only if it currently equals
    /// `expected`. `None` means absent on either side, so
    /// `(None, Some(v))` is create-if-absent and `(Some(v), None)` is
    /// compare-and-delete. Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool>;
}

/// Open the store configured by `redis_url`; `None` selects process memory.
pub async fn open_store(redis_url: Option<&str>, key_prefix: &str) -> Result<Arc<dyn SharedStore>> {
    match redis_url {
        Some(url) => {
            let client = redis::Client::open(url)?;
            let conn = redis::aio::ConnectionManager::new(client).await?;
            tracing::info!("Using Redis for sync lock and progress");
            Ok(Arc::new(RedisStore::new(conn, key_prefix)))
        }
        None => {
            tracing::warn!("Redis not configured, sync lock and progress are process-local");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
