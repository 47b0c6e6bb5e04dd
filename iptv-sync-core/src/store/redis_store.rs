//! Redis-backed shared store

use async_trait::async_trait;
use redis::aio::ConnectionManager as RedisConnectionManager;
use redis::{AsyncCommands, Script};
use std::sync::LazyLock;

use super::SharedStore;
use crate::Result;

// ARGV: has_expected, expected, has_new, new
static CAS_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        local current = redis.call("GET", KEYS[1])
        if ARGV[1] == "1" then
            if current ~= ARGV[2] then
                return 0
            end
        elseif current then
            return 0
        end
        if ARGV[3] == "1" then
            redis.call("SET", KEYS[1], ARGV[4])
        else
            redis.call("DEL", KEYS[1])
        end
        return 1
        "#,
    )
});

/// Redis store, all keys under a common prefix
#[derive(Clone)]
pub struct RedisStore {
    redis: RedisConnectionManager,
    key_prefix: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    #[must_use]
    pub fn new(redis: RedisConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            redis,
            key_prefix: key_prefix.into(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.redis.clone();
        Ok(conn.get(self.full_key(key)).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: () = conn.set(self.full_key(key), value).await?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool> {
        let full_key = self.full_key(key);
        let mut conn = self.redis.clone();

        let swapped: i32 = CAS_SCRIPT
            .key(&full_key)
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(expected.unwrap_or_default())
            .arg(if new.is_some() { "1" } else { "0" })
            .arg(new.unwrap_or_default())
            .invoke_async(&mut conn)
            .await?;

        tracing::trace!(key = %full_key, swapped = swapped == 1, "compare_and_swap");
        Ok(swapped == 1)
    }
}
