//! Distributed sync lock
//!
//! Singleton lock record `{owner_id, expires_at}` in the shared store.
//! Expiry is evaluated lazily against the stored deadline, so the store
//! needs no native TTL; every transition goes through compare-and-swap.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::SharedStore;
use crate::{Error, Result};

/// CAS attempts before giving up on a contended transition.
const MAX_CAS_ATTEMPTS: usize = 5;

/// Current lock record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub owner_id: String,
    pub expires_at: DateTime<Utc>,
}

impl LockHolder {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Mutual exclusion across instances sharing one store
#[derive(Clone)]
pub struct SyncLock {
    store: Arc<dyn SharedStore>,
    key: String,
    ttl: chrono::Duration,
}

impl std::fmt::Debug for SyncLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLock")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SyncLock {
    pub fn new(store: Arc<dyn SharedStore>, key: impl Into<String>, ttl: Duration) -> Result<Self> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::InvalidInput(format!("lock ttl out of range: {e}")))?;
        if ttl <= chrono::Duration::zero() {
            return Err(Error::InvalidInput("lock ttl must be positive".to_string()));
        }
        Ok(Self {
            store,
            key: key.into(),
            ttl,
        })
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Raw record plus its parsed form. Unparseable records count as absent
    /// but keep their raw value so CAS can replace them.
    async fn load(&self) -> Result<(Option<String>, Option<LockHolder>)> {
        let raw = self.store.get(&self.key).await?;
        let holder = raw.as_deref().and_then(|s| match serde_json::from_str(s) {
            Ok(holder) => Some(holder),
            Err(e) => {
                tracing::warn!(lock_key = %self.key, error = %e, "Ignoring malformed lock record");
                None
            }
        });
        Ok((raw, holder))
    }

    fn record(&self, owner_id: &str, now: DateTime<Utc>) -> Result<String> {
        Ok(serde_json::to_string(&LockHolder {
            owner_id: owner_id.to_string(),
            expires_at: now + self.ttl,
        })?)
    }

    /// Take the lock if it is absent or expired.
    ///
    /// Returns `false` when someone else holds a live lock.
    pub async fn acquire(&self, owner_id: &str) -> Result<bool> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let now = Utc::now();
            let (raw, holder) = self.load().await?;
            if let Some(holder) = &holder {
                if !holder.is_expired(now) {
                    tracing::debug!(
                        lock_key = %self.key,
                        holder = %holder.owner_id,
                        "Lock already held by another process"
                    );
                    return Ok(false);
                }
                tracing::info!(
                    lock_key = %self.key,
                    previous_owner = %holder.owner_id,
                    expired_at = %holder.expires_at,
                    "Taking over expired lock"
                );
            }

            let record = self.record(owner_id, now)?;
            if self
                .store
                .compare_and_swap(&self.key, raw.as_deref(), Some(&record))
                .await?
            {
                tracing::debug!(lock_key = %self.key, owner_id, "Lock acquired");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Release the lock if `owner_id` holds it (compare-and-delete).
    pub async fn release(&self, owner_id: &str) -> Result<bool> {
        let (raw, holder) = self.load().await?;
        let released = match holder {
            Some(holder) if holder.owner_id == owner_id => {
                self.store
                    .compare_and_swap(&self.key, raw.as_deref(), None)
                    .await?
            }
            _ => false,
        };

        if released {
            tracing::debug!(lock_key = %self.key, owner_id, "Lock released");
        } else {
            tracing::warn!(
                lock_key = %self.key,
                owner_id,
                "Lock release failed: not the holder or already taken over"
            );
        }
        Ok(released)
    }

    /// Push the deadline out by one TTL. Fails once the lock has expired or
    /// changed hands.
    pub async fn extend(&self, owner_id: &str) -> Result<bool> {
        let now = Utc::now();
        let (raw, holder) = self.load().await?;
        match holder {
            Some(holder) if holder.owner_id == owner_id && !holder.is_expired(now) => {
                let record = self.record(owner_id, now)?;
                self.store
                    .compare_and_swap(&self.key, raw.as_deref(), Some(&record))
                    .await
            }
            _ => Ok(false),
        }
    }

    /// Whether a live lock exists. Does not take ownership.
    pub async fn is_locked(&self) -> Result<bool> {
        Ok(self.holder().await?.is_some())
    }

    /// The live holder, if any.
    pub async fn holder(&self) -> Result<Option<LockHolder>> {
        let (_, holder) = self.load().await?;
        Ok(holder.filter(|h| !h.is_expired(Utc::now())))
    }

    /// Confirm the lock is dead, deleting it if it is expired.
    ///
    /// Only the record observed here is deleted (compare-and-delete against
    /// its raw value), so a lock taken meanwhile survives. Returns `true` when
    /// the lock is absent or the observed expired record was removed, `false`
    /// when it is live or changed underneath.
    pub async fn clear_if_expired(&self) -> Result<bool> {
        let (raw, holder) = self.load().await?;
        let Some(raw) = raw else {
            return Ok(true);
        };
        if let Some(holder) = &holder {
            if !holder.is_expired(Utc::now()) {
                return Ok(false);
            }
        }
        let cleared = self.store.compare_and_swap(&self.key, Some(&raw), None).await?;
        if cleared {
            tracing::info!(
                lock_key = %self.key,
                owner_id = holder.as_ref().map_or("<unknown>", |h| h.owner_id.as_str()),
                "Expired lock cleared"
            );
        }
        Ok(cleared)
    }

    /// Delete the lock regardless of owner. Used when the holding process is
    /// known to be gone.
    pub async fn force_release(&self) -> Result<bool> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let (raw, holder) = self.load().await?;
            let Some(raw) = raw else {
                return Ok(false);
            };
            if self.store.compare_and_swap(&self.key, Some(&raw), None).await? {
                tracing::warn!(
                    lock_key = %self.key,
                    owner_id = holder.as_ref().map_or("<unknown>", |h| h.owner_id.as_str()),
                    "Lock force-released"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }
}
