//! Sync progress tracker
//!
//! While a sync runs on this instance, the in-memory copy is authoritative
//! and a background task writes it to the shared store at most once per
//! flush interval. Start and end of a sync are written immediately.
//!
//! The cancel flag is the one field other instances write. Every flush
//! merges a durable `cancel_requested = true` back in unless this instance
//! cleared the flag since its last flush.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::SyncProgress;
use crate::store::SharedStore;
use crate::{Error, Result};

const MAX_CAS_ATTEMPTS: usize = 8;

/// Outcome of writing the cancel flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelRequest {
    /// No sync is running.
    NotRunning,
    /// Flag set; the running sync stops at its next checkpoint.
    Requested,
    /// The flag was already set by an earlier request.
    AlreadyRequested,
}

#[derive(Debug, Default)]
struct CacheState {
    progress: Option<SyncProgress>,
    /// Bumped on every local change; a flush only clears `dirty` if nothing
    /// changed while it was writing.
    version: u64,
    dirty: bool,
    cancel_cleared: bool,
}

struct Inner {
    store: Arc<dyn SharedStore>,
    key: String,
    state: Mutex<CacheState>,
    flush_gate: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Write-coalescing progress service, one per process.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("key", &self.inner.key)
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    /// Create the tracker and spawn its flusher on the current runtime.
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>, key: impl Into<String>, flush_interval: Duration) -> Self {
        let inner = Arc::new(Inner {
            store,
            key: key.into(),
            state: Mutex::new(CacheState::default()),
            flush_gate: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
        });
        spawn_flusher(
            Arc::downgrade(&inner),
            inner.shutdown.clone(),
            flush_interval.max(Duration::from_millis(10)),
        );
        Self { inner }
    }

    /// Stop the flusher after a final flush.
    pub async fn shutdown(&self) {
        if let Err(e) = self.flush().await {
            warn!(error = %e, "Final progress flush failed");
        }
        self.inner.shutdown.cancel();
    }

    async fn load_durable(&self) -> Result<(Option<String>, SyncProgress)> {
        let raw = self.inner.store.get(&self.inner.key).await?;
        let progress = match raw.as_deref() {
            Some(s) => serde_json::from_str(s).unwrap_or_else(|e| {
                warn!(key = %self.inner.key, error = %e, "Ignoring malformed progress record");
                SyncProgress::default()
            }),
            None => SyncProgress::default(),
        };
        Ok((raw, progress))
    }

    /// Current progress. A `force` read skips the local cache and returns
    /// the durable copy, which is what other instances see.
    pub async fn read(&self, force: bool) -> Result<SyncProgress> {
        if !force {
            if let Some(progress) = self.inner.state.lock().progress.clone() {
                return Ok(progress);
            }
        }
        Ok(self.load_durable().await?.1)
    }

    /// Whether this instance is driving a sync.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.inner.state.lock().progress.is_some()
    }

    /// Start tracking a new run and write it out immediately. Clears any
    /// leftover cancel flag.
    pub async fn begin(&self, mut progress: SyncProgress) -> Result<()> {
        progress.cancel_requested = false;
        {
            let mut state = self.inner.state.lock();
            state.progress = Some(progress);
            state.version += 1;
            state.dirty = true;
            state.cancel_cleared = true;
        }
        self.flush().await
    }

    /// Apply a change to the tracked run. Written by the next flush.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut SyncProgress),
    {
        let mut state = self.inner.state.lock();
        let Some(progress) = state.progress.as_mut() else {
            debug!("Progress update outside a tracked run ignored");
            return;
        };
        f(progress);
        state.version += 1;
        state.dirty = true;
    }

    /// Append to the run's error list.
    pub fn add_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|p| p.errors.push(message));
    }

    /// Apply a final change, clear the cancel flag, write immediately and
    /// stop tracking.
    pub async fn complete<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut SyncProgress),
    {
        {
            let mut state = self.inner.state.lock();
            if let Some(progress) = state.progress.as_mut() {
                f(progress);
                progress.cancel_requested = false;
                state.version += 1;
                state.dirty = true;
                state.cancel_cleared = true;
            }
        }
        let flushed = self.flush().await;
        self.inner.state.lock().progress = None;
        flushed
    }

    /// Write the tracked run if it changed since the last write.
    pub async fn flush(&self) -> Result<()> {
        let _gate = self.inner.flush_gate.lock().await;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let (mut snapshot, version, cancel_cleared) = {
                let state = self.inner.state.lock();
                match (&state.progress, state.dirty) {
                    (Some(progress), true) => (progress.clone(), state.version, state.cancel_cleared),
                    _ => return Ok(()),
                }
            };

            let (raw, durable) = self.load_durable().await?;
            if durable.cancel_requested && !cancel_cleared {
                snapshot.cancel_requested = true;
            }
            let encoded = serde_json::to_string(&snapshot)?;

            if self
                .inner
                .store
                .compare_and_swap(&self.inner.key, raw.as_deref(), Some(&encoded))
                .await?
            {
                let mut state = self.inner.state.lock();
                if let Some(progress) = state.progress.as_mut() {
                    if snapshot.cancel_requested {
                        progress.cancel_requested = true;
                    }
                }
                state.cancel_cleared = false;
                state.dirty = state.version != version;
                return Ok(());
            }
            debug!(key = %self.inner.key, "Progress flush raced a concurrent writer, retrying");
        }

        Err(Error::Internal("progress flush kept losing compare-and-swap".to_string()))
    }

    /// Read the durable cancel flag.
    pub async fn is_cancel_requested(&self) -> Result<bool> {
        let (_, durable) = self.load_durable().await?;
        let mut state = self.inner.state.lock();
        if state.cancel_cleared {
            return Ok(false);
        }
        if durable.cancel_requested {
            if let Some(progress) = state.progress.as_mut() {
                progress.cancel_requested = true;
            }
        }
        Ok(durable.cancel_requested)
    }

    /// Set the durable cancel flag for whichever instance runs the sync.
    pub async fn request_cancel(&self) -> Result<CancelRequest> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let (raw, mut durable) = self.load_durable().await?;
            if !durable.is_running {
                return Ok(CancelRequest::NotRunning);
            }
            if durable.cancel_requested {
                return Ok(CancelRequest::AlreadyRequested);
            }
            durable.cancel_requested = true;
            durable.current_step = "Cancellation requested".to_string();
            let encoded = serde_json::to_string(&durable)?;
            if self
                .inner
                .store
                .compare_and_swap(&self.inner.key, raw.as_deref(), Some(&encoded))
                .await?
            {
                return Ok(CancelRequest::Requested);
            }
        }
        Err(Error::Internal("cancel request kept losing compare-and-swap".to_string()))
    }

    /// Durable record as stored, plus its parsed form.
    pub async fn read_durable(&self) -> Result<(Option<String>, SyncProgress)> {
        self.load_durable().await
    }

    /// Overwrite the durable record only if it still equals `expected`.
    /// Returns whether the write happened; local tracking is untouched.
    pub async fn replace_if_unchanged(
        &self,
        expected: Option<&str>,
        progress: &SyncProgress,
    ) -> Result<bool> {
        let encoded = serde_json::to_string(progress)?;
        self.inner
            .store
            .compare_and_swap(&self.inner.key, expected, Some(&encoded))
            .await
    }

    /// Overwrite the durable record and stop tracking locally.
    pub async fn replace(&self, progress: &SyncProgress) -> Result<()> {
        let encoded = serde_json::to_string(progress)?;
        {
            let mut state = self.inner.state.lock();
            state.progress = None;
            state.dirty = false;
            state.cancel_cleared = false;
        }
        self.inner.store.set(&self.inner.key, &encoded).await
    }

    /// Back to idle.
    pub async fn reset(&self) -> Result<()> {
        self.replace(&SyncProgress::default()).await
    }
}

fn spawn_flusher(inner: Weak<Inner>, shutdown: CancellationToken, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("Progress flusher stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let tracker = ProgressTracker { inner };
            if let Err(e) = tracker.flush().await {
                warn!(error = %e, "Background progress flush failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SyncStatus, ProviderSyncStatus};
    use crate::store::{MemoryStore, SYNC_PROGRESS_KEY};
    use chrono::Utc;

    const INTERVAL: Duration = Duration::from_millis(1000);

    fn tracker(store: &MemoryStore) -> ProgressTracker {
        ProgressTracker::new(Arc::new(store.clone()), SYNC_PROGRESS_KEY, INTERVAL)
    }

    async fn durable(store: &MemoryStore) -> SyncProgress {
        let raw = store.get(SYNC_PROGRESS_KEY).await.unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    fn starting() -> SyncProgress {
        SyncProgress::starting(
            vec![ProviderSyncStatus {
                provider_id: 1,
                categories_total: 4,
                ..Default::default()
            }],
            Utc::now(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_is_written_immediately() {
        let store = MemoryStore::new();
        let progress = tracker(&store);
        progress.begin(starting()).await.unwrap();

        let stored = durable(&store).await;
        assert!(stored.is_running);
        assert_eq!(stored.status, SyncStatus::Running);
        assert_eq!(stored.total_categories, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_are_coalesced() {
        let store = MemoryStore::new();
        let progress = tracker(&store);
        progress.begin(starting()).await.unwrap();

        for i in 1..=3 {
            progress.update(|p| p.processed_categories = i);
        }
        // not yet written
        assert_eq!(durable(&store).await.processed_categories, 0);
        // cache serves the latest value
        assert_eq!(progress.read(false).await.unwrap().processed_categories, 3);

        tokio::time::sleep(INTERVAL + Duration::from_millis(50)).await;
        assert_eq!(durable(&store).await.processed_categories, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_read_bypasses_cache() {
        let store = MemoryStore::new();
        let progress = tracker(&store);
        progress.begin(starting()).await.unwrap();
        progress.update(|p| p.current_step = "local only".to_string());

        assert_eq!(progress.read(false).await.unwrap().current_step, "local only");
        assert_ne!(progress.read(true).await.unwrap().current_step, "local only");
        // a forced read never replaces the cache
        assert_eq!(progress.read(false).await.unwrap().current_step, "local only");
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_merges_remote_cancel() {
        let store = MemoryStore::new();
        let runner = tracker(&store);
        let poller = tracker(&store);
        runner.begin(starting()).await.unwrap();

        assert_eq!(poller.request_cancel().await.unwrap(), CancelRequest::Requested);

        runner.update(|p| p.processed_categories = 2);
        runner.flush().await.unwrap();

        let stored = durable(&store).await;
        assert!(stored.cancel_requested, "flush must not drop a remote cancel");
        assert_eq!(stored.processed_categories, 2);
        assert!(runner.is_cancel_requested().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_clears_stale_cancel() {
        let store = MemoryStore::new();
        let stale = SyncProgress {
            is_running: true,
            cancel_requested: true,
            ..Default::default()
        };
        store
            .set(SYNC_PROGRESS_KEY, &serde_json::to_string(&stale).unwrap())
            .await
            .unwrap();

        let progress = tracker(&store);
        progress.begin(starting()).await.unwrap();
        assert!(!durable(&store).await.cancel_requested);
        assert!(!progress.is_cancel_requested().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_clears_flag_and_stops_tracking() {
        let store = MemoryStore::new();
        let runner = tracker(&store);
        runner.begin(starting()).await.unwrap();
        tracker(&store).request_cancel().await.unwrap();

        runner
            .complete(|p| p.finish(SyncStatus::Cancelled, "Sync cancelled by user", Utc::now()))
            .await
            .unwrap();

        let stored = durable(&store).await;
        assert_eq!(stored.status, SyncStatus::Cancelled);
        assert!(!stored.is_running);
        assert!(!stored.cancel_requested);
        assert!(!runner.is_tracking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_cancel_outcomes() {
        let store = MemoryStore::new();
        let progress = tracker(&store);
        assert_eq!(progress.request_cancel().await.unwrap(), CancelRequest::NotRunning);

        progress.begin(starting()).await.unwrap();
        assert_eq!(progress.request_cancel().await.unwrap(), CancelRequest::Requested);
        assert_eq!(
            progress.request_cancel().await.unwrap(),
            CancelRequest::AlreadyRequested
        );

        progress.reset().await.unwrap();
        assert_eq!(durable(&store).await, SyncProgress::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_without_run_is_ignored() {
        let store = MemoryStore::new();
        let progress = tracker(&store);
        progress.update(|p| p.processed_providers = 9);
        progress.flush().await.unwrap();
        assert!(store.get(SYNC_PROGRESS_KEY).await.unwrap().is_none());
    }
}
