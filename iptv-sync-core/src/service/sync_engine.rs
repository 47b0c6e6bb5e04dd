//! Sync orchestrator
//!
//! One full sync: take the shared lock, publish progress, walk the enabled
//! providers in id order, swap each provider's catalog, publish the terminal
//! state, release the lock. Progress is finalized and the lock released on
//! every exit path, panics included.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::models::{
    Provider, ProviderSyncState, ProviderSyncStatus, SyncProgress, SyncStatus, SyncTarget,
};
use crate::provider::{source_for, DetachedObserver, FetchObserver};
use crate::repository::CatalogRepository;
use crate::service::progress::{CancelRequest, ProgressTracker};
use crate::service::sync_lock::SyncLock;
use crate::store::{SharedStore, SYNC_LOCK_KEY, SYNC_PROGRESS_KEY};
use crate::{Error, Result};

pub const ALREADY_RUNNING: &str = "Another sync is already running";
pub const NO_PROVIDERS: &str = "No enabled providers found";
pub const STALE_RUN: &str = "Sync process terminated unexpectedly";

/// Result of a full sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FullSyncReport {
    pub success: bool,
    pub status: SyncStatus,
    pub providers_processed: u32,
    pub total_channels: u64,
    pub errors: Vec<String>,
}

/// Result of a single-provider sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderSyncReport {
    pub success: bool,
    pub channel_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderSyncReport {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            channel_count: 0,
            error: Some(error.into()),
        }
    }
}

/// Result of category discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    pub success: bool,
    pub upserted: usize,
    pub removed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DiscoveryReport {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            upserted: 0,
            removed: 0,
            error: Some(error.into()),
        }
    }
}

/// Outcome of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    NotRunning,
    Requested,
    /// A second request found the first unanswered: progress was reset and
    /// the lock force-released.
    ForceReset,
}

/// Counters that survive an aborted run
#[derive(Debug, Default)]
struct RunTally {
    providers_processed: u32,
    total_channels: u64,
    errors: Vec<String>,
}

pub struct SyncEngine {
    repo: Arc<dyn CatalogRepository>,
    lock: SyncLock,
    progress: ProgressTracker,
    config: SyncConfig,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("lock", &self.lock)
            .field("progress", &self.progress)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Build the engine over a catalog and a shared store. Spawns the
    /// progress flusher, so a runtime must be active.
    pub fn new(
        repo: Arc<dyn CatalogRepository>,
        store: Arc<dyn SharedStore>,
        config: SyncConfig,
    ) -> Result<Self> {
        let lock = SyncLock::new(store.clone(), SYNC_LOCK_KEY, config.lock_ttl())?;
        let progress = ProgressTracker::new(store, SYNC_PROGRESS_KEY, config.flush_interval());
        Ok(Self {
            repo,
            lock,
            progress,
            config,
        })
    }

    #[must_use]
    pub const fn progress_tracker(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Flush pending progress and stop the flusher.
    pub async fn shutdown(&self) {
        self.progress.shutdown().await;
    }

    /// Sync every enabled provider.
    ///
    /// Lock contention is reported in the result, not as an error. `Err` is
    /// only returned when the lock store itself is unreachable.
    pub async fn run_full_sync(&self) -> Result<FullSyncReport> {
        let owner_id = nanoid::nanoid!();
        if !self.lock.acquire(&owner_id).await? {
            info!("Full sync skipped: lock held elsewhere");
            return Ok(FullSyncReport {
                success: false,
                status: SyncStatus::Idle,
                providers_processed: 0,
                total_channels: 0,
                errors: vec![ALREADY_RUNNING.to_string()],
            });
        }
        info!(owner_id = %owner_id, "Full sync started");

        let heartbeat = self.spawn_heartbeat(&owner_id);
        let _heartbeat = heartbeat.drop_guard();

        let mut tally = RunTally::default();
        let outcome = AssertUnwindSafe(self.run_locked(&mut tally))
            .catch_unwind()
            .await;

        let report = match outcome {
            Ok(Ok(status)) => FullSyncReport {
                success: status == SyncStatus::Completed,
                status,
                providers_processed: tally.providers_processed,
                total_channels: tally.total_channels,
                errors: tally.errors,
            },
            Ok(Err(e)) if e.is_cancelled() => self.finish_cancelled(tally).await,
            Ok(Err(e)) => self.finish_failed(tally, e.to_string()).await,
            Err(panic) => self.finish_failed(tally, panic_message(panic.as_ref())).await,
        };

        if let Err(e) = self.lock.release(&owner_id).await {
            warn!(owner_id = %owner_id, error = %e, "Failed to release sync lock");
        }
        info!(
            success = report.success,
            status = ?report.status,
            providers = report.providers_processed,
            channels = report.total_channels,
            "Full sync finished"
        );
        Ok(report)
    }

    async fn run_locked(&self, tally: &mut RunTally) -> Result<SyncStatus> {
        let targets = self.repo.enabled_targets().await?;

        let statuses = targets
            .iter()
            .map(|t| ProviderSyncStatus {
                provider_id: t.provider.id,
                provider_name: t.provider.name.clone(),
                categories_total: u32::try_from(t.categories.len()).unwrap_or(u32::MAX),
                ..ProviderSyncStatus::default()
            })
            .collect();
        self.progress
            .begin(SyncProgress::starting(statuses, Utc::now()))
            .await?;

        if targets.is_empty() {
            self.progress
                .complete(|p| {
                    p.errors.push(NO_PROVIDERS.to_string());
                    p.finish(SyncStatus::Completed, NO_PROVIDERS, Utc::now());
                })
                .await?;
            // informational only; the run still succeeds
            tally.errors.push(NO_PROVIDERS.to_string());
            return Ok(SyncStatus::Completed);
        }

        let mut failed = false;
        for (index, target) in targets.iter().enumerate() {
            self.checkpoint().await?;
            let name = target.provider.name.clone();
            self.progress.update(|p| {
                p.current_step = format!("Syncing {name}");
                p.processed_providers = u32::try_from(index).unwrap_or(u32::MAX);
                if let Some(status) = p.providers.get_mut(index) {
                    status.status = ProviderSyncState::Syncing;
                    status.started_at = Some(Utc::now());
                }
            });

            let observer = RunObserver {
                progress: &self.progress,
                index,
            };
            match self.fetch_and_swap(target, &observer).await {
                Ok(count) => {
                    tally.providers_processed += 1;
                    tally.total_channels += count;
                    let total = tally.total_channels;
                    self.progress.update(|p| {
                        if let Some(status) = p.providers.get_mut(index) {
                            status.status = ProviderSyncState::Completed;
                            status.channels_fetched = count;
                            status.categories_processed =
                                status.categories_processed.max(status.categories_total);
                            status.completed_at = Some(Utc::now());
                        }
                        p.processed_providers = u32::try_from(index + 1).unwrap_or(u32::MAX);
                        p.total_channels = total;
                        p.current_step = format!("Completed {name} ({count} channels)");
                        p.recount_categories();
                    });
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    failed = true;
                    let message = format!("Error syncing {name}: {e}");
                    warn!(provider_id = target.provider.id, error = %e, "Provider sync failed");
                    tally.errors.push(message.clone());

                    let detail = e.to_string();
                    self.progress.update(|p| {
                        p.errors.push(message);
                        if let Some(status) = p.providers.get_mut(index) {
                            status.status = ProviderSyncState::Error;
                            status.error = Some(detail.clone());
                            status.categories_processed =
                                status.categories_processed.max(status.categories_total);
                            status.completed_at = Some(Utc::now());
                        }
                        p.processed_providers = u32::try_from(index + 1).unwrap_or(u32::MAX);
                        p.recount_categories();
                    });
                    if let Err(db) = self.repo.mark_failed(target.provider.id, detail).await {
                        warn!(provider_id = target.provider.id, error = %db, "Failed to record provider error");
                    }
                }
            }
        }

        let status = if failed {
            SyncStatus::CompletedWithErrors
        } else {
            SyncStatus::Completed
        };
        let step = format!(
            "Done. {} providers, {} channels",
            tally.providers_processed, tally.total_channels
        );
        let total = tally.total_channels;
        self.progress
            .complete(|p| {
                p.total_channels = total;
                p.processed_providers = p.total_providers;
                p.recount_categories();
                p.finish(status, step, Utc::now());
            })
            .await?;
        Ok(status)
    }

    /// Fetch one provider's catalog and commit it. A cancellation requested
    /// during the fetch prevents the commit.
    async fn fetch_and_swap(&self, target: &SyncTarget, observer: &dyn FetchObserver) -> Result<u64> {
        let source = source_for(&target.provider, &self.config, self.repo.clone())?;
        let channels = source.fetch_catalog(target, observer).await?;
        observer.checkpoint().await?;

        let count = self.repo.swap_channels(target.provider.id, channels).await?;
        self.repo.mark_synced(target.provider.id, count).await?;
        debug!(provider_id = target.provider.id, channels = count, "Provider catalog swapped");
        Ok(count)
    }

    async fn checkpoint(&self) -> Result<()> {
        if self.progress.is_cancel_requested().await? {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    async fn finish_cancelled(&self, tally: RunTally) -> FullSyncReport {
        info!("Full sync cancelled by user");
        let message = Error::Cancelled.to_string();
        let step = message.clone();
        if let Err(e) = self
            .progress
            .complete(|p| p.finish(SyncStatus::Cancelled, step, Utc::now()))
            .await
        {
            warn!(error = %e, "Failed to write cancelled progress");
        }

        let mut errors = tally.errors;
        errors.push(message);
        FullSyncReport {
            success: false,
            status: SyncStatus::Cancelled,
            providers_processed: tally.providers_processed,
            total_channels: tally.total_channels,
            errors,
        }
    }

    async fn finish_failed(&self, tally: RunTally, cause: String) -> FullSyncReport {
        let message = format!("Sync failed: {cause}");
        error!(error = %cause, "Full sync failed");

        let written = if self.progress.is_tracking() {
            let step = message.clone();
            let entry = message.clone();
            self.progress
                .complete(|p| {
                    p.errors.push(entry);
                    p.finish(SyncStatus::Error, step, Utc::now());
                })
                .await
        } else {
            // failed before progress was published
            let mut progress = SyncProgress::default();
            progress.errors.push(message.clone());
            progress.finish(SyncStatus::Error, message.clone(), Utc::now());
            self.progress.replace(&progress).await
        };
        if let Err(e) = written {
            warn!(error = %e, "Failed to write failed progress");
        }

        let mut errors = tally.errors;
        errors.push(message);
        FullSyncReport {
            success: false,
            status: SyncStatus::Error,
            providers_processed: tally.providers_processed,
            total_channels: tally.total_channels,
            errors,
        }
    }

    /// Extend the lock until the returned token is cancelled.
    fn spawn_heartbeat(&self, owner_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let stop = token.clone();
        let lock = self.lock.clone();
        let owner_id = owner_id.to_string();
        let period = self.config.lock_heartbeat().max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = stop.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                match lock.extend(&owner_id).await {
                    Ok(true) => debug!(owner_id = %owner_id, "Sync lock extended"),
                    Ok(false) => {
                        warn!(owner_id = %owner_id, "Sync lock lost, heartbeat stopped");
                        return;
                    }
                    Err(e) => warn!(owner_id = %owner_id, error = %e, "Sync lock heartbeat failed"),
                }
            }
        });
        token
    }

    /// Sync a single provider, enabled or not. Takes the shared lock but
    /// leaves run progress alone.
    pub async fn sync_provider(&self, provider_id: i64) -> Result<ProviderSyncReport> {
        let owner_id = nanoid::nanoid!();
        if !self.lock.acquire(&owner_id).await? {
            return Ok(ProviderSyncReport::failed(ALREADY_RUNNING));
        }
        let heartbeat = self.spawn_heartbeat(&owner_id);
        let _heartbeat = heartbeat.drop_guard();

        let outcome = AssertUnwindSafe(self.sync_single(provider_id))
            .catch_unwind()
            .await;

        if let Err(e) = self.lock.release(&owner_id).await {
            warn!(owner_id = %owner_id, error = %e, "Failed to release sync lock");
        }

        Ok(match outcome {
            Ok(report) => report,
            Err(panic) => ProviderSyncReport::failed(format!(
                "Sync failed: {}",
                panic_message(panic.as_ref())
            )),
        })
    }

    async fn sync_single(&self, provider_id: i64) -> ProviderSyncReport {
        let target = match self.repo.target(provider_id).await {
            Ok(Some(target)) => target,
            Ok(None) => return ProviderSyncReport::failed(format!("Provider {provider_id} not found")),
            Err(e) => return ProviderSyncReport::failed(e.to_string()),
        };

        match self.fetch_and_swap(&target, &DetachedObserver).await {
            Ok(channel_count) => {
                info!(provider_id, channels = channel_count, "Provider synced");
                ProviderSyncReport {
                    success: true,
                    channel_count,
                    error: None,
                }
            }
            Err(e) => {
                let message = e.to_string();
                warn!(provider_id, error = %message, "Provider sync failed");
                if let Err(db) = self.repo.mark_failed(provider_id, message.clone()).await {
                    warn!(provider_id, error = %db, "Failed to record provider error");
                }
                ProviderSyncReport::failed(message)
            }
        }
    }

    /// Refresh a provider's category list from upstream: upsert what is
    /// listed, delete what is gone.
    pub async fn discover_categories(&self, provider_id: i64) -> Result<DiscoveryReport> {
        let Some(target) = self.repo.target(provider_id).await? else {
            return Ok(DiscoveryReport::failed(format!("Provider {provider_id} not found")));
        };

        match self.discover(&target.provider).await {
            Ok((upserted, removed)) => {
                info!(provider_id, upserted, removed, "Categories discovered");
                Ok(DiscoveryReport {
                    success: true,
                    upserted,
                    removed,
                    error: None,
                })
            }
            Err(e) => {
                let message = e.to_string();
                warn!(provider_id, error = %message, "Category discovery failed");
                self.repo.mark_failed(provider_id, message.clone()).await?;
                Ok(DiscoveryReport::failed(message))
            }
        }
    }

    async fn discover(&self, provider: &Provider) -> Result<(usize, u64)> {
        let source = source_for(provider, &self.config, self.repo.clone())?;
        let found = source.discover_categories().await?;
        if found.is_empty() {
            return Err(Error::EmptyCatalog(
                "No categories discovered, keeping existing categories".to_string(),
            ));
        }
        let upserted = self
            .repo
            .upsert_categories(provider.id, found.clone())
            .await?
            .len();
        let removed = self.repo.prune_categories(provider.id, found).await?;
        Ok((upserted, removed))
    }

    /// Current progress, with stale-run recovery.
    ///
    /// A record claiming a run while no instance holds the lock belongs to a
    /// process that died; it is rewritten as finished with errors.
    pub async fn progress(&self, force: bool) -> Result<SyncProgress> {
        let progress = self.progress.read(force).await?;
        if !progress.is_running || self.progress.is_tracking() {
            return Ok(progress);
        }

        // progress is read before the lock: a run that starts after this
        // point rewrites the record and makes the CAS below lose
        let (raw, durable) = self.progress.read_durable().await?;
        if !durable.is_running || !self.lock.clear_if_expired().await? {
            return Ok(durable);
        }

        warn!("Progress shows a running sync but the lock is dead; recovering stale run");
        let mut recovered = durable;
        recovered.errors.push(STALE_RUN.to_string());
        recovered.cancel_requested = false;
        recovered.finish(SyncStatus::CompletedWithErrors, STALE_RUN, Utc::now());
        if self
            .progress
            .replace_if_unchanged(raw.as_deref(), &recovered)
            .await?
        {
            return Ok(recovered);
        }

        debug!("Progress changed during stale-run recovery, keeping the newer record");
        self.progress.read(true).await
    }

    /// Ask the running sync to stop. A repeated request while the first is
    /// still pending force-resets progress and the lock.
    pub async fn request_cancel(&self) -> Result<CancelOutcome> {
        match self.progress.request_cancel().await? {
            CancelRequest::NotRunning => Ok(CancelOutcome::NotRunning),
            CancelRequest::Requested => {
                info!("Sync cancellation requested");
                Ok(CancelOutcome::Requested)
            }
            CancelRequest::AlreadyRequested => {
                warn!("Sync did not answer an earlier cancel request; force-resetting");
                self.progress.reset().await?;
                self.lock.force_release().await?;
                Ok(CancelOutcome::ForceReset)
            }
        }
    }

    /// Enabled providers whose refresh interval has elapsed.
    pub async fn due_providers(&self) -> Result<Vec<Provider>> {
        let now = Utc::now();
        Ok(self
            .repo
            .enabled_targets()
            .await?
            .into_iter()
            .map(|t| t.provider)
            .filter(|p| p.is_due(now))
            .collect())
    }
}

/// Feeds source progress into the tracked run.
struct RunObserver<'a> {
    progress: &'a ProgressTracker,
    index: usize,
}

#[async_trait::async_trait]
impl FetchObserver for RunObserver<'_> {
    async fn checkpoint(&self) -> Result<()> {
        if self.progress.is_cancel_requested().await? {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn categories_known(&self, total: u32) {
        let index = self.index;
        self.progress.update(|p| {
            let Some(status) = p.providers.get_mut(index) else {
                return;
            };
            if total > status.categories_total {
                let grown = total - status.categories_total;
                status.categories_total = total;
                p.total_categories = p.total_categories.saturating_add(grown);
            }
        });
    }

    fn categories_done(&self, categories: u32, channels: u64) {
        let index = self.index;
        self.progress.update(|p| {
            if let Some(status) = p.providers.get_mut(index) {
                status.categories_processed = status.categories_processed.saturating_add(categories);
                status.channels_fetched = status.channels_fetched.saturating_add(channels);
            }
            p.recount_categories();
        });
    }

    fn record_error(&self, message: String) {
        self.progress.add_error(message);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic in sync task".to_string()
    }
}
