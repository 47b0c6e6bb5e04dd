// Sync Progress Models
//
// The record pollers read while a sync runs. Stored as JSON in the shared
// store, so every field defaults when absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse run status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Running,
    Completed,
    CompletedWithErrors,
    Error,
    Cancelled,
}

impl SyncStatus {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithErrors | Self::Error | Self::Cancelled
        )
    }
}

/// Per-provider state within one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderSyncState {
    #[default]
    Pending,
    Syncing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSyncStatus {
    pub provider_id: i64,
    pub provider_name: String,
    pub status: ProviderSyncState,
    pub categories_total: u32,
    pub categories_processed: u32,
    pub channels_fetched: u64,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncProgress {
    pub is_running: bool,
    pub status: SyncStatus,
    pub current_step: String,
    pub total_providers: u32,
    pub processed_providers: u32,
    pub total_categories: u32,
    pub processed_categories: u32,
    pub total_channels: u64,
    pub providers: Vec<ProviderSyncStatus>,
    pub errors: Vec<String>,
    pub cancel_requested: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncProgress {
    /// Progress of a run that is about to start.
    #[must_use]
    pub fn starting(providers: Vec<ProviderSyncStatus>, now: DateTime<Utc>) -> Self {
        let total_categories = providers.iter().map(|p| p.categories_total).sum();
        Self {
            is_running: true,
            status: SyncStatus::Running,
            current_step: format!("Starting sync of {} provider(s)", providers.len()),
            total_providers: u32::try_from(providers.len()).unwrap_or(u32::MAX),
            total_categories,
            providers,
            started_at: Some(now),
            ..Self::default()
        }
    }

    /// Recompute the run-level category counter from the provider list.
    pub fn recount_categories(&mut self) {
        self.processed_categories = self.providers.iter().map(|p| p.categories_processed).sum();
    }

    /// Move into a terminal state.
    pub fn finish(&mut self, status: SyncStatus, step: impl Into<String>, now: DateTime<Utc>) {
        self.is_running = false;
        self.status = status;
        self.current_step = step.into();
        self.completed_at = Some(now);
    }
}
