//! Test helpers and fixtures for iptv-sync-core tests
//!
//! Provider and category fixtures, an in-memory [`CatalogRepository`] and a
//! [`FetchObserver`] that records what a source reported.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::models::{
    Category, CategoryType, CategoryUpsert, NewChannel, Provider, ProviderProtocol, SyncTarget,
};
use crate::provider::FetchObserver;
use crate::repository::{ensure_not_empty, CatalogRepository};
use crate::{Error, Result};

fn provider(id: i64, protocol: ProviderProtocol) -> Provider {
    Provider {
        id,
        name: format!("provider-{id}"),
        protocol,
        api_host: None,
        api_username: None,
        api_password: None,
        playlist_url: None,
        enabled: true,
        refresh_interval_minutes: Provider::DEFAULT_REFRESH_INTERVAL_MINUTES,
        last_synced_at: None,
        last_sync_error: None,
        last_sync_channel_count: 0,
    }
}

/// Enabled API provider with `user` / `pass` credentials
pub fn api_provider(id: i64, host: &str) -> Provider {
    Provider {
        api_host: Some(host.to_string()),
        api_username: Some("user".to_string()),
        api_password: Some("pass".to_string()),
        ..provider(id, ProviderProtocol::Api)
    }
}

/// Enabled playlist provider
pub fn file_provider(id: i64, url: &str) -> Provider {
    Provider {
        playlist_url: Some(url.to_string()),
        ..provider(id, ProviderProtocol::File)
    }
}

pub fn category(
    id: i64,
    provider_id: i64,
    provider_category_id: &str,
    category_type: CategoryType,
) -> Category {
    Category {
        id,
        provider_id,
        provider_category_id: provider_category_id.to_string(),
        name: format!("{category_type} {provider_category_id}"),
        category_type,
        enabled: true,
    }
}

pub fn channel(name: &str) -> NewChannel {
    NewChannel {
        name: name.to_string(),
        url: format!("http://example.com/{name}"),
        ..NewChannel::default()
    }
}

#[derive(Debug, Default)]
struct CatalogState {
    providers: BTreeMap<i64, Provider>,
    categories: Vec<Category>,
    channels: HashMap<i64, Vec<NewChannel>>,
}

/// In-memory catalog with the same observable rules as the database one.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
}

impl MemoryCatalog {
    pub fn add_target(&self, target: SyncTarget) {
        let mut state = self.state.lock();
        state.categories.extend(target.categories);
        state.providers.insert(target.provider.id, target.provider);
    }

    pub fn seed_channels(&self, provider_id: i64, channels: Vec<NewChannel>) {
        self.state.lock().channels.insert(provider_id, channels);
    }

    pub fn provider(&self, id: i64) -> Option<Provider> {
        self.state.lock().providers.get(&id).cloned()
    }

    pub fn categories_of(&self, provider_id: i64) -> Vec<Category> {
        self.state
            .lock()
            .categories
            .iter()
            .filter(|c| c.provider_id == provider_id)
            .cloned()
            .collect()
    }

    pub fn channels_of(&self, provider_id: i64) -> Vec<NewChannel> {
        self.state
            .lock()
            .channels
            .get(&provider_id)
            .cloned()
            .unwrap_or_default()
    }

    fn target_of(state: &CatalogState, provider: &Provider) -> SyncTarget {
        SyncTarget {
            provider: provider.clone(),
            categories: state
                .categories
                .iter()
                .filter(|c| c.provider_id == provider.id && c.enabled)
                .cloned()
                .collect(),
        }
    }
}

#[async_trait]
impl CatalogRepository for MemoryCatalog {
    async fn enabled_targets(&self) -> Result<Vec<SyncTarget>> {
        let state = self.state.lock();
        Ok(state
            .providers
            .values()
            .filter(|p| p.enabled)
            .map(|p| Self::target_of(&state, p))
            .collect())
    }

    async fn target(&self, provider_id: i64) -> Result<Option<SyncTarget>> {
        let state = self.state.lock();
        Ok(state
            .providers
            .get(&provider_id)
            .map(|p| Self::target_of(&state, p)))
    }

    async fn upsert_categories(
        &self,
        provider_id: i64,
        categories: Vec<CategoryUpsert>,
    ) -> Result<Vec<Category>> {
        let mut state = self.state.lock();
        let mut next_id = state.categories.iter().map(|c| c.id).max().unwrap_or(0) + 1;
        let mut out = Vec::with_capacity(categories.len());
        for upsert in categories {
            let existing = state.categories.iter_mut().find(|c| {
                c.provider_id == provider_id
                    && c.provider_category_id == upsert.provider_category_id
                    && c.category_type == upsert.category_type
            });
            match existing {
                Some(category) => {
                    category.name = upsert.name;
                    out.push(category.clone());
                }
                None => {
                    let category = Category {
                        id: next_id,
                        provider_id,
                        provider_category_id: upsert.provider_category_id,
                        name: upsert.name,
                        category_type: upsert.category_type,
                        enabled: true,
                    };
                    next_id += 1;
                    state.categories.push(category.clone());
                    out.push(category);
                }
            }
        }
        Ok(out)
    }

    async fn prune_categories(&self, provider_id: i64, keep: Vec<CategoryUpsert>) -> Result<u64> {
        let mut state = self.state.lock();
        let before = state.categories.len();
        state.categories.retain(|c| {
            c.provider_id != provider_id
                || keep.iter().any(|k| {
                    k.provider_category_id == c.provider_category_id
                        && k.category_type == c.category_type
                })
        });
        Ok((before - state.categories.len()) as u64)
    }

    async fn swap_channels(&self, provider_id: i64, channels: Vec<NewChannel>) -> Result<u64> {
        ensure_not_empty(&channels)?;
        let count = channels.len() as u64;
        self.state.lock().channels.insert(provider_id, channels);
        Ok(count)
    }

    async fn mark_synced(&self, provider_id: i64, channel_count: u64) -> Result<()> {
        let mut state = self.state.lock();
        let provider = state
            .providers
            .get_mut(&provider_id)
            .ok_or_else(|| Error::NotFound(format!("provider {provider_id}")))?;
        provider.last_synced_at = Some(Utc::now());
        provider.last_sync_channel_count = i32::try_from(channel_count).unwrap_or(i32::MAX);
        provider.last_sync_error = None;
        Ok(())
    }

    async fn mark_failed(&self, provider_id: i64, error: String) -> Result<()> {
        let mut state = self.state.lock();
        let provider = state
            .providers
            .get_mut(&provider_id)
            .ok_or_else(|| Error::NotFound(format!("provider {provider_id}")))?;
        provider.last_sync_error = Some(error);
        Ok(())
    }
}

/// Observer that records everything and can start out cancelled.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    cancelled: bool,
    errors: Mutex<Vec<String>>,
    known: AtomicU32,
    done: AtomicU32,
    channels: AtomicU64,
}

impl RecordingObserver {
    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::default()
        }
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub fn known_count(&self) -> u32 {
        self.known.load(Ordering::SeqCst)
    }

    pub fn done_count(&self) -> u32 {
        self.done.load(Ordering::SeqCst)
    }

    pub fn channel_count(&self) -> u64 {
        self.channels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetchObserver for RecordingObserver {
    async fn checkpoint(&self) -> Result<()> {
        if self.cancelled {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn categories_known(&self, total: u32) {
        self.known.fetch_max(total, Ordering::SeqCst);
    }

    fn categories_done(&self, categories: u32, channels: u64) {
        self.done.fetch_add(categories, Ordering::SeqCst);
        self.channels.fetch_add(channels, Ordering::SeqCst);
    }

    fn record_error(&self, message: String) {
        self.errors.lock().push(message);
    }
}
