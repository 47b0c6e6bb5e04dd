//! Storage seam used by the sync engine
//!
//! The engine only talks to [`CatalogRepository`]; [`PgCatalogRepository`]
//! is the production implementation over the three table repositories.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use super::{CategoryRepository, ChannelRepository, ProviderRepository};
use crate::models::{Category, CategoryUpsert, NewChannel, SyncTarget};
use crate::Result;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Enabled providers with their enabled categories, ordered by provider id
    async fn enabled_targets(&self) -> Result<Vec<SyncTarget>>;

    /// One provider (enabled or not) with its enabled categories
    async fn target(&self, provider_id: i64) -> Result<Option<SyncTarget>>;

    async fn upsert_categories(
        &self,
        provider_id: i64,
        categories: Vec<CategoryUpsert>,
    ) -> Result<Vec<Category>>;

    /// Remove categories missing from `keep`; returns how many went away
    async fn prune_categories(&self, provider_id: i64, keep: Vec<CategoryUpsert>) -> Result<u64>;

    /// Replace the provider's channels atomically. Refuses an empty list.
    async fn swap_channels(&self, provider_id: i64, channels: Vec<NewChannel>) -> Result<u64>;

    async fn mark_synced(&self, provider_id: i64, channel_count: u64) -> Result<()>;

    async fn mark_failed(&self, provider_id: i64, error: String) -> Result<()>;
}

/// PostgreSQL-backed catalog
#[derive(Debug, Clone)]
pub struct PgCatalogRepository {
    providers: ProviderRepository,
    categories: CategoryRepository,
    channels: ChannelRepository,
}

impl PgCatalogRepository {
    #[must_use]
    pub fn new(pool: PgPool, insert_batch_size: usize) -> Self {
        Self {
            providers: ProviderRepository::new(pool.clone()),
            categories: CategoryRepository::new(pool.clone()),
            channels: ChannelRepository::new(pool, insert_batch_size),
        }
    }

    #[must_use]
    pub const fn channels(&self) -> &ChannelRepository {
        &self.channels
    }
}

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    async fn enabled_targets(&self) -> Result<Vec<SyncTarget>> {
        let providers = self.providers.list_enabled().await?;
        let ids: Vec<i64> = providers.iter().map(|p| p.id).collect();

        let mut by_provider: HashMap<i64, Vec<Category>> = HashMap::new();
        for category in self.categories.list_enabled_for(&ids).await? {
            by_provider.entry(category.provider_id).or_default().push(category);
        }

        Ok(providers
            .into_iter()
            .map(|provider| {
                let categories = by_provider.remove(&provider.id).unwrap_or_default();
                SyncTarget {
                    provider,
                    categories,
                }
            })
            .collect())
    }

    async fn target(&self, provider_id: i64) -> Result<Option<SyncTarget>> {
        let Some(provider) = self.providers.get(provider_id).await? else {
            return Ok(None);
        };
        let categories = self.categories.list_enabled_for(&[provider_id]).await?;
        Ok(Some(SyncTarget {
            provider,
            categories,
        }))
    }

    async fn upsert_categories(
        &self,
        provider_id: i64,
        categories: Vec<CategoryUpsert>,
    ) -> Result<Vec<Category>> {
        Ok(self.categories.upsert_many(provider_id, &categories).await?)
    }

    async fn prune_categories(&self, provider_id: i64, keep: Vec<CategoryUpsert>) -> Result<u64> {
        Ok(self.categories.prune(provider_id, &keep).await?)
    }

    async fn swap_channels(&self, provider_id: i64, channels: Vec<NewChannel>) -> Result<u64> {
        self.channels.replace_for_provider(provider_id, &channels).await
    }

    async fn mark_synced(&self, provider_id: i64, channel_count: u64) -> Result<()> {
        let count = i32::try_from(channel_count).unwrap_or(i32::MAX);
        Ok(self
            .providers
            .record_sync_success(provider_id, count, Utc::now())
            .await?)
    }

    async fn mark_failed(&self, provider_id: i64, error: String) -> Result<()> {
        Ok(self.providers.record_sync_failure(provider_id, &error).await?)
    }
}
