// Playlist Catalog Source
//
// The whole playlist is one download. Every entry becomes a channel; groups
// map to `live` categories, created on first sight.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use iptv_sync_providers::m3u::{extract_groups, PlaylistFetcher, PlaylistParse};

use super::{CatalogSource, FetchObserver};
use crate::models::{CategoryType, CategoryUpsert, NewChannel, SyncTarget};
use crate::repository::CatalogRepository;
use crate::{Error, Result};

/// Line-level parse errors surfaced per sync; the rest only reach the log.
const MAX_REPORTED_LINE_ERRORS: usize = 5;

pub struct PlaylistSource {
    url: String,
    provider_id: i64,
    fetcher: PlaylistFetcher,
    repo: Arc<dyn CatalogRepository>,
}

impl std::fmt::Debug for PlaylistSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaylistSource")
            .field("provider_id", &self.provider_id)
            .finish_non_exhaustive()
    }
}

impl PlaylistSource {
    pub fn new(url: &str, provider_id: i64, repo: Arc<dyn CatalogRepository>) -> Result<Self> {
        // reject malformed URLs at construction, not mid-run
        url::Url::parse(url).map_err(|e| Error::InvalidInput(format!("invalid playlist URL: {e}")))?;
        Ok(Self {
            url: url.to_string(),
            provider_id,
            fetcher: PlaylistFetcher::new()?,
            repo,
        })
    }

    async fn fetch_entries(&self) -> Result<PlaylistParse> {
        let parsed = self.fetcher.fetch(&self.url).await?;
        if parsed.entries.is_empty() {
            return Err(Error::EmptyCatalog(
                "Zero entries parsed from playlist, aborting".to_string(),
            ));
        }
        Ok(parsed)
    }

    /// Category ids by group label, creating categories for unseen groups.
    async fn category_ids(
        &self,
        target: &SyncTarget,
        groups: &[String],
    ) -> Result<HashMap<String, i64>> {
        let mut ids: HashMap<String, i64> = target
            .categories
            .iter()
            .filter(|c| c.category_type == CategoryType::Live)
            .map(|c| (c.provider_category_id.clone(), c.id))
            .collect();

        let unseen: Vec<CategoryUpsert> = groups
            .iter()
            .filter(|g| !ids.contains_key(*g))
            .map(|g| CategoryUpsert::new(g.clone(), g.clone(), CategoryType::Live))
            .collect();

        if !unseen.is_empty() {
            tracing::debug!(
                provider_id = self.provider_id,
                groups = unseen.len(),
                "Creating categories for new playlist groups"
            );
            for category in self.repo.upsert_categories(self.provider_id, unseen).await? {
                ids.insert(category.provider_category_id, category.id);
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl CatalogSource for PlaylistSource {
    async fn fetch_catalog(
        &self,
        target: &SyncTarget,
        observer: &dyn FetchObserver,
    ) -> Result<Vec<NewChannel>> {
        let parsed = self.fetch_entries().await?;
        observer.checkpoint().await?;

        for error in parsed.errors.iter().take(MAX_REPORTED_LINE_ERRORS) {
            observer.record_error(format!("Playlist {}: {error}", target.provider.name));
        }
        if parsed.errors.len() > MAX_REPORTED_LINE_ERRORS {
            tracing::warn!(
                provider_id = self.provider_id,
                line_errors = parsed.errors.len(),
                "Playlist had more line errors than reported"
            );
        }

        // only groups present in this playlist count as processed categories
        let groups = extract_groups(&parsed.entries);
        let ids = self.category_ids(target, &groups).await?;
        let group_count = u32::try_from(groups.len()).unwrap_or(u32::MAX);
        observer.categories_known(group_count);

        let channels: Vec<NewChannel> = parsed
            .entries
            .into_iter()
            .map(|entry| NewChannel {
                category_id: ids.get(&entry.group_title).copied(),
                name: entry.name,
                url: entry.url,
                group_title: entry.group_title,
                tvg_id: entry.tvg_id,
                tvg_name: entry.tvg_name,
                tvg_logo: entry.tvg_logo,
                duration_secs: entry.duration,
                ..NewChannel::default()
            })
            .collect();

        observer.categories_done(group_count, channels.len() as u64);
        Ok(channels)
    }

    async fn discover_categories(&self) -> Result<Vec<CategoryUpsert>> {
        let parsed = self.fetch_entries().await?;
        Ok(extract_groups(&parsed.entries)
            .into_iter()
            .map(|g| CategoryUpsert::new(g.clone(), g, CategoryType::Live))
            .collect())
    }
}
