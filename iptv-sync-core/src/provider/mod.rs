// Catalog Source Traits
//
// One source per provider protocol. A source turns a provider's enabled
// categories into channel rows and reports category listings for discovery.

mod playlist;
mod xtream;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::SyncConfig;
use crate::models::{CategoryUpsert, NewChannel, Provider, ProviderProtocol, SyncTarget};
use crate::repository::CatalogRepository;
use crate::{Error, Result};

pub use playlist::PlaylistSource;
pub use xtream::XtreamSource;

/// Receives fetch progress from a source
#[async_trait]
pub trait FetchObserver: Send + Sync {
    /// Returns `Err(Error::Cancelled)` once cancellation has been requested.
    async fn checkpoint(&self) -> Result<()>;

    /// The number of categories became known after the fetch started.
    fn categories_known(&self, total: u32);

    /// `categories` more categories finished, contributing `channels` rows.
    fn categories_done(&self, categories: u32, channels: u64);

    /// Non-fatal problem worth showing to the operator.
    fn record_error(&self, message: String);
}

/// Observer for fetches outside a tracked run: never cancels, logs errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedObserver;

#[async_trait]
impl FetchObserver for DetachedObserver {
    async fn checkpoint(&self) -> Result<()> {
        Ok(())
    }

    fn categories_known(&self, _total: u32) {}

    fn categories_done(&self, _categories: u32, _channels: u64) {}

    fn record_error(&self, message: String) {
        tracing::warn!(error = %message, "Non-fatal fetch error");
    }
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch every channel of the target's enabled categories.
    async fn fetch_catalog(
        &self,
        target: &SyncTarget,
        observer: &dyn FetchObserver,
    ) -> Result<Vec<NewChannel>>;

    /// The provider's current category listing.
    async fn discover_categories(&self) -> Result<Vec<CategoryUpsert>>;
}

/// Build the source matching the provider's protocol.
pub fn source_for(
    provider: &Provider,
    config: &SyncConfig,
    repo: Arc<dyn CatalogRepository>,
) -> Result<Box<dyn CatalogSource>> {
    match provider.protocol {
        ProviderProtocol::Api => {
            let (Some(host), Some(username), Some(password)) = (
                non_empty(provider.api_host.as_deref()),
                non_empty(provider.api_username.as_deref()),
                non_empty(provider.api_password.as_deref()),
            ) else {
                return Err(Error::InvalidInput("Missing Xtream credentials".to_string()));
            };
            Ok(Box::new(XtreamSource::new(host, username, password, config)?))
        }
        ProviderProtocol::File => {
            let Some(url) = non_empty(provider.playlist_url.as_deref()) else {
                return Err(Error::InvalidInput("Missing playlist URL".to_string()));
            };
            Ok(Box::new(PlaylistSource::new(url, provider.id, repo)?))
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{api_provider, file_provider, MemoryCatalog};

    fn repo() -> Arc<dyn CatalogRepository> {
        Arc::new(MemoryCatalog::default())
    }

    #[test]
    fn test_missing_credentials() {
        let mut provider = api_provider(1, "http://127.0.0.1:1");
        provider.api_password = Some("  ".to_string());
        let err = source_for(&provider, &SyncConfig::default(), repo()).err().unwrap();
        assert_eq!(err.to_string(), "Invalid input: Missing Xtream credentials");
    }

    #[test]
    fn test_missing_playlist_url() {
        let mut provider = file_provider(1, "http://127.0.0.1:1/list.m3u");
        provider.playlist_url = None;
        let err = source_for(&provider, &SyncConfig::default(), repo()).err().unwrap();
        assert_eq!(err.to_string(), "Invalid input: Missing playlist URL");
    }

    #[test]
    fn test_protocol_dispatch() {
        let config = SyncConfig::default();
        assert!(source_for(&api_provider(1, "http://127.0.0.1:1"), &config, repo()).is_ok());
        assert!(source_for(&file_provider(2, "http://127.0.0.1:1/a.m3u"), &config, repo()).is_ok());
    }

    #[test]
    fn test_bad_host_rejected() {
        let provider = api_provider(1, "not a url");
        assert!(matches!(
            source_for(&provider, &SyncConfig::default(), repo()),
            Err(Error::InvalidInput(_))
        ));
    }
}
