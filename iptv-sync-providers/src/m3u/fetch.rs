//! Playlist download

use std::time::Duration;

use reqwest::Client;

use super::parser::{parse_playlist, PlaylistParse};
use crate::error::{check_response, text_with_limit, ProviderClientError};

/// Large playlists are slow to serve; one GET gets this long.
pub const PLAYLIST_TIMEOUT: Duration = Duration::from_secs(60);

/// Downloads and parses remote playlists.
#[derive(Debug, Clone)]
pub struct PlaylistFetcher {
    client: Client,
}

impl PlaylistFetcher {
    pub fn new() -> Result<Self, ProviderClientError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(PLAYLIST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| ProviderClientError::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    /// GET the playlist body. Any non-success status is an error.
    pub async fn fetch_text(&self, url: &str) -> Result<String, ProviderClientError> {
        let url = url::Url::parse(url.trim())?;
        tracing::debug!(host = url.host_str().unwrap_or_default(), "Fetching playlist");

        let response = self.client.get(url).send().await?;
        let response = check_response(response)?;
        text_with_limit(response).await
    }

    /// GET and parse the playlist.
    pub async fn fetch(&self, url: &str) -> Result<PlaylistParse, ProviderClientError> {
        let text = self.fetch_text(url).await?;
        let parsed = parse_playlist(&text);
        tracing::debug!(
            entries = parsed.entries.len(),
            line_errors = parsed.errors.len(),
            "Parsed playlist"
        );
        Ok(parsed)
    }
}
