//! Xtream Codes player API client

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;

use super::types::{AuthResponse, Category, LiveStream, SeriesInfo, SeriesStream, VodStream};
use crate::error::{check_response, json_with_limit, ProviderClientError};

/// Every player API call is bounded by this timeout.
pub const XTREAM_TIMEOUT: Duration = Duration::from_secs(30);

const PLAYER_API: &str = "player_api.php";

/// Stream kind, selects the path segment of a playback URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Live,
    Movie,
    Series,
}

impl StreamKind {
    #[must_use]
    pub const fn path_segment(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Movie => "movie",
            Self::Series => "series",
        }
    }

    #[must_use]
    pub const fn default_extension(self) -> &'static str {
        match self {
            Self::Live => "ts",
            Self::Movie | Self::Series => "mp4",
        }
    }
}

/// Xtream Codes HTTP client
#[derive(Clone)]
pub struct XtreamClient {
    base_url: String,
    username: String,
    password: String,
    client: Client,
}

impl std::fmt::Debug for XtreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XtreamClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl XtreamClient {
    /// Create a client for `host`. Trailing slashes on the host are dropped.
    pub fn new(
        host: impl AsRef<str>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ProviderClientError> {
        let base_url = host.as_ref().trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ProviderClientError::InvalidConfig("empty Xtream host".to_string()));
        }
        // Validate early so every later join is infallible in practice
        Url::parse(&base_url)?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(XTREAM_TIMEOUT)
            .pool_max_idle_per_host(10)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| ProviderClientError::InvalidConfig(format!("http client: {e}")))?;

        Ok(Self {
            base_url,
            username: username.into(),
            password: password.into(),
            client,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, params: &[(&str, &str)]) -> Result<Url, ProviderClientError> {
        let mut url = Url::parse(&format!("{}/{PLAYER_API}", self.base_url))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("username", &self.username);
            query.append_pair("password", &self.password);
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        params: &[(&str, &str)],
    ) -> Result<T, ProviderClientError> {
        let url = self.api_url(params)?;
        let action = params
            .iter()
            .find(|(k, _)| *k == "action")
            .map_or("authenticate", |(_, v)| *v);
        tracing::trace!(host = %self.base_url, action, "Xtream API request");

        let response = self.client.get(url).send().await?;
        let response = check_response(response)?;
        json_with_limit(response).await
    }

    /// List endpoints answer `null` instead of `[]` on some panels.
    async fn fetch_list<T: DeserializeOwned>(
        &self,
        params: &[(&str, &str)],
    ) -> Result<Vec<T>, ProviderClientError> {
        let list: Option<Vec<T>> = self.fetch_json(params).await?;
        Ok(list.unwrap_or_default())
    }

    /// Verify the credentials. An `auth = 0` answer is reported as
    /// [`ProviderClientError::Auth`], never as a transport failure.
    pub async fn authenticate(&self) -> Result<AuthResponse, ProviderClientError> {
        let auth: AuthResponse = self.fetch_json(&[]).await?;
        if !auth.is_authenticated() {
            return Err(ProviderClientError::Auth(
                "Xtream authentication failed".to_string(),
            ));
        }
        Ok(auth)
    }

    pub async fn get_live_categories(&self) -> Result<Vec<Category>, ProviderClientError> {
        self.fetch_list(&[("action", "get_live_categories")]).await
    }

    pub async fn get_vod_categories(&self) -> Result<Vec<Category>, ProviderClientError> {
        self.fetch_list(&[("action", "get_vod_categories")]).await
    }

    pub async fn get_series_categories(&self) -> Result<Vec<Category>, ProviderClientError> {
        self.fetch_list(&[("action", "get_series_categories")]).await
    }

    /// Live streams, optionally scoped to one category.
    pub async fn get_live_streams(
        &self,
        category_id: Option<&str>,
    ) -> Result<Vec<LiveStream>, ProviderClientError> {
        self.fetch_list(&with_category("get_live_streams", category_id)).await
    }

    /// VOD streams, optionally scoped to one category.
    pub async fn get_vod_streams(
        &self,
        category_id: Option<&str>,
    ) -> Result<Vec<VodStream>, ProviderClientError> {
        self.fetch_list(&with_category("get_vod_streams", category_id)).await
    }

    /// Series, optionally scoped to one category.
    pub async fn get_series(
        &self,
        category_id: Option<&str>,
    ) -> Result<Vec<SeriesStream>, ProviderClientError> {
        self.fetch_list(&with_category("get_series", category_id)).await
    }

    /// Seasons and episodes of one series.
    pub async fn get_series_info(&self, series_id: i64) -> Result<SeriesInfo, ProviderClientError> {
        let id = series_id.to_string();
        let info: Option<SeriesInfo> = self
            .fetch_json(&[("action", "get_series_info"), ("series_id", &id)])
            .await?;
        Ok(info.unwrap_or_default())
    }

    /// `{host}/{live|movie|series}/{user}/{pass}/{id}.{ext}`
    ///
    /// Empty or missing extensions fall back to the kind's default.
    #[must_use]
    pub fn stream_url(&self, kind: StreamKind, id: i64, extension: Option<&str>) -> String {
        let ext = extension
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| kind.default_extension());
        format!(
            "{}/{}/{}/{}/{id}.{ext}",
            self.base_url,
            kind.path_segment(),
            self.username,
            self.password
        )
    }

    #[must_use]
    pub fn live_stream_url(&self, id: i64, extension: Option<&str>) -> String {
        self.stream_url(StreamKind::Live, id, extension)
    }

    #[must_use]
    pub fn vod_stream_url(&self, id: i64, extension: Option<&str>) -> String {
        self.stream_url(StreamKind::Movie, id, extension)
    }

    #[must_use]
    pub fn series_stream_url(&self, id: i64, extension: Option<&str>) -> String {
        self.stream_url(StreamKind::Series, id, extension)
    }
}

fn with_category<'a>(action: &'a str, category_id: Option<&'a str>) -> Vec<(&'a str, &'a str)> {
    let mut params = vec![("action", action)];
    if let Some(id) = category_id.filter(|id| !id.is_empty()) {
        params.push(("category_id", id));
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> XtreamClient {
        XtreamClient::new(format!("{}/", server.uri()), "user", "pass").unwrap()
    }

    #[test]
    fn test_host_normalization() {
        let client = XtreamClient::new("http://panel.example.com:8080///", "u", "p").unwrap();
        assert_eq!(client.base_url(), "http://panel.example.com:8080");
    }

    #[test]
    fn test_invalid_host() {
        assert!(matches!(
            XtreamClient::new("", "u", "p"),
            Err(ProviderClientError::InvalidConfig(_))
        ));
        assert!(XtreamClient::new("not a url", "u", "p").is_err());
    }

    #[test]
    fn test_stream_urls() {
        let client = XtreamClient::new("http://panel.example.com/", "alice", "s3cret").unwrap();
        assert_eq!(
            client.live_stream_url(101, None),
            "http://panel.example.com/live/alice/s3cret/101.ts"
        );
        assert_eq!(
            client.live_stream_url(101, Some("m3u8")),
            "http://panel.example.com/live/alice/s3cret/101.m3u8"
        );
        assert_eq!(
            client.vod_stream_url(7, Some("")),
            "http://panel.example.com/movie/alice/s3cret/7.mp4"
        );
        assert_eq!(
            client.series_stream_url(5001, Some("mkv")),
            "http://panel.example.com/series/alice/s3cret/5001.mkv"
        );
    }

    #[tokio::test]
    async fn test_authenticate_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/player_api.php"))
            .and(query_param("username", "user"))
            .and(query_param("password", "pass"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "user_info": {"auth": 1, "status": "Active", "username": "user"},
                "server_info": {"url": "panel", "port": "80"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let auth = client_for(&server).authenticate().await.unwrap();
        assert_eq!(auth.user_info.status, "Active");
    }

    #[tokio::test]
    async fn test_authenticate_rejected_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(path("/player_api.php"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"user_info": {"auth": 0}})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).authenticate().await.unwrap_err();
        assert!(matches!(err, ProviderClientError::Auth(_)));
        assert!(!err.is_transport());
    }

    #[tokio::test]
    async fn test_authenticate_without_user_info_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(path("/player_api.php"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"message": "Panel under maintenance"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).authenticate().await.unwrap_err();
        assert!(matches!(err, ProviderClientError::Parse(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_http_error_is_distinguishable() {
        let server = MockServer::start().await;
        Mock::given(path("/player_api.php"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server).get_live_categories().await.unwrap_err();
        match err {
            ProviderClientError::Http { status, url } => {
                assert_eq!(status.as_u16(), 503);
                assert!(!url.contains("pass"), "credentials leaked into error: {url}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_live_streams_scoped_to_category() {
        let server = MockServer::start().await;
        Mock::given(path("/player_api.php"))
            .and(query_param("action", "get_live_streams"))
            .and(query_param("category_id", "12"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"stream_id": 1, "name": "One", "category_name": "News"},
                {"stream_id": "2", "name": "Two", "container_extension": "m3u8"}
            ])))
            .mount(&server)
            .await;

        let streams = client_for(&server).get_live_streams(Some("12")).await.unwrap();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[1].stream_id, 2);
        assert_eq!(streams[1].container_extension, "m3u8");
    }

    #[tokio::test]
    async fn test_null_list_is_empty() {
        let server = MockServer::start().await;
        Mock::given(path("/player_api.php"))
            .and(query_param("action", "get_series"))
            .respond_with(ResponseTemplate::new(200).set_body_string("null"))
            .mount(&server)
            .await;

        let series = client_for(&server).get_series(Some("3")).await.unwrap();
        assert!(series.is_empty());
    }

    #[tokio::test]
    async fn test_series_info() {
        let server = MockServer::start().await;
        Mock::given(path("/player_api.php"))
            .and(query_param("action", "get_series_info"))
            .and(query_param("series_id", "77"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "info": {"name": "Show"},
                "episodes": {"1": [
                    {"id": "900", "episode_num": 1, "season": 1, "title": "Pilot"},
                    {"id": "901", "episode_num": 2, "season": 1, "title": "Second"}
                ]}
            })))
            .mount(&server)
            .await;

        let info = client_for(&server).get_series_info(77).await.unwrap();
        assert_eq!(info.iter_episodes().count(), 2);
    }

    #[tokio::test]
    async fn test_malformed_json_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(path("/player_api.php"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).get_vod_categories().await.unwrap_err();
        assert!(matches!(err, ProviderClientError::Parse(_)));
    }
}
