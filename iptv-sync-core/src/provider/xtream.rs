// Xtream Catalog Source
//
// Categories are fetched grouped by type (live, then movie, then series),
// each group through a bounded executor. A failing category is recorded and
// skipped; a failed authentication aborts the provider.

use async_trait::async_trait;
use iptv_sync_providers::xtream::{Episode, SeriesStream};
use iptv_sync_providers::XtreamClient;
use parking_lot::Mutex;

use super::{CatalogSource, FetchObserver};
use crate::config::SyncConfig;
use crate::models::{Category, CategoryType, CategoryUpsert, NewChannel, SyncTarget};
use crate::service::BoundedExecutor;
use crate::{Error, Result};

const TYPE_ORDER: [CategoryType; 3] = [CategoryType::Live, CategoryType::Movie, CategoryType::Series];

#[derive(Debug, Clone)]
pub struct XtreamSource {
    client: XtreamClient,
    categories: BoundedExecutor,
    series_details: BoundedExecutor,
}

impl XtreamSource {
    pub fn new(host: &str, username: &str, password: &str, config: &SyncConfig) -> Result<Self> {
        Ok(Self {
            client: XtreamClient::new(host, username, password)?,
            categories: BoundedExecutor::new(config.category_concurrency),
            series_details: BoundedExecutor::new(config.series_concurrency),
        })
    }

    async fn fetch_category(
        &self,
        category: &Category,
        observer: &dyn FetchObserver,
    ) -> Result<Vec<NewChannel>> {
        let scope = Some(category.provider_category_id.as_str());
        match category.category_type {
            CategoryType::Live => {
                let streams = self.client.get_live_streams(scope).await?;
                Ok(streams
                    .into_iter()
                    .map(|s| NewChannel {
                        category_id: Some(category.id),
                        url: self
                            .client
                            .live_stream_url(s.stream_id, Some(&s.container_extension)),
                        group_title: s.category_name,
                        tvg_id: s.epg_channel_id,
                        tvg_name: s.name.clone(),
                        tvg_logo: s.stream_icon,
                        name: s.name,
                        ..NewChannel::default()
                    })
                    .collect())
            }
            CategoryType::Movie => {
                let streams = self.client.get_vod_streams(scope).await?;
                Ok(streams
                    .into_iter()
                    .map(|s| NewChannel {
                        category_id: Some(category.id),
                        url: self
                            .client
                            .vod_stream_url(s.stream_id, Some(&s.container_extension)),
                        group_title: s.category_name,
                        tvg_name: s.name.clone(),
                        tvg_logo: s.stream_icon,
                        name: s.name,
                        ..NewChannel::default()
                    })
                    .collect())
            }
            CategoryType::Series => self.fetch_series_category(category, observer).await,
        }
    }

    /// Series listing plus one detail call per series. Detail failures skip
    /// that series and are summarized once per category.
    async fn fetch_series_category(
        &self,
        category: &Category,
        observer: &dyn FetchObserver,
    ) -> Result<Vec<NewChannel>> {
        let series_list = self
            .client
            .get_series(Some(&category.provider_category_id))
            .await?;

        let failed = Mutex::new(0usize);
        let failed = &failed;
        let per_series = self
            .series_details
            .run(series_list, move |series, _| async move {
                observer.checkpoint().await?;
                let episodes = match self.client.get_series_info(series.series_id).await {
                    Ok(info) => info
                        .iter_episodes()
                        .map(|ep| self.episode_channel(category, &series, ep))
                        .collect(),
                    Err(e) => {
                        tracing::warn!(
                            series_id = series.series_id,
                            series = %series.name,
                            error = %e,
                            "Skipping series whose detail fetch failed"
                        );
                        *failed.lock() += 1;
                        Vec::new()
                    }
                };
                Ok::<Vec<NewChannel>, Error>(episodes)
            })
            .await?;

        let failed = *failed.lock();
        if failed > 0 {
            observer.record_error(format!(
                "Category {} (series): {failed} series skipped, detail fetch failed",
                category.provider_category_id
            ));
        }
        Ok(per_series.into_iter().flatten().collect())
    }

    fn episode_channel(&self, category: &Category, series: &SeriesStream, ep: &Episode) -> NewChannel {
        NewChannel {
            category_id: Some(category.id),
            name: format!(
                "{} - S{}E{} - {}",
                series.name, ep.season, ep.episode_num, ep.title
            ),
            url: self
                .client
                .series_stream_url(ep.id, Some(&ep.container_extension)),
            group_title: series.category_name.clone(),
            tvg_name: series.name.clone(),
            tvg_logo: series.cover.clone(),
            series_name: Some(series.name.clone()),
            season_number: i32::try_from(ep.season).ok(),
            episode_number: i32::try_from(ep.episode_num).ok(),
            duration_secs: ep.duration_secs(),
            ..NewChannel::default()
        }
    }
}

#[async_trait]
impl CatalogSource for XtreamSource {
    async fn fetch_catalog(
        &self,
        target: &SyncTarget,
        observer: &dyn FetchObserver,
    ) -> Result<Vec<NewChannel>> {
        self.client.authenticate().await?;

        let accumulator = Mutex::new(Vec::new());
        let collected = &accumulator;

        for category_type in TYPE_ORDER {
            let group: Vec<&Category> = target
                .categories
                .iter()
                .filter(|c| c.category_type == category_type)
                .collect();
            if group.is_empty() {
                continue;
            }

            self.categories
                .run(group, move |category, _| async move {
                    observer.checkpoint().await?;
                    match self.fetch_category(category, observer).await {
                        Ok(channels) => {
                            let count = channels.len() as u64;
                            collected.lock().extend(channels);
                            observer.categories_done(1, count);
                        }
                        Err(e) if e.is_cancelled() => return Err(e),
                        Err(e) => {
                            observer.record_error(format!(
                                "Category {} ({}): {e}",
                                category.provider_category_id, category.category_type
                            ));
                            observer.categories_done(1, 0);
                        }
                    }
                    Ok::<(), Error>(())
                })
                .await?;

            observer.checkpoint().await?;
        }

        Ok(accumulator.into_inner())
    }

    async fn discover_categories(&self) -> Result<Vec<CategoryUpsert>> {
        self.client.authenticate().await?;

        let (live, vod, series) = futures::try_join!(
            self.client.get_live_categories(),
            self.client.get_vod_categories(),
            self.client.get_series_categories(),
        )?;

        let tagged = [
            (live, CategoryType::Live),
            (vod, CategoryType::Movie),
            (series, CategoryType::Series),
        ];
        Ok(tagged
            .into_iter()
            .flat_map(|(list, category_type)| {
                list.into_iter().map(move |c| {
                    CategoryUpsert::new(c.category_id, c.category_name, category_type)
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{category, RecordingObserver};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer) -> XtreamSource {
        XtreamSource::new(&server.uri(), "user", "pass", &SyncConfig::default()).unwrap()
    }

    async fn mount_auth(server: &MockServer, auth: i64) {
        Mock::given(method("GET"))
            .and(path("/player_api.php"))
            .and(query_param("username", "user"))
            .and(|req: &wiremock::Request| !req.url.query().unwrap_or_default().contains("action="))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"user_info": {"auth": auth}})),
            )
            .mount(server)
            .await;
    }

    async fn mount_action(
        server: &MockServer,
        action: &str,
        extra: Option<(&str, &str)>,
        body: serde_json::Value,
    ) {
        let mut mock = Mock::given(method("GET"))
            .and(path("/player_api.php"))
            .and(query_param("action", action));
        if let Some((key, value)) = extra {
            mock = mock.and(query_param(key, value));
        }
        mock.respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetch_maps_live_vod_and_episodes() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;
        mount_action(
            &server,
            "get_live_streams",
            Some(("category_id", "10")),
            serde_json::json!([
                {"stream_id": 1, "name": "News HD", "category_name": "News",
                 "epg_channel_id": "news.hd", "stream_icon": "http://logo/1.png"}
            ]),
        )
        .await;
        mount_action(
            &server,
            "get_vod_streams",
            Some(("category_id", "20")),
            serde_json::json!([
                {"stream_id": "7", "name": "Film", "category_name": "Films",
                 "container_extension": "mkv"}
            ]),
        )
        .await;
        mount_action(
            &server,
            "get_series",
            Some(("category_id", "30")),
            serde_json::json!([
                {"series_id": 5, "name": "Show", "category_name": "Shows", "cover": "http://c/5.jpg"}
            ]),
        )
        .await;
        mount_action(
            &server,
            "get_series_info",
            Some(("series_id", "5")),
            serde_json::json!({"episodes": {"1": [
                {"id": "501", "episode_num": 2, "season": 1, "title": "Pilot",
                 "container_extension": "mp4", "info": {"duration_secs": 1500}}
            ]}}),
        )
        .await;

        let target = SyncTarget {
            provider: crate::test_helpers::api_provider(1, &server.uri()),
            categories: vec![
                category(100, 1, "10", CategoryType::Live),
                category(200, 1, "20", CategoryType::Movie),
                category(300, 1, "30", CategoryType::Series),
            ],
        };
        let observer = RecordingObserver::default();
        let channels = source(&server)
            .fetch_catalog(&target, &observer)
            .await
            .unwrap();

        assert_eq!(channels.len(), 3);
        let live = channels.iter().find(|c| c.category_id == Some(100)).unwrap();
        assert_eq!(live.name, "News HD");
        assert_eq!(live.tvg_id, "news.hd");
        assert_eq!(live.tvg_name, "News HD");
        assert_eq!(live.url, format!("{}/live/user/pass/1.ts", server.uri()));

        let movie = channels.iter().find(|c| c.category_id == Some(200)).unwrap();
        assert_eq!(movie.url, format!("{}/movie/user/pass/7.mkv", server.uri()));
        assert_eq!(movie.tvg_id, "");

        let episode = channels.iter().find(|c| c.category_id == Some(300)).unwrap();
        assert_eq!(episode.name, "Show - S1E2 - Pilot");
        assert_eq!(episode.tvg_name, "Show");
        assert_eq!(episode.tvg_logo, "http://c/5.jpg");
        assert_eq!(episode.group_title, "Shows");
        assert_eq!(episode.series_name.as_deref(), Some("Show"));
        assert_eq!(episode.season_number, Some(1));
        assert_eq!(episode.episode_number, Some(2));
        assert_eq!(episode.duration_secs, Some(1500));
        assert_eq!(episode.url, format!("{}/series/user/pass/501.mp4", server.uri()));

        assert_eq!(observer.done_count(), 3);
        assert!(observer.errors().is_empty());
    }

    #[tokio::test]
    async fn test_auth_failure_is_fatal() {
        let server = MockServer::start().await;
        mount_auth(&server, 0).await;

        let target = SyncTarget {
            provider: crate::test_helpers::api_provider(1, &server.uri()),
            categories: vec![category(100, 1, "10", CategoryType::Live)],
        };
        let err = source(&server)
            .fetch_catalog(&target, &RecordingObserver::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert_eq!(err.to_string(), "Xtream authentication failed");
    }

    #[tokio::test]
    async fn test_failing_category_recorded_and_skipped() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;
        mount_action(
            &server,
            "get_live_streams",
            Some(("category_id", "ok")),
            serde_json::json!([{"stream_id": 1, "name": "A"}]),
        )
        .await;
        Mock::given(method("GET"))
            .and(query_param("action", "get_live_streams"))
            .and(query_param("category_id", "bad"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let target = SyncTarget {
            provider: crate::test_helpers::api_provider(1, &server.uri()),
            categories: vec![
                category(1, 1, "ok", CategoryType::Live),
                category(2, 1, "bad", CategoryType::Live),
            ],
        };
        let observer = RecordingObserver::default();
        let channels = source(&server).fetch_catalog(&target, &observer).await.unwrap();

        assert_eq!(channels.len(), 1);
        assert_eq!(observer.done_count(), 2);
        let errors = observer.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Category bad (live): HTTP error 500"), "{}", errors[0]);
    }

    #[tokio::test]
    async fn test_failed_series_detail_summarized() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;
        mount_action(
            &server,
            "get_series",
            Some(("category_id", "s")),
            serde_json::json!([
                {"series_id": 1, "name": "Good"},
                {"series_id": 2, "name": "Broken"}
            ]),
        )
        .await;
        mount_action(
            &server,
            "get_series_info",
            Some(("series_id", "1")),
            serde_json::json!({"episodes": {"1": [{"id": 11, "episode_num": 1, "season": 1, "title": "E1"}]}}),
        )
        .await;
        Mock::given(method("GET"))
            .and(query_param("action", "get_series_info"))
            .and(query_param("series_id", "2"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let target = SyncTarget {
            provider: crate::test_helpers::api_provider(1, &server.uri()),
            categories: vec![category(9, 1, "s", CategoryType::Series)],
        };
        let observer = RecordingObserver::default();
        let channels = source(&server).fetch_catalog(&target, &observer).await.unwrap();

        assert_eq!(channels.len(), 1);
        assert_eq!(
            observer.errors(),
            vec!["Category s (series): 1 series skipped, detail fetch failed".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cancel_checkpoint_stops_fetch() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;

        let target = SyncTarget {
            provider: crate::test_helpers::api_provider(1, &server.uri()),
            categories: vec![category(1, 1, "10", CategoryType::Live)],
        };
        let observer = RecordingObserver::cancelled();
        let err = source(&server).fetch_catalog(&target, &observer).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(observer.done_count(), 0);
    }

    #[tokio::test]
    async fn test_discover_tags_types() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;
        mount_action(
            &server,
            "get_live_categories",
            None,
            serde_json::json!([{"category_id": "1", "category_name": "News"}]),
        )
        .await;
        mount_action(
            &server,
            "get_vod_categories",
            None,
            serde_json::json!([{"category_id": 2, "category_name": "Films"}]),
        )
        .await;
        mount_action(&server, "get_series_categories", None, serde_json::Value::Null).await;

        let found = source(&server).discover_categories().await.unwrap();
        assert_eq!(
            found,
            vec![
                CategoryUpsert::new("1", "News", CategoryType::Live),
                CategoryUpsert::new("2", "Films", CategoryType::Movie),
            ]
        );
    }
}
