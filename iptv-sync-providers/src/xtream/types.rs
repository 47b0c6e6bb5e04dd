//! Xtream player API types
//!
//! Panels in the wild disagree on JSON types: numeric ids arrive as strings,
//! strings arrive as `null`, and `episodes` is either an object keyed by
//! season or an (often empty) array. The deserializers below accept all of
//! these shapes.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Response of the bare `player_api.php` call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthResponse {
    /// Required: a body without it is not an answer to the credentials.
    pub user_info: UserInfo,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

impl AuthResponse {
    /// `auth = 1` means the panel accepted the credentials.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.user_info.auth != 0
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfo {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub auth: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub username: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub exp_date: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub max_connections: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub port: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub timezone: String,
}

/// Entry of `get_live_categories`, `get_vod_categories` or `get_series_categories`.
#[derive(Debug, Clone, Deserialize)]
pub struct Category {
    #[serde(deserialize_with = "lenient_string")]
    pub category_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub category_name: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub parent_id: i64,
}

/// Entry of `get_live_streams`.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveStream {
    #[serde(deserialize_with = "lenient_i64")]
    pub stream_id: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub category_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub category_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub epg_channel_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub stream_icon: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub container_extension: String,
}

/// Entry of `get_vod_streams`.
#[derive(Debug, Clone, Deserialize)]
pub struct VodStream {
    #[serde(deserialize_with = "lenient_i64")]
    pub stream_id: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub category_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub category_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub stream_icon: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub container_extension: String,
}

/// Entry of `get_series`.
#[derive(Debug, Clone, Deserialize)]
pub struct SeriesStream {
    #[serde(deserialize_with = "lenient_i64")]
    pub series_id: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub category_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub category_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub cover: String,
}

/// Response of `get_series_info`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeriesInfo {
    /// Episodes keyed by season label.
    #[serde(default, deserialize_with = "episodes_by_season")]
    pub episodes: BTreeMap<String, Vec<Episode>>,
}

impl SeriesInfo {
    /// All episodes, season by season.
    pub fn iter_episodes(&self) -> impl Iterator<Item = &Episode> {
        self.episodes.values().flatten()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Episode {
    #[serde(deserialize_with = "lenient_i64")]
    pub id: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub episode_num: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub season: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub container_extension: String,
    #[serde(default)]
    info: Value,
}

impl Episode {
    /// Runtime in seconds, when the panel reports a positive one.
    #[must_use]
    pub fn duration_secs(&self) -> Option<i32> {
        let raw = self.info.get("duration_secs")?;
        let secs = match raw {
            Value::Number(n) => n.as_i64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        i32::try_from(secs).ok().filter(|s| *s > 0)
    }
}

/// Accepts a string, a number, a bool or `null` (empty string).
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

/// Accepts a number or a numeric string; `null` and `""` become 0.
fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| serde::de::Error::custom(format!("number out of range: {n}"))),
        Value::String(s) if s.trim().is_empty() => Ok(0),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected numeric id, got {s:?}"))),
        Value::Null => Ok(0),
        other => Err(serde::de::Error::custom(format!("expected numeric id, got {other}"))),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EpisodesRepr {
    BySeason(BTreeMap<String, Vec<Episode>>),
    Listed(Vec<Vec<Episode>>),
    Missing(Option<()>),
}

fn episodes_by_season<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<Episode>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match EpisodesRepr::deserialize(deserializer)? {
        EpisodesRepr::BySeason(map) => map,
        EpisodesRepr::Listed(seasons) => seasons
            .into_iter()
            .enumerate()
            .map(|(i, eps)| ((i + 1).to_string(), eps))
            .collect(),
        EpisodesRepr::Missing(_) => BTreeMap::new(),
    })
}
