// Provider Models
//
// Upstream catalog sources. Rows are created and edited elsewhere; the sync
// engine only writes the three `last_sync_*` status columns.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::catalog::Category;
use crate::Error;

/// Wire protocol spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderProtocol {
    /// Xtream Codes JSON API
    Api,
    /// Remote M3U playlist file
    File,
}

impl ProviderProtocol {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::File => "file",
        }
    }
}

impl fmt::Display for ProviderProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(Self::Api),
            "file" => Ok(Self::File),
            other => Err(Error::InvalidInput(format!("unknown provider protocol: {other}"))),
        }
    }
}

/// Upstream provider configuration and last-sync status
#[derive(Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: i64,
    pub name: String,
    pub protocol: ProviderProtocol,

    /// API protocol
    pub api_host: Option<String>,
    pub api_username: Option<String>,
    #[serde(skip_serializing)]
    pub api_password: Option<String>,

    /// File protocol
    pub playlist_url: Option<String>,

    pub enabled: bool,
    pub refresh_interval_minutes: i32,

    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_sync_error: Option<String>,
    pub last_sync_channel_count: i32,
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("protocol", &self.protocol)
            .field("api_host", &self.api_host)
            .field("api_username", &self.api_username)
            .field("api_password", &self.api_password.as_ref().map(|_| "***"))
            .field("playlist_url", &self.playlist_url)
            .field("enabled", &self.enabled)
            .field("refresh_interval_minutes", &self.refresh_interval_minutes)
            .field("last_synced_at", &self.last_synced_at)
            .finish_non_exhaustive()
    }
}

impl Provider {
    pub const DEFAULT_REFRESH_INTERVAL_MINUTES: i32 = 360;

    /// Whether the scheduler should sync this provider at `now`.
    ///
    /// Never-synced providers are always due.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        let interval = Duration::minutes(i64::from(self.refresh_interval_minutes.max(1)));
        self.last_synced_at.map_or(true, |last| now - last >= interval)
    }
}

/// A provider together with its enabled categories, the unit of one fetch.
#[derive(Debug, Clone)]
pub struct SyncTarget {
    pub provider: Provider,
    pub categories: Vec<Category>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(last_synced_at: Option<DateTime<Utc>>) -> Provider {
        Provider {
            id: 1,
            name: "Panel".to_string(),
            protocol: ProviderProtocol::Api,
            api_host: Some("http://panel".to_string()),
            api_username: Some("u".to_string()),
            api_password: Some("secret".to_string()),
            playlist_url: None,
            enabled: true,
            refresh_interval_minutes: 60,
            last_synced_at,
            last_sync_error: None,
            last_sync_channel_count: 0,
        }
    }

    #[test]
    fn test_protocol_round_trip() {
        assert_eq!("api".parse::<ProviderProtocol>().unwrap(), ProviderProtocol::Api);
        assert_eq!(ProviderProtocol::File.to_string(), "file");
        assert!("xtream".parse::<ProviderProtocol>().is_err());
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        assert!(provider(None).is_due(now));
        assert!(provider(Some(now - Duration::minutes(61))).is_due(now));
        assert!(!provider(Some(now - Duration::minutes(10))).is_due(now));

        let mut disabled = provider(None);
        disabled.enabled = false;
        assert!(!disabled.is_due(now));
    }

    #[test]
    fn test_debug_hides_password() {
        let dbg = format!("{:?}", provider(None));
        assert!(!dbg.contains("secret"));
    }
}
