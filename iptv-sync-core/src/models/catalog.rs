// Catalog Models
//
// Categories are upserted by discovery and read by the sync engine.
// Channels are write-only from the engine's side: every sync replaces a
// provider's channels wholesale.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Content type of a category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryType {
    Live,
    Movie,
    Series,
}

impl CategoryType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Movie => "movie",
            Self::Series => "series",
        }
    }
}

impl fmt::Display for CategoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CategoryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(Self::Live),
            "movie" => Ok(Self::Movie),
            "series" => Ok(Self::Series),
            other => Err(Error::InvalidInput(format!("unknown category type: {other}"))),
        }
    }
}

/// Provider-scoped category.
///
/// Identity is `(provider_id, provider_category_id, category_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub provider_id: i64,
    pub provider_category_id: String,
    pub name: String,
    pub category_type: CategoryType,
    pub enabled: bool,
}

/// Category as reported by the provider, before it has a row id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CategoryUpsert {
    pub provider_category_id: String,
    pub name: String,
    pub category_type: CategoryType,
}

impl CategoryUpsert {
    pub fn new(
        provider_category_id: impl Into<String>,
        name: impl Into<String>,
        category_type: CategoryType,
    ) -> Self {
        Self {
            provider_category_id: provider_category_id.into(),
            name: name.into(),
            category_type,
        }
    }
}

/// Channel row to insert during a catalog swap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NewChannel {
    pub category_id: Option<i64>,
    pub name: String,
    pub url: String,
    pub group_title: String,
    pub tvg_id: String,
    pub tvg_name: String,
    pub tvg_logo: String,
    pub series_name: Option<String>,
    pub season_number: Option<i32>,
    pub episode_number: Option<i32>,
    pub duration_secs: Option<i32>,
}
