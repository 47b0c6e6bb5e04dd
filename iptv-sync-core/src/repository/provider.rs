// Provider Repository
//
// Reads provider configuration and writes the last-sync status columns.

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Result, Row};

use crate::models::{Provider, ProviderProtocol};

const PROVIDER_COLUMNS: &str = "id, name, protocol, api_host, api_username, api_password, \
     playlist_url, enabled, refresh_interval_minutes, last_synced_at, last_sync_error, \
     last_sync_channel_count";

/// Provider Repository
#[derive(Clone)]
pub struct ProviderRepository {
    pool: PgPool,
}

impl std::fmt::Debug for ProviderRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRepository")
            .field("pool", &"PgPool")
            .finish()
    }
}

impl ProviderRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enabled providers in processing order
    pub async fn list_enabled(&self) -> Result<Vec<Provider>> {
        let rows = sqlx::query(&format!(
            "SELECT {PROVIDER_COLUMNS} FROM providers WHERE enabled = true ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_provider).collect()
    }

    pub async fn get(&self, id: i64) -> Result<Option<Provider>> {
        let row = sqlx::query(&format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_provider).transpose()
    }

    /// Successful sync: stamp time and count, clear the error
    pub async fn record_sync_success(
        &self,
        id: i64,
        channel_count: i32,
        synced_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE providers
            SET last_synced_at = $2, last_sync_channel_count = $3, last_sync_error = NULL,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(synced_at)
        .bind(channel_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Failed sync: keep the previous timestamp and count
    pub async fn record_sync_failure(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query("UPDATE providers SET last_sync_error = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn row_to_provider(row: &PgRow) -> Result<Provider> {
    let protocol: String = row.try_get("protocol")?;
    let protocol = protocol
        .parse::<ProviderProtocol>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(Provider {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        protocol,
        api_host: row.try_get("api_host")?,
        api_username: row.try_get("api_username")?,
        api_password: row.try_get("api_password")?,
        playlist_url: row.try_get("playlist_url")?,
        enabled: row.try_get("enabled")?,
        refresh_interval_minutes: row.try_get("refresh_interval_minutes")?,
        last_synced_at: row.try_get("last_synced_at")?,
        last_sync_error: row.try_get("last_sync_error")?,
        last_sync_channel_count: row.try_get("last_sync_channel_count")?,
    })
}
