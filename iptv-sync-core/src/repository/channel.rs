// Channel Repository
//
// A provider's channels are only ever replaced as a whole: delete plus
// batched inserts inside one transaction.

use sqlx::PgPool;

use crate::models::NewChannel;
use crate::{Error, Result};

/// Message carried by the empty-catalog guard
pub const EMPTY_CATALOG_MESSAGE: &str = "Zero channels fetched, aborting to prevent data loss";

/// Refuse to replace a catalog with nothing.
pub fn ensure_not_empty(channels: &[NewChannel]) -> Result<()> {
    if channels.is_empty() {
        return Err(Error::EmptyCatalog(EMPTY_CATALOG_MESSAGE.to_string()));
    }
    Ok(())
}

/// Channel Repository
#[derive(Clone)]
pub struct ChannelRepository {
    pool: PgPool,
    batch_size: usize,
}

impl std::fmt::Debug for ChannelRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRepository")
            .field("pool", &"PgPool")
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl ChannelRepository {
    #[must_use]
    pub fn new(pool: PgPool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
        }
    }

    /// Atomically swap every channel of `provider_id` for `channels`.
    ///
    /// An empty list is rejected before any statement runs. Any failure
    /// rolls back, leaving the previous channels in place.
    pub async fn replace_for_provider(
        &self,
        provider_id: i64,
        channels: &[NewChannel],
    ) -> Result<u64> {
        ensure_not_empty(channels)?;

        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM channels WHERE provider_id = $1")
            .bind(provider_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let mut inserted = 0u64;
        for batch in channels.chunks(self.batch_size) {
            inserted += insert_batch(&mut tx, provider_id, batch).await?;
        }

        tx.commit().await?;

        tracing::debug!(provider_id, deleted, inserted, "Replaced provider channels");
        Ok(inserted)
    }

    pub async fn count_for_provider(&self, provider_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM channels WHERE provider_id = $1")
            .bind(provider_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

async fn insert_batch(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    provider_id: i64,
    batch: &[NewChannel],
) -> Result<u64> {
    let mut category_ids = Vec::with_capacity(batch.len());
    let mut names = Vec::with_capacity(batch.len());
    let mut urls = Vec::with_capacity(batch.len());
    let mut groups = Vec::with_capacity(batch.len());
    let mut tvg_ids = Vec::with_capacity(batch.len());
    let mut tvg_names = Vec::with_capacity(batch.len());
    let mut tvg_logos = Vec::with_capacity(batch.len());
    let mut series_names = Vec::with_capacity(batch.len());
    let mut seasons = Vec::with_capacity(batch.len());
    let mut episodes = Vec::with_capacity(batch.len());
    let mut durations = Vec::with_capacity(batch.len());

    for c in batch {
        category_ids.push(c.category_id);
        names.push(c.name.as_str());
        urls.push(c.url.as_str());
        groups.push(c.group_title.as_str());
        tvg_ids.push(c.tvg_id.as_str());
        tvg_names.push(c.tvg_name.as_str());
        tvg_logos.push(c.tvg_logo.as_str());
        series_names.push(c.series_name.as_deref());
        seasons.push(c.season_number);
        episodes.push(c.episode_number);
        durations.push(c.duration_secs);
    }

    let result = sqlx::query(
        r"
        INSERT INTO channels (
            provider_id, category_id, name, url, group_title, tvg_id, tvg_name, tvg_logo,
            series_name, season_number, episode_number, duration_secs
        )
        SELECT $1, * FROM UNNEST(
            $2::bigint[], $3::text[], $4::text[], $5::text[], $6::text[], $7::text[],
            $8::text[], $9::text[], $10::int[], $11::int[], $12::int[]
        )
        ",
    )
    .bind(provider_id)
    .bind(&category_ids)
    .bind(&names)
    .bind(&urls)
    .bind(&groups)
    .bind(&tvg_ids)
    .bind(&tvg_names)
    .bind(&tvg_logos)
    .bind(&series_names)
    .bind(&seasons)
    .bind(&episodes)
    .bind(&durations)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}
