// Category Repository
//
// Categories are keyed by (provider_id, provider_category_id, category_type).

use std::collections::HashSet;

use sqlx::{postgres::PgRow, PgPool, Result, Row};

use crate::models::{Category, CategoryType, CategoryUpsert};

const CATEGORY_COLUMNS: &str =
    "id, provider_id, provider_category_id, name, category_type, enabled";

/// Category Repository
#[derive(Clone)]
pub struct CategoryRepository {
    pool: PgPool,
}

impl std::fmt::Debug for CategoryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CategoryRepository")
            .field("pool", &"PgPool")
            .finish()
    }
}

impl CategoryRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enabled categories of several providers at once
    pub async fn list_enabled_for(&self, provider_ids: &[i64]) -> Result<Vec<Category>> {
        let rows = sqlx::query(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories \
             WHERE provider_id = ANY($1) AND enabled = true \
             ORDER BY provider_id, id"
        ))
        .bind(provider_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_category).collect()
    }

    /// Insert new categories and rename existing ones, in one statement.
    ///
    /// The enabled flag of existing rows is left alone.
    pub async fn upsert_many(
        &self,
        provider_id: i64,
        categories: &[CategoryUpsert],
    ) -> Result<Vec<Category>> {
        let categories = dedup(categories);
        if categories.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = categories.iter().map(|c| c.provider_category_id.as_str()).collect();
        let names: Vec<&str> = categories.iter().map(|c| c.name.as_str()).collect();
        let types: Vec<&str> = categories.iter().map(|c| c.category_type.as_str()).collect();

        let rows = sqlx::query(&format!(
            r"
            INSERT INTO categories (provider_id, provider_category_id, name, category_type)
            SELECT $1, * FROM UNNEST($2::text[], $3::text[], $4::text[])
            ON CONFLICT (provider_id, provider_category_id, category_type)
            DO UPDATE SET name = EXCLUDED.name, updated_at = NOW()
            RETURNING {CATEGORY_COLUMNS}
            "
        ))
        .bind(provider_id)
        .bind(&ids)
        .bind(&names)
        .bind(&types)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_category).collect()
    }

    /// Delete categories of `provider_id` that are not in `keep`.
    pub async fn prune(&self, provider_id: i64, keep: &[CategoryUpsert]) -> Result<u64> {
        let ids: Vec<&str> = keep.iter().map(|c| c.provider_category_id.as_str()).collect();
        let types: Vec<&str> = keep.iter().map(|c| c.category_type.as_str()).collect();

        let result = sqlx::query(
            r"
            DELETE FROM categories c
            WHERE c.provider_id = $1
              AND NOT EXISTS (
                  SELECT 1 FROM UNNEST($2::text[], $3::text[]) AS k(category_id, category_type)
                  WHERE k.category_id = c.provider_category_id
                    AND k.category_type = c.category_type
              )
            ",
        )
        .bind(provider_id)
        .bind(&ids)
        .bind(&types)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// ON CONFLICT DO UPDATE rejects a statement touching one row twice
fn dedup(categories: &[CategoryUpsert]) -> Vec<&CategoryUpsert> {
    let mut seen = HashSet::new();
    categories
        .iter()
        .filter(|c| seen.insert((c.provider_category_id.as_str(), c.category_type)))
        .collect()
}

fn row_to_category(row: &PgRow) -> Result<Category> {
    let category_type: String = row.try_get("category_type")?;
    let category_type = category_type
        .parse::<CategoryType>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(Category {
        id: row.try_get("id")?,
        provider_id: row.try_get("provider_id")?,
        provider_category_id: row.try_get("provider_category_id")?,
        name: row.try_get("name")?,
        category_type,
        enabled: row.try_get("enabled")?,
    })
}
