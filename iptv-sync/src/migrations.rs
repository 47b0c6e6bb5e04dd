use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use iptv_sync_core::service::SyncLock;
use iptv_sync_core::store::{SharedStore, MIGRATION_LOCK_KEY};
use sqlx::PgPool;
use tracing::{error, info, warn};

const MIGRATION_LOCK_TTL: Duration = Duration::from_secs(300);
const MIGRATION_POLL_INTERVAL: Duration = Duration::from_secs(2);
const MIGRATION_MAX_WAIT: Duration = Duration::from_secs(300);

/// Run database migrations under the shared migration lock.
///
/// Only one replica migrates at a time. Replicas that had to wait check
/// whether the holder already applied everything before running again.
pub async fn run_migrations(pool: &PgPool, store: Arc<dyn SharedStore>) -> Result<()> {
    info!("Running database migrations...");

    let lock = SyncLock::new(store, MIGRATION_LOCK_KEY, MIGRATION_LOCK_TTL)?;
    let owner_id = nanoid::nanoid!();

    match lock.acquire(&owner_id).await {
        Ok(true) => {
            info!("Acquired migration lock, running migrations");
            let result = run_migrate(pool).await;
            release_lock(&lock, &owner_id).await;
            result?;
        }
        Ok(false) => wait_for_lock_and_migrate(pool, &lock, &owner_id).await?,
        Err(e) => {
            warn!(error = %e, "Failed to acquire migration lock, running migrations directly");
            run_migrate(pool).await?;
        }
    }

    info!("Migrations completed");
    Ok(())
}

async fn run_migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../migrations").run(pool).await.map_err(|e| {
        error!(error = %e, "Failed to run migrations");
        anyhow::anyhow!("Migration failed: {e}")
    })
}

/// Whether every known migration is recorded in `_sqlx_migrations`.
async fn migrations_already_applied(pool: &PgPool) -> bool {
    let migrator = sqlx::migrate!("../migrations");
    let applied: Vec<(i64,)> =
        match sqlx::query_as("SELECT version FROM _sqlx_migrations ORDER BY version")
            .fetch_all(pool)
            .await
        {
            Ok(rows) => rows,
            Err(_) => return false, // table may not exist yet
        };

    let applied: std::collections::HashSet<i64> = applied.into_iter().map(|(v,)| v).collect();
    migrator.migrations.iter().all(|m| applied.contains(&m.version))
}

async fn wait_for_lock_and_migrate(pool: &PgPool, lock: &SyncLock, owner_id: &str) -> Result<()> {
    info!("Another instance is running migrations, waiting...");

    let max_attempts = MIGRATION_MAX_WAIT.as_secs() / MIGRATION_POLL_INTERVAL.as_secs();
    let mut attempts = 0;

    loop {
        tokio::time::sleep(MIGRATION_POLL_INTERVAL).await;
        attempts += 1;

        match lock.acquire(owner_id).await {
            Ok(true) => {
                if migrations_already_applied(pool).await {
                    info!("Migrations already applied by another instance, skipping");
                    release_lock(lock, owner_id).await;
                    return Ok(());
                }

                info!("Migration lock acquired after waiting, running migrations");
                let result = run_migrate(pool).await;
                release_lock(lock, owner_id).await;
                return result;
            }
            Ok(false) if attempts < max_attempts => {}
            Ok(false) => {
                return Err(anyhow::anyhow!(
                    "Timed out waiting for migration lock after {}s",
                    attempts * MIGRATION_POLL_INTERVAL.as_secs()
                ));
            }
            Err(e) => {
                warn!(error = %e, "Lock store error while waiting, running migrations directly");
                return run_migrate(pool).await;
            }
        }
    }
}

/// Best-effort; migrations may already have succeeded.
async fn release_lock(lock: &SyncLock, owner_id: &str) {
    if let Err(e) = lock.release(owner_id).await {
        warn!(error = %e, "Failed to release migration lock");
    }
}
