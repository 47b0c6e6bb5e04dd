//! Service wiring

use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;

use crate::repository::{CatalogRepository, PgCatalogRepository};
use crate::service::SyncEngine;
use crate::store::{open_store, SharedStore};
use crate::Config;

/// Everything a command needs
#[derive(Clone)]
pub struct Services {
    pub pool: PgPool,
    pub store: Arc<dyn SharedStore>,
    pub engine: Arc<SyncEngine>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

/// Open the shared store and build the engine over `pool`.
pub async fn init_services(config: &Config, pool: PgPool) -> Result<Services> {
    let store = open_store(config.redis_url(), &config.redis.key_prefix).await?;
    let repo: Arc<dyn CatalogRepository> = Arc::new(PgCatalogRepository::new(
        pool.clone(),
        config.sync.insert_batch_size,
    ));
    let engine = Arc::new(SyncEngine::new(repo, store.clone(), config.sync.clone())?);

    Ok(Services {
        pool,
        store,
        engine,
    })
}
