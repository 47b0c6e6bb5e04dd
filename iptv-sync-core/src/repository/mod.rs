mod catalog;
pub mod category;
pub mod channel;
pub mod provider;

pub use catalog::{CatalogRepository, PgCatalogRepository};
#[cfg(test)]
pub use catalog::MockCatalogRepository;
pub use category::CategoryRepository;
pub use channel::{ensure_not_empty, ChannelRepository, EMPTY_CATALOG_MESSAGE};
pub use provider::ProviderRepository;
