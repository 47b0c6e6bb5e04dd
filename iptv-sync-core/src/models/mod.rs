pub mod catalog;
pub mod progress;
pub mod provider;

pub use catalog::{Category, CategoryType, CategoryUpsert, NewChannel};
pub use progress::{ProviderSyncState, ProviderSyncStatus, SyncProgress, SyncStatus};
pub use provider::{Provider, ProviderProtocol, SyncTarget};
