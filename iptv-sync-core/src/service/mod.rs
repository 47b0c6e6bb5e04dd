pub mod executor;
pub mod progress;
pub mod sync_engine;
pub mod sync_lock;

pub use executor::BoundedExecutor;
pub use progress::{CancelRequest, ProgressTracker};
pub use sync_engine::{
    CancelOutcome, DiscoveryReport, FullSyncReport, ProviderSyncReport, SyncEngine,
};
pub use sync_lock::{LockHolder, SyncLock};
