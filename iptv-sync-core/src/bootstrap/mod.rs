//! Bootstrap for the sync engine
//!
//! Configuration loading, database pool creation and wiring of the shared
//! store, catalog repository and engine.

pub mod config;
pub mod database;
pub mod services;

pub use config::load_config;
pub use database::init_database;
pub use services::{init_services, Services};
