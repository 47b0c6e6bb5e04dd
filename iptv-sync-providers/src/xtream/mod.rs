//! Xtream Codes Provider Client
//!
//! JSON API protocol: `player_api.php` for authentication and catalog
//! listing, path-based URLs for playback.
//!
//! # Example
//!
//! ```no_run
//! use iptv_sync_providers::xtream::XtreamClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = XtreamClient::new("http://panel.example.com:8080", "user", "pass")?;
//! client.authenticate().await?;
//! for category in client.get_live_categories().await? {
//!     let streams = client.get_live_streams(Some(&category.category_id)).await?;
//!     println!("{}: {} streams", category.category_name, streams.len());
//! }
//! # Ok(())
//! # }
//! ```

mod client;
pub mod types;

pub use client::{StreamKind, XtreamClient, XTREAM_TIMEOUT};
pub use types::{AuthResponse, Category, Episode, LiveStream, SeriesInfo, SeriesStream, VodStream};
