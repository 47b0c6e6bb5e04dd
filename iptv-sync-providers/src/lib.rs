// IPTV Provider Clients
//
// Pure HTTP clients and parsers for the two upstream provider protocols.
// Nothing in this crate knows about the catalog database or the sync engine;
// iptv-sync-core adapts these clients into catalog sources.
//
// Architecture:
// - iptv-sync-providers: Xtream JSON API client + M3U playlist parser/fetcher
// - iptv-sync-core/provider: catalog sources built on top of these clients
// - iptv-sync-core/service: the sync engine driving the catalog sources

// Shared error types
pub mod error;

// Provider protocols
pub mod m3u;
pub mod xtream;

pub use error::ProviderClientError;
pub use m3u::{extract_groups, parse_playlist, PlaylistEntry, PlaylistFetcher, PlaylistParse};
pub use xtream::XtreamClient;
