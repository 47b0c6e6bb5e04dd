//! M3U Playlist Provider
//!
//! File protocol: a plain extended-M3U playlist downloaded over HTTP.

mod fetch;
mod parser;

pub use fetch::{PlaylistFetcher, PLAYLIST_TIMEOUT};
pub use parser::{
    extract_groups, parse_playlist, PlaylistEntry, PlaylistParse, DEFAULT_GROUP, DEFAULT_NAME,
};
