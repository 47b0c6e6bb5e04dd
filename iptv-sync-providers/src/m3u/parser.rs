//! Extended M3U playlist parser

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;

/// Group label for entries without a `group-title`.
pub const DEFAULT_GROUP: &str = "Uncategorized";
/// Display name for entries without a name or `tvg-name`.
pub const DEFAULT_NAME: &str = "Unknown";

const EXTINF: &str = "#EXTINF:";

static QUOTED_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z0-9_-]+)="([^"]*)""#).expect("Invalid quoted attribute regex")
});

static UNQUOTED_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z0-9_-]+)=([^\s,"]+)"#).expect("Invalid unquoted attribute regex")
});

/// One playable playlist entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub name: String,
    pub url: String,
    pub group_title: String,
    pub tvg_id: String,
    pub tvg_name: String,
    pub tvg_logo: String,
    /// Declared runtime in seconds; live streams declare `-1`, kept as `None`.
    pub duration: Option<i32>,
}

impl PlaylistEntry {
    fn with_defaults(url: &str) -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            url: url.to_string(),
            group_title: DEFAULT_GROUP.to_string(),
            ..Self::default()
        }
    }
}

/// Result of parsing a playlist. `errors` are line-level and never fatal.
#[derive(Debug, Clone, Default)]
pub struct PlaylistParse {
    pub entries: Vec<PlaylistEntry>,
    pub errors: Vec<String>,
}

/// Metadata of one `#EXTINF` line, waiting for its URL line.
#[derive(Debug)]
struct PendingMeta {
    line: usize,
    entry: PlaylistEntry,
}

/// Parse playlist text into entries.
///
/// Each `#EXTINF` line pairs with the next URL line. Other directives are
/// skipped. Malformed metadata degrades its entry to defaults instead of
/// failing the whole playlist.
#[must_use]
pub fn parse_playlist(content: &str) -> PlaylistParse {
    let mut result = PlaylistParse::default();
    let mut pending: Option<PendingMeta> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_start_matches('\u{feff}').trim();

        if line.is_empty() || line.starts_with("#EXTM3U") {
            continue;
        }

        if let Some(meta) = line.strip_prefix(EXTINF) {
            if let Some(prev) = pending.take() {
                result.errors.push(format!(
                    "Line {}: #EXTINF without a URL line, entry dropped",
                    prev.line
                ));
            }
            let entry = match parse_extinf(meta) {
                Ok(entry) => entry,
                Err(reason) => {
                    result
                        .errors
                        .push(format!("Line {line_no}: Failed to parse #EXTINF - {reason}"));
                    PlaylistEntry::with_defaults("")
                }
            };
            pending = Some(PendingMeta { line: line_no, entry });
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let entry = match pending.take() {
            Some(PendingMeta { mut entry, .. }) => {
                entry.url = line.to_string();
                entry
            }
            None => PlaylistEntry::with_defaults(line),
        };
        result.entries.push(entry);
    }

    if let Some(prev) = pending {
        result.errors.push(format!(
            "Line {}: #EXTINF without a URL line, entry dropped",
            prev.line
        ));
    }

    result
}

/// Parse the part of an `#EXTINF` line after the `#EXTINF:` prefix.
fn parse_extinf(meta: &str) -> Result<PlaylistEntry, String> {
    if meta.bytes().filter(|b| *b == b'"').count() % 2 != 0 {
        return Err("unterminated quote".to_string());
    }

    let attrs = extract_attributes(meta);
    let attr = |key: &str| attrs.get(key).cloned().unwrap_or_default();

    let tvg_name = attr("tvg-name");
    let name = match display_name(meta) {
        Some(name) => name.to_string(),
        None if !tvg_name.is_empty() => tvg_name.clone(),
        None => DEFAULT_NAME.to_string(),
    };
    let group_title = Some(attr("group-title"))
        .filter(|g| !g.is_empty())
        .unwrap_or_else(|| DEFAULT_GROUP.to_string());

    Ok(PlaylistEntry {
        name,
        url: String::new(),
        group_title,
        tvg_id: attr("tvg-id"),
        tvg_name,
        tvg_logo: attr("tvg-logo"),
        duration: parse_duration(meta),
    })
}

/// Attribute map keyed by lowercase name. Quoted values win over unquoted
/// ones; the first occurrence of each form wins.
fn extract_attributes(meta: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    for caps in QUOTED_ATTR.captures_iter(meta) {
        attrs
            .entry(caps[1].to_ascii_lowercase())
            .or_insert_with(|| caps[2].to_string());
    }
    for caps in UNQUOTED_ATTR.captures_iter(meta) {
        attrs
            .entry(caps[1].to_ascii_lowercase())
            .or_insert_with(|| caps[2].to_string());
    }
    attrs
}

/// Text after the last comma outside quotes, if non-empty.
fn display_name(meta: &str) -> Option<&str> {
    let mut in_quotes = false;
    let mut last_comma = None;
    for (i, c) in meta.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => last_comma = Some(i),
            _ => {}
        }
    }
    last_comma
        .map(|i| meta[i + 1..].trim())
        .filter(|name| !name.is_empty())
}

fn parse_duration(meta: &str) -> Option<i32> {
    let token = meta
        .split(|c: char| c.is_whitespace() || c == ',')
        .next()?
        .trim();
    let secs: f64 = token.parse().ok()?;
    // `as` saturates, fine for a display-only field
    Some(secs as i32).filter(|s| *s > 0)
}

/// Distinct group labels, sorted.
#[must_use]
pub fn extract_groups(entries: &[PlaylistEntry]) -> Vec<String> {
    entries
        .iter()
        .filter(|e| !e.group_title.is_empty())
        .map(|e| e.group_title.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
