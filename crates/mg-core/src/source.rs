//! Source classification and magnet URI parsing
//!
//! A source is accepted when it is a magnet URI, an http(s) URL pointing at a
//! metainfo file, or a path to an existing local file.

use std::path::{Path, PathBuf};

use reqwest::Url;

use crate::error::SessionError;

/// Kind of a validated source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Magnet,
    Http,
    File(PathBuf),
}

impl SourceKind {
    /// Validate a source string and classify it
    pub fn classify(source: &str) -> Result<Self, SessionError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(SessionError::InvalidSource(source.to_string()));
        }

        if has_scheme(trimmed, "magnet:") {
            return match MagnetLink::parse(trimmed) {
                Some(link) if link.info_hash.is_some() => Ok(SourceKind::Magnet),
                _ => Err(SessionError::InvalidSource(source.to_string())),
            };
        }

        if has_scheme(trimmed, "http://") || has_scheme(trimmed, "https://") {
            return match Url::parse(trimmed) {
                Ok(url) if url.host_str().is_some() => Ok(SourceKind::Http),
                _ => Err(SessionError::InvalidSource(source.to_string())),
            };
        }

        let path = Path::new(trimmed);
        if path.is_file() {
            return Ok(SourceKind::File(path.to_path_buf()));
        }

        Err(SessionError::InvalidSource(source.to_string()))
    }
}

/// A v1 info hash: 40 hex digits or 32 base32 characters
pub fn is_info_hash(hash: &str) -> bool {
    match hash.len() {
        40 => hash.bytes().all(|b| b.is_ascii_hexdigit()),
        32 => hash
            .bytes()
            .all(|b| matches!(b.to_ascii_lowercase(), b'a'..=b'z' | b'2'..=b'7')),
        _ => false,
    }
}

/// Schemes a tracker announce URL may use
const TRACKER_SCHEMES: &[&str] = &["http", "https", "udp", "ws", "wss"];

/// Whether `url` can be announced to as a tracker
pub fn is_tracker_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return false;
    };
    let has_host = parsed.host_str().map_or(false, |host| !host.is_empty());
    TRACKER_SCHEMES.contains(&parsed.scheme()) && has_host
}

fn has_scheme(source: &str, scheme: &str) -> bool {
    source
        .get(..scheme.len())
        .map(|prefix| prefix.eq_ignore_ascii_case(scheme))
        .unwrap_or(false)
}

/// Fields of a magnet URI that the orchestrator cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MagnetLink {
    /// Value of `xt=urn:btih:`, lowercased; `None` unless it is a well-formed hash
    pub info_hash: Option<String>,
    /// `dn`, percent-decoded
    pub display_name: Option<String>,
    /// `xl`, exact length in bytes
    pub exact_length: Option<u64>,
    /// `tr` entries
    pub trackers: Vec<String>,
}

impl MagnetLink {
    /// Parse a magnet URI. Returns `None` if the string is not a magnet URI.
    pub fn parse(uri: &str) -> Option<Self> {
        if !has_scheme(uri.trim(), "magnet:") {
            return None;
        }
        let url = Url::parse(uri.trim()).ok()?;
        let mut link = MagnetLink::default();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => {
                    let lower = value.to_ascii_lowercase();
                    if let Some(hash) = lower.strip_prefix("urn:btih:") {
                        if is_info_hash(hash) {
                            link.info_hash = Some(hash.to_string());
                        }
                    }
                }
                "dn" => link.display_name = Some(value.into_owned()),
                "xl" => link.exact_length = value.parse().ok(),
                "tr" => link.trackers.push(value.into_owned()),
                _ => {}
            }
        }

        Some(link)
    }
}
