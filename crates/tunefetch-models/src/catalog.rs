//! Catalog URL parsing and resolved metadata types.
//!
//! A job URL is dispatched on its shape: the first of `track/`, `playlist/`,
//! `album/`, `artist/` found in the URL decides the kind, and the path segment
//! after it (up to any query string) is the catalog identifier.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised when a URL is not a recognised catalog link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogUrlError {
    #[error("URL does not point to a track, playlist, album or artist: {0}")]
    UnrecognizedShape(String),

    #[error("URL has an empty {kind} identifier: {url}")]
    MissingId { kind: MediaKind, url: String },
}

/// What a catalog URL refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Track,
    Playlist,
    Album,
    Artist,
}

impl MediaKind {
    /// Dispatch order used when parsing URLs.
    pub const ALL: [MediaKind; 4] = [
        MediaKind::Track,
        MediaKind::Playlist,
        MediaKind::Album,
        MediaKind::Artist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Track => "track",
            MediaKind::Playlist => "playlist",
            MediaKind::Album => "album",
            MediaKind::Artist => "artist",
        }
    }

    /// Name of the output sub-folder for this kind.
    pub fn folder_name(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed catalog URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogUrl {
    pub kind: MediaKind,
    pub id: String,
    pub url: String,
}

impl CatalogUrl {
    pub fn parse(url: &str) -> Result<Self, CatalogUrlError> {
        let trimmed = url.trim();

        for kind in MediaKind::ALL {
            let marker = format!("{}/", kind.as_str());
            let Some((_, rest)) = trimmed.split_once(marker.as_str()) else {
                continue;
            };

            let id = rest
                .split(['?', '#', '/'])
                .next()
                .unwrap_or_default()
                .trim();

            if id.is_empty() {
                return Err(CatalogUrlError::MissingId {
                    kind,
                    url: trimmed.to_string(),
                });
            }

            return Ok(Self {
                kind,
                id: id.to_string(),
                url: trimmed.to_string(),
            });
        }

        Err(CatalogUrlError::UnrecognizedShape(trimmed.to_string()))
    }
}

/// A single track to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRef {
    pub name: String,
    pub artist: String,
}

impl TrackRef {
    pub fn new(name: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artist: artist.into(),
        }
    }

    /// "Name - Artist", used in messages and folder names.
    pub fn label(&self) -> String {
        format!("{} - {}", self.name, self.artist)
    }

    /// Free-text search query handed to the fetcher.
    pub fn query(&self) -> String {
        format!("{} {}", self.name, self.artist)
    }
}

/// Metadata resolved for a catalog URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub kind: MediaKind,
    pub name: String,
    pub tracks: Vec<TrackRef>,
}

impl CatalogEntry {
    /// Name of the folder that receives this entry's tracks. A name that
    /// sanitizes to nothing, `.` or `..` falls back to `<kind>-<id>`.
    pub fn folder_name(&self, url: &CatalogUrl) -> String {
        let sanitized = sanitize_filename(&self.name);
        let name = sanitized.trim();
        if name.chars().all(|c| c == '.') {
            return format!("{}-{}", self.kind, sanitize_filename(&url.id));
        }
        name.to_string()
    }
}

/// Strip characters that are not allowed in file names.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '\\' | '/' | ':' | '"' | '*' | '?' | '<' | '>' | '|'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds() {
        let parsed =
            CatalogUrl::parse("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=abc")
                .unwrap();
        assert_eq!(parsed.kind, MediaKind::Track);
        assert_eq!(parsed.id, "4uLU6hMCjMI75M1A2tKUQC");

        let parsed =
            CatalogUrl::parse("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M").unwrap();
        assert_eq!(parsed.kind, MediaKind::Playlist);

        let parsed =
            CatalogUrl::parse("https://open.spotify.com/album/1DFixLWuPkv3KT3TnV35m3").unwrap();
        assert_eq!(parsed.kind, MediaKind::Album);

        let parsed =
            CatalogUrl::parse(" https://open.spotify.com/intl-id/artist/0OdUWJ0sBjDrqHygGUXeCF ")
                .unwrap();
        assert_eq!(parsed.kind, MediaKind::Artist);
        assert_eq!(parsed.id, "0OdUWJ0sBjDrqHygGUXeCF");
    }

    #[test]
    fn test_parse_rejects_unknown_shape() {
        assert!(matches!(
            CatalogUrl::parse("https://open.spotify.com/show/123"),
            Err(CatalogUrlError::UnrecognizedShape(_))
        ));
        assert!(matches!(
            CatalogUrl::parse("https://open.spotify.com/track/?si=1"),
            Err(CatalogUrlError::MissingId { kind: MediaKind::Track, .. })
        ));
    }

    #[test]
    fn test_folder_name_never_leaves_kind_folder() {
        let url =
            CatalogUrl::parse("https://open.spotify.com/album/1DFixLWuPkv3KT3TnV35m3").unwrap();
        let entry = |name: &str| CatalogEntry {
            kind: MediaKind::Album,
            name: name.to_string(),
            tracks: Vec::new(),
        };

        assert_eq!(entry("Greatest Hits").folder_name(&url), "Greatest Hits");
        assert_eq!(entry("  AC/DC  ").folder_name(&url), "ACDC");
        assert_eq!(entry("Vol. 2...").folder_name(&url), "Vol. 2...");
        for name in ["", "   ", ".", "..", "/..", "?/", " .. "] {
            let folder = entry(name).folder_name(&url);
            assert_eq!(folder, "album-1DFixLWuPkv3KT3TnV35m3", "name {:?}", name);
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("AC/DC: Live?"), "ACDC Live");
        assert_eq!(sanitize_filename("plain name"), "plain name");
    }

    #[test]
    fn test_track_label_and_query() {
        let track = TrackRef::new("Song", "Band");
        assert_eq!(track.label(), "Song - Band");
        assert_eq!(track.query(), "Song Band");
    }
}
