//! Spotify Web API metadata provider.
//!
//! Uses the client-credentials flow; the access token is cached until shortly
//! before it expires.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use tunefetch_models::{sanitize_filename, CatalogEntry, CatalogUrl, MediaKind, TrackRef};

use crate::provider::{MetadataError, MetadataProvider};

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE_URL: &str = "https://api.spotify.com/v1";

/// Market used for artist top tracks.
const TOP_TRACKS_MARKET: &str = "US";

const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Refresh this long before the token actually expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct ArtistObject {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TrackObject {
    name: String,
    #[serde(default)]
    artists: Vec<ArtistObject>,
}

impl TrackObject {
    fn primary_artist(&self) -> String {
        self.artists
            .first()
            .map(|a| a.name.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct Paging<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    /// Null for tracks removed from the catalog.
    track: Option<TrackObject>,
}

#[derive(Debug, Deserialize)]
struct PlaylistObject {
    name: String,
    tracks: Paging<PlaylistItem>,
}

#[derive(Debug, Deserialize)]
struct AlbumObject {
    name: String,
    tracks: Paging<TrackObject>,
}

#[derive(Debug, Deserialize)]
struct TopTracks {
    tracks: Vec<TrackObject>,
}

fn track_entry(track: TrackObject) -> CatalogEntry {
    let name = sanitize_filename(&track.name);
    let artist = sanitize_filename(&track.primary_artist());
    let track = TrackRef::new(name, artist);
    CatalogEntry {
        kind: MediaKind::Track,
        name: track.label(),
        tracks: vec![track],
    }
}

fn playlist_entry(playlist: PlaylistObject) -> CatalogEntry {
    let tracks = playlist
        .tracks
        .items
        .into_iter()
        .filter_map(|item| item.track)
        .map(|t| TrackRef::new(t.name.clone(), t.primary_artist()))
        .collect();
    CatalogEntry {
        kind: MediaKind::Playlist,
        name: sanitize_filename(&playlist.name),
        tracks,
    }
}

fn album_entry(album: AlbumObject) -> CatalogEntry {
    let tracks = album
        .tracks
        .items
        .into_iter()
        .map(|t| TrackRef::new(t.name.clone(), t.primary_artist()))
        .collect();
    CatalogEntry {
        kind: MediaKind::Album,
        name: sanitize_filename(&album.name),
        tracks,
    }
}

fn artist_entry(artist: ArtistObject, top: TopTracks) -> CatalogEntry {
    let name = sanitize_filename(&artist.name);
    let tracks = top
        .tracks
        .into_iter()
        .map(|t| TrackRef::new(t.name, name.clone()))
        .collect();
    CatalogEntry {
        kind: MediaKind::Artist,
        name,
        tracks,
    }
}

/// Spotify Web API client.
pub struct SpotifyMetadataProvider {
    http_client: Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for SpotifyMetadataProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpotifyMetadataProvider")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

impl SpotifyMetadataProvider {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, MetadataError> {
        let client_id = client_id.into();
        let client_secret = client_secret.into();
        if client_id.is_empty() || client_secret.is_empty() {
            return Err(MetadataError::MissingCredentials);
        }

        let http_client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent("tunefetch/0.1")
            .build()?;

        Ok(Self {
            http_client,
            client_id,
            client_secret,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, MetadataError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        debug!("Requesting Spotify access token");
        let response = self
            .http_client
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(MetadataError::Auth(format!("{}: {}", status, body)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| MetadataError::Decode(e.to_string()))?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(token.access_token)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, MetadataError> {
        let token = self.access_token().await?;
        let response = self
            .http_client
            .get(format!("{}{}", API_BASE_URL, path))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(MetadataError::Status { status, body });
        }

        response
            .json()
            .await
            .map_err(|e| MetadataError::Decode(e.to_string()))
    }
}

#[async_trait]
impl MetadataProvider for SpotifyMetadataProvider {
    #[instrument(skip(self), fields(kind = %url.kind, id = %url.id))]
    async fn resolve(&self, url: &CatalogUrl) -> Result<CatalogEntry, MetadataError> {
        let id = url.id.as_str();
        let entry = match url.kind {
            MediaKind::Track => track_entry(self.get(&format!("/tracks/{}", id), &[]).await?),
            MediaKind::Playlist => {
                playlist_entry(self.get(&format!("/playlists/{}", id), &[]).await?)
            }
            MediaKind::Album => album_entry(self.get(&format!("/albums/{}", id), &[]).await?),
            MediaKind::Artist => {
                let artist: ArtistObject = self.get(&format!("/artists/{}", id), &[]).await?;
                let top: TopTracks = self
                    .get(
                        &format!("/artists/{}/top-tracks", id),
                        &[("market", TOP_TRACKS_MARKET)],
                    )
                    .await?;
                artist_entry(artist, top)
            }
        };

        debug!("Resolved {} '{}' with {} tracks", entry.kind, entry.name, entry.tracks.len());
        Ok(entry)
    }
}
