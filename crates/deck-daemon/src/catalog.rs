//! Track metadata catalog (Spotify Web API, client-credentials flow).

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

use deck_proto::config::CatalogConfig;
use deck_proto::protocol::{AlbumSummary, ArtistSummary, SearchResults};
use deck_proto::track::{duration_from_ms, AlbumRef, ArtistRef, Image, Track};

use crate::error::CatalogError;

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_track(&self, id: &str) -> Result<Track, CatalogError>;
    async fn get_artist(&self, id: &str) -> Result<ArtistSummary, CatalogError>;
    async fn new_releases(&self) -> Result<Vec<AlbumSummary>, CatalogError>;
    async fn search(&self, query: &str) -> Result<SearchResults, CatalogError>;
}

// ── wire shapes ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawImage {
    url: String,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawArtistRef {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawAlbum {
    id: String,
    name: String,
    #[serde(default)]
    images: Vec<RawImage>,
    #[serde(default)]
    artists: Vec<RawArtistRef>,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTrack {
    id: Option<String>,
    name: String,
    artists: Vec<RawArtistRef>,
    album: RawAlbum,
    duration_ms: u64,
}

#[derive(Debug, Deserialize)]
struct RawFollowers {
    total: u64,
}

#[derive(Debug, Deserialize)]
struct RawArtist {
    id: String,
    name: String,
    #[serde(default)]
    images: Vec<RawImage>,
    followers: Option<RawFollowers>,
}

#[derive(Debug, Deserialize)]
struct RawPage<T> {
    items: Vec<Option<T>>,
}

#[derive(Debug, Deserialize)]
struct RawNewReleases {
    albums: RawPage<RawAlbum>,
}

#[derive(Debug, Deserialize)]
struct RawSearch {
    tracks: Option<RawPage<RawTrack>>,
    albums: Option<RawPage<RawAlbum>>,
    artists: Option<RawPage<RawArtist>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

fn image(raw: RawImage) -> Image {
    Image {
        url: raw.url,
        width: raw.width.unwrap_or(0),
        height: raw.height.unwrap_or(0),
    }
}

fn artist_ref(raw: RawArtistRef) -> ArtistRef {
    ArtistRef {
        id: raw.id,
        name: raw.name,
    }
}

/// Normalize a catalog track: duration in seconds, album images as the
/// track's images.
fn normalize_track(raw: RawTrack) -> Result<Track, CatalogError> {
    let id = raw
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CatalogError::Malformed(format!("track '{}' has no id", raw.name)))?;
    if raw.artists.is_empty() {
        return Err(CatalogError::Malformed(format!("track {} has no artists", id)));
    }

    Ok(Track {
        id,
        name: raw.name,
        artists: raw.artists.into_iter().map(artist_ref).collect(),
        album: AlbumRef {
            id: raw.album.id,
            name: raw.album.name,
        },
        duration: duration_from_ms(raw.duration_ms),
        images: raw.album.images.into_iter().map(image).collect(),
    })
}

fn normalize_album(raw: RawAlbum) -> AlbumSummary {
    AlbumSummary {
        id: raw.id,
        name: raw.name,
        artists: raw.artists.into_iter().map(artist_ref).collect(),
        image: raw.images.into_iter().next().map(|i| i.url),
        release_date: raw.release_date,
    }
}

fn normalize_artist(raw: RawArtist) -> ArtistSummary {
    ArtistSummary {
        id: raw.id,
        name: raw.name,
        image: raw.images.into_iter().next().map(|i| i.url),
        followers: raw.followers.map(|f| f.total).unwrap_or(0),
    }
}

/// `/{collection}/{id}` for a base62 catalog id. Anything else cannot name a
/// catalog object and is reported as not found without a request.
fn resource_path(collection: &str, id: &str) -> Result<String, CatalogError> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(CatalogError::NotFound(format!("{} {}", collection.trim_end_matches('s'), id)));
    }
    Ok(format!("/{}/{}", collection, id))
}

fn page_items<T>(page: Option<RawPage<T>>) -> impl Iterator<Item = T> {
    page.into_iter().flat_map(|p| p.items.into_iter().flatten())
}

// ── client ───────────────────────────────────────────────────────────────────

struct CachedToken {
    value: String,
    fetched_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        now.duration_since(self.fetched_at) < ttl
    }
}

pub struct SpotifyCatalog {
    client: reqwest::Client,
    config: CatalogConfig,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyCatalog {
    pub fn new(client: reqwest::Client, config: CatalogConfig) -> Self {
        Self {
            client,
            config,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, CatalogError> {
        let ttl = Duration::from_secs(self.config.token_ttl_secs);
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(ttl, Instant::now()) {
                return Ok(token.value.clone());
            }
            info!("Refreshing catalog token");
        }

        let url = format!("{}/api/token", self.config.accounts_base);
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(CatalogError::Auth(format!(
                "token endpoint returned {}",
                resp.status()
            )));
        }
        let body: TokenResponse = resp.json().await?;
        *cached = Some(CachedToken {
            value: body.access_token.clone(),
            fetched_at: Instant::now(),
        });
        Ok(body.access_token)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        what: &str,
    ) -> Result<T, CatalogError> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.config.api_base, path);
        debug!(%url, "Catalog request");
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => Ok(resp.json().await?),
            reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::BAD_REQUEST => {
                Err(CatalogError::NotFound(what.to_string()))
            }
            reqwest::StatusCode::UNAUTHORIZED => {
                *self.token.lock().await = None;
                Err(CatalogError::Auth("access token rejected".into()))
            }
            s => Err(CatalogError::Http(format!("{} for {}", s, what))),
        }
    }
}

#[async_trait]
impl Catalog for SpotifyCatalog {
    async fn get_track(&self, id: &str) -> Result<Track, CatalogError> {
        let raw: RawTrack = self
            .get_json(&resource_path("tracks", id)?, &[], &format!("track {}", id))
            .await?;
        normalize_track(raw)
    }

    async fn get_artist(&self, id: &str) -> Result<ArtistSummary, CatalogError> {
        let raw: RawArtist = self
            .get_json(&resource_path("artists", id)?, &[], &format!("artist {}", id))
            .await?;
        Ok(normalize_artist(raw))
    }

    async fn new_releases(&self) -> Result<Vec<AlbumSummary>, CatalogError> {
        let raw: RawNewReleases = self
            .get_json("/browse/new-releases", &[], "new releases")
            .await?;
        Ok(page_items(Some(raw.albums)).map(normalize_album).collect())
    }

    async fn search(&self, query: &str) -> Result<SearchResults, CatalogError> {
        let raw: RawSearch = self
            .get_json(
                "/search",
                &[("q", query), ("type", "track,album,artist")],
                "search results",
            )
            .await?;

        // Search pages occasionally carry tracks without ids (local files).
        let tracks = page_items(raw.tracks)
            .filter_map(|t| normalize_track(t).ok())
            .collect();
        Ok(SearchResults {
            tracks,
            albums: page_items(raw.albums).map(normalize_album).collect(),
            artists: page_items(raw.artists).map(normalize_artist).collect(),
        })
    }
}
