//! Track acquisition: make a track's audio available locally (cache-or-fetch)
//! and serve it back.

use bytes::Bytes;
use chrono::Utc;
use futures_util::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use deck_proto::protocol::ArtistSummary;
use deck_proto::track::{LogKind, Track};

use crate::broker::Broker;
use crate::catalog::Catalog;
use crate::error::AcquireError;
use crate::session::SessionManager;
use crate::store::{AlbumRecord, ArtistRecord, LogRecord, Store, TrackRecord};

/// A track whose audio the broker has cached at `path`.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedArtifact {
    pub track_id: String,
    pub path: String,
}

pub fn catalog_url(track_id: &str) -> String {
    format!("https://open.spotify.com/track/{}", track_id)
}

struct CatalogMetadata {
    track: Track,
    artists: Vec<ArtistSummary>,
}

pub struct AcquisitionPipeline {
    catalog: Arc<dyn Catalog>,
    broker: Arc<dyn Broker>,
    sessions: Arc<SessionManager>,
    store: Arc<dyn Store>,
}

impl AcquisitionPipeline {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        broker: Arc<dyn Broker>,
        sessions: Arc<SessionManager>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            catalog,
            broker,
            sessions,
            store,
        }
    }

    /// Ensure the track's audio is cached, downloading it on a miss.
    pub async fn ensure_available(
        &self,
        track_id: &str,
        user_id: &str,
    ) -> Result<CachedArtifact, AcquireError> {
        if let Some(TrackRecord {
            path: Some(path), ..
        }) = self.store.find_track(track_id).await?
        {
            debug!(track = %track_id, "Cache hit");
            return Ok(CachedArtifact {
                track_id: track_id.to_string(),
                path,
            });
        }

        info!(track = %track_id, "Cache miss, acquiring");
        let metadata = self.fetch_metadata(track_id).await?;
        let (artist_ids, album_id) = self.upsert_refs(&metadata).await?;

        let session_id = self.sessions.acquire_session_id().await.map_err(|e| {
            error!(track = %track_id, error = %e, "No broker session for download");
            e
        })?;
        let path = self
            .broker
            .request_download(&catalog_url(track_id), &session_id)
            .await
            .map_err(|e| {
                error!(track = %track_id, error = %e, "Download request failed");
                AcquireError::from(e)
            })?;

        let stored = self
            .store
            .upsert_track(track_record(metadata.track, artist_ids, album_id, Some(path.clone())))
            .await?;

        self.log(track_id, user_id, LogKind::Download).await;

        Ok(CachedArtifact {
            track_id: track_id.to_string(),
            path: stored.path.unwrap_or(path),
        })
    }

    /// Fetch the cached bytes of a track.
    pub async fn read_artifact(&self, track_id: &str) -> Result<Bytes, AcquireError> {
        let path = self
            .store
            .find_track(track_id)
            .await?
            .and_then(|t| t.path)
            .ok_or_else(|| AcquireError::NotFound(format!("artifact for track {}", track_id)))?;

        let session_id = self.sessions.acquire_session_id().await.map_err(|e| {
            error!(track = %track_id, error = %e, "No broker session for artifact fetch");
            e
        })?;
        self.broker
            .fetch_file(&path, &session_id)
            .await
            .map_err(|e| {
                error!(track = %track_id, %path, error = %e, "Artifact fetch failed");
                AcquireError::from(e)
            })
    }

    /// Store catalog metadata for a track without downloading it.
    pub async fn save_metadata(&self, track_id: &str) -> Result<TrackRecord, AcquireError> {
        if let Some(existing) = self.store.find_track(track_id).await? {
            return Ok(existing);
        }
        let metadata = self.fetch_metadata(track_id).await?;
        let (artist_ids, album_id) = self.upsert_refs(&metadata).await?;
        Ok(self
            .store
            .upsert_track(track_record(metadata.track, artist_ids, album_id, None))
            .await?)
    }

    pub async fn log_listen(&self, track_id: &str, user_id: &str) {
        self.log(track_id, user_id, LogKind::Listen).await
    }

    /// Best-effort: failures are logged, never returned.
    async fn log(&self, track_id: &str, user_id: &str, kind: LogKind) {
        match self.store.find_track(track_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(track = %track_id, ?kind, "Not logging event for unknown track");
                return;
            }
            Err(e) => {
                error!(track = %track_id, ?kind, error = %e, "Event log lookup failed");
                return;
            }
        }

        let entry = LogRecord {
            user_id: user_id.to_string(),
            track_id: track_id.to_string(),
            kind,
            date: Utc::now(),
        };
        if let Err(e) = self.store.append_log(entry).await {
            error!(track = %track_id, ?kind, error = %e, "Failed to record event");
        }
    }

    async fn fetch_metadata(&self, track_id: &str) -> Result<CatalogMetadata, AcquireError> {
        let track = self.catalog.get_track(track_id).await.map_err(|e| {
            warn!(track = %track_id, error = %e, "Catalog lookup failed");
            AcquireError::from(e)
        })?;
        let artists = try_join_all(track.artists.iter().map(|a| self.catalog.get_artist(&a.id)))
            .await
            .map_err(|e| {
                warn!(track = %track_id, error = %e, "Artist lookup failed");
                AcquireError::Metadata(e.to_string())
            })?;
        Ok(CatalogMetadata { track, artists })
    }

    async fn upsert_refs(
        &self,
        metadata: &CatalogMetadata,
    ) -> Result<(Vec<String>, String), AcquireError> {
        let mut artist_ids = Vec::with_capacity(metadata.artists.len());
        for artist in &metadata.artists {
            let stored = self
                .store
                .upsert_artist(ArtistRecord {
                    id: artist.id.clone(),
                    name: artist.name.clone(),
                    image: artist.image.clone(),
                    followers: artist.followers,
                })
                .await?;
            artist_ids.push(stored.id);
        }

        let track = &metadata.track;
        let album = self
            .store
            .upsert_album(AlbumRecord {
                id: track.album.id.clone(),
                name: track.album.name.clone(),
                image: track.cover_url().map(str::to_string),
            })
            .await?;

        Ok((artist_ids, album.id))
    }
}

fn track_record(
    track: Track,
    artist_ids: Vec<String>,
    album_id: String,
    path: Option<String>,
) -> TrackRecord {
    TrackRecord {
        id: track.id,
        name: track.name,
        artist_ids,
        album_id,
        duration: track.duration,
        images: track.images,
        path,
    }
}
