//! Playlists and favourites.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use deck_proto::protocol::RestoreEntry;
use deck_proto::track::{playlist_cover_images, PlaylistSummary, PlaylistView};

use crate::acquire::AcquisitionPipeline;
use crate::error::LibraryError;
use crate::store::{Membership, PlaylistRecord, Store, UserRecord};

pub const PLAYLIST_NOT_FOUND: &str = "Playlist not found";
pub const TRACK_NOT_FOUND: &str = "Track not found";
pub const TRACK_NOT_IN_PLAYLIST: &str = "Track not found in the playlist";
/// Imported playlist name that maps onto the favourites playlist.
pub const LIKED_PLAYLIST: &str = "Liked";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyPresent,
}

impl AddOutcome {
    pub fn message(self) -> &'static str {
        match self {
            AddOutcome::Added => "Track added to playlist successfully",
            AddOutcome::AlreadyPresent => "Track already exists in the playlist",
        }
    }
}

/// Counts from one user's bulk import.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestoreReport {
    pub playlists_created: usize,
    pub tracks_added: usize,
    pub tracks_skipped: usize,
}

pub struct Library {
    store: Arc<dyn Store>,
    pipeline: Arc<AcquisitionPipeline>,
}

impl Library {
    pub fn new(store: Arc<dyn Store>, pipeline: Arc<AcquisitionPipeline>) -> Self {
        Self { store, pipeline }
    }

    pub async fn create_playlist(
        &self,
        name: &str,
        user: &UserRecord,
    ) -> Result<String, LibraryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LibraryError::Invalid("Playlist name is required"));
        }
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.store
            .create_playlist(PlaylistRecord {
                id: id.clone(),
                name: name.to_string(),
                owner: user.id.clone(),
                created_at: Utc::now(),
                tracks: Vec::new(),
            })
            .await?;
        info!(playlist = %id, user = %user.id, "Playlist created");
        Ok(id)
    }

    pub async fn delete_playlist(&self, id: &str, user: &UserRecord) -> Result<(), LibraryError> {
        self.owned(id, user).await?;
        if id == user.favourites {
            return Err(LibraryError::Invalid("The favourites playlist cannot be deleted"));
        }
        self.store.delete_playlist(id).await?;
        info!(playlist = %id, user = %user.id, "Playlist deleted");
        Ok(())
    }

    pub async fn get_playlist(
        &self,
        id: &str,
        user: &UserRecord,
    ) -> Result<PlaylistView, LibraryError> {
        let playlist = self.owned(id, user).await?;
        let tracks = self.store.tracks(&playlist.track_ids()).await?;
        Ok(PlaylistView {
            id: playlist.id,
            name: playlist.name,
            created_at: playlist.created_at,
            length: tracks.len(),
            images: playlist_cover_images(&tracks),
            tracks,
        })
    }

    /// The user's playlists, favourites excluded.
    pub async fn list_playlists(
        &self,
        user: &UserRecord,
    ) -> Result<Vec<PlaylistSummary>, LibraryError> {
        let mut summaries = Vec::new();
        for playlist in self.store.list_playlists(&user.id).await? {
            if playlist.id == user.favourites {
                continue;
            }
            let tracks = self.store.tracks(&playlist.track_ids()).await?;
            summaries.push(PlaylistSummary {
                id: playlist.id,
                name: playlist.name,
                created_at: playlist.created_at,
                length: tracks.len(),
                duration: tracks.iter().map(|t| t.duration).sum(),
                images: playlist_cover_images(&tracks),
            });
        }
        Ok(summaries)
    }

    /// Add a track, storing its catalog metadata first if it is unknown.
    pub async fn add_track(
        &self,
        playlist_id: &str,
        track_id: &str,
        user: &UserRecord,
    ) -> Result<AddOutcome, LibraryError> {
        self.owned(playlist_id, user).await?;
        if self.store.find_track(track_id).await?.is_none() {
            self.pipeline.save_metadata(track_id).await?;
        }
        match self
            .store
            .add_to_playlist(playlist_id, track_id, Utc::now())
            .await?
        {
            Membership::Changed => Ok(AddOutcome::Added),
            Membership::Unchanged => Ok(AddOutcome::AlreadyPresent),
            Membership::NoPlaylist => Err(LibraryError::NotFound(PLAYLIST_NOT_FOUND)),
        }
    }

    pub async fn remove_track(
        &self,
        playlist_id: &str,
        track_id: &str,
        user: &UserRecord,
    ) -> Result<(), LibraryError> {
        self.owned(playlist_id, user).await?;
        if self.store.find_track(track_id).await?.is_none() {
            return Err(LibraryError::NotFound(TRACK_NOT_FOUND));
        }
        match self.store.remove_from_playlist(playlist_id, track_id).await? {
            Membership::Changed => Ok(()),
            Membership::Unchanged => Err(LibraryError::NotFound(TRACK_NOT_IN_PLAYLIST)),
            Membership::NoPlaylist => Err(LibraryError::NotFound(PLAYLIST_NOT_FOUND)),
        }
    }

    pub async fn favourites(&self, user: &UserRecord) -> Result<PlaylistView, LibraryError> {
        self.get_playlist(&user.favourites, user).await
    }

    pub async fn add_to_favourites(
        &self,
        track_id: &str,
        user: &UserRecord,
    ) -> Result<AddOutcome, LibraryError> {
        self.add_track(&user.favourites, track_id, user).await
    }

    pub async fn remove_from_favourites(
        &self,
        track_id: &str,
        user: &UserRecord,
    ) -> Result<(), LibraryError> {
        self.remove_track(&user.favourites, track_id, user).await
    }

    /// Import `playlists` (name to entries) for `user`.
    ///
    /// [`LIKED_PLAYLIST`] goes to favourites. Other names reuse the user's
    /// playlist of that name or create it. Unknown tracks get their catalog
    /// metadata stored first; a track whose metadata cannot be fetched is
    /// skipped. Entries keep their original added date and tracks already
    /// present are left alone.
    pub async fn restore(
        &self,
        user: &UserRecord,
        playlists: &BTreeMap<String, Vec<RestoreEntry>>,
    ) -> Result<RestoreReport, LibraryError> {
        let mut report = RestoreReport::default();
        for (name, entries) in playlists {
            let Some(playlist_id) = self.restore_target(name, user, &mut report).await? else {
                warn!(user = %user.id, "Skipping imported playlist without a name");
                continue;
            };
            for entry in entries {
                if let Err(e) = self.pipeline.save_metadata(&entry.id).await {
                    warn!(track = %entry.id, playlist = %playlist_id, error = %e, "Skipping imported track");
                    report.tracks_skipped += 1;
                    continue;
                }
                let added = self
                    .store
                    .add_to_playlist(&playlist_id, &entry.id, entry.added_at)
                    .await?;
                if added == Membership::Changed {
                    report.tracks_added += 1;
                }
            }
        }
        info!(
            user = %user.id,
            created = report.playlists_created,
            added = report.tracks_added,
            skipped = report.tracks_skipped,
            "Import finished"
        );
        Ok(report)
    }

    async fn restore_target(
        &self,
        name: &str,
        user: &UserRecord,
        report: &mut RestoreReport,
    ) -> Result<Option<String>, LibraryError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        if name == LIKED_PLAYLIST {
            return Ok(Some(user.favourites.clone()));
        }
        let existing = self
            .store
            .list_playlists(&user.id)
            .await?
            .into_iter()
            .find(|p| p.name == name && p.id != user.favourites);
        if let Some(playlist) = existing {
            return Ok(Some(playlist.id));
        }
        report.playlists_created += 1;
        Ok(Some(self.create_playlist(name, user).await?))
    }

    async fn owned(&self, id: &str, user: &UserRecord) -> Result<PlaylistRecord, LibraryError> {
        match self.store.find_playlist(id).await? {
            Some(playlist) if playlist.owner == user.id => Ok(playlist),
            _ => Err(LibraryError::NotFound(PLAYLIST_NOT_FOUND)),
        }
    }
}
