//! Document store for tracks, artists, albums, playlists, users and logs.
//!
//! `JsonStore` keeps every collection in memory and rewrites one JSON file
//! after each mutation. All writes go through a single `RwLock` write guard,
//! which makes the insert-if-absent upserts atomic per document. A mutation
//! whose write fails is undone in memory before the error is returned.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use deck_proto::track::{AlbumRef, ArtistRef, HistoryEntry, Image, LogKind, TopTrack, Track};

use crate::error::StoreError;

pub const FAVOURITES_NAME: &str = "Favourites";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistRecord {
    pub id: String,
    pub name: String,
    pub image: Option<String>,
    pub followers: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumRecord {
    pub id: String,
    pub name: String,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: String,
    pub name: String,
    pub artist_ids: Vec<String>,
    pub album_id: String,
    /// Seconds.
    pub duration: f64,
    pub images: Vec<Image>,
    /// Broker path of the cached artifact, once downloaded.
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub track_id: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistRecord {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub tracks: Vec<PlaylistEntry>,
}

impl PlaylistRecord {
    pub fn contains(&self, track_id: &str) -> bool {
        self.tracks.iter().any(|e| e.track_id == track_id)
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.tracks.iter().map(|e| e.track_id.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub name: String,
    /// Id of the user's favourites playlist.
    pub favourites: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub user_id: String,
    pub track_id: String,
    pub kind: LogKind,
    pub date: DateTime<Utc>,
}

/// Outcome of a playlist membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Changed,
    Unchanged,
    NoPlaylist,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_track(&self, id: &str) -> Result<Option<TrackRecord>, StoreError>;
    /// Tracks with their artists and album resolved, in the order given.
    /// Ids without a stored record are skipped.
    async fn tracks(&self, ids: &[String]) -> Result<Vec<Track>, StoreError>;
    async fn upsert_artist(&self, artist: ArtistRecord) -> Result<ArtistRecord, StoreError>;
    async fn upsert_album(&self, album: AlbumRecord) -> Result<AlbumRecord, StoreError>;
    /// Insert the track if absent. An existing record keeps its fields, except
    /// that a record without an artifact path adopts the incoming one.
    async fn upsert_track(&self, track: TrackRecord) -> Result<TrackRecord, StoreError>;
    async fn append_log(&self, log: LogRecord) -> Result<(), StoreError>;
    async fn recent_history(&self, user_id: &str, limit: usize)
        -> Result<Vec<HistoryEntry>, StoreError>;
    async fn most_played(&self, user_id: &str, limit: usize) -> Result<Vec<TopTrack>, StoreError>;

    async fn create_playlist(&self, playlist: PlaylistRecord) -> Result<(), StoreError>;
    async fn find_playlist(&self, id: &str) -> Result<Option<PlaylistRecord>, StoreError>;
    async fn list_playlists(&self, owner: &str) -> Result<Vec<PlaylistRecord>, StoreError>;
    async fn delete_playlist(&self, id: &str) -> Result<bool, StoreError>;
    /// Append the track unless the playlist already holds it.
    async fn add_to_playlist(
        &self,
        playlist_id: &str,
        track_id: &str,
        added_at: DateTime<Utc>,
    ) -> Result<Membership, StoreError>;
    async fn remove_from_playlist(
        &self,
        playlist_id: &str,
        track_id: &str,
    ) -> Result<Membership, StoreError>;

    async fn find_user(&self, id: &str) -> Result<Option<UserRecord>, StoreError>;
    /// Return the user's record, creating it and its favourites playlist on
    /// first sight.
    async fn ensure_user(&self, id: &str, email: &str, name: &str)
        -> Result<UserRecord, StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Documents {
    #[serde(default)]
    tracks: BTreeMap<String, TrackRecord>,
    #[serde(default)]
    artists: BTreeMap<String, ArtistRecord>,
    #[serde(default)]
    albums: BTreeMap<String, AlbumRecord>,
    #[serde(default)]
    playlists: BTreeMap<String, PlaylistRecord>,
    #[serde(default)]
    users: BTreeMap<String, UserRecord>,
    #[serde(default)]
    logs: Vec<LogRecord>,
}

impl Documents {
    fn resolve(&self, id: &str) -> Option<Track> {
        let record = self.tracks.get(id)?;
        let artists = record
            .artist_ids
            .iter()
            .filter_map(|a| self.artists.get(a))
            .map(|a| ArtistRef {
                id: a.id.clone(),
                name: a.name.clone(),
            })
            .collect();
        let album = self
            .albums
            .get(&record.album_id)
            .map(|a| AlbumRef {
                id: a.id.clone(),
                name: a.name.clone(),
            })
            .unwrap_or_else(|| AlbumRef {
                id: record.album_id.clone(),
                name: String::new(),
            });

        Some(Track {
            id: record.id.clone(),
            name: record.name.clone(),
            artists,
            album,
            duration: record.duration,
            images: record.images.clone(),
        })
    }
}

pub struct JsonStore {
    docs: RwLock<Documents>,
    path: Option<PathBuf>,
}

impl JsonStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let docs = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Starting with an empty store");
                Documents::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            docs: RwLock::new(docs),
            path: Some(path),
        })
    }

    /// A store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            docs: RwLock::new(Documents::default()),
            path: None,
        }
    }

    async fn persist(&self, docs: &Documents) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(docs)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "Store persisted");
        Ok(())
    }

    /// Persist `docs`, running `undo` on them if the write fails.
    async fn commit(
        &self,
        docs: &mut Documents,
        undo: impl FnOnce(&mut Documents) + Send,
    ) -> Result<(), StoreError> {
        if let Err(e) = self.persist(docs).await {
            undo(docs);
            warn!(error = %e, "Store write failed, change rolled back");
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl Store for JsonStore {
    async fn find_track(&self, id: &str) -> Result<Option<TrackRecord>, StoreError> {
        Ok(self.docs.read().await.tracks.get(id).cloned())
    }

    async fn tracks(&self, ids: &[String]) -> Result<Vec<Track>, StoreError> {
        let docs = self.docs.read().await;
        Ok(ids.iter().filter_map(|id| docs.resolve(id)).collect())
    }

    async fn upsert_artist(&self, artist: ArtistRecord) -> Result<ArtistRecord, StoreError> {
        let mut docs = self.docs.write().await;
        if let Some(existing) = docs.artists.get(&artist.id) {
            return Ok(existing.clone());
        }
        docs.artists.insert(artist.id.clone(), artist.clone());
        let id = artist.id.clone();
        self.commit(&mut docs, move |d| {
            d.artists.remove(&id);
        })
        .await?;
        Ok(artist)
    }

    async fn upsert_album(&self, album: AlbumRecord) -> Result<AlbumRecord, StoreError> {
        let mut docs = self.docs.write().await;
        if let Some(existing) = docs.albums.get(&album.id) {
            return Ok(existing.clone());
        }
        docs.albums.insert(album.id.clone(), album.clone());
        let id = album.id.clone();
        self.commit(&mut docs, move |d| {
            d.albums.remove(&id);
        })
        .await?;
        Ok(album)
    }

    async fn upsert_track(&self, track: TrackRecord) -> Result<TrackRecord, StoreError> {
        let mut docs = self.docs.write().await;
        let id = track.id.clone();
        let (stored, adopted) = match docs.tracks.get_mut(&id) {
            Some(existing) => {
                if existing.path.is_some() || track.path.is_none() {
                    return Ok(existing.clone());
                }
                existing.path = track.path;
                (existing.clone(), true)
            }
            None => {
                docs.tracks.insert(id.clone(), track.clone());
                (track, false)
            }
        };
        self.commit(&mut docs, move |d| {
            if adopted {
                if let Some(t) = d.tracks.get_mut(&id) {
                    t.path = None;
                }
            } else {
                d.tracks.remove(&id);
            }
        })
        .await?;
        Ok(stored)
    }

    async fn append_log(&self, log: LogRecord) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        docs.logs.push(log);
        self.commit(&mut docs, |d| {
            d.logs.pop();
        })
        .await
    }

    async fn recent_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs
            .logs
            .iter()
            .rev()
            .filter(|l| l.user_id == user_id && l.kind == LogKind::Listen)
            .filter_map(|l| {
                docs.resolve(&l.track_id).map(|track| HistoryEntry {
                    track,
                    date: l.date,
                })
            })
            .take(limit)
            .collect())
    }

    async fn most_played(&self, user_id: &str, limit: usize) -> Result<Vec<TopTrack>, StoreError> {
        let docs = self.docs.read().await;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for log in docs
            .logs
            .iter()
            .filter(|l| l.user_id == user_id && l.kind == LogKind::Listen)
        {
            *counts.entry(log.track_id.as_str()).or_default() += 1;
        }

        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        Ok(ranked
            .into_iter()
            .filter_map(|(id, count)| docs.resolve(id).map(|track| TopTrack { track, count }))
            .take(limit)
            .collect())
    }

    async fn create_playlist(&self, playlist: PlaylistRecord) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        let id = playlist.id.clone();
        let previous = docs.playlists.insert(id.clone(), playlist);
        self.commit(&mut docs, move |d| match previous {
            Some(p) => {
                d.playlists.insert(id, p);
            }
            None => {
                d.playlists.remove(&id);
            }
        })
        .await
    }

    async fn find_playlist(&self, id: &str) -> Result<Option<PlaylistRecord>, StoreError> {
        Ok(self.docs.read().await.playlists.get(id).cloned())
    }

    async fn list_playlists(&self, owner: &str) -> Result<Vec<PlaylistRecord>, StoreError> {
        let docs = self.docs.read().await;
        let mut playlists: Vec<PlaylistRecord> = docs
            .playlists
            .values()
            .filter(|p| p.owner == owner)
            .cloned()
            .collect();
        playlists.sort_by_key(|p| p.created_at);
        Ok(playlists)
    }

    async fn delete_playlist(&self, id: &str) -> Result<bool, StoreError> {
        let mut docs = self.docs.write().await;
        let Some(removed) = docs.playlists.remove(id) else {
            return Ok(false);
        };
        self.commit(&mut docs, move |d| {
            d.playlists.insert(removed.id.clone(), removed);
        })
        .await?;
        Ok(true)
    }

    async fn add_to_playlist(
        &self,
        playlist_id: &str,
        track_id: &str,
        added_at: DateTime<Utc>,
    ) -> Result<Membership, StoreError> {
        let mut docs = self.docs.write().await;
        let Some(playlist) = docs.playlists.get_mut(playlist_id) else {
            return Ok(Membership::NoPlaylist);
        };
        if playlist.contains(track_id) {
            return Ok(Membership::Unchanged);
        }
        playlist.tracks.push(PlaylistEntry {
            track_id: track_id.to_string(),
            added_at,
        });
        let id = playlist_id.to_string();
        self.commit(&mut docs, move |d| {
            if let Some(p) = d.playlists.get_mut(&id) {
                p.tracks.pop();
            }
        })
        .await?;
        Ok(Membership::Changed)
    }

    async fn remove_from_playlist(
        &self,
        playlist_id: &str,
        track_id: &str,
    ) -> Result<Membership, StoreError> {
        let mut docs = self.docs.write().await;
        let Some(playlist) = docs.playlists.get_mut(playlist_id) else {
            return Ok(Membership::NoPlaylist);
        };
        if !playlist.contains(track_id) {
            return Ok(Membership::Unchanged);
        }
        let before = playlist.tracks.clone();
        playlist.tracks.retain(|e| e.track_id != track_id);
        let id = playlist_id.to_string();
        self.commit(&mut docs, move |d| {
            if let Some(p) = d.playlists.get_mut(&id) {
                p.tracks = before;
            }
        })
        .await?;
        Ok(Membership::Changed)
    }

    async fn find_user(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.docs.read().await.users.get(id).cloned())
    }

    async fn ensure_user(
        &self,
        id: &str,
        email: &str,
        name: &str,
    ) -> Result<UserRecord, StoreError> {
        let mut docs = self.docs.write().await;
        if let Some(user) = docs.users.get(id) {
            return Ok(user.clone());
        }

        let favourites = PlaylistRecord {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: FAVOURITES_NAME.to_string(),
            owner: id.to_string(),
            created_at: Utc::now(),
            tracks: Vec::new(),
        };
        let user = UserRecord {
            id: id.to_string(),
            email: email.to_string(),
            name: name.to_string(),
            favourites: favourites.id.clone(),
        };
        docs.playlists.insert(favourites.id.clone(), favourites);
        docs.users.insert(id.to_string(), user.clone());
        let (user_id, playlist_id) = (user.id.clone(), user.favourites.clone());
        self.commit(&mut docs, move |d| {
            d.users.remove(&user_id);
            d.playlists.remove(&playlist_id);
        })
        .await?;
        info!(user = %id, "Created user with favourites playlist");
        Ok(user)
    }
}
