use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::track::{AlbumRef, ArtistRef, Track};

/// Body of every non-payload reply (`{"message": "..."}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMessage {
    pub message: String,
}

impl ApiMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// `{"trackId": "..."}` for favourites and playlist membership requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRequest {
    #[serde(rename = "trackId", alias = "track_id")]
    pub track_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePlaylistRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedPlaylist {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumSummary {
    pub id: String,
    pub name: String,
    pub artists: Vec<ArtistRef>,
    pub image: Option<String>,
    pub release_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistSummary {
    pub id: String,
    pub name: String,
    pub image: Option<String>,
    pub followers: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SearchResults {
    pub tracks: Vec<Track>,
    pub albums: Vec<AlbumSummary>,
    pub artists: Vec<ArtistSummary>,
}

impl From<&AlbumSummary> for AlbumRef {
    fn from(album: &AlbumSummary) -> Self {
        AlbumRef {
            id: album.id.clone(),
            name: album.name.clone(),
        }
    }
}

/// Bulk import body: playlists keyed by owner email, then by playlist name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RestoreRequest {
    #[serde(default)]
    pub users: BTreeMap<String, RestoreUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RestoreUser {
    #[serde(default)]
    pub playlists: BTreeMap<String, Vec<RestoreEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreEntry {
    pub id: String,
    #[serde(rename = "addedAt", alias = "added_at")]
    pub added_at: DateTime<Utc>,
}

// ── routes ────────────────────────────────────────────────────────────────────

pub fn song_path(track_id: &str) -> String {
    format!("/api/track/{}/song", track_id)
}

pub fn probe_path(track_id: &str) -> String {
    format!("{}?check=true", song_path(track_id))
}

pub fn download_path(track_id: &str) -> String {
    format!("/api/track/{}/download", track_id)
}

pub fn playlist_path(playlist_id: &str) -> String {
    format!("/api/playlist/{}", playlist_id)
}

pub fn playlist_tracks_path(playlist_id: &str) -> String {
    format!("/api/playlist/{}/tracks", playlist_id)
}

pub const PLAYLISTS_PATH: &str = "/api/playlists";
pub const FAVOURITES_PATH: &str = "/api/favourites";
pub const HISTORY_PATH: &str = "/api/history";
pub const TOP_PATH: &str = "/api/top";
pub const SEARCH_PATH: &str = "/api/search";
pub const NEW_RELEASES_PATH: &str = "/api/new-releases";
pub const RESTORE_PATH: &str = "/api/restore";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_request_accepts_both_spellings() {
        let camel: TrackRequest = serde_json::from_str(r#"{"trackId":"abc"}"#).unwrap();
        let snake: TrackRequest = serde_json::from_str(r#"{"track_id":"abc"}"#).unwrap();
        assert_eq!(camel, snake);
        assert_eq!(
            serde_json::to_string(&camel).unwrap(),
            r#"{"trackId":"abc"}"#
        );
    }

    #[test]
    fn test_restore_request_shape() {
        let req: RestoreRequest = serde_json::from_str(
            r#"{"users":{"ana@example.com":{"playlists":{"Liked":[{"id":"t1","addedAt":"2024-03-01T10:00:00Z"}]}}}}"#,
        )
        .unwrap();
        let liked = &req.users["ana@example.com"].playlists["Liked"];
        assert_eq!(liked[0].id, "t1");
        assert_eq!(liked[0].added_at.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn test_routes() {
        assert_eq!(song_path("t1"), "/api/track/t1/song");
        assert_eq!(probe_path("t1"), "/api/track/t1/song?check=true");
        assert_eq!(download_path("t1"), "/api/track/t1/download");
        assert_eq!(playlist_tracks_path("p"), "/api/playlist/p/tracks");
    }
}
