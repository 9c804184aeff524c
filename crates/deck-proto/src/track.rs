//! Track data model shared by the daemon and the player.
//!
//! Durations are always seconds (`f64`). Catalog sources that report
//! milliseconds go through [`duration_from_ms`] before anything else sees them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// A playable item. Immutable once fetched from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub artists: Vec<ArtistRef>,
    pub album: AlbumRef,
    /// Seconds.
    pub duration: f64,
    #[serde(default)]
    pub images: Vec<Image>,
}

impl Track {
    /// First two artist names joined for one-line display.
    pub fn artist_line(&self) -> String {
        self.artists
            .iter()
            .take(2)
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn cover_url(&self) -> Option<&str> {
        self.images.first().map(|i| i.url.as_str())
    }
}

pub fn duration_from_ms(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

/// Playlist as listed in the sidebar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub length: usize,
    /// Total of the track durations, seconds.
    pub duration: f64,
    pub images: Vec<String>,
}

/// Playlist with its tracks resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistView {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub length: usize,
    pub images: Vec<String>,
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Listen,
    Download,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub track: Track,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopTrack {
    pub track: Track,
    pub count: usize,
}

/// Cover images for a playlist: a spread of four covers once the playlist is
/// big enough, otherwise the cover of every track.
pub fn playlist_cover_images(tracks: &[Track]) -> Vec<String> {
    let count = tracks.len();
    if count >= 4 {
        [0.2, 0.4, 0.6, 0.8]
            .iter()
            .map(|fraction| (count as f64 * fraction).floor() as usize)
            .filter(|&index| index < count)
            .filter_map(|index| tracks[index].cover_url().map(str::to_string))
            .collect()
    } else {
        tracks
            .iter()
            .filter_map(|t| t.cover_url().map(str::to_string))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str) -> Track {
        Track {
            id: id.to_string(),
            name: format!("Song {id}"),
            artists: vec![
                ArtistRef { id: "a1".into(), name: "First".into() },
                ArtistRef { id: "a2".into(), name: "Second".into() },
                ArtistRef { id: "a3".into(), name: "Third".into() },
            ],
            album: AlbumRef { id: "al".into(), name: "Album".into() },
            duration: 180.0,
            images: vec![Image {
                url: format!("https://img/{id}"),
                width: 640,
                height: 640,
            }],
        }
    }

    #[test]
    fn test_duration_from_ms() {
        assert_eq!(duration_from_ms(180_000), 180.0);
        assert_eq!(duration_from_ms(215_467), 215.467);
        assert_eq!(duration_from_ms(0), 0.0);
    }

    #[test]
    fn test_artist_line_takes_two() {
        assert_eq!(track("x").artist_line(), "First, Second");
    }

    #[test]
    fn test_cover_images_small_playlist() {
        let tracks = vec![track("1"), track("2")];
        assert_eq!(
            playlist_cover_images(&tracks),
            vec!["https://img/1".to_string(), "https://img/2".to_string()]
        );
    }

    #[test]
    fn test_cover_images_spread() {
        let tracks: Vec<Track> = (0..10).map(|i| track(&i.to_string())).collect();
        assert_eq!(
            playlist_cover_images(&tracks),
            vec!["https://img/2", "https://img/4", "https://img/6", "https://img/8"]
        );
    }

    #[test]
    fn test_log_kind_wire_format() {
        assert_eq!(serde_json::to_string(&LogKind::Listen).unwrap(), "\"listen\"");
    }
}
