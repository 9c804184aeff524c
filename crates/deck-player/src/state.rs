//! Playback state shared with the terminal front-end.
//!
//! The engine is the only writer. Readers fetch a snapshot after receiving
//! `PlayerBroadcast::StateUpdated`.

use std::sync::Arc;
use tokio::sync::RwLock;

use deck_proto::track::Track;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
}

impl PlaybackStatus {
    /// Whether the user asked for sound; true while loading.
    pub fn is_playing(self) -> bool {
        matches!(self, PlaybackStatus::Loading | PlaybackStatus::Playing)
    }

    pub fn label(self) -> &'static str {
        match self {
            PlaybackStatus::Idle => "stopped",
            PlaybackStatus::Loading => "loading",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackSnapshot {
    pub rev: u64,
    pub status: PlaybackStatus,
    pub current: Option<Track>,
    pub is_playing: bool,
    pub is_loading: bool,
    /// Seconds.
    pub position: f64,
    /// Seconds; 0 while unknown.
    pub duration: f64,
    pub queue: Vec<Track>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum PlayerBroadcast {
    StateUpdated,
    TrackChanged(String),
    Error(String),
}

pub struct StateManager {
    state: Arc<RwLock<PlaybackSnapshot>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(PlaybackSnapshot {
                rev: 1,
                ..Default::default()
            })),
        }
    }

    pub async fn get_state(&self) -> PlaybackSnapshot {
        self.state.read().await.clone()
    }

    pub async fn set_track(&self, track: Track, duration: f64) {
        let mut state = self.state.write().await;
        state.current = Some(track);
        state.position = 0.0;
        state.duration = duration;
        state.last_error = None;
        state.rev += 1;
    }

    pub async fn set_status(&self, status: PlaybackStatus) {
        let mut state = self.state.write().await;
        state.status = status;
        state.is_playing = status.is_playing();
        state.is_loading = status == PlaybackStatus::Loading;
        state.rev += 1;
    }

    pub async fn set_timeline(&self, position: f64, duration: f64) {
        let mut state = self.state.write().await;
        state.position = position;
        state.duration = duration;
        state.rev += 1;
    }

    pub async fn set_queue(&self, queue: Vec<Track>) {
        let mut state = self.state.write().await;
        state.queue = queue;
        state.rev += 1;
    }

    pub async fn set_error(&self, error: Option<String>) {
        let mut state = self.state.write().await;
        state.last_error = error;
        state.rev += 1;
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}
