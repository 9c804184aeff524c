//! Platform media-session integration (now-playing metadata and media keys).

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

use deck_proto::track::Track;

use crate::engine::PlayerEvent;

#[derive(Debug, Clone, PartialEq)]
pub struct Artwork {
    pub src: String,
    /// `WxH`
    pub sizes: String,
    pub mime: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaMetadata {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub artwork: Vec<Artwork>,
}

impl MediaMetadata {
    pub fn for_track(track: &Track) -> Self {
        Self {
            title: track.name.clone(),
            artist: track.artist_line(),
            album: Some(track.album.name.clone()).filter(|a| !a.is_empty()),
            artwork: track
                .images
                .iter()
                .map(|image| Artwork {
                    src: image.url.clone(),
                    sizes: format!("{}x{}", image.width, image.height),
                    mime: "image/png",
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MediaAction {
    Play,
    Pause,
    Next,
    Previous,
    SeekTo(f64),
}

/// Action handlers bound for one track. Every invocation is routed into the
/// engine tagged with the binding generation.
#[derive(Debug, Clone)]
pub struct MediaHandlers {
    generation: u64,
    tx: mpsc::Sender<PlayerEvent>,
}

impl MediaHandlers {
    pub fn new(generation: u64, tx: mpsc::Sender<PlayerEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn invoke(&self, action: MediaAction) -> bool {
        self.tx
            .try_send(PlayerEvent::Media {
                generation: self.generation,
                action,
            })
            .is_ok()
    }
}

pub trait MediaSession: Send + Sync {
    fn publish(&self, metadata: &MediaMetadata);
    fn set_position(&self, position: f64, duration: f64);
    fn bind(&self, handlers: MediaHandlers);
    fn unbind(&self);
}

/// Keeps the media session in step with the current track.
pub struct MediaControls {
    session: Arc<dyn MediaSession>,
    generation: u64,
    bound: bool,
}

impl MediaControls {
    pub fn new(session: Arc<dyn MediaSession>) -> Self {
        Self {
            session,
            generation: 0,
            bound: false,
        }
    }

    /// Publish `track` and bind fresh handlers; the previous binding is
    /// released first.
    pub fn rebind(&mut self, track: &Track, tx: mpsc::Sender<PlayerEvent>) -> u64 {
        self.release();
        self.generation += 1;
        self.session.publish(&MediaMetadata::for_track(track));
        self.session.bind(MediaHandlers::new(self.generation, tx));
        self.bound = true;
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.bound && generation == self.generation
    }

    pub fn set_position(&self, position: f64, duration: f64) {
        if self.bound {
            self.session.set_position(position, duration);
        }
    }

    pub fn release(&mut self) {
        if self.bound {
            self.session.unbind();
            self.bound = false;
        }
    }
}

/// Media session with no platform backend. Metadata goes to the log; the
/// terminal's media keys are fed in through [`LogMediaSession::trigger`].
#[derive(Default)]
pub struct LogMediaSession {
    handlers: Mutex<Option<MediaHandlers>>,
}

impl LogMediaSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the bound handler for `action`. False when nothing is bound.
    pub fn trigger(&self, action: MediaAction) -> bool {
        let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        match handlers.as_ref() {
            Some(h) => h.invoke(action),
            None => false,
        }
    }
}

impl MediaSession for LogMediaSession {
    fn publish(&self, metadata: &MediaMetadata) {
        info!(
            title = %metadata.title,
            artist = %metadata.artist,
            album = ?metadata.album,
            artwork = metadata.artwork.len(),
            "Now playing"
        );
    }

    fn set_position(&self, position: f64, duration: f64) {
        debug!(position, duration, "Media position");
    }

    fn bind(&self, handlers: MediaHandlers) {
        *self.handlers.lock().unwrap_or_else(|e| e.into_inner()) = Some(handlers);
    }

    fn unbind(&self) {
        *self.handlers.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}
