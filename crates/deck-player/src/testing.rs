//! Test doubles for the engine's seams.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use deck_proto::track::{AlbumRef, ArtistRef, Track};

use crate::media::{MediaAction, MediaHandlers, MediaMetadata, MediaSession};
use crate::output::{AudioOutput, OutputError, Ticket};
use crate::source::{SourceError, TrackSource};

pub fn track(id: &str, duration: f64) -> Track {
    Track {
        id: id.to_string(),
        name: format!("Song {id}"),
        artists: vec![ArtistRef {
            id: format!("{id}-artist"),
            name: "Artist".into(),
        }],
        album: AlbumRef {
            id: format!("{id}-album"),
            name: "Album".into(),
        },
        duration,
        images: Vec::new(),
    }
}

/// Probes succeed for cached tracks; `ensure` caches unless told otherwise.
#[derive(Default)]
pub struct FakeSource {
    cached: Mutex<HashSet<String>>,
    missing: Mutex<HashSet<String>>,
    broken: Mutex<HashSet<String>>,
    ensures: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn with_cached(ids: &[&str]) -> Self {
        let source = Self::default();
        source
            .cached
            .lock()
            .unwrap()
            .extend(ids.iter().map(|id| id.to_string()));
        source
    }

    /// `ensure` fails with NotFound.
    pub fn mark_missing(&self, id: &str) {
        self.missing.lock().unwrap().insert(id.to_string());
    }

    /// `ensure` succeeds but the track never becomes probeable.
    pub fn mark_broken(&self, id: &str) {
        self.broken.lock().unwrap().insert(id.to_string());
    }

    pub fn ensures(&self) -> Vec<String> {
        self.ensures.lock().unwrap().clone()
    }

    pub async fn wait_for_ensures(&self, n: usize) {
        for _ in 0..200 {
            if self.ensures.lock().unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} ensure calls, saw {:?}", n, self.ensures());
    }
}

#[async_trait]
impl TrackSource for FakeSource {
    async fn probe(&self, track_id: &str) -> Result<(), SourceError> {
        if self.cached.lock().unwrap().contains(track_id) {
            Ok(())
        } else {
            Err(SourceError::NotFound(track_id.to_string()))
        }
    }

    async fn ensure(&self, track_id: &str) -> Result<(), SourceError> {
        self.ensures.lock().unwrap().push(track_id.to_string());
        if self.missing.lock().unwrap().contains(track_id) {
            return Err(SourceError::NotFound(track_id.to_string()));
        }
        if !self.broken.lock().unwrap().contains(track_id) {
            self.cached.lock().unwrap().insert(track_id.to_string());
        }
        Ok(())
    }

    fn stream_url(&self, track_id: &str) -> String {
        format!("http://daemon/{track_id}")
    }
}

#[derive(Default)]
pub struct FakeOutput {
    loads: Mutex<Vec<(String, Ticket)>>,
    pauses: Mutex<Vec<bool>>,
    seeks: Mutex<Vec<f64>>,
    stops: Mutex<usize>,
    seek_fails: Mutex<bool>,
}

impl FakeOutput {
    pub fn loads(&self) -> Vec<(String, Ticket)> {
        self.loads.lock().unwrap().clone()
    }

    pub fn pauses(&self) -> Vec<bool> {
        self.pauses.lock().unwrap().clone()
    }

    pub fn seeks(&self) -> Vec<f64> {
        self.seeks.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        *self.stops.lock().unwrap()
    }

    pub fn fail_seeks(&self) {
        *self.seek_fails.lock().unwrap() = true;
    }
}

#[async_trait]
impl AudioOutput for FakeOutput {
    async fn load(&self, url: &str, ticket: Ticket) -> Result<(), OutputError> {
        self.loads.lock().unwrap().push((url.to_string(), ticket));
        Ok(())
    }

    async fn set_pause(&self, paused: bool) -> Result<(), OutputError> {
        self.pauses.lock().unwrap().push(paused);
        Ok(())
    }

    async fn seek(&self, position: f64) -> Result<(), OutputError> {
        if *self.seek_fails.lock().unwrap() {
            return Err(OutputError::Command("seek refused".into()));
        }
        self.seeks.lock().unwrap().push(position);
        Ok(())
    }

    async fn stop(&self) -> Result<(), OutputError> {
        *self.stops.lock().unwrap() += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMedia {
    published: Mutex<Vec<String>>,
    positions: Mutex<Vec<(f64, f64)>>,
    handlers: Mutex<Option<MediaHandlers>>,
    unbinds: Mutex<usize>,
}

impl FakeMedia {
    pub fn published(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }

    pub fn last_position(&self) -> Option<(f64, f64)> {
        self.positions.lock().unwrap().last().copied()
    }

    pub fn handlers(&self) -> Option<MediaHandlers> {
        self.handlers.lock().unwrap().clone()
    }

    pub fn unbinds(&self) -> usize {
        *self.unbinds.lock().unwrap()
    }

    /// Simulate an OS media key.
    pub fn press(&self, action: MediaAction) -> bool {
        self.handlers().is_some_and(|h| h.invoke(action))
    }
}

impl MediaSession for FakeMedia {
    fn publish(&self, metadata: &MediaMetadata) {
        self.published.lock().unwrap().push(metadata.title.clone());
    }

    fn set_position(&self, position: f64, duration: f64) {
        self.positions.lock().unwrap().push((position, duration));
    }

    fn bind(&self, handlers: MediaHandlers) {
        *self.handlers.lock().unwrap() = Some(handlers);
    }

    fn unbind(&self) {
        *self.handlers.lock().unwrap() = None;
        *self.unbinds.lock().unwrap() += 1;
    }
}
