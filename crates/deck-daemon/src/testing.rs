//! Fakes for the daemon's external collaborators.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deck_proto::protocol::{AlbumSummary, ArtistSummary, SearchResults};
use deck_proto::track::{AlbumRef, ArtistRef, Image, Track};

use crate::acquire::AcquisitionPipeline;
use crate::broker::Broker;
use crate::catalog::Catalog;
use crate::error::{BrokerError, CatalogError, ConnectionError};
use crate::session::{BrokerConnector, BrokerLink, SessionManager};
use crate::store::{JsonStore, Store};

pub fn sample_track(id: &str, duration: f64) -> Track {
    Track {
        id: id.to_string(),
        name: format!("Song {id}"),
        artists: vec![
            ArtistRef {
                id: format!("{id}-a1"),
                name: "Lead".into(),
            },
            ArtistRef {
                id: format!("{id}-a2"),
                name: "Feature".into(),
            },
        ],
        album: AlbumRef {
            id: format!("{id}-album"),
            name: "Album".into(),
        },
        duration,
        images: vec![Image {
            url: format!("https://img/{id}"),
            width: 640,
            height: 640,
        }],
    }
}

#[derive(Default)]
pub struct FakeCatalog {
    pub tracks: Mutex<HashMap<String, Track>>,
    pub track_calls: AtomicUsize,
}

impl FakeCatalog {
    pub fn with_tracks(tracks: &[Track]) -> Arc<Self> {
        let fake = Self::default();
        {
            let mut map = fake.tracks.lock().unwrap();
            for t in tracks {
                map.insert(t.id.clone(), t.clone());
            }
        }
        Arc::new(fake)
    }
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn get_track(&self, id: &str) -> Result<Track, CatalogError> {
        self.track_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.tracks
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("track {id}")))
    }

    async fn get_artist(&self, id: &str) -> Result<ArtistSummary, CatalogError> {
        Ok(ArtistSummary {
            id: id.to_string(),
            name: match id.ends_with("-a1") {
                true => "Lead".into(),
                false => "Feature".into(),
            },
            image: None,
            followers: 10,
        })
    }

    async fn new_releases(&self) -> Result<Vec<AlbumSummary>, CatalogError> {
        Ok(vec![AlbumSummary {
            id: "fresh".into(),
            name: "Album".into(),
            artists: vec![],
            image: None,
            release_date: None,
        }])
    }

    async fn search(&self, query: &str) -> Result<SearchResults, CatalogError> {
        let tracks = self
            .tracks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.name.contains(query))
            .cloned()
            .collect();
        Ok(SearchResults {
            tracks,
            ..Default::default()
        })
    }
}

#[derive(Default)]
pub struct FakeBroker {
    pub downloads: AtomicUsize,
    pub fetches: AtomicUsize,
    pub reject_downloads: AtomicBool,
    pub reject_fetches: AtomicBool,
}

#[async_trait]
impl Broker for FakeBroker {
    async fn request_download(
        &self,
        catalog_url: &str,
        _session_id: &str,
    ) -> Result<String, BrokerError> {
        let n = self.downloads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.reject_downloads.load(Ordering::SeqCst) {
            return Err(BrokerError::Rejected {
                status: 500,
                detail: "Track unavailable".into(),
            });
        }
        // Every download of a track lands on its own path.
        let id = catalog_url.rsplit('/').next().unwrap_or_default();
        match n {
            0 => Ok(format!("/cache/{id}.mp3")),
            n => Ok(format!("/cache/{id}-{n}.mp3")),
        }
    }

    async fn fetch_file(&self, path: &str, _session_id: &str) -> Result<Bytes, BrokerError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.reject_fetches.load(Ordering::SeqCst) {
            return Err(BrokerError::Rejected {
                status: 404,
                detail: "File download failed".into(),
            });
        }
        Ok(Bytes::from(format!("ID3 {path}")))
    }
}

#[derive(Default)]
pub struct InstantConnector {
    pub attempts: AtomicUsize,
    pub refuse: AtomicBool,
}

#[async_trait]
impl BrokerConnector for InstantConnector {
    async fn connect(&self, _session_id: &str) -> Result<BrokerLink, ConnectionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ConnectionError::Handshake("connection refused".into()));
        }
        Ok(BrokerLink::new())
    }
}

pub struct Harness {
    pub catalog: Arc<FakeCatalog>,
    pub broker: Arc<FakeBroker>,
    pub connector: Arc<InstantConnector>,
    pub store: Arc<JsonStore>,
    pub sessions: Arc<SessionManager>,
    pub pipeline: Arc<AcquisitionPipeline>,
}

impl Harness {
    pub fn new(tracks: &[Track]) -> Self {
        let catalog = FakeCatalog::with_tracks(tracks);
        let broker = Arc::new(FakeBroker::default());
        let connector = Arc::new(InstantConnector::default());
        let store = Arc::new(JsonStore::in_memory());
        let sessions = Arc::new(SessionManager::new(
            connector.clone(),
            Duration::from_millis(5000),
        ));
        let pipeline = Arc::new(AcquisitionPipeline::new(
            catalog.clone(),
            broker.clone(),
            sessions.clone(),
            store.clone() as Arc<dyn Store>,
        ));
        Self {
            catalog,
            broker,
            connector,
            store,
            sessions,
            pipeline,
        }
    }
}
