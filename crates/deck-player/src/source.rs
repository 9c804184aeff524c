//! Client side of the daemon API: track availability for the engine, and
//! library browsing for the terminal front-end.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use deck_proto::protocol::{
    download_path, playlist_path, probe_path, song_path, ApiMessage, SearchResults, TrackRequest,
    FAVOURITES_PATH, PLAYLISTS_PATH, SEARCH_PATH,
};
use deck_proto::track::{PlaylistSummary, PlaylistView};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    #[error("track not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("daemon unreachable: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        SourceError::Transport(e.to_string())
    }
}

/// Where the engine checks for, acquires and streams track audio.
#[async_trait]
pub trait TrackSource: Send + Sync {
    /// Cheap existence check; succeeds only if the artifact is cached.
    async fn probe(&self, track_id: &str) -> Result<(), SourceError>;
    /// Download the track into the daemon's cache.
    async fn ensure(&self, track_id: &str) -> Result<(), SourceError>;
    fn stream_url(&self, track_id: &str) -> String;
}

pub struct DaemonClient {
    client: reqwest::Client,
    base: String,
    token: String,
}

impl DaemonClient {
    pub fn new(client: reqwest::Client, base: &str, token: &str) -> Self {
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// Header mpv must send when it fetches `stream_url`.
    pub fn auth_header(&self) -> String {
        format!("Authorization: Bearer {}", self.token)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base, path))
            .bearer_auth(&self.token)
    }

    async fn send(&self, request: RequestBuilder, subject: &str) -> Result<String, SourceError> {
        let resp = request.send().await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        check_status(status, &body, subject)?;
        Ok(body)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SourceError> {
        let body = self.send(self.request(Method::GET, path), path).await?;
        serde_json::from_str(&body)
            .map_err(|e| SourceError::Transport(format!("bad response from {}: {}", path, e)))
    }

    pub async fn playlists(&self) -> Result<Vec<PlaylistSummary>, SourceError> {
        self.get_json(PLAYLISTS_PATH).await
    }

    pub async fn playlist(&self, id: &str) -> Result<PlaylistView, SourceError> {
        self.get_json(&playlist_path(id)).await
    }

    pub async fn favourites(&self) -> Result<PlaylistView, SourceError> {
        self.get_json(FAVOURITES_PATH).await
    }

    pub async fn search(&self, query: &str) -> Result<SearchResults, SourceError> {
        let request = self
            .request(Method::GET, SEARCH_PATH)
            .query(&[("q", query)]);
        let body = self.send(request, SEARCH_PATH).await?;
        serde_json::from_str(&body)
            .map_err(|e| SourceError::Transport(format!("bad search response: {}", e)))
    }

    /// Add or remove `track_id` from the favourites playlist.
    pub async fn set_favourite(&self, track_id: &str, favourite: bool) -> Result<(), SourceError> {
        let method = if favourite { Method::POST } else { Method::DELETE };
        let request = self
            .request(method, FAVOURITES_PATH)
            .json(&TrackRequest {
                track_id: track_id.to_string(),
            });
        self.send(request, track_id).await?;
        Ok(())
    }
}

#[async_trait]
impl TrackSource for DaemonClient {
    async fn probe(&self, track_id: &str) -> Result<(), SourceError> {
        debug!(track = %track_id, "Probing cached artifact");
        self.send(self.request(Method::HEAD, &probe_path(track_id)), track_id)
            .await
            .map(|_| ())
    }

    async fn ensure(&self, track_id: &str) -> Result<(), SourceError> {
        debug!(track = %track_id, "Requesting download");
        self.send(self.request(Method::POST, &download_path(track_id)), track_id)
            .await
            .map(|_| ())
    }

    fn stream_url(&self, track_id: &str) -> String {
        format!("{}{}", self.base, song_path(track_id))
    }
}

/// Map a daemon reply onto [`SourceError`]; error bodies carry `{"message"}`.
fn check_status(status: StatusCode, body: &str, subject: &str) -> Result<(), SourceError> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::NOT_FOUND {
        return Err(SourceError::NotFound(subject.to_string()));
    }
    let message = serde_json::from_str::<ApiMessage>(body)
        .map(|m| m.message)
        .unwrap_or_else(|_| format!("daemon replied {}", status));
    Err(SourceError::Unavailable(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_status() {
        assert!(check_status(StatusCode::OK, "", "t1").is_ok());
        assert_eq!(
            check_status(StatusCode::NOT_FOUND, "", "t1"),
            Err(SourceError::NotFound("t1".into()))
        );
        assert_eq!(
            check_status(
                StatusCode::BAD_GATEWAY,
                r#"{"message":"Track unavailable"}"#,
                "t1"
            ),
            Err(SourceError::Unavailable("Track unavailable".into()))
        );
        // HEAD replies have no body.
        assert_eq!(
            check_status(StatusCode::TOO_MANY_REQUESTS, "", "t1"),
            Err(SourceError::Unavailable("daemon replied 429 Too Many Requests".into()))
        );
    }

    #[test]
    fn test_urls() {
        let client = DaemonClient::new(reqwest::Client::new(), "http://127.0.0.1:8990/", "tok");
        assert_eq!(
            client.stream_url("abc"),
            "http://127.0.0.1:8990/api/track/abc/song"
        );
        assert_eq!(client.auth_header(), "Authorization: Bearer tok");
    }
}
