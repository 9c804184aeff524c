use std::time::Duration;
use thiserror::Error;

/// Failure to register a session with the download broker.
///
/// Cloneable so every caller waiting on the same connection attempt gets
/// its own copy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConnectionError {
    #[error("broker connection timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("failed to establish broker connection: {0}")]
    Handshake(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog has no {0}")]
    NotFound(String),
    #[error("malformed catalog data: {0}")]
    Malformed(String),
    #[error("catalog request failed: {0}")]
    Http(String),
    #[error("catalog authentication failed: {0}")]
    Auth(String),
}

impl From<reqwest::Error> for CatalogError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            CatalogError::Malformed(e.to_string())
        } else {
            CatalogError::Http(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker answered with an error body; `detail` is its message.
    #[error("{detail}")]
    Rejected { status: u16, detail: String },
    #[error("broker request failed: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for BrokerError {
    fn from(e: reqwest::Error) -> Self {
        BrokerError::Transport(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encoding error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Everything that can go wrong while making a track playable.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("track not found: {0}")]
    NotFound(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("metadata error: {0}")]
    Metadata(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CatalogError> for AcquireError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotFound(what) => AcquireError::NotFound(what),
            other => AcquireError::Metadata(other.to_string()),
        }
    }
}

impl From<BrokerError> for AcquireError {
    fn from(e: BrokerError) -> Self {
        AcquireError::Download(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Invalid(&'static str),
    #[error(transparent)]
    Acquire(#[from] AcquireError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
