//! HTTP side of the download broker.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use deck_proto::config::BrokerConfig;

use crate::error::BrokerError;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Ask the broker to download `catalog_url`; returns the artifact path.
    async fn request_download(
        &self,
        catalog_url: &str,
        session_id: &str,
    ) -> Result<String, BrokerError>;

    /// Fetch the bytes of a previously downloaded artifact.
    async fn fetch_file(&self, path: &str, session_id: &str) -> Result<Bytes, BrokerError>;
}

#[derive(Debug, Serialize)]
struct DownloadRequest<'a> {
    url: &'a str,
    client_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

/// Pull the broker's `detail` out of an error body, falling back to `fallback`.
fn error_detail(body: &str, fallback: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: Some(serde_json::Value::String(s)),
        }) if !s.is_empty() => s,
        Ok(ErrorBody {
            detail: Some(other),
        }) if !other.is_null() => other.to_string(),
        _ => fallback.to_string(),
    }
}

pub struct HttpBroker {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBroker {
    pub fn new(client: reqwest::Client, config: &BrokerConfig) -> Self {
        Self {
            client,
            endpoint: config.http_endpoint(),
        }
    }

    async fn rejected(resp: reqwest::Response, fallback: &str) -> BrokerError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let detail = error_detail(&body, fallback);
        error!(status, %detail, "{}", fallback);
        BrokerError::Rejected { status, detail }
    }
}

#[async_trait]
impl Broker for HttpBroker {
    async fn request_download(
        &self,
        catalog_url: &str,
        session_id: &str,
    ) -> Result<String, BrokerError> {
        let url = format!("{}/download/url", self.endpoint);
        debug!(%catalog_url, "Requesting download");
        let resp = self
            .client
            .post(&url)
            .query(&[("url", catalog_url), ("client_id", session_id)])
            .json(&DownloadRequest {
                url: catalog_url,
                client_id: session_id,
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::rejected(resp, "Failed to fetch download URL").await);
        }
        Ok(resp.json::<String>().await?)
    }

    async fn fetch_file(&self, path: &str, session_id: &str) -> Result<Bytes, BrokerError> {
        let url = format!("{}/download/file", self.endpoint);
        let resp = self
            .client
            .get(&url)
            .query(&[("file", path), ("client_id", session_id)])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::rejected(resp, "File download failed").await);
        }
        Ok(resp.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_detail_prefers_broker_message() {
        assert_eq!(
            error_detail(r#"{"detail":"Track unavailable in region"}"#, "fallback"),
            "Track unavailable in region"
        );
    }

    #[test]
    fn test_error_detail_falls_back() {
        assert_eq!(error_detail("<html>502</html>", "File download failed"), "File download failed");
        assert_eq!(error_detail(r#"{"detail":""}"#, "x"), "x");
        assert_eq!(error_detail(r#"{}"#, "x"), "x");
    }

    #[test]
    fn test_structured_detail_is_stringified() {
        let detail = error_detail(r#"{"detail":[{"msg":"field required"}]}"#, "x");
        assert!(detail.contains("field required"));
    }

    #[test]
    fn test_download_body_shape() {
        let body = serde_json::to_value(DownloadRequest {
            url: "https://open.spotify.com/track/abc",
            client_id: "s1",
        })
        .unwrap();
        assert_eq!(body["url"], "https://open.spotify.com/track/abc");
        assert_eq!(body["client_id"], "s1");
    }
}
