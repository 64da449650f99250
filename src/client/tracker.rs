//! Tracker client
//!
//! HTTP name resolution for `repository:tag` keys and descriptor exchange by
//! content digest.

use std::time::Duration;

use anyhow::Result;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::digest::{Digest, InfoHash};
use crate::error::TorrentError;
use crate::torrent::{MetaInfo, TorrentParser};

/// What the tracker stores for one `repository:tag`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub digest: Digest,
    /// Transfer identity, absent when the poster had torrent disabled
    #[serde(default)]
    pub info_hash: Option<InfoHash>,
}

/// The lookup key the tracker indexes manifests by
pub fn manifest_key(repository: &str, tag: &str) -> String {
    format!("{}:{}", repository, tag)
}

/// HTTP client for the tracker
#[derive(Debug, Clone)]
pub struct TrackerClient {
    client: reqwest::Client,
    base_url: String,
}

impl TrackerClient {
    /// Create a tracker client for `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let parsed = url::Url::parse(base_url).map_err(|e| {
            TorrentError::config_error_with_field(format!("invalid tracker URL: {}", e), "tracker_url")
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TorrentError::from)?;
        Ok(Self {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn manifest_url(&self, repository: &str, tag: &str) -> String {
        format!(
            "{}/manifest/{}",
            self.base_url,
            urlencoding::encode(&manifest_key(repository, tag))
        )
    }

    fn info_url(&self, digest: &Digest) -> String {
        format!("{}/info/{}", self.base_url, digest.hex())
    }

    /// Resolve `repository:tag` to its record
    pub async fn get_manifest(&self, repository: &str, tag: &str) -> Result<ManifestRecord> {
        let url = self.manifest_url(repository, tag);
        debug!("Resolving {} via {}", manifest_key(repository, tag), url);

        let response = self.client.get(&url).send().await.map_err(TorrentError::from)?;
        let response = check_status(response, &url).await?;
        let body = response.bytes().await.map_err(TorrentError::from)?;
        let record: ManifestRecord = serde_json::from_slice(&body).map_err(|e| {
            error!("Tracker returned a malformed record for {}: {}", manifest_key(repository, tag), e);
            TorrentError::from(e)
        })?;

        debug!("{} resolved to {}", manifest_key(repository, tag), record.digest);
        Ok(record)
    }

    /// Announce `repository:tag` to the tracker.
    ///
    /// The tracker validates the reference itself and rejects unknown names.
    pub async fn post_manifest(&self, repository: &str, tag: &str, record: &ManifestRecord) -> Result<()> {
        let url = self.manifest_url(repository, tag);
        let response = self
            .client
            .post(&url)
            .json(record)
            .send()
            .await
            .map_err(TorrentError::from)?;
        check_status(response, &url).await?;

        info!("Announced {} -> {}", manifest_key(repository, tag), record.digest);
        Ok(())
    }

    /// Fetch the descriptor published for `digest`, `None` if there is none
    pub async fn get_info(&self, digest: &Digest) -> Result<Option<MetaInfo>> {
        let url = self.info_url(digest);
        let response = self.client.get(&url).send().await.map_err(TorrentError::from)?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Tracker has no descriptor for {}", digest);
            return Ok(None);
        }
        let response = check_status(response, &url).await?;
        let body = response.bytes().await.map_err(TorrentError::from)?;
        Ok(Some(TorrentParser::parse_bytes(&body)?))
    }

    /// Publish the descriptor of `digest`
    pub async fn post_info(&self, digest: &Digest, meta: &MetaInfo) -> Result<()> {
        let url = self.info_url(digest);
        let body = TorrentParser::to_bytes(meta)?;
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-bittorrent")
            .body(body)
            .send()
            .await
            .map_err(TorrentError::from)?;
        check_status(response, &url).await?;

        debug!("Published descriptor for {}", digest);
        Ok(())
    }
}

/// Turn a non-2xx response into an error carrying the body verbatim
async fn check_status(response: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
    let body = body.trim().to_string();
    if status == StatusCode::NOT_FOUND {
        debug!("Tracker returned 404 for {}: {}", url, body);
        return Err(TorrentError::not_found(body).into());
    }

    error!("Tracker request {} failed: {} - {}", url, status, body);
    Err(TorrentError::network_error_full(format!("tracker returned {}", status), url, body).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_helpers::{post_raw_manifest, spawn_tracker, TRACKER_FAILURE_BODY};

    fn record(byte: u8) -> ManifestRecord {
        ManifestRecord {
            digest: Digest::of_bytes(&[byte]),
            info_hash: Some(InfoHash([byte; 20])),
        }
    }

    #[test]
    fn test_manifest_url_escapes_key() {
        let tracker = TrackerClient::new("http://tracker:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(tracker.base_url(), "http://tracker:8080");
        assert_eq!(
            tracker.manifest_url("library/redis", "7.2"),
            "http://tracker:8080/manifest/library%2Fredis%3A7.2"
        );
    }

    #[test]
    fn test_rejects_bad_url() {
        assert!(TrackerClient::new("::nope", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_record_without_info_hash() {
        let digest = Digest::of_bytes(b"x");
        let json = format!(r#"{{"digest":"{}"}}"#, digest);
        let parsed: ManifestRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.digest, digest);
        assert!(parsed.info_hash.is_none());
    }

    #[tokio::test]
    async fn test_post_then_get_manifest() {
        let url = spawn_tracker().await;
        let tracker = TrackerClient::new(&url, Duration::from_secs(5)).unwrap();

        tracker.post_manifest("successrepo", "v1", &record(1)).await.unwrap();
        assert_eq!(tracker.get_manifest("successrepo", "v1").await.unwrap(), record(1));

        tracker.post_manifest("successrepo", "v1", &record(2)).await.unwrap();
        assert_eq!(tracker.get_manifest("successrepo", "v1").await.unwrap(), record(2));
    }

    #[tokio::test]
    async fn test_unknown_name_is_not_found_with_body() {
        let url = spawn_tracker().await;
        let tracker = TrackerClient::new(&url, Duration::from_secs(5)).unwrap();

        let err = tracker.get_manifest("successrepo", "missing").await.unwrap_err();
        assert!(err.downcast_ref::<TorrentError>().unwrap().is_not_found());
        assert!(err.to_string().contains("successrepo:missing not found"));

        let err = tracker.post_manifest("failedrepo", "tag", &record(1)).await.unwrap_err();
        assert!(err.to_string().contains("failedrepo:tag not found"));
    }

    #[tokio::test]
    async fn test_server_error_is_network_with_body() {
        let url = spawn_tracker().await;
        let tracker = TrackerClient::new(&url, Duration::from_secs(5)).unwrap();

        let err = tracker.get_manifest("brokenrepo", "tag").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TorrentError>(),
            Some(TorrentError::NetworkError { .. })
        ));
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains(TRACKER_FAILURE_BODY));
    }

    #[tokio::test]
    async fn test_malformed_digest_is_parse_error() {
        let url = spawn_tracker().await;
        let tracker = TrackerClient::new(&url, Duration::from_secs(5)).unwrap();
        post_raw_manifest(&url, "successrepo:tag", r#"{"digest":"../upload/secret"}"#).await;

        let err = tracker.get_manifest("successrepo", "tag").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TorrentError>(),
            Some(TorrentError::ParseError { .. })
        ));
    }

    #[tokio::test]
    async fn test_info_roundtrip_through_tracker() {
        let url = spawn_tracker().await;
        let tracker = TrackerClient::new(&url, Duration::from_secs(5)).unwrap();
        let digest = Digest::of_bytes(b"content");
        assert!(tracker.get_info(&digest).await.unwrap().is_none());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content");
        std::fs::write(&path, b"content").unwrap();
        let meta = TorrentParser::build_from_file(&path, digest.hex(), 4).await.unwrap();

        tracker.post_info(&digest, &meta).await.unwrap();
        assert_eq!(tracker.get_info(&digest).await.unwrap(), Some(meta));
    }
}
