//! Client configuration module
//!
//! Configuration shared by the torrent client and the manifest distributor.

use crate::cli::args::CliArgs;
use crate::error::TorrentError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default piece size for descriptors built by this client
pub const DEFAULT_PIECE_LENGTH: u64 = 4 * 1024 * 1024;

/// Configuration for the blob distribution client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tracker base URL
    pub tracker_url: String,
    /// Root of the `upload/`, `cache/` and `torrents/` areas
    pub data_dir: PathBuf,
    /// Download directory (defaults to `<data_dir>/download`)
    pub download_dir: Option<PathBuf>,
    /// Piece size used when building descriptors
    pub piece_length: u64,
    /// How long to wait for a single piece from the swarm, in seconds
    pub piece_timeout_secs: u64,
    /// How long to wait for a descriptor to resolve, in seconds
    pub resolve_timeout_secs: u64,
    /// Disable swarm-backed manifest retrieval
    pub disable_torrent: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tracker_url: "http://127.0.0.1:8080".to_string(),
            data_dir: PathBuf::from("./blobtorrent"),
            download_dir: None,
            piece_length: DEFAULT_PIECE_LENGTH,
            piece_timeout_secs: 30,
            resolve_timeout_secs: 30,
            disable_torrent: false,
        }
    }
}

impl Config {
    /// Create a configuration rooted at `data_dir`
    pub fn new(tracker_url: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            tracker_url: tracker_url.into(),
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {}", path.display());
        let data = std::fs::read(path).map_err(|e| {
            TorrentError::storage_error_full("Failed to read config file", path.display().to_string(), e.to_string())
        })?;
        let config: Config = serde_json::from_slice(&data).map_err(TorrentError::from)?;
        Ok(config)
    }

    /// Create configuration from CLI arguments, on top of an optional config file
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(dir) = &args.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(url) = &args.tracker {
            config.tracker_url = url.clone();
        }
        if args.disable_torrent {
            config.disable_torrent = true;
        }
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.tracker_url).map_err(|e| {
            TorrentError::config_error_with_field(format!("invalid tracker URL: {}", e), "tracker_url")
        })?;

        if self.data_dir.as_os_str().is_empty() {
            return Err(TorrentError::config_error_with_field("data_dir cannot be empty", "data_dir").into());
        }

        if self.piece_length == 0 {
            return Err(TorrentError::config_error_with_field("piece_length must be positive", "piece_length").into());
        }

        if self.piece_timeout_secs == 0 {
            return Err(TorrentError::config_error_with_field(
                "piece_timeout_secs must be positive",
                "piece_timeout_secs",
            )
            .into());
        }

        if self.resolve_timeout_secs == 0 {
            return Err(TorrentError::config_error_with_field(
                "resolve_timeout_secs must be positive",
                "resolve_timeout_secs",
            )
            .into());
        }

        Ok(())
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.data_dir.join("upload")
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("download"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    /// Where descriptors are archived for restart
    pub fn torrent_dir(&self) -> PathBuf {
        self.data_dir.join("torrents")
    }

    pub fn piece_timeout(&self) -> Duration {
        Duration::from_secs(self.piece_timeout_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }
}
