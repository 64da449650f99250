//! Descriptor archive
//!
//! Persists descriptors keyed by info hash so a restarted client can
//! reconstruct its transfers.

use std::path::PathBuf;

use anyhow::Result;
use tokio::fs;
use tracing::{debug, warn};

use crate::digest::InfoHash;
use crate::torrent::{MetaInfo, TorrentParser};

/// On-disk archive of descriptors
#[derive(Debug, Clone)]
pub struct TorrentArchive {
    dir: PathBuf,
}

impl TorrentArchive {
    /// Create a new archive rooted at `dir`
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Get the descriptor path for a transfer
    fn descriptor_path(&self, info_hash: &InfoHash) -> PathBuf {
        self.dir.join(format!("{}.torrent", info_hash.to_hex()))
    }

    /// Save a descriptor
    pub async fn save(&self, meta: &MetaInfo) -> Result<InfoHash> {
        let info_hash = meta.info_hash()?;
        let path = self.descriptor_path(&info_hash);
        fs::create_dir_all(&self.dir).await?;

        // Write then rename so a crash never leaves a truncated descriptor.
        let tmp = path.with_extension("torrent.tmp");
        fs::write(&tmp, TorrentParser::to_bytes(meta)?).await?;
        fs::rename(&tmp, &path).await?;
        debug!("Archived descriptor {} ({})", info_hash, meta.name());
        Ok(info_hash)
    }

    /// Load a descriptor, `None` if it was never archived
    pub async fn load(&self, info_hash: &InfoHash) -> Result<Option<MetaInfo>> {
        let path = self.descriptor_path(info_hash);
        if fs::metadata(&path).await.is_err() {
            return Ok(None);
        }
        let meta = TorrentParser::parse_file(&path).await?;
        let actual = meta.info_hash()?;
        if actual != *info_hash {
            warn!("Archived descriptor {} hashes to {}, ignoring", info_hash, actual);
            return Ok(None);
        }
        Ok(Some(meta))
    }

    /// All archived identities, in hex order
    pub async fn list(&self) -> Result<Vec<InfoHash>> {
        let mut hashes = Vec::new();

        if fs::metadata(&self.dir).await.is_err() {
            return Ok(hashes);
        }

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "torrent") {
                let stem = path.file_stem().and_then(|s| s.to_str());
                if let Some(hash) = stem.and_then(|s| InfoHash::from_hex(s).ok()) {
                    hashes.push(hash);
                }
            }
        }

        hashes.sort();
        Ok(hashes)
    }
}
