//! Piece status module
//!
//! Durable per-download piece state. Each download `name` owns a flat
//! `<name>_status` file holding one byte per piece.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, error, trace};

use crate::error::TorrentError;

/// Suffix appended to a download name for its status record
pub const STATUS_SUFFIX: &str = "_status";

/// Status of a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PieceStatus {
    /// No local data
    Clean = 0,
    /// Being written, not verified
    Dirty = 1,
    /// Verified and complete
    Done = 2,
}

impl Default for PieceStatus {
    fn default() -> Self {
        PieceStatus::Clean
    }
}

impl PieceStatus {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(PieceStatus::Clean),
            1 => Ok(PieceStatus::Dirty),
            2 => Ok(PieceStatus::Done),
            other => Err(TorrentError::parse_error(format!("Unknown piece status byte {}", other)).into()),
        }
    }

    /// Decode a persisted record
    pub fn decode_all(bytes: &[u8]) -> Result<Vec<Self>> {
        bytes.iter().map(|b| Self::from_byte(*b)).collect()
    }

    /// Encode a record for persistence
    pub fn encode_all(statuses: &[Self]) -> Vec<u8> {
        statuses.iter().map(|s| s.as_byte()).collect()
    }
}

/// Durable piece status records for every download under one directory
#[derive(Debug)]
pub struct PieceStatusStore {
    dir: PathBuf,
    /// Serializes writers; readers share
    lock: RwLock<()>,
}

impl PieceStatusStore {
    /// Create a new piece status store rooted at `dir`
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            lock: RwLock::new(()),
        }
    }

    /// Path of the status record for a download
    pub fn status_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}{}", name, STATUS_SUFFIX))
    }

    /// Initialize an all-clean record.
    ///
    /// An existing record of the same length is kept as is, so a restarted
    /// process picks up where it left off. A record of a different length
    /// fails with `AlreadyExists`.
    pub async fn create(&self, name: &str, num_pieces: usize) -> Result<()> {
        let _guard = self.lock.write().await;
        let path = self.status_path(name);

        match fs::read(&path).await {
            Ok(existing) => {
                if existing.len() == num_pieces {
                    debug!("Reusing piece status for '{}' ({} pieces)", name, num_pieces);
                    return Ok(());
                }
                error!(
                    "Piece status for '{}' has {} entries, expected {}",
                    name,
                    existing.len(),
                    num_pieces
                );
                return Err(TorrentError::already_exists(
                    format!("piece status has {} entries, expected {}", existing.len(), num_pieces),
                    name,
                )
                .into());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(TorrentError::storage_error_full(
                    "Failed to read piece status",
                    path.display().to_string(),
                    e.to_string(),
                )
                .into());
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let record = PieceStatus::encode_all(&vec![PieceStatus::Clean; num_pieces]);
        write_synced(&path, 0, &record, true).await?;
        debug!("Created piece status for '{}' ({} pieces)", name, num_pieces);
        Ok(())
    }

    /// Overwrite `statuses.len()` entries starting at piece `offset`.
    ///
    /// The update is on disk before this returns.
    pub async fn write(&self, name: &str, offset: usize, statuses: &[PieceStatus]) -> Result<()> {
        let _guard = self.lock.write().await;
        let path = self.status_path(name);

        let len = match fs::metadata(&path).await {
            Ok(meta) => meta.len() as usize,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TorrentError::not_found(format!("no piece status for '{}'", name)).into());
            }
            Err(e) => return Err(e.into()),
        };
        if offset.checked_add(statuses.len()).filter(|end| *end <= len).is_none() {
            return Err(TorrentError::validation_error_with_field(
                format!("write of {} entries at {} exceeds {} pieces", statuses.len(), offset, len),
                "offset",
            )
            .into());
        }

        write_synced(&path, offset as u64, &PieceStatus::encode_all(statuses), false).await?;
        trace!("Wrote {} piece statuses for '{}' at {}", statuses.len(), name, offset);
        Ok(())
    }

    /// Set a single entry
    pub async fn set(&self, name: &str, index: usize, status: PieceStatus) -> Result<()> {
        self.write(name, index, &[status]).await
    }

    /// Full current record
    pub async fn read(&self, name: &str) -> Result<Vec<PieceStatus>> {
        let _guard = self.lock.read().await;
        self.read_unlocked(name).await
    }

    /// Number of `Done` entries
    pub async fn count_done(&self, name: &str) -> Result<usize> {
        let statuses = self.read(name).await?;
        Ok(statuses.iter().filter(|s| **s == PieceStatus::Done).count())
    }

    /// Whether a record exists for `name`
    pub async fn exists(&self, name: &str) -> bool {
        fs::metadata(self.status_path(name)).await.is_ok()
    }

    async fn read_unlocked(&self, name: &str) -> Result<Vec<PieceStatus>> {
        let path = self.status_path(name);
        match fs::read(&path).await {
            Ok(bytes) => PieceStatus::decode_all(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TorrentError::not_found(format!("no piece status for '{}'", name)).into())
            }
            Err(e) => Err(TorrentError::storage_error_full(
                "Failed to read piece status",
                path.display().to_string(),
                e.to_string(),
            )
            .into()),
        }
    }
}

/// Write `data` at `offset` and fsync before returning
async fn write_synced(path: &Path, offset: u64, data: &[u8], create: bool) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(create)
        .open(path)
        .await
        .map_err(|e| {
            error!("Failed to open '{}': {}", path.display(), e);
            TorrentError::storage_error_full("Failed to open piece status", path.display().to_string(), e.to_string())
        })?;
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await.map_err(|e| {
        error!("Failed to sync '{}': {}", path.display(), e);
        TorrentError::storage_error_full("Failed to sync piece status", path.display().to_string(), e.to_string())
    })?;
    Ok(())
}
