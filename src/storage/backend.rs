//! Content store abstraction
//!
//! The narrow contract the torrent client and the manifest distributor need
//! from local storage: per-download areas with piece status side records,
//! an upload staging area, and a content-addressable cache.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;

use crate::storage::piece::PieceStatus;
use anyhow::Result;

/// Local content storage
///
/// Missing content is reported as `TorrentError::NotExist`.
#[async_trait]
pub trait ContentStore: Send + Sync {
    // ==================== Download Area ====================

    /// Allocate a download file of `length` bytes.
    ///
    /// An existing file of the same length is kept; a different length fails
    /// with `InvalidState`.
    async fn create_download_file(&self, name: &str, length: u64) -> Result<()>;

    /// Whether a download file exists
    async fn download_file_exists(&self, name: &str) -> bool;

    /// Write bytes at `offset` of a download file
    async fn write_download_file(&self, name: &str, offset: u64, data: &[u8]) -> Result<()>;

    /// Read `length` bytes at `offset` of a download file
    async fn read_download_file(&self, name: &str, offset: u64, length: usize) -> Result<Bytes>;

    /// Move a finished download into the cache under `cache_name`
    async fn move_download_file_to_cache(&self, name: &str, cache_name: &str) -> Result<()>;

    // ==================== Piece Status ====================

    /// Create (or reuse) the piece status side record of a download
    async fn create_piece_status(&self, name: &str, num_pieces: usize) -> Result<()>;

    /// Overwrite piece statuses starting at `offset`
    async fn write_piece_status(&self, name: &str, offset: usize, statuses: &[PieceStatus]) -> Result<()>;

    /// Read the full piece status record
    async fn read_piece_status(&self, name: &str) -> Result<Vec<PieceStatus>>;

    /// Number of verified pieces
    async fn count_done_pieces(&self, name: &str) -> Result<usize>;

    // ==================== Upload Staging ====================

    /// Create an empty staged file
    async fn create_upload_file(&self, name: &str) -> Result<()>;

    /// Append bytes to a staged file
    async fn append_upload_file(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Whether a staged file exists
    async fn upload_file_exists(&self, name: &str) -> bool;

    /// Full contents of a staged file
    async fn read_upload_file(&self, name: &str) -> Result<Bytes>;

    /// Remove a staged file
    async fn delete_upload_file(&self, name: &str) -> Result<()>;

    /// Atomically move a staged file into the cache under `cache_name`
    async fn move_upload_file_to_cache(&self, name: &str, cache_name: &str) -> Result<()>;

    // ==================== Cache ====================

    /// Whether a cached file exists
    async fn cache_file_exists(&self, name: &str) -> bool;

    /// Full contents of a cached file
    async fn read_cache_file(&self, name: &str) -> Result<Bytes>;

    /// Read `length` bytes at `offset` of a cached file
    async fn read_cache_file_range(&self, name: &str, offset: u64, length: usize) -> Result<Bytes>;

    /// On-disk path of a cached file
    fn cache_file_path(&self, name: &str) -> PathBuf;
}
