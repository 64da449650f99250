//! File storage module
//!
//! Local-disk content store with `upload/`, `download/` and `cache/` areas.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, error, info, trace};

use crate::error::TorrentError;
use crate::storage::backend::ContentStore;
use crate::storage::piece::{PieceStatus, PieceStatusStore};

/// Local-disk content store
#[derive(Debug)]
pub struct FileStore {
    upload_dir: PathBuf,
    download_dir: PathBuf,
    cache_dir: PathBuf,
    /// Piece status records live next to the download files
    statuses: PieceStatusStore,
}

impl FileStore {
    /// Create a file store over explicit directories, creating them if needed
    pub async fn new(upload_dir: PathBuf, download_dir: PathBuf, cache_dir: PathBuf) -> Result<Self> {
        for dir in [&upload_dir, &download_dir, &cache_dir] {
            fs::create_dir_all(dir).await.map_err(|e| {
                error!("Failed to create directory '{}': {}", dir.display(), e);
                TorrentError::storage_error_full("Failed to create directory", dir.display().to_string(), e.to_string())
            })?;
        }
        info!(
            "File store ready (upload: {}, download: {}, cache: {})",
            upload_dir.display(),
            download_dir.display(),
            cache_dir.display()
        );

        let statuses = PieceStatusStore::new(download_dir.clone());
        Ok(Self {
            upload_dir,
            download_dir,
            cache_dir,
            statuses,
        })
    }

    /// Create a file store with the standard layout under `root`
    pub async fn with_root(root: &Path) -> Result<Self> {
        Self::new(root.join("upload"), root.join("download"), root.join("cache")).await
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    fn download_path(&self, name: &str) -> PathBuf {
        self.download_dir.join(name)
    }

    fn upload_path(&self, name: &str) -> PathBuf {
        self.upload_dir.join(name)
    }

    fn cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(name)
    }
}

#[async_trait]
impl ContentStore for FileStore {
    async fn create_download_file(&self, name: &str, length: u64) -> Result<()> {
        let path = self.download_path(name);
        if let Ok(meta) = fs::metadata(&path).await {
            if meta.len() == length {
                debug!("Reusing download file '{}' ({} bytes)", name, length);
                return Ok(());
            }
            error!("Download file '{}' has {} bytes, expected {}", name, meta.len(), length);
            return Err(TorrentError::invalid_state_with_name(
                format!("download file has {} bytes, expected {}", meta.len(), length),
                name,
            )
            .into());
        }

        debug!("Creating download file: {} ({} bytes)", path.display(), length);
        let mut f = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(&path)
            .await
            .map_err(|e| {
                error!("Failed to create file '{}': {}", path.display(), e);
                TorrentError::storage_error_full("Failed to create file", path.display().to_string(), e.to_string())
            })?;
        f.set_len(length).await.map_err(|e| {
            error!("Failed to set file length for '{}': {}", path.display(), e);
            TorrentError::storage_error_full("Failed to set file length", path.display().to_string(), e.to_string())
        })?;
        f.flush().await?;
        Ok(())
    }

    async fn download_file_exists(&self, name: &str) -> bool {
        fs::metadata(self.download_path(name)).await.is_ok()
    }

    async fn write_download_file(&self, name: &str, offset: u64, data: &[u8]) -> Result<()> {
        let path = self.download_path(name);
        trace!("Writing {} bytes to '{}' at offset {}", data.len(), name, offset);
        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(|e| {
                error!("Failed to open file '{}': {}", path.display(), e);
                TorrentError::not_exist_with_path("download file missing", path.display().to_string())
            })?;
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(|e| {
            error!("Failed to seek in file '{}': {}", path.display(), e);
            TorrentError::storage_error_full("Failed to seek in file", path.display().to_string(), e.to_string())
        })?;
        file.write_all(data).await.map_err(|e| {
            error!("Failed to write to file '{}': {}", path.display(), e);
            TorrentError::storage_error_full("Failed to write to file", path.display().to_string(), e.to_string())
        })?;
        file.sync_data().await?;
        Ok(())
    }

    async fn read_download_file(&self, name: &str, offset: u64, length: usize) -> Result<Bytes> {
        read_range(&self.download_path(name), offset, length).await
    }

    async fn move_download_file_to_cache(&self, name: &str, cache_name: &str) -> Result<()> {
        let from = self.download_path(name);
        let to = self.cache_path(cache_name);
        move_file(&from, &to).await?;
        info!("Moved download '{}' into cache as '{}'", name, cache_name);
        Ok(())
    }

    async fn create_piece_status(&self, name: &str, num_pieces: usize) -> Result<()> {
        self.statuses.create(name, num_pieces).await
    }

    async fn write_piece_status(&self, name: &str, offset: usize, statuses: &[PieceStatus]) -> Result<()> {
        self.statuses.write(name, offset, statuses).await
    }

    async fn read_piece_status(&self, name: &str) -> Result<Vec<PieceStatus>> {
        self.statuses.read(name).await
    }

    async fn count_done_pieces(&self, name: &str) -> Result<usize> {
        self.statuses.count_done(name).await
    }

    async fn create_upload_file(&self, name: &str) -> Result<()> {
        let path = self.upload_path(name);
        fs::File::create(&path).await.map_err(|e| {
            error!("Failed to create upload file '{}': {}", path.display(), e);
            TorrentError::storage_error_full("Failed to create upload file", path.display().to_string(), e.to_string())
        })?;
        debug!("Created upload file: {}", path.display());
        Ok(())
    }

    async fn append_upload_file(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.upload_path(name);
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|_| TorrentError::not_exist_with_path("upload file missing", path.display().to_string()))?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn upload_file_exists(&self, name: &str) -> bool {
        fs::metadata(self.upload_path(name)).await.is_ok()
    }

    async fn read_upload_file(&self, name: &str) -> Result<Bytes> {
        read_whole(&self.upload_path(name)).await
    }

    async fn delete_upload_file(&self, name: &str) -> Result<()> {
        let path = self.upload_path(name);
        fs::remove_file(&path).await.map_err(TorrentError::from)?;
        Ok(())
    }

    async fn move_upload_file_to_cache(&self, name: &str, cache_name: &str) -> Result<()> {
        let from = self.upload_path(name);
        let to = self.cache_path(cache_name);
        move_file(&from, &to).await?;
        debug!("Moved upload '{}' into cache as '{}'", name, cache_name);
        Ok(())
    }

    async fn cache_file_exists(&self, name: &str) -> bool {
        fs::metadata(self.cache_path(name)).await.is_ok()
    }

    async fn read_cache_file(&self, name: &str) -> Result<Bytes> {
        read_whole(&self.cache_path(name)).await
    }

    async fn read_cache_file_range(&self, name: &str, offset: u64, length: usize) -> Result<Bytes> {
        read_range(&self.cache_path(name), offset, length).await
    }

    fn cache_file_path(&self, name: &str) -> PathBuf {
        self.cache_path(name)
    }
}

async fn read_whole(path: &Path) -> Result<Bytes> {
    match fs::read(path).await {
        Ok(data) => Ok(Bytes::from(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(TorrentError::not_exist_with_path("file does not exist", path.display().to_string()).into())
        }
        Err(e) => {
            Err(TorrentError::storage_error_full("Failed to read file", path.display().to_string(), e.to_string())
                .into())
        }
    }
}

async fn read_range(path: &Path, offset: u64, length: usize) -> Result<Bytes> {
    let mut file = match fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TorrentError::not_exist_with_path("file does not exist", path.display().to_string()).into());
        }
        Err(e) => {
            error!("Failed to open file '{}': {}", path.display(), e);
            return Err(TorrentError::storage_error_full(
                "Failed to open file for reading",
                path.display().to_string(),
                e.to_string(),
            )
            .into());
        }
    };
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    let mut chunk = vec![0u8; length];
    file.read_exact(&mut chunk).await.map_err(|e| {
        error!("Failed to read from file '{}': {}", path.display(), e);
        TorrentError::storage_error_full("Failed to read from file", path.display().to_string(), e.to_string())
    })?;
    Ok(Bytes::from(chunk))
}

/// Rename `from` onto `to`; the cache is never overwritten in place
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::metadata(from).await.is_err() {
        return Err(TorrentError::not_exist_with_path("file does not exist", from.display().to_string()).into());
    }
    if fs::metadata(to).await.is_ok() {
        return Err(TorrentError::already_exists("cache entry already present", to.display().to_string()).into());
    }
    fs::rename(from, to).await.map_err(|e| {
        error!("Failed to move '{}' to '{}': {}", from.display(), to.display(), e);
        TorrentError::storage_error_full("Failed to move file", from.display().to_string(), e.to_string())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::with_root(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_layout_created() {
        let (dir, store) = store().await;
        assert!(dir.path().join("upload").is_dir());
        assert!(dir.path().join("download").is_dir());
        assert!(dir.path().join("cache").is_dir());
        assert_eq!(store.download_dir(), dir.path().join("download"));
    }

    #[tokio::test]
    async fn test_download_file_write_read() {
        let (_dir, store) = store().await;
        store.create_download_file("blob", 8).await.unwrap();
        store.write_download_file("blob", 4, b"wxyz").await.unwrap();

        let data = store.read_download_file("blob", 0, 8).await.unwrap();
        assert_eq!(&data[..], b"\0\0\0\0wxyz");
    }

    #[tokio::test]
    async fn test_download_file_reuse_and_mismatch() {
        let (_dir, store) = store().await;
        store.create_download_file("blob", 8).await.unwrap();
        store.write_download_file("blob", 0, b"keep").await.unwrap();
        store.create_download_file("blob", 8).await.unwrap();
        assert_eq!(&store.read_download_file("blob", 0, 4).await.unwrap()[..], b"keep");

        let err = store.create_download_file("blob", 9).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TorrentError>(),
            Some(TorrentError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_upload_then_move_to_cache() {
        let (_dir, store) = store().await;
        store.create_upload_file("m.tmp").await.unwrap();
        store.append_upload_file("m.tmp", b"this is ").await.unwrap();
        store.append_upload_file("m.tmp", b"a manifest").await.unwrap();
        assert!(store.upload_file_exists("m.tmp").await);

        store.move_upload_file_to_cache("m.tmp", "m").await.unwrap();
        assert!(!store.upload_file_exists("m.tmp").await);
        assert!(store.cache_file_exists("m").await);
        assert_eq!(&store.read_cache_file("m").await.unwrap()[..], b"this is a manifest");
        assert_eq!(&store.read_cache_file_range("m", 10, 8).await.unwrap()[..], b"manifest");
    }

    #[tokio::test]
    async fn test_cache_is_not_overwritten() {
        let (_dir, store) = store().await;
        store.create_upload_file("a").await.unwrap();
        store.move_upload_file_to_cache("a", "x").await.unwrap();
        store.create_upload_file("b").await.unwrap();
        assert!(store.move_upload_file_to_cache("b", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_cache_file_is_not_exist() {
        let (_dir, store) = store().await;
        let err = store.read_cache_file("nope").await.unwrap_err();
        assert!(err.downcast_ref::<TorrentError>().unwrap().is_not_exist());
        let err = store.move_upload_file_to_cache("nope", "x").await.unwrap_err();
        assert!(err.downcast_ref::<TorrentError>().unwrap().is_not_exist());
    }

    #[tokio::test]
    async fn test_piece_status_via_store() {
        let (dir, store) = store().await;
        store.create_piece_status("blob", 2).await.unwrap();
        store.write_piece_status("blob", 1, &[PieceStatus::Done]).await.unwrap();
        assert_eq!(store.count_done_pieces("blob").await.unwrap(), 1);
        assert!(dir.path().join("download").join("blob_status").exists());
    }
}
