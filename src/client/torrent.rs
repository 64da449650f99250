//! Torrent client
//!
//! Owns the registry of active transfers, bridges persisted piece state and
//! the swarm engine, and reconstructs transfers after a restart.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, trace, warn};

use crate::cli::Config;
use crate::digest::{piece_hash, InfoHash};
use crate::error::TorrentError;
use crate::storage::{ContentStore, PieceStatus, TorrentArchive};
use crate::swarm::SwarmEngine;
use crate::torrent::{Geometry, MetaInfo};

/// One registered transfer
#[derive(Debug)]
pub struct Transfer {
    info_hash: InfoHash,
    meta: MetaInfo,
    geometry: Geometry,
    /// Serializes piece downloads for this transfer
    download_lock: Mutex<()>,
}

impl Transfer {
    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// Download name, shared with the piece status record
    pub fn name(&self) -> &str {
        self.meta.name()
    }

    pub fn meta(&self) -> &MetaInfo {
        &self.meta
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn num_pieces(&self) -> usize {
        self.geometry.num_pieces
    }

    pub fn total_length(&self) -> u64 {
        self.geometry.total_length
    }
}

/// Client managing every transfer of this process
pub struct TorrentClient {
    store: Arc<dyn ContentStore>,
    swarm: Arc<dyn SwarmEngine>,
    archive: TorrentArchive,
    /// Active transfers by identity
    torrents: Mutex<HashMap<InfoHash, Arc<Transfer>>>,
    piece_timeout: Duration,
    resolve_timeout: Duration,
    /// Flipped once by `close`
    closed: watch::Sender<bool>,
}

impl TorrentClient {
    /// Create a new client over `store` and `swarm`
    pub fn new(config: &Config, store: Arc<dyn ContentStore>, swarm: Arc<dyn SwarmEngine>) -> Result<Self> {
        config.validate()?;
        info!("Starting torrent client (descriptors: {})", config.torrent_dir().display());

        let (closed, _) = watch::channel(false);
        Ok(Self {
            store,
            swarm,
            archive: TorrentArchive::new(config.torrent_dir()),
            torrents: Mutex::new(HashMap::new()),
            piece_timeout: config.piece_timeout(),
            resolve_timeout: config.resolve_timeout(),
            closed,
        })
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(TorrentError::Closed.into());
        }
        Ok(())
    }

    /// Register a transfer from a full descriptor.
    ///
    /// Returns the existing transfer with `false` if the identity is already
    /// active.
    pub async fn add_torrent(&self, meta: MetaInfo) -> Result<(Arc<Transfer>, bool)> {
        self.ensure_open()?;
        let info_hash = meta.info_hash()?;

        let mut torrents = self.torrents.lock().await;
        self.ensure_open()?;
        if let Some(existing) = torrents.get(&info_hash) {
            trace!("Transfer {} already active", info_hash);
            return Ok((Arc::clone(existing), false));
        }

        let transfer = self.load_transfer(info_hash, meta).await?;
        torrents.insert(info_hash, Arc::clone(&transfer));
        info!(
            "Added transfer {} ({}, {} pieces, {} active)",
            info_hash,
            transfer.name(),
            transfer.num_pieces(),
            torrents.len()
        );
        Ok((transfer, true))
    }

    /// Register a transfer knowing only its identity.
    ///
    /// The descriptor comes from the archive if this node saw it before,
    /// otherwise from the swarm within the resolve timeout.
    pub async fn add_torrent_info_hash(&self, info_hash: InfoHash) -> Result<(Arc<Transfer>, bool)> {
        self.ensure_open()?;
        if let Some(existing) = self.torrents.lock().await.get(&info_hash) {
            return Ok((Arc::clone(existing), false));
        }

        if let Some(meta) = self.archive.load(&info_hash).await? {
            debug!("Found archived descriptor for {}", info_hash);
            return self.add_torrent(meta).await;
        }

        debug!("Resolving descriptor for {} from the swarm", info_hash);
        let meta = self
            .bounded(self.resolve_timeout, format!("descriptor {}", info_hash), self.swarm.resolve(&info_hash))
            .await?;
        let resolved = meta.info_hash()?;
        if resolved != info_hash {
            error!("Swarm returned descriptor {} for {}", resolved, info_hash);
            return Err(TorrentError::validation_error(format!(
                "resolved descriptor hashes to {}, expected {}",
                resolved, info_hash
            ))
            .into());
        }
        self.add_torrent(meta).await
    }

    /// Look up an active transfer, reconstructing it from disk if needed
    pub async fn torrent(&self, info_hash: &InfoHash) -> Result<Option<Arc<Transfer>>> {
        self.ensure_open()?;
        if let Some(existing) = self.torrents.lock().await.get(info_hash) {
            return Ok(Some(Arc::clone(existing)));
        }

        match self.archive.load(info_hash).await? {
            Some(meta) => {
                info!("Reconstructing transfer {} from disk", info_hash);
                let (transfer, _) = self.add_torrent(meta).await?;
                Ok(Some(transfer))
            }
            None => Ok(None),
        }
    }

    /// Identities of every transfer this node has archived, active or not
    pub async fn archived_torrents(&self) -> Result<Vec<InfoHash>> {
        self.ensure_open()?;
        self.archive.list().await
    }

    /// Identities of all active transfers
    pub async fn active_torrents(&self) -> Vec<InfoHash> {
        self.torrents.lock().await.keys().copied().collect()
    }

    /// Drop a transfer from the registry; on-disk state is kept
    pub async fn remove_torrent(&self, info_hash: &InfoHash) -> Result<bool> {
        let removed = self.torrents.lock().await.remove(info_hash).is_some();
        if removed {
            self.swarm.release(info_hash).await?;
            info!("Removed transfer {}", info_hash);
        }
        Ok(removed)
    }

    /// Number of verified pieces
    pub async fn num_completed_pieces(&self, transfer: &Transfer) -> Result<usize> {
        self.store.count_done_pieces(transfer.name()).await
    }

    /// Whether every piece is verified, along with the piece count
    pub async fn is_completed(&self, transfer: &Transfer) -> Result<(bool, usize)> {
        let total = transfer.num_pieces();
        if total == 0 {
            return Err(TorrentError::invalid_state_with_name("transfer has no pieces", transfer.name()).into());
        }
        let done = self.num_completed_pieces(transfer).await?;
        Ok((done == total, total))
    }

    /// Fetch every missing piece from the swarm, verifying each against the
    /// descriptor before it is marked done.
    pub async fn download(&self, transfer: &Transfer) -> Result<()> {
        self.ensure_open()?;
        let _guard = transfer.download_lock.lock().await;
        let name = transfer.name();
        let statuses = self.store.read_piece_status(name).await?;
        let missing = statuses.iter().filter(|s| **s != PieceStatus::Done).count();
        if missing == 0 {
            trace!("Transfer {} already complete", transfer.info_hash());
            return Ok(());
        }
        info!("Downloading {} of {} pieces for {}", missing, statuses.len(), name);

        for (index, status) in statuses.iter().enumerate() {
            if *status == PieceStatus::Done {
                continue;
            }
            if *status == PieceStatus::Clean {
                self.store.write_piece_status(name, index, &[PieceStatus::Dirty]).await?;
            }

            let data = self
                .bounded(
                    self.piece_timeout,
                    format!("piece {} of {}", index, transfer.info_hash()),
                    self.swarm.fetch_piece(&transfer.info_hash(), index),
                )
                .await?;

            let expected = transfer.meta().info.piece_hash(index).ok_or_else(|| {
                TorrentError::validation_error_with_field(format!("no hash for piece {}", index), "pieces")
            })?;
            let (start, end) = transfer.geometry().piece_range(index).ok_or_else(|| {
                TorrentError::validation_error_with_field(format!("piece {} out of range", index), "index")
            })?;
            if data.len() as u64 != end - start || piece_hash(&data) != expected {
                warn!("Piece {} of {} failed verification", index, name);
                let message = format!("piece {} of '{}' failed verification", index, name);
                return Err(TorrentError::validation_error(message).into());
            }

            self.store.write_download_file(name, start, &data).await?;
            self.store.write_piece_status(name, index, &[PieceStatus::Done]).await?;
            debug!("Piece {} of {} verified", index, name);
        }

        info!("Transfer {} complete", transfer.info_hash());
        Ok(())
    }

    /// Serve a complete, cached transfer to the swarm
    pub async fn seed(&self, transfer: &Transfer) -> Result<()> {
        self.ensure_open()?;
        let (complete, total) = self.is_completed(transfer).await?;
        if !complete {
            return Err(TorrentError::invalid_state_with_name(
                format!("cannot seed incomplete transfer ({} pieces)", total),
                transfer.name(),
            )
            .into());
        }
        self.swarm.announce(transfer.meta(), Arc::clone(&self.store)).await
    }

    /// Release every transfer and refuse further use. Persisted state stays.
    pub async fn close(&self) -> Result<()> {
        if self.closed.send_replace(true) {
            return Ok(());
        }
        let drained: Vec<InfoHash> = self.torrents.lock().await.drain().map(|(k, _)| k).collect();
        for info_hash in &drained {
            if let Err(e) = self.swarm.release(info_hash).await {
                warn!("Failed to release {}: {}", info_hash, e);
            }
        }
        info!("Torrent client closed ({} transfers released)", drained.len());
        Ok(())
    }

    /// Allocate or reuse the download area and piece status for a descriptor
    async fn load_transfer(&self, info_hash: InfoHash, meta: MetaInfo) -> Result<Arc<Transfer>> {
        let geometry = meta.info.geometry()?;
        let name = meta.name().to_string();

        self.store
            .create_piece_status(&name, geometry.num_pieces)
            .await
            .map_err(|e| match e.downcast_ref::<TorrentError>() {
                Some(TorrentError::AlreadyExists { message, .. }) => {
                    error!("Piece status for '{}' conflicts with {}: {}", name, info_hash, message);
                    anyhow::Error::from(TorrentError::invalid_state_with_name(message.clone(), name.clone()))
                }
                _ => e,
            })?;

        if self.store.cache_file_exists(&name).await {
            // Cached content is immutable and was verified when it entered the cache.
            let done = self.store.count_done_pieces(&name).await?;
            if done != geometry.num_pieces {
                self.store
                    .write_piece_status(&name, 0, &vec![PieceStatus::Done; geometry.num_pieces])
                    .await?;
            }
        } else {
            self.store.create_download_file(&name, geometry.total_length).await?;
        }

        self.archive.save(&meta).await?;

        Ok(Arc::new(Transfer {
            info_hash,
            meta,
            geometry,
            download_lock: Mutex::new(()),
        }))
    }

    /// Await `fut` for at most `limit`, failing early if the client closes
    async fn bounded<T, F>(&self, limit: Duration, what: String, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let mut closed = self.closed.subscribe();
        tokio::select! {
            res = tokio::time::timeout(limit, fut) => match res {
                Ok(inner) => inner,
                Err(_) => {
                    warn!("Timed out after {:?} waiting for {}", limit, what);
                    Err(TorrentError::not_found(format!("timed out after {:?} waiting for {}", limit, what)).into())
                }
            },
            _ = closed.wait_for(|c| *c) => Err(TorrentError::Closed.into()),
        }
    }
}
