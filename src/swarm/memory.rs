//! In-process swarm
//!
//! Every node created from one `SwarmNetwork` sees the content announced by
//! the others. Pieces are read straight from the seeding node's cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, trace};

use crate::digest::InfoHash;
use crate::error::TorrentError;
use crate::storage::ContentStore;
use crate::swarm::engine::SwarmEngine;
use crate::torrent::MetaInfo;

/// A node serving one transfer
struct Seed {
    meta: MetaInfo,
    store: Arc<dyn ContentStore>,
}

/// Shared state of all in-process nodes
#[derive(Default)]
pub struct SwarmNetwork {
    /// info hash -> node id -> seed
    seeds: RwLock<HashMap<InfoHash, HashMap<u64, Seed>>>,
    /// Woken on every announce
    announced: Notify,
    next_node: AtomicU64,
}

impl SwarmNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a node attached to this network
    pub fn join(self: &Arc<Self>) -> MemorySwarm {
        let node_id = self.next_node.fetch_add(1, Ordering::Relaxed);
        debug!("Node {} joined in-process swarm", node_id);
        MemorySwarm {
            node_id,
            network: Arc::clone(self),
        }
    }

    /// Number of nodes seeding an identity
    pub async fn seeder_count(&self, info_hash: &InfoHash) -> usize {
        self.seeds.read().await.get(info_hash).map_or(0, |s| s.len())
    }
}

/// One node's view of a `SwarmNetwork`
#[derive(Clone)]
pub struct MemorySwarm {
    node_id: u64,
    network: Arc<SwarmNetwork>,
}

impl MemorySwarm {
    /// A node on a fresh private network
    pub fn standalone() -> Self {
        SwarmNetwork::new().join()
    }

    async fn try_fetch(&self, info_hash: &InfoHash, index: usize) -> Option<Bytes> {
        let seeds = self.network.seeds.read().await;
        let nodes = seeds.get(info_hash)?;
        for (node, seed) in nodes {
            let geometry = match seed.meta.info.geometry() {
                Ok(g) => g,
                Err(_) => continue,
            };
            let (start, end) = geometry.piece_range(index)?;
            match seed
                .store
                .read_cache_file_range(seed.meta.name(), start, (end - start) as usize)
                .await
            {
                Ok(data) => {
                    trace!("Piece {} of {} served by node {}", index, info_hash, node);
                    return Some(data);
                }
                Err(e) => debug!("Node {} could not serve piece {} of {}: {}", node, index, info_hash, e),
            }
        }
        None
    }
}

#[async_trait]
impl SwarmEngine for MemorySwarm {
    async fn resolve(&self, info_hash: &InfoHash) -> Result<MetaInfo> {
        loop {
            let notified = self.network.announced.notified();
            if let Some(meta) = self
                .network
                .seeds
                .read()
                .await
                .get(info_hash)
                .and_then(|nodes| nodes.values().next())
                .map(|seed| seed.meta.clone())
            {
                debug!("Resolved descriptor for {}", info_hash);
                return Ok(meta);
            }
            trace!("No seeder for {} yet, waiting", info_hash);
            notified.await;
        }
    }

    async fn fetch_piece(&self, info_hash: &InfoHash, index: usize) -> Result<Bytes> {
        loop {
            let notified = self.network.announced.notified();
            if let Some(data) = self.try_fetch(info_hash, index).await {
                return Ok(data);
            }
            notified.await;
        }
    }

    async fn announce(&self, meta: &MetaInfo, store: Arc<dyn ContentStore>) -> Result<()> {
        let info_hash = meta.info_hash()?;
        if !store.cache_file_exists(meta.name()).await {
            return Err(TorrentError::not_exist(format!("'{}' is not cached, cannot seed", meta.name())).into());
        }
        self.network
            .seeds
            .write()
            .await
            .entry(info_hash)
            .or_default()
            .insert(self.node_id, Seed { meta: meta.clone(), store });
        self.network.announced.notify_waiters();
        info!("Node {} seeding {} ({})", self.node_id, info_hash, meta.name());
        Ok(())
    }

    async fn release(&self, info_hash: &InfoHash) -> Result<()> {
        let mut seeds = self.network.seeds.write().await;
        if let Some(nodes) = seeds.get_mut(info_hash) {
            nodes.remove(&self.node_id);
            if nodes.is_empty() {
                seeds.remove(info_hash);
            }
        }
        debug!("Node {} released {}", self.node_id, info_hash);
        Ok(())
    }
}
