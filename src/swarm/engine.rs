//! Swarm engine abstraction
//!
//! The piece-exchange layer as seen by the torrent client. Implementations
//! own peer discovery and the wire protocol; the client only resolves
//! descriptors, pulls verified-size piece bytes and announces content it
//! can serve.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use crate::digest::InfoHash;
use crate::storage::ContentStore;
use crate::torrent::MetaInfo;

/// Piece exchange with the rest of the fleet
///
/// `resolve` and `fetch_piece` may wait for peers indefinitely; callers
/// bound them with their own timeouts.
#[async_trait]
pub trait SwarmEngine: Send + Sync {
    /// Find the descriptor for an identity
    async fn resolve(&self, info_hash: &InfoHash) -> Result<MetaInfo>;

    /// Raw bytes of one piece from any peer that has it
    async fn fetch_piece(&self, info_hash: &InfoHash, index: usize) -> Result<Bytes>;

    /// Start serving complete content whose bytes live in `store`'s cache
    async fn announce(&self, meta: &MetaInfo, store: Arc<dyn ContentStore>) -> Result<()>;

    /// Stop serving and drop any state held for an identity
    async fn release(&self, info_hash: &InfoHash) -> Result<()>;
}
