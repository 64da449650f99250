//! blobtorrent
//!
//! Peer-to-peer distribution of container image blobs and manifests, with
//! durable per-piece progress and tracker-backed manifest naming.

pub mod cli;
pub mod client;
pub mod digest;
pub mod error;
pub mod storage;
pub mod swarm;
pub mod torrent;

pub use error::TorrentError;

pub use cli::{CliArgs, Command, Config};
pub use client::{ManifestDistributor, ManifestRecord, TorrentClient, TrackerClient, Transfer};
pub use digest::{Digest, InfoHash};
pub use storage::{ContentStore, FileStore, PieceStatus, PieceStatusStore, TorrentArchive};
pub use swarm::{MemorySwarm, SwarmEngine, SwarmNetwork};
pub use torrent::{MetaInfo, TorrentParser};
