//! Client module
//!
//! Transfer lifecycle, tracker access and manifest distribution.

pub mod manifest;
pub mod torrent;
pub mod tracker;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use manifest::ManifestDistributor;
pub use torrent::{TorrentClient, Transfer};
pub use tracker::{ManifestRecord, TrackerClient};
