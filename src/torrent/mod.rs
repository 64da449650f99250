//! Torrent descriptor module
//!
//! Handles descriptor encoding, decoding and building from local content.

pub mod info;
pub mod parser;

pub use info::{Geometry, Info, MetaInfo};
pub use parser::TorrentParser;
