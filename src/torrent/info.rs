//! Torrent descriptor structures
//!
//! Provides the bencoded descriptor (`MetaInfo`) and its derived piece geometry.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::digest::InfoHash;
use crate::error::TorrentError;

/// Size of a single piece hash in the `pieces` field
pub const PIECE_HASH_LEN: usize = 20;

/// The `info` dictionary of a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    /// Download name (also the content's cache name)
    pub name: String,
    /// Size of each piece in bytes
    #[serde(rename = "piece length")]
    pub piece_length: u64,
    /// Total content length in bytes
    pub length: u64,
    /// Concatenated 20-byte SHA-1 piece hashes
    pub pieces: ByteBuf,
}

/// A full descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaInfo {
    /// Tracker announce URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announce: Option<String>,
    /// Content layout
    pub info: Info,
}

/// Piece layout derived from a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub piece_length: u64,
    pub num_pieces: usize,
    pub total_length: u64,
}

impl Geometry {
    /// Number of pieces needed for `total_length` bytes
    pub fn piece_count_for(total_length: u64, piece_length: u64) -> usize {
        if piece_length == 0 {
            return 0;
        }
        ((total_length + piece_length - 1) / piece_length) as usize
    }

    /// Byte range `[start, end)` of a piece
    pub fn piece_range(&self, index: usize) -> Option<(u64, u64)> {
        if index >= self.num_pieces {
            return None;
        }
        let start = index as u64 * self.piece_length;
        let end = std::cmp::min(start + self.piece_length, self.total_length);
        Some((start, end))
    }
}

/// Descriptor names are used as file names: one plain path component only
fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(|c: char| matches!(c, '/' | '\\' | '\0'));
    if bad {
        return Err(TorrentError::validation_error_with_field(
            format!("descriptor name {:?} is not a plain file name", name),
            "name",
        )
        .into());
    }
    Ok(())
}

impl Info {
    /// Get piece hash for a specific piece index
    pub fn piece_hash(&self, index: usize) -> Option<[u8; PIECE_HASH_LEN]> {
        let start = index.checked_mul(PIECE_HASH_LEN)?;
        let chunk = self.pieces.get(start..start + PIECE_HASH_LEN)?;
        let mut hash = [0u8; PIECE_HASH_LEN];
        hash.copy_from_slice(chunk);
        Some(hash)
    }

    /// Number of piece hashes carried by the descriptor
    pub fn num_pieces(&self) -> usize {
        self.pieces.len() / PIECE_HASH_LEN
    }

    /// Check the descriptor is internally consistent and derive its geometry
    pub fn geometry(&self) -> Result<Geometry> {
        validate_name(&self.name)?;
        if self.piece_length == 0 {
            return Err(
                TorrentError::validation_error_with_field("piece length must be positive", "piece length").into(),
            );
        }
        if self.pieces.len() % PIECE_HASH_LEN != 0 {
            return Err(TorrentError::validation_error_with_field(
                format!("Pieces field length must be a multiple of 20, got {}", self.pieces.len()),
                "pieces",
            ).into());
        }
        let expected = Geometry::piece_count_for(self.length, self.piece_length);
        if expected != self.num_pieces() {
            return Err(TorrentError::validation_error_with_field(
                format!("descriptor carries {} piece hashes, length implies {}", self.num_pieces(), expected),
                "pieces",
            ).into());
        }
        Ok(Geometry {
            piece_length: self.piece_length,
            num_pieces: expected,
            total_length: self.length,
        })
    }

    /// Bencoded bytes of this dictionary
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_bencode::to_bytes(self).map_err(TorrentError::from)?)
    }

    /// Identity of the descriptor
    pub fn info_hash(&self) -> Result<InfoHash> {
        Ok(InfoHash::from_info_bytes(&self.to_bytes()?))
    }
}

impl MetaInfo {
    pub fn new(info: Info) -> Self {
        Self { announce: None, info }
    }

    pub fn info_hash(&self) -> Result<InfoHash> {
        self.info.info_hash()
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }
}
