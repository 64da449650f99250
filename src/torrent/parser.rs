//! Descriptor parser and builder
//!
//! Decodes and encodes bencoded descriptors and builds new ones from local files.

use std::path::Path;

use anyhow::Result;
use serde_bytes::ByteBuf;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, trace};

use crate::digest::piece_hash;
use crate::error::TorrentError;
use crate::torrent::info::{Info, MetaInfo};

/// Parser for descriptors
pub struct TorrentParser;

impl TorrentParser {
    /// Parse a descriptor from bencoded bytes
    pub fn parse_bytes(data: &[u8]) -> Result<MetaInfo> {
        debug!("Parsing descriptor from {} bytes", data.len());
        trace!("Descriptor data (first 100 bytes): {:?}", &data[..data.len().min(100)]);

        let meta: MetaInfo = serde_bencode::from_bytes(data).map_err(TorrentError::from)?;
        // Reject inconsistent descriptors up front.
        meta.info.geometry()?;
        Ok(meta)
    }

    /// Encode a descriptor
    pub fn to_bytes(meta: &MetaInfo) -> Result<Vec<u8>> {
        Ok(serde_bencode::to_bytes(meta).map_err(TorrentError::from)?)
    }

    /// Parse a descriptor from a file path
    pub async fn parse_file(path: &Path) -> Result<MetaInfo> {
        debug!("Loading descriptor from: {}", path.display());

        let data = fs::read(path).await.map_err(|e| {
            error!("Failed to read descriptor '{}': {}", path.display(), e);
            TorrentError::storage_error_full("Failed to read descriptor", path.display().to_string(), e.to_string())
        })?;

        Self::parse_bytes(&data)
    }

    /// Build a descriptor by hashing a local file in `piece_length` chunks
    pub async fn build_from_file(path: &Path, name: &str, piece_length: u64) -> Result<MetaInfo> {
        if piece_length == 0 {
            return Err(
                TorrentError::validation_error_with_field("piece length must be positive", "piece_length").into(),
            );
        }
        info!("Building descriptor for '{}' from {}", name, path.display());

        let mut file = fs::File::open(path).await.map_err(|e| {
            error!("Failed to open '{}': {}", path.display(), e);
            TorrentError::from(e)
        })?;

        let mut pieces = Vec::new();
        let mut length = 0u64;
        let mut buffer = vec![0u8; piece_length as usize];
        loop {
            let filled = read_full(&mut file, &mut buffer).await?;
            if filled == 0 {
                break;
            }
            pieces.extend_from_slice(&piece_hash(&buffer[..filled]));
            length += filled as u64;
            if filled < buffer.len() {
                break;
            }
        }

        debug!("Hashed {} bytes into {} pieces", length, pieces.len() / 20);
        Ok(MetaInfo::new(Info {
            name: name.to_string(),
            piece_length,
            length,
            pieces: ByteBuf::from(pieces),
        }))
    }
}

/// Fill `buf` as far as the file allows, returning the number of bytes read
async fn read_full(file: &mut fs::File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
