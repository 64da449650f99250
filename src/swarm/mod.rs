//! Swarm module
//!
//! Piece exchange as consumed by the torrent client.

pub mod engine;
pub mod memory;

pub use engine::SwarmEngine;
pub use memory::{MemorySwarm, SwarmNetwork};
