//! Storage module
//!
//! Local content storage, durable piece status and the descriptor archive.

pub mod backend;
pub mod piece;
pub mod file;
pub mod resume;

pub use backend::ContentStore;
pub use piece::{PieceStatus, PieceStatusStore, STATUS_SUFFIX};
pub use file::FileStore;
pub use resume::TorrentArchive;
