//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for the blob distribution client
#[derive(Debug, Parser)]
#[command(name = "blobtorrent")]
#[command(about = "Distribute image blobs and manifests through a peer swarm", long_about = None)]
pub struct CliArgs {
    /// JSON configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Root directory for upload, download, cache and descriptor areas
    #[arg(short, long, value_name = "DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Tracker base URL
    #[arg(short, long, value_name = "URL", global = true)]
    pub tracker: Option<String>,

    /// Disable swarm-backed manifest retrieval
    #[arg(long, global = true)]
    pub disable_torrent: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stage a manifest file and publish it under repository:tag
    Post {
        repository: String,
        tag: String,
        /// Manifest file to publish
        file: PathBuf,
    },
    /// Resolve repository:tag and make its manifest available locally.
    ///
    /// This binary runs its own in-process swarm with no peers, so content
    /// not already cached locally cannot be fetched from other processes.
    Get {
        repository: String,
        tag: String,
    },
    /// Show piece progress of a persisted transfer, or of every archived one
    Status {
        /// Info hash as 40 hex characters
        info_hash: Option<String>,
    },
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}
