//! CLI module
//!
//! Command-line interface and configuration.

pub mod args;
pub mod config;

pub use args::{CliArgs, Command};
pub use config::Config;
