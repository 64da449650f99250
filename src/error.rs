//! Error types for the blob distribution client
//!
//! This module defines the error taxonomy shared by the piece store,
//! the torrent client and the manifest distributor.

use std::fmt;

/// Error type for torrent and manifest operations
#[derive(Debug, Clone)]
pub enum TorrentError {
    /// Local staged or cached content is absent
    NotExist {
        message: String,
        path: Option<String>,
    },

    /// Remote resolution failed (tracker has no mapping, swarm gave up)
    NotFound {
        message: String,
        source: Option<String>,
    },

    /// A record already exists with a conflicting shape
    AlreadyExists {
        message: String,
        name: Option<String>,
    },

    /// The persisted state contradicts the requested operation
    InvalidState {
        message: String,
        name: Option<String>,
    },

    /// Torrent distribution is administratively switched off
    Disabled,

    /// The client was closed
    Closed,

    /// Descriptor or record parsing errors
    ParseError {
        message: String,
        source: Option<String>,
    },

    /// File I/O and storage errors
    StorageError {
        message: String,
        path: Option<String>,
        source: Option<String>,
    },

    /// Configuration errors
    ConfigError {
        message: String,
        field: Option<String>,
    },

    /// Network errors
    NetworkError {
        message: String,
        address: Option<String>,
        source: Option<String>,
    },

    /// Validation errors
    ValidationError {
        message: String,
        field: Option<String>,
    },
}

impl TorrentError {
    /// Create a new NotExist error
    pub fn not_exist(message: impl Into<String>) -> Self {
        TorrentError::NotExist {
            message: message.into(),
            path: None,
        }
    }

    /// Create a new NotExist error with path
    pub fn not_exist_with_path(message: impl Into<String>, path: impl Into<String>) -> Self {
        TorrentError::NotExist {
            message: message.into(),
            path: Some(path.into()),
        }
    }

    /// Create a new NotFound error
    pub fn not_found(message: impl Into<String>) -> Self {
        TorrentError::NotFound {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new AlreadyExists error
    pub fn already_exists(message: impl Into<String>, name: impl Into<String>) -> Self {
        TorrentError::AlreadyExists {
            message: message.into(),
            name: Some(name.into()),
        }
    }

    /// Create a new InvalidState error with the download name
    pub fn invalid_state_with_name(message: impl Into<String>, name: impl Into<String>) -> Self {
        TorrentError::InvalidState {
            message: message.into(),
            name: Some(name.into()),
        }
    }

    /// Create a new ParseError
    pub fn parse_error(message: impl Into<String>) -> Self {
        TorrentError::ParseError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new ParseError with source
    pub fn parse_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::ParseError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new StorageError with path and source
    pub fn storage_error_full(
        message: impl Into<String>,
        path: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        TorrentError::StorageError {
            message: message.into(),
            path: Some(path.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new ConfigError with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        TorrentError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new NetworkError with address and source
    pub fn network_error_full(
        message: impl Into<String>,
        address: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        TorrentError::NetworkError {
            message: message.into(),
            address: Some(address.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new ValidationError
    pub fn validation_error(message: impl Into<String>) -> Self {
        TorrentError::ValidationError {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new ValidationError with field
    pub fn validation_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        TorrentError::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Whether this error reports missing local content
    pub fn is_not_exist(&self) -> bool {
        matches!(self, TorrentError::NotExist { .. })
    }

    /// Whether this error reports a failed remote resolution
    pub fn is_not_found(&self) -> bool {
        matches!(self, TorrentError::NotFound { .. })
    }
}

impl fmt::Display for TorrentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TorrentError::NotExist { message, path } => {
                if let Some(p) = path {
                    write!(f, "Not exist: {} (path: {})", message, p)
                } else {
                    write!(f, "Not exist: {}", message)
                }
            }
            TorrentError::NotFound { message, source } => {
                if let Some(src) = source {
                    write!(f, "Not found: {} (source: {})", message, src)
                } else {
                    write!(f, "Not found: {}", message)
                }
            }
            TorrentError::AlreadyExists { message, name } => {
                if let Some(n) = name {
                    write!(f, "Already exists: {} (name: {})", message, n)
                } else {
                    write!(f, "Already exists: {}", message)
                }
            }
            TorrentError::InvalidState { message, name } => {
                if let Some(n) = name {
                    write!(f, "Invalid state: {} (name: {})", message, n)
                } else {
                    write!(f, "Invalid state: {}", message)
                }
            }
            TorrentError::Disabled => write!(f, "Torrent disabled"),
            TorrentError::Closed => write!(f, "Torrent client closed"),
            TorrentError::ParseError { message, source } => {
                if let Some(src) = source {
                    write!(f, "Parse error: {} (source: {})", message, src)
                } else {
                    write!(f, "Parse error: {}", message)
                }
            }
            TorrentError::StorageError { message, path, source } => {
                match (path, source) {
                    (Some(p), Some(s)) => write!(f, "Storage error: {} (path: {}, source: {})", message, p, s),
                    (Some(p), None) => write!(f, "Storage error: {} (path: {})", message, p),
                    (None, Some(s)) => write!(f, "Storage error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Storage error: {}", message),
                }
            }
            TorrentError::ConfigError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Config error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Config error: {}", message)
                }
            }
            TorrentError::NetworkError { message, address, source } => {
                match (address, source) {
                    (Some(a), Some(s)) => write!(f, "Network error: {} (address: {}, source: {})", message, a, s),
                    (Some(a), None) => write!(f, "Network error: {} (address: {})", message, a),
                    (None, Some(s)) => write!(f, "Network error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Network error: {}", message),
                }
            }
            TorrentError::ValidationError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Validation error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Validation error: {}", message)
                }
            }
        }
    }
}

impl std::error::Error for TorrentError {}

impl From<std::io::Error> for TorrentError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            return TorrentError::not_exist(err.to_string());
        }
        TorrentError::storage_error_full(err.to_string(), "unknown", err.kind().to_string())
    }
}

impl From<serde_bencode::Error> for TorrentError {
    fn from(err: serde_bencode::Error) -> Self {
        TorrentError::parse_error_with_source("Failed to parse bencode data", err.to_string())
    }
}

impl From<serde_json::Error> for TorrentError {
    fn from(err: serde_json::Error) -> Self {
        TorrentError::parse_error_with_source("Failed to parse JSON data", err.to_string())
    }
}

impl From<reqwest::Error> for TorrentError {
    fn from(err: reqwest::Error) -> Self {
        let address = err.url().map(|u| u.to_string()).unwrap_or_else(|| "unknown".to_string());
        TorrentError::network_error_full("HTTP request failed", address, err.to_string())
    }
}
