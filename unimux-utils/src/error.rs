//! Error types for unimux
//!
//! Provides a unified error type used across all unimux crates.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Main error type for unimux operations
#[derive(Debug, thiserror::Error)]
pub enum UnimuxError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Connection Errors ===

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    // === Process Errors ===

    #[error("Failed to spawn process: {0}")]
    ProcessSpawn(String),

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UnimuxError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using UnimuxError
pub type Result<T> = std::result::Result<T, UnimuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_display() {
        let err = UnimuxError::Bind {
            addr: "127.0.0.1:19542".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.to_string(), "Failed to bind 127.0.0.1:19542: in use");
    }

    #[test]
    fn test_config_display() {
        let err = UnimuxError::config("hub.port must be non-zero");
        assert_eq!(err.to_string(), "Configuration error: hub.port must be non-zero");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: UnimuxError = io_err.into();
        assert!(matches!(err, UnimuxError::Io(_)));
    }
}
