//! Error handling for the powchain node
//!
//! A single error type shared by the ledger, the mining pool, the gossip layer
//! and the storage backends.

use thiserror::Error;

/// Result type alias for powchain operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the powchain node
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A block that does not satisfy the append or difficulty rules
    #[error("Invalid block at height {height}: {message}")]
    Block { height: u64, message: String },

    /// Digest parsing errors
    #[error("Invalid digest: {message}")]
    Digest { message: String },

    /// Worker errors
    #[error("Worker error: {worker_type}: {message}")]
    Worker { worker_type: String, message: String },

    /// Peer communication errors
    #[error("Peer {peer}: {message}")]
    Peer { peer: String, message: String },

    /// Chain storage errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Cancellation errors for async operations
    #[error("Operation was cancelled: {operation}")]
    Cancelled { operation: String },

    /// The node coordinator is no longer running
    #[error("Node coordinator has stopped")]
    NodeStopped,
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a block validation error
    pub fn block(height: u64, message: impl Into<String>) -> Self {
        Self::Block {
            height,
            message: message.into(),
        }
    }

    /// Create a digest error
    pub fn digest(message: impl Into<String>) -> Self {
        Self::Digest {
            message: message.into(),
        }
    }

    /// Create a worker error
    pub fn worker(worker_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Worker {
            worker_type: worker_type.into(),
            message: message.into(),
        }
    }

    /// Create a peer error
    pub fn peer(peer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Peer {
            peer: peer.into(),
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// The coordinator is gone
    pub fn node_stopped() -> Self {
        Self::NodeStopped
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Http(_) => "http",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Io(_) => "io",
            Error::Config { .. } => "config",
            Error::Block { .. } => "block",
            Error::Digest { .. } => "digest",
            Error::Worker { .. } => "worker",
            Error::Peer { .. } => "peer",
            Error::Storage { .. } => "storage",
            Error::Cancelled { .. } => "cancelled",
            Error::NodeStopped => "node_stopped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helper_constructors() {
        let err = Error::block(3, "height does not follow parent");
        assert_eq!(
            err.to_string(),
            "Invalid block at height 3: height does not follow parent"
        );
        assert_eq!(err.category(), "block");

        let err = Error::peer("10.0.0.1:2001", "connection refused");
        assert_eq!(err.to_string(), "Peer 10.0.0.1:2001: connection refused");
        assert_eq!(err.category(), "peer");
    }

    #[test]
    fn test_from_conversions() {
        let json_err = serde_json::from_str::<u64>("nope").unwrap_err();
        let err: Error = json_err.into();
        assert_eq!(err.category(), "json");

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert_eq!(err.category(), "io");
    }
}
