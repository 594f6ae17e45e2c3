//! Error types for ModelShare.
//!
//! Every failure inside the storage subsystem is expressed as a
//! [`ModelShareError`]. Callers that need the coarse failure class (for
//! user-facing messaging or RPC codes) use [`ModelShareError::kind`].

use crate::config::RuntimeId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the ModelShare library.
#[derive(Debug, Error)]
pub enum ModelShareError {
    // Lookup errors
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Model not found: {model_id}")]
    ModelNotFound { model_id: String },

    // Runtime API errors
    #[error("{runtime} is not reachable: {message}")]
    Unreachable { runtime: RuntimeId, message: String },

    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    // Content errors
    #[error("Malformed data at {path:?}: {message}")]
    Malformed {
        path: Option<PathBuf>,
        message: String,
    },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    // State errors
    #[error("Conflict: {message}")]
    Conflict { message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to create symlink from {src} to {dest}: {reason}")]
    SymlinkFailed {
        src: PathBuf,
        dest: PathBuf,
        reason: String,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for ModelShare operations.
pub type Result<T> = std::result::Result<T, ModelShareError>;

/// Coarse failure classes reported to callers alongside error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Unreachable,
    Malformed,
    Conflict,
    IoFailure,
    Cancelled,
    Invalid,
    Internal,
}

impl From<std::io::Error> for ModelShareError {
    fn from(err: std::io::Error) -> Self {
        ModelShareError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ModelShareError {
    fn from(err: serde_json::Error) -> Self {
        ModelShareError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for ModelShareError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ModelShareError::Timeout(std::time::Duration::from_secs(0))
        } else {
            ModelShareError::Network {
                message: err.to_string(),
                cause: Some(err.to_string()),
            }
        }
    }
}

impl ModelShareError {
    /// Create an IO error with path context.
    ///
    /// `NotFound` IO errors become [`ModelShareError::FileNotFound`] so the
    /// caller sees the lookup class rather than a generic IO failure.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            return ModelShareError::FileNotFound(path);
        }
        ModelShareError::Io {
            message: err.to_string(),
            path: Some(path),
            source: Some(err),
        }
    }

    /// Shorthand for a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        ModelShareError::Conflict {
            message: message.into(),
        }
    }

    /// Shorthand for a malformed-content error.
    pub fn malformed(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        ModelShareError::Malformed {
            path,
            message: message.into(),
        }
    }

    /// Map this error onto the failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModelShareError::NotFound(_)
            | ModelShareError::FileNotFound(_)
            | ModelShareError::ModelNotFound { .. } => ErrorKind::NotFound,

            ModelShareError::Unreachable { .. }
            | ModelShareError::Network { .. }
            | ModelShareError::Timeout(_) => ErrorKind::Unreachable,

            ModelShareError::Malformed { .. }
            | ModelShareError::HashMismatch { .. }
            | ModelShareError::Json { .. } => ErrorKind::Malformed,

            ModelShareError::Conflict { .. } => ErrorKind::Conflict,

            ModelShareError::Io { .. } | ModelShareError::SymlinkFailed { .. } => {
                ErrorKind::IoFailure
            }

            ModelShareError::Cancelled => ErrorKind::Cancelled,

            ModelShareError::Config { .. } | ModelShareError::InvalidParams { .. } => {
                ErrorKind::Invalid
            }

            ModelShareError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Runtime unreachable / network error
    /// - -32001: Not found
    /// - -32002: Malformed content
    /// - -32003: Conflict
    /// - -32004: Cancelled
    /// - -32005: Filesystem failure
    /// - -32602: Invalid params
    pub fn to_rpc_error_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Unreachable => -32000,
            ErrorKind::NotFound => -32001,
            ErrorKind::Malformed => -32002,
            ErrorKind::Conflict => -32003,
            ErrorKind::Cancelled => -32004,
            ErrorKind::IoFailure => -32005,
            ErrorKind::Invalid => -32602,
            ErrorKind::Internal => -32603,
        }
    }
}
