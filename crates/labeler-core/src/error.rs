//! Error types for the labeler library.
//!
//! Every failure that can reach the view is expressed here so the RPC layer can
//! map it to a typed notice and a JSON-RPC error code.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the labeler library.
#[derive(Debug, Error)]
pub enum LabelerError {
    // Document host errors
    #[error("Nothing is selected")]
    EmptySelection,

    #[error("Node not found: {node_id}")]
    NodeNotFound { node_id: String },

    #[error("Host operation '{operation}' failed: {message}")]
    Host { operation: String, message: String },

    #[error("Rasterization failed for {node_id}: {message}")]
    Rasterization { node_id: String, message: String },

    // Store errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Store error: {0}")]
    Store(String),

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Classifier errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        status_code: Option<u16>,
    },

    // Message errors
    #[error("Invalid message: {message}")]
    InvalidMessage { message: String },

    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("Session is closed")]
    SessionClosed,

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for labeler operations.
pub type Result<T> = std::result::Result<T, LabelerError>;

impl From<std::io::Error> for LabelerError {
    fn from(err: std::io::Error) -> Self {
        LabelerError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for LabelerError {
    fn from(err: serde_json::Error) -> Self {
        LabelerError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for LabelerError {
    fn from(err: rusqlite::Error) -> Self {
        LabelerError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for LabelerError {
    fn from(err: reqwest::Error) -> Self {
        LabelerError::Network {
            message: err.to_string(),
            status_code: err.status().map(|s| s.as_u16()),
        }
    }
}

impl LabelerError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        LabelerError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Shorthand for a failed host call.
    pub fn host(operation: &str, message: impl Into<String>) -> Self {
        LabelerError::Host {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Network/classifier error
    /// - -32002: Node not found
    /// - -32003: Rasterization failed
    /// - -32004: Session closed
    /// - -32005: Validation error
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            LabelerError::Network { .. } => -32000,
            LabelerError::NodeNotFound { .. } => -32002,
            LabelerError::Rasterization { .. } => -32003,
            LabelerError::SessionClosed => -32004,
            LabelerError::EmptySelection | LabelerError::Validation { .. } => -32005,
            LabelerError::InvalidMessage { .. } | LabelerError::InvalidParams { .. } => -32602,
            _ => -32603,
        }
    }
}
