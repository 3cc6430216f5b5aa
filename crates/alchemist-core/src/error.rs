//! Error types for Civitai Alchemist.
//!
//! Errors are grouped the way callers need to react to them: input and
//! authentication problems are rejected immediately, not-found is terminal for
//! a single lookup, transport problems are retried by the network layer,
//! integrity and topology failures are terminal for their artifact or build.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the Alchemist library.
#[derive(Debug, Error)]
pub enum AlchemistError {
    // Input errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    #[error("Cannot parse image ID from: {input}")]
    InvalidImageRef { input: String },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    // Not-found errors
    #[error("Not found: {entity}")]
    NotFound { entity: String },

    #[error("Download task not found: {task_id}")]
    TaskNotFound { task_id: String },

    // Transport errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited by {service}, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        service: String,
        retry_after_secs: Option<u64>,
    },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    // Download errors
    #[error("Download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("Download cancelled")]
    DownloadCancelled,

    #[error("SHA256 checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    // Workflow errors
    #[error("No checkpoint model could be determined for the workflow")]
    NoCheckpoint,

    #[error("Invalid workflow graph: {message}")]
    InvalidGraph { message: String },

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

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Alchemist operations.
pub type Result<T> = std::result::Result<T, AlchemistError>;

impl From<std::io::Error> for AlchemistError {
    fn from(err: std::io::Error) -> Self {
        AlchemistError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for AlchemistError {
    fn from(err: serde_json::Error) -> Self {
        AlchemistError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for AlchemistError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AlchemistError::Timeout(Duration::from_secs(0))
        } else {
            AlchemistError::Network {
                message: err.to_string(),
                cause: err.source_chain_text(),
            }
        }
    }
}

/// Flattens an error's source chain into one line for log context.
trait SourceChainText {
    fn source_chain_text(&self) -> Option<String>;
}

impl<E: std::error::Error> SourceChainText for E {
    fn source_chain_text(&self) -> Option<String> {
        let mut parts = Vec::new();
        let mut current = self.source();
        while let Some(err) = current {
            parts.push(err.to_string());
            current = err.source();
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(": "))
        }
    }
}

impl AlchemistError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        AlchemistError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Network/connectivity error
    /// - -32001: Authentication error
    /// - -32002: Not found
    /// - -32003: Download failed
    /// - -32004: Cancelled by user
    /// - -32005: Validation or integrity error
    /// - -32006: Workflow topology error
    /// - -32602: Invalid params
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            AlchemistError::Network { .. }
            | AlchemistError::Timeout(_)
            | AlchemistError::RateLimited { .. }
            | AlchemistError::Http { .. } => -32000,

            AlchemistError::Unauthorized { .. } => -32001,

            AlchemistError::NotFound { .. } | AlchemistError::TaskNotFound { .. } => -32002,

            AlchemistError::DownloadFailed { .. } => -32003,

            AlchemistError::DownloadCancelled => -32004,

            AlchemistError::Validation { .. }
            | AlchemistError::InvalidImageRef { .. }
            | AlchemistError::ChecksumMismatch { .. } => -32005,

            AlchemistError::NoCheckpoint | AlchemistError::InvalidGraph { .. } => -32006,

            AlchemistError::InvalidParams { .. } => -32602,

            _ => -32603,
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            AlchemistError::Network { .. }
            | AlchemistError::Timeout(_)
            | AlchemistError::RateLimited { .. } => true,
            AlchemistError::Http { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Whether the error comes from a rejected or missing credential.
    pub fn is_auth(&self) -> bool {
        matches!(self, AlchemistError::Unauthorized { .. })
    }
}

/// HTTP statuses that indicate a transient server-side condition.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AlchemistError::NotFound {
            entity: "model version 42".into(),
        };
        assert_eq!(err.to_string(), "Not found: model version 42");
    }

    #[test]
    fn test_checksum_error_mentions_checksum() {
        let err = AlchemistError::ChecksumMismatch {
            expected: "ABC".into(),
            actual: "def".into(),
        };
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(
            AlchemistError::Unauthorized {
                message: "missing".into()
            }
            .to_rpc_error_code(),
            -32001
        );
        assert_eq!(AlchemistError::DownloadCancelled.to_rpc_error_code(), -32004);
        assert_eq!(AlchemistError::NoCheckpoint.to_rpc_error_code(), -32006);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(AlchemistError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(AlchemistError::Http {
            url: "https://civitai.com".into(),
            status: 503
        }
        .is_retryable());
        assert!(!AlchemistError::Http {
            url: "https://civitai.com".into(),
            status: 400
        }
        .is_retryable());
        assert!(!AlchemistError::Unauthorized {
            message: "bad key".into()
        }
        .is_retryable());
    }
}
