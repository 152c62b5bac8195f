//! Error types for the blendvault engine.
//!
//! Every failure mode in this engine degrades a subset of functionality
//! (fewer builds listed, one lineage not refreshed, one failed install);
//! none of these variants should ever abort the process.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the blendvault workspace.
#[derive(Debug, Error)]
pub enum VaultError {
    // Version model errors
    #[error("Malformed version string: {input}")]
    MalformedVersion { input: String },

    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Rate limited by {service}, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        service: String,
        retry_after_secs: Option<u64>,
    },

    // Source adapter errors (adapter-scoped, never fail the whole pass)
    #[error("Source {source_id} unavailable: {message}")]
    SourceUnavailable { source_id: String, message: String },

    // Download/extraction pipeline errors (task-scoped, terminal for that task)
    #[error("Download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("Download cancelled")]
    DownloadCancelled,

    #[error("Corrupt archive {path:?}: {message}")]
    CorruptArchive { path: PathBuf, message: String },

    #[error("Extraction failed: {message}")]
    ExtractionFailed { message: String },

    #[error("Structure fixup failed: {message}")]
    StructureFixupFailed { message: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Another task is already installing to {0}")]
    PathContention(PathBuf),

    // Library errors
    #[error("No installed build at {0}")]
    EntryNotFound(PathBuf),

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

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for blendvault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

// Conversion implementations for common error types

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        VaultError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for VaultError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            VaultError::Timeout(std::time::Duration::from_secs(0))
        } else {
            VaultError::Network {
                message: err.to_string(),
                cause: Some(err.to_string()),
            }
        }
    }
}

impl VaultError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        VaultError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VaultError::Network { .. } | VaultError::Timeout(_) | VaultError::RateLimited { .. }
        )
    }

    /// Wrap an error in a source-scoped `SourceUnavailable`, preserving the
    /// adapter identity for the per-lineage "discovery degraded" flag.
    pub fn source_scoped(self, source_id: &str) -> Self {
        match self {
            VaultError::SourceUnavailable { .. } => self,
            other => VaultError::SourceUnavailable {
                source_id: source_id.to_string(),
                message: other.to_string(),
            },
        }
    }
}
