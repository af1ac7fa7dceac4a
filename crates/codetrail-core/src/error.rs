//! Error types and error code constants for codetrail.
//!
//! Two layers:
//! - [`StorageError`]: failures of a storage backend, snapshot loading or
//!   database access. Dangling references during a merge are *not* errors;
//!   they are dropped and counted in
//!   [`InjectionStats`](crate::storage::InjectionStats).
//! - [`CodetrailError`]: the unified error rendered by the CLI, with a stable
//!   [`OutputErrorCode`] that doubles as the process exit code.
//!
//! ## Error Code Mapping
//!
//! - `2`: Invalid arguments (bad input from caller)
//! - `3`: Not found (missing database, dump file or directory)
//! - `4`: Indexing failed (backend failure during a run)
//! - `5`: Version mismatch (database needs a full re-index)
//! - `10`: Internal errors (bugs, unexpected state)

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

// ============================================================================
// Storage Errors
// ============================================================================

/// Failure of a storage operation.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The database file could not be opened or prepared.
    #[error("failed to open index database at {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    /// The stored schema version differs from the one this build writes.
    #[error("index database version {found} does not match expected version {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    /// A mutating call on a storage opened without write access.
    #[error("storage is read-only, cannot {operation}")]
    ReadOnly { operation: String },

    /// A serialized intermediate storage is malformed.
    #[error("invalid storage snapshot: {reason}")]
    InvalidSnapshot { reason: String },
}

pub type StorageResult<T> = Result<T, StorageError>;

// ============================================================================
// Output Error Codes
// ============================================================================

/// Error codes for JSON output.
///
/// These codes map to CLI exit codes and appear in JSON error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputErrorCode {
    /// Invalid arguments from caller (bad input, malformed config).
    InvalidArguments = 2,
    /// Database, dump file or directory not found.
    NotFound = 3,
    /// Indexing run failed in the storage backend.
    IndexingFailed = 4,
    /// Index database must be rebuilt.
    VersionMismatch = 5,
    /// Internal errors (bugs, unexpected state).
    InternalError = 10,
}

impl OutputErrorCode {
    /// Get the numeric code value.
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for OutputErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// Unified Error Type
// ============================================================================

/// Unified error type for CLI output.
#[derive(Debug, Error)]
pub enum CodetrailError {
    /// Invalid arguments from caller.
    #[error("invalid arguments: {message}")]
    InvalidArguments { message: String },

    /// A path the caller named does not exist.
    #[error("not found: {path}")]
    NotFound { path: String },

    /// The indexing run could not be committed.
    #[error("indexing failed: {message}")]
    IndexingFailed { message: String },

    /// The database was written by an incompatible version.
    #[error("index database needs a full re-index (found version {found}, expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    /// Internal error (bug or unexpected state).
    #[error("internal error: {message}")]
    InternalError { message: String },
}

impl CodetrailError {
    pub fn invalid_args(message: impl Into<String>) -> Self {
        CodetrailError::InvalidArguments {
            message: message.into(),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        CodetrailError::NotFound { path: path.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CodetrailError::InternalError {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Code Mapping
// ============================================================================

impl From<&CodetrailError> for OutputErrorCode {
    fn from(err: &CodetrailError) -> Self {
        match err {
            CodetrailError::InvalidArguments { .. } => OutputErrorCode::InvalidArguments,
            CodetrailError::NotFound { .. } => OutputErrorCode::NotFound,
            CodetrailError::IndexingFailed { .. } => OutputErrorCode::IndexingFailed,
            CodetrailError::VersionMismatch { .. } => OutputErrorCode::VersionMismatch,
            CodetrailError::InternalError { .. } => OutputErrorCode::InternalError,
        }
    }
}

impl From<CodetrailError> for OutputErrorCode {
    fn from(err: CodetrailError) -> Self {
        OutputErrorCode::from(&err)
    }
}

// ============================================================================
// Bridges
// ============================================================================

impl From<StorageError> for CodetrailError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::VersionMismatch { found, expected } => {
                CodetrailError::VersionMismatch { found, expected }
            }
            StorageError::InvalidSnapshot { reason } => CodetrailError::InvalidArguments {
                message: format!("invalid storage snapshot: {}", reason),
            },
            StorageError::Json(json_err) => CodetrailError::InvalidArguments {
                message: format!("malformed storage dump: {}", json_err),
            },
            StorageError::ReadOnly { operation } => CodetrailError::InternalError {
                message: format!("storage opened read-only, cannot {}", operation),
            },
            other => CodetrailError::IndexingFailed {
                message: other.to_string(),
            },
        }
    }
}

impl From<ConfigError> for CodetrailError {
    fn from(err: ConfigError) -> Self {
        CodetrailError::InvalidArguments {
            message: err.to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
