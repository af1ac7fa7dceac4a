//! JSON output types and serialization for CLI responses.
//!
//! Every response starts with `status` and `schema_version`, followed by
//! command-specific fields. Errors are reported as an [`ErrorResponse`] on
//! stdout; logs go to stderr.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::error::{CodetrailError, OutputErrorCode};
use crate::sqlite::StorageStats;
use crate::storage::InjectionStats;
use crate::types::ErrorRecord;

/// Current schema version for all responses.
pub const SCHEMA_VERSION: &str = "1";

fn ok_status() -> String {
    "ok".to_string()
}

// ============================================================================
// Error Response
// ============================================================================

/// Error information for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Numeric error code, also the process exit code.
    pub code: u8,
    /// Human-readable message.
    pub message: String,
    /// Error-specific structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorInfo {
    pub fn from_error(err: &CodetrailError) -> Self {
        let details = match err {
            CodetrailError::NotFound { path } => Some(serde_json::json!({ "path": path })),
            CodetrailError::VersionMismatch { found, expected } => Some(serde_json::json!({
                "found": found,
                "expected": expected
            })),
            _ => None,
        };
        ErrorInfo {
            code: OutputErrorCode::from(err).code(),
            message: err.to_string(),
            details,
        }
    }
}

/// Response for a failed command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Status: "error".
    pub status: String,
    pub schema_version: String,
    pub error: ErrorInfo,
}

impl ErrorResponse {
    pub fn from_error(err: &CodetrailError) -> Self {
        ErrorResponse {
            status: "error".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            error: ErrorInfo::from_error(err),
        }
    }
}

// ============================================================================
// Command Responses
// ============================================================================

/// Response for `index`.
#[derive(Debug, Clone, Serialize)]
pub struct IndexResponse {
    pub status: String,
    pub schema_version: String,
    /// Index database path.
    pub database: String,
    /// The database had an incompatible version and was rebuilt first.
    pub rebuilt: bool,
    pub units_total: usize,
    pub units_indexed: usize,
    /// Units whose producer failed; each left a fatal error record.
    pub units_failed: usize,
    pub interrupted: bool,
    /// Number of in-memory merges the consolidator ran.
    pub merges: usize,
    /// Counts of the in-memory merges.
    pub merging: InjectionStats,
    /// Counts of the injections into the database.
    pub injection: InjectionStats,
    /// Database counters after the run.
    pub storage: StorageStats,
}

/// Response for `stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub status: String,
    pub schema_version: String,
    pub database: String,
    pub storage_version: u32,
    pub stats: StorageStats,
}

impl StatsResponse {
    pub fn new(database: impl Into<String>, storage_version: u32, stats: StorageStats) -> Self {
        StatsResponse {
            status: ok_status(),
            schema_version: SCHEMA_VERSION.to_string(),
            database: database.into(),
            storage_version,
            stats,
        }
    }
}

/// Response for `errors`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorsResponse {
    pub status: String,
    pub schema_version: String,
    pub database: String,
    pub count: usize,
    pub errors: Vec<ErrorRecord>,
}

impl ErrorsResponse {
    pub fn new(database: impl Into<String>, errors: Vec<ErrorRecord>) -> Self {
        ErrorsResponse {
            status: ok_status(),
            schema_version: SCHEMA_VERSION.to_string(),
            database: database.into(),
            count: errors.len(),
            errors,
        }
    }
}

/// Response for `purge`.
#[derive(Debug, Clone, Serialize)]
pub struct PurgeResponse {
    pub status: String,
    pub schema_version: String,
    pub database: String,
    /// Paths whose content was removed.
    pub files_purged: Vec<String>,
    /// Paths with no file record in the database.
    pub files_not_found: Vec<String>,
    pub errors_removed: usize,
}

impl PurgeResponse {
    pub fn new(
        database: impl Into<String>,
        files_purged: Vec<String>,
        files_not_found: Vec<String>,
        errors_removed: usize,
    ) -> Self {
        PurgeResponse {
            status: ok_status(),
            schema_version: SCHEMA_VERSION.to_string(),
            database: database.into(),
            files_purged,
            files_not_found,
            errors_removed,
        }
    }
}

/// Response for `clear`.
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub status: String,
    pub schema_version: String,
    pub database: String,
}

impl ClearResponse {
    pub fn new(database: impl Into<String>) -> Self {
        ClearResponse {
            status: ok_status(),
            schema_version: SCHEMA_VERSION.to_string(),
            database: database.into(),
        }
    }
}

// ============================================================================
// Emission
// ============================================================================

/// Emit a response as pretty-printed JSON to a writer.
pub fn emit_response<T: Serialize>(response: &T, writer: &mut impl Write) -> io::Result<()> {
    let json = serde_json::to_string_pretty(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)
}

// ============================================================================
// Tests
// ============================================================================
