//! Serialized intermediate storages on disk.
//!
//! A dump is one JSON file holding a [`StorageSnapshot`](codetrail_core::intermediate::StorageSnapshot),
//! typically written by a language indexer for one translation unit.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use codetrail_core::error::CodetrailError;
use codetrail_core::intermediate::IntermediateStorage;

/// File extension of storage dumps.
pub const DUMP_EXTENSION: &str = "json";

fn is_dump(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(DUMP_EXTENSION)
}

/// Collect the dump files named by `paths`.
///
/// Files are taken as given; directories are searched recursively for
/// `*.json`. The result is sorted and free of duplicates.
pub fn discover_dumps(paths: &[PathBuf]) -> Result<Vec<PathBuf>, CodetrailError> {
    let mut dumps = Vec::new();
    for path in paths {
        if path.is_file() {
            dumps.push(path.clone());
        } else if path.is_dir() {
            for entry in WalkDir::new(path).follow_links(true) {
                let entry = entry.map_err(|e| {
                    CodetrailError::internal(format!("failed to walk {}: {}", path.display(), e))
                })?;
                if entry.file_type().is_file() && is_dump(entry.path()) {
                    dumps.push(entry.into_path());
                }
            }
        } else {
            return Err(CodetrailError::not_found(path.display().to_string()));
        }
    }
    dumps.sort();
    dumps.dedup();
    debug!(count = dumps.len(), "discovered storage dumps");
    Ok(dumps)
}

/// Load one dump. Used as the producer of an indexing run, so failures are
/// plain messages that end up in an error record.
pub fn load_dump(path: &Path) -> Result<IntermediateStorage, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("failed to read dump: {}", e))?;
    IntermediateStorage::from_json(&text).map_err(|e| e.to_string())
}

/// Write `storage` as a dump.
pub fn write_dump(storage: &IntermediateStorage, path: &Path) -> Result<(), CodetrailError> {
    let json = storage
        .to_json()
        .map_err(|e| CodetrailError::internal(format!("failed to serialize storage: {}", e)))?;
    fs::write(path, json)
        .map_err(|e| CodetrailError::internal(format!("failed to write {}: {}", path.display(), e)))
}
