//! Compile-only test to verify public API surface.
//!
//! This file serves as a compile-time contract for the public API.
//! If this file fails to compile, the public API has regressed.
//!
//! Run with: cargo test -- api_surface

// Allow unused imports - this test is about compile-time verification, not runtime usage
#![allow(unused_imports)]

// ============================================================================
// Index Records
// ============================================================================

use codetrail::types::{
    format_modification_time, AccessKind, CommentLocation, ComponentAccess, DefinitionKind, Edge,
    EdgeKey, EdgeKind, ErrorKey, ErrorRecord, File, Id, LocalSymbol, LocationKind, Node, NodeKind,
    Occurrence, SourceLocation, SourceLocationKey, Symbol,
};

// error module - error types and codes
use codetrail::error::{CodetrailError, OutputErrorCode, StorageError, StorageResult};

// ============================================================================
// Storage Engine
// ============================================================================

use codetrail::intermediate::IntermediateStorage;
use codetrail::storage::{
    InjectionStats, LockedStorage, RecordStats, Storage, OCCURRENCE_BATCH_SIZE,
};
use codetrail::provider::StorageProvider;
use codetrail::consolidate::{inject_largest, merge_largest_pair};
use codetrail::sqlite::{SqliteIndexStorage, StorageMode, StorageStats, STORAGE_VERSION};

// ============================================================================
// Configuration and Output
// ============================================================================

use codetrail::config::{
    CliOverrides, ConfigError, ConfigSource, ConfigValue, ResolvedConfig,
    DEFAULT_DATABASE_FILE, DEFAULT_MAX_PENDING_STORAGES, PROJECT_CONFIG_FILE,
};
use codetrail::output::{
    emit_response, ClearResponse, ErrorInfo, ErrorResponse, ErrorsResponse, IndexResponse,
    PurgeResponse, StatsResponse, SCHEMA_VERSION,
};

// ============================================================================
// Indexing Front End
// ============================================================================

use codetrail::dump::{discover_dumps, load_dump, write_dump, DUMP_EXTENSION};
use codetrail::pipeline::{IndexingReport, IndexingRun, IndexingUnit};

// ============================================================================
// Test
// ============================================================================

#[test]
fn api_surface_compiles() {
    // The imports above form the public API contract.
    // Any change that breaks these imports is a breaking change.
    let _ = std::any::type_name::<IntermediateStorage>();
    let _ = std::any::type_name::<SqliteIndexStorage>();
    let _ = std::any::type_name::<StorageProvider>();
    let _ = std::any::type_name::<LockedStorage<IntermediateStorage>>();
    let _ = std::any::type_name::<IndexingRun>();
    let _ = std::any::type_name::<ResolvedConfig>();
    let _ = std::any::type_name::<ErrorResponse>();
}

#[test]
fn schema_version_is_stable() {
    // The schema version is part of the public API contract
    assert_eq!(SCHEMA_VERSION, "1");
}
