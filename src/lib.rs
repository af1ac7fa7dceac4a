//! Codetrail: merge per-translation-unit code index fragments into one
//! persistent SQLite index.
//!
//! Language indexers produce one intermediate storage per translation unit.
//! An indexing run merges them in parallel and injects the result into the
//! index database, remapping every storage-local id on the way.

// Core infrastructure - re-exported from codetrail-core
pub use codetrail_core::config;
pub use codetrail_core::consolidate;
pub use codetrail_core::error;
pub use codetrail_core::intermediate;
pub use codetrail_core::output;
pub use codetrail_core::provider;
pub use codetrail_core::sqlite;
pub use codetrail_core::storage;
pub use codetrail_core::types;

// Indexing front end
pub mod dump;
pub mod pipeline;
