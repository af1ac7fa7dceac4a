//! Core infrastructure for codetrail.
//!
//! This crate provides the storage layer of the indexer:
//! - Index record types and their identity keys
//! - The in-memory intermediate storage filled by producers
//! - The `Storage` trait and the id-remapping `inject` merge
//! - The pending-storage provider and consolidation steps
//! - The persistent SQLite index database
//! - Error types, error codes and layered configuration
//! - JSON output types for CLI responses

pub mod config;
pub mod consolidate;
pub mod error;
pub mod intermediate;
pub mod output;
pub mod provider;
pub mod sqlite;
pub mod storage;
pub mod types;
