//! Index database behavior across reopen, re-index and mode changes.

use std::path::Path;

use codetrail_core::error::StorageError;
use codetrail_core::intermediate::IntermediateStorage;
use codetrail_core::sqlite::{SqliteIndexStorage, StorageMode, STORAGE_VERSION};
use codetrail_core::storage::{LockedStorage, Storage};
use codetrail_core::types::{
    Edge, EdgeKind, File, LocationKind, Node, NodeKind, Occurrence, SourceLocation,
};
use tempfile::TempDir;

/// `path` defines `function`, which calls every name in `callees`.
fn unit(path: &str, function: &str, callees: &[&str]) -> IntermediateStorage {
    let mut storage = IntermediateStorage::new();
    let file = storage.add_node(&Node::new(NodeKind::File, path));
    storage.add_file(&File::new(file, path).with_line_count(10));
    let caller = storage.add_node(&Node::new(NodeKind::Function, function));
    let definition =
        storage.add_source_location(&SourceLocation::new(file, (1, 1), (1, 8), LocationKind::Token));
    storage.add_occurrence(Occurrence::new(caller, definition));
    for (line, callee) in callees.iter().enumerate() {
        let target = storage.add_node(&Node::new(NodeKind::Function, *callee));
        let call = storage.add_edge(&Edge::new(EdgeKind::Call, caller, target));
        let site = storage.add_source_location(&SourceLocation::new(
            file,
            (line as u32 + 2, 5),
            (line as u32 + 2, 9),
            LocationKind::Token,
        ));
        storage.add_occurrences(&[Occurrence::new(target, site), Occurrence::new(call, site)]);
    }
    storage
}

fn open(path: &Path) -> SqliteIndexStorage {
    SqliteIndexStorage::open(path, StorageMode::READ_WRITE).unwrap()
}

#[test]
fn content_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index.sqlite");
    {
        let mut storage = open(&path);
        storage.inject(&unit("a.cpp", "main", &["helper"])).unwrap();
    }

    let storage = SqliteIndexStorage::open(&path, StorageMode::READ).unwrap();
    let main = storage.get_node_by_serialized_name("main").unwrap().unwrap();
    let calls = storage.get_edges_by_source_id(main.id).unwrap();
    assert_eq!(calls.len(), 1);
    let helper = storage.get_node_by_id(calls[0].target_id).unwrap().unwrap();
    assert_eq!(helper.serialized_name, "helper");
}

#[test]
fn reinjecting_after_reopen_reuses_ids() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index.sqlite");
    let first_ids = {
        let mut storage = open(&path);
        storage.inject(&unit("a.cpp", "main", &["helper"])).unwrap();
        storage.get_all_nodes().unwrap()
    };

    let mut storage = open(&path);
    storage.inject(&unit("a.cpp", "main", &["helper"])).unwrap();
    assert_eq!(storage.get_all_nodes().unwrap(), first_ids);
    assert_eq!(storage.get_stats().unwrap().edge_count, 1);
}

#[test]
fn incremental_reindex_replaces_one_file() {
    let dir = TempDir::new().unwrap();
    let mut storage = open(&dir.path().join("index.sqlite"));
    storage.inject(&unit("a.cpp", "main", &["helper", "log"])).unwrap();
    storage.inject(&unit("b.cpp", "worker", &["helper"])).unwrap();

    // a.cpp changed: main no longer calls log.
    let a_file = storage.get_file_by_path("a.cpp").unwrap().unwrap().id;
    storage.remove_elements_with_location_in_files(&[a_file]).unwrap();
    assert!(storage.get_node_by_serialized_name("log").unwrap().is_none());
    assert!(storage.get_node_by_serialized_name("helper").unwrap().is_some());

    storage.inject(&unit("a.cpp", "main", &["helper"])).unwrap();
    let stats = storage.get_stats().unwrap();
    // a.cpp, b.cpp, main, worker, helper
    assert_eq!(stats.node_count, 5);
    assert_eq!(stats.edge_count, 2);
    let helper = storage.get_node_by_serialized_name("helper").unwrap().unwrap();
    assert_eq!(storage.get_edges_by_target_id(helper.id).unwrap().len(), 2);
}

#[test]
fn stale_version_is_rebuilt_only_for_writers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index.sqlite");
    {
        let mut storage = open(&path);
        storage.inject(&unit("a.cpp", "main", &[])).unwrap();
    }
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE meta SET value = ?1 WHERE key = 'storage_version'",
            [(STORAGE_VERSION + 1).to_string()],
        )
        .unwrap();
    }

    match SqliteIndexStorage::open(&path, StorageMode::READ) {
        Err(StorageError::VersionMismatch { found, expected }) => {
            assert_eq!(found, STORAGE_VERSION + 1);
            assert_eq!(expected, STORAGE_VERSION);
        }
        other => panic!("expected version mismatch, got {:?}", other.map(|_| ())),
    }

    let storage = open(&path);
    assert!(storage.was_rebuilt());
    assert!(storage.is_empty().unwrap());
}

#[test]
fn locked_destination_switches_modes_around_a_run() {
    let dir = TempDir::new().unwrap();
    let mut storage = open(&dir.path().join("index.sqlite"));
    storage.set_mode(StorageMode::WRITE).unwrap();

    let destination = LockedStorage::new(storage);
    destination.inject(&unit("a.cpp", "main", &["helper"])).unwrap();
    destination.inject(&unit("b.cpp", "main", &["other"])).unwrap();

    let mut storage = destination.into_inner();
    storage.set_mode(StorageMode::READ).unwrap();
    assert_eq!(storage.mode(), StorageMode::READ);
    assert_eq!(storage.get_all_files().unwrap().len(), 2);
    assert!(storage
        .add_node(&Node::new(NodeKind::Function, "late"))
        .is_err());
}
