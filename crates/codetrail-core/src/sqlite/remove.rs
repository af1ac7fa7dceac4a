//! Removal of stale index content before a file is re-indexed.

use rusqlite::{params, TransactionBehavior};
use tracing::{debug, info};

use super::SqliteIndexStorage;
use crate::error::StorageResult;
use crate::types::Id;

/// Collect everything that occurs in the marked files, then keep whatever is
/// still referenced from elsewhere.
const REMOVE_ELEMENTS_IN_FILES: &str = r#"
INSERT OR IGNORE INTO element_id_to_clear(id)
    SELECT DISTINCT occurrence.element_id
    FROM occurrence
    JOIN source_location ON occurrence.source_location_id = source_location.id
    WHERE source_location.file_node_id IN (SELECT id FROM file_id_to_clear);

DELETE FROM element WHERE id IN (
    SELECT element_id_to_clear.id FROM element_id_to_clear
    JOIN edge ON element_id_to_clear.id = edge.id);

DELETE FROM element WHERE id IN (
    SELECT id FROM edge WHERE source_node_id IN (SELECT id FROM element_id_to_clear));

DELETE FROM element_id_to_clear WHERE id NOT IN (SELECT id FROM element);
DELETE FROM element_id_to_clear WHERE id IN (SELECT id FROM file);

DELETE FROM source_location WHERE file_node_id IN (SELECT id FROM file_id_to_clear);
DELETE FROM comment_location WHERE file_node_id IN (SELECT id FROM file_id_to_clear);

DELETE FROM element_id_to_clear WHERE id IN (SELECT element_id FROM occurrence);
DELETE FROM element_id_to_clear WHERE id IN (SELECT target_node_id FROM edge);

DELETE FROM element WHERE id IN (SELECT id FROM element_id_to_clear);
"#;

impl SqliteIndexStorage {
    /// Delete one element (node, edge, local symbol or error) with
    /// everything attached to it.
    pub fn remove_element(&mut self, id: Id) -> StorageResult<usize> {
        self.remove_elements(&[id])
    }

    /// Delete elements with everything attached to them. Edges touching a
    /// removed node go too. Returns the number of elements removed.
    pub fn remove_elements(&mut self, ids: &[Id]) -> StorageResult<usize> {
        self.require_write("remove elements")?;
        if ids.is_empty() {
            return Ok(0);
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut removed = 0;
        {
            let mut edges = tx.prepare(
                "DELETE FROM element WHERE id IN (
                     SELECT id FROM edge WHERE source_node_id = ?1 OR target_node_id = ?1)",
            )?;
            let mut elements = tx.prepare("DELETE FROM element WHERE id = ?1")?;
            for id in ids {
                edges.execute([id])?;
                removed += elements.execute([id])?;
            }
        }
        tx.commit()?;

        self.temp.clear();
        debug!(requested = ids.len(), removed, "elements removed");
        Ok(removed)
    }

    /// Remove everything that only exists because of `file_ids`.
    ///
    /// Locations and comments in the files are deleted, and so is every
    /// element that occurred there unless another file still references it
    /// (by an occurrence or as an edge target). Edges whose source occurred
    /// in the files are deleted. File nodes themselves are kept.
    pub fn remove_elements_with_location_in_files(&mut self, file_ids: &[Id]) -> StorageResult<()> {
        self.require_write("remove elements in files")?;
        if file_ids.is_empty() {
            return Ok(());
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(
            "DROP TABLE IF EXISTS temp.file_id_to_clear;
             DROP TABLE IF EXISTS temp.element_id_to_clear;
             CREATE TEMP TABLE file_id_to_clear(id INTEGER PRIMARY KEY);
             CREATE TEMP TABLE element_id_to_clear(id INTEGER PRIMARY KEY);",
        )?;
        {
            let mut mark = tx.prepare("INSERT OR IGNORE INTO file_id_to_clear(id) VALUES (?1)")?;
            for id in file_ids {
                mark.execute([id])?;
            }
        }
        tx.execute_batch(REMOVE_ELEMENTS_IN_FILES)?;
        tx.execute_batch(
            "DROP TABLE temp.file_id_to_clear;
             DROP TABLE temp.element_id_to_clear;",
        )?;
        tx.commit()?;

        self.temp.clear();
        info!(files = file_ids.len(), "removed elements located in files");
        Ok(())
    }

    /// Delete every stored error.
    pub fn remove_all_errors(&mut self) -> StorageResult<usize> {
        self.require_write("remove errors")?;
        let removed = self
            .conn
            .execute("DELETE FROM element WHERE id IN (SELECT id FROM error)", [])?;
        self.temp.errors = None;
        debug!(removed, "all errors removed");
        Ok(removed)
    }

    /// Delete the errors reported in any of `paths`.
    pub fn remove_errors_in_files(&mut self, paths: &[String]) -> StorageResult<usize> {
        self.require_write("remove errors")?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare(
                "DELETE FROM element WHERE id IN (SELECT id FROM error WHERE file_path = ?1)",
            )?;
            for path in paths {
                removed += stmt.execute(params![path])?;
            }
        }
        tx.commit()?;
        self.temp.errors = None;
        debug!(files = paths.len(), removed, "errors removed");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::StorageMode;
    use crate::storage::Storage;
    use crate::types::{
        CommentLocation, Edge, EdgeKind, ErrorRecord, File, LocationKind, Node, NodeKind,
        Occurrence, SourceLocation,
    };

    struct Fixture {
        storage: SqliteIndexStorage,
        a_file: Id,
        b_file: Id,
        shared: Id,
        only_a: Id,
        caller: Id,
    }

    fn located(storage: &mut SqliteIndexStorage, element: Id, file: Id, line: u32) {
        let location = storage
            .add_source_location(&SourceLocation::new(
                file,
                (line, 1),
                (line, 4),
                LocationKind::Token,
            ))
            .unwrap();
        storage
            .add_occurrence(&Occurrence::new(element, location))
            .unwrap();
    }

    /// `shared` occurs in a.cpp and b.cpp, `only_a` in a.cpp, and `caller`
    /// (in a.cpp) calls `shared`.
    fn fixture() -> Fixture {
        let mut storage = SqliteIndexStorage::open_in_memory(StorageMode::READ_WRITE).unwrap();
        let a_file = storage.add_node(&Node::new(NodeKind::File, "a.cpp")).unwrap();
        storage.add_file(&File::new(a_file, "a.cpp")).unwrap();
        let b_file = storage.add_node(&Node::new(NodeKind::File, "b.cpp")).unwrap();
        storage.add_file(&File::new(b_file, "b.cpp")).unwrap();

        let shared = storage.add_node(&Node::new(NodeKind::Function, "shared")).unwrap();
        let only_a = storage.add_node(&Node::new(NodeKind::Function, "only_a")).unwrap();
        let caller = storage.add_node(&Node::new(NodeKind::Function, "caller")).unwrap();
        let call = storage
            .add_edge(&Edge::new(EdgeKind::Call, caller, shared))
            .unwrap();

        located(&mut storage, shared, a_file, 1);
        located(&mut storage, shared, b_file, 1);
        located(&mut storage, only_a, a_file, 2);
        located(&mut storage, caller, a_file, 3);
        located(&mut storage, call, a_file, 4);
        storage
            .add_comment_location(&CommentLocation::new(a_file, (9, 1), (9, 10)))
            .unwrap();

        Fixture {
            storage,
            a_file,
            b_file,
            shared,
            only_a,
            caller,
        }
    }

    #[test]
    fn remove_elements_in_file_keeps_shared() {
        let Fixture {
            mut storage,
            a_file,
            b_file,
            shared,
            only_a,
            caller,
        } = fixture();

        storage
            .remove_elements_with_location_in_files(&[a_file])
            .unwrap();

        assert!(storage.get_node_by_id(shared).unwrap().is_some());
        assert!(storage.get_node_by_id(only_a).unwrap().is_none());
        assert!(storage.get_node_by_id(caller).unwrap().is_none());
        assert!(storage.get_all_edges().unwrap().is_empty());
        assert!(storage.get_source_locations_for_file(a_file).unwrap().is_empty());
        assert!(storage.get_comment_locations_for_file(a_file).unwrap().is_empty());
        assert_eq!(storage.get_source_locations_for_file(b_file).unwrap().len(), 1);
        // File nodes survive.
        assert_eq!(storage.get_all_files().unwrap().len(), 2);
    }

    #[test]
    fn reindex_after_removal_reuses_nothing_stale() {
        let Fixture {
            mut storage,
            a_file,
            ..
        } = fixture();
        storage
            .remove_elements_with_location_in_files(&[a_file])
            .unwrap();

        let again = storage.add_node(&Node::new(NodeKind::Function, "only_a")).unwrap();
        assert!(storage.get_node_by_id(again).unwrap().is_some());
    }

    #[test]
    fn removing_a_node_removes_its_edges() {
        let Fixture {
            mut storage,
            shared,
            ..
        } = fixture();
        assert_eq!(storage.remove_element(shared).unwrap(), 1);
        assert!(storage.get_all_edges().unwrap().is_empty());
        assert_eq!(storage.get_stats().unwrap().node_count, 4);
    }

    #[test]
    fn remove_errors() {
        let mut storage = SqliteIndexStorage::open_in_memory(StorageMode::READ_WRITE).unwrap();
        storage
            .add_error(&ErrorRecord::new("a", "a.cpp").with_location("a.cpp", 1, 1))
            .unwrap();
        storage
            .add_error(&ErrorRecord::new("b", "b.cpp").with_location("b.h", 1, 1))
            .unwrap();
        storage
            .add_error(&ErrorRecord::new("c", "c.cpp").with_location("c.cpp", 1, 1))
            .unwrap();

        assert_eq!(
            storage
                .remove_errors_in_files(&["b.h".to_string(), "missing.cpp".to_string()])
                .unwrap(),
            1
        );
        assert_eq!(storage.get_errors().unwrap().len(), 2);
        assert_eq!(storage.remove_all_errors().unwrap(), 2);
        assert!(storage.get_errors().unwrap().is_empty());

        // The error lookup was reset, so a re-reported error is stored again.
        storage
            .add_error(&ErrorRecord::new("a", "a.cpp").with_location("a.cpp", 1, 1))
            .unwrap();
        assert_eq!(storage.get_errors().unwrap().len(), 1);
    }
}
