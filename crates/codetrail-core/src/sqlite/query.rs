//! Read access to the index database.

use rusqlite::{OptionalExtension, Row};
use serde::Serialize;

use super::{kind_column, SqliteIndexStorage};
use crate::error::StorageResult;
use crate::types::{
    AccessKind, CommentLocation, ComponentAccess, DefinitionKind, Edge, EdgeKind, ErrorRecord,
    File, Id, LocalSymbol, LocationKind, Node, NodeKind, Occurrence, SourceLocation, Symbol,
};

pub(crate) const NODE_COLUMNS: &str = "id, type, serialized_name";
pub(crate) const FILE_COLUMNS: &str =
    "id, path, language, modification_time, indexed, complete, line_count";
pub(crate) const EDGE_COLUMNS: &str = "id, type, source_node_id, target_node_id";
pub(crate) const SOURCE_LOCATION_COLUMNS: &str =
    "id, file_node_id, start_line, start_column, end_line, end_column, type";
pub(crate) const ERROR_COLUMNS: &str =
    "id, message, file_path, line, column_number, translation_unit, fatal, indexed";

// ============================================================================
// Row Mapping
// ============================================================================

pub(crate) fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    Ok(Node {
        id: row.get(0)?,
        kind: kind_column(row, 1, NodeKind::from_code)?,
        serialized_name: row.get(2)?,
    })
}

pub(crate) fn file_from_row(row: &Row<'_>) -> rusqlite::Result<File> {
    Ok(File {
        id: row.get(0)?,
        path: row.get(1)?,
        language: row.get(2)?,
        modification_time: row.get(3)?,
        indexed: row.get(4)?,
        complete: row.get(5)?,
        line_count: row.get(6)?,
    })
}

pub(crate) fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<Edge> {
    Ok(Edge {
        id: row.get(0)?,
        kind: kind_column(row, 1, EdgeKind::from_code)?,
        source_id: row.get(2)?,
        target_id: row.get(3)?,
    })
}

pub(crate) fn source_location_from_row(row: &Row<'_>) -> rusqlite::Result<SourceLocation> {
    Ok(SourceLocation {
        id: row.get(0)?,
        file_id: row.get(1)?,
        start_line: row.get(2)?,
        start_column: row.get(3)?,
        end_line: row.get(4)?,
        end_column: row.get(5)?,
        kind: kind_column(row, 6, LocationKind::from_code)?,
    })
}

pub(crate) fn error_from_row(row: &Row<'_>) -> rusqlite::Result<ErrorRecord> {
    Ok(ErrorRecord {
        id: row.get(0)?,
        message: row.get(1)?,
        file_path: row.get(2)?,
        line: row.get(3)?,
        column: row.get(4)?,
        translation_unit: row.get(5)?,
        fatal: row.get(6)?,
        indexed: row.get(7)?,
    })
}

// ============================================================================
// Statistics
// ============================================================================

/// Record counts of an index database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub node_count: u64,
    pub edge_count: u64,
    pub file_count: u64,
    pub completed_file_count: u64,
    pub file_line_sum: u64,
    pub source_location_count: u64,
    pub occurrence_count: u64,
    pub error_count: u64,
    pub fatal_error_count: u64,
}

// ============================================================================
// Queries
// ============================================================================

impl SqliteIndexStorage {
    fn count(&self, sql: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn collect<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> StorageResult<Vec<T>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, map)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Run a single-id query for every id in `ids`, concatenating results.
    fn collect_for_ids<T>(
        &self,
        sql: &str,
        ids: &[Id],
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> StorageResult<Vec<T>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let mut out = Vec::new();
        for id in ids {
            let rows = stmt.query_map([id], map)?;
            for row in rows {
                out.push(row?);
            }
        }
        Ok(out)
    }

    pub fn get_stats(&self) -> StorageResult<StorageStats> {
        Ok(StorageStats {
            node_count: self.count("SELECT COUNT(*) FROM node")?,
            edge_count: self.count("SELECT COUNT(*) FROM edge")?,
            file_count: self.count("SELECT COUNT(*) FROM file")?,
            completed_file_count: self.count("SELECT COUNT(*) FROM file WHERE complete = 1")?,
            file_line_sum: self.count("SELECT COALESCE(SUM(line_count), 0) FROM file")?,
            source_location_count: self.count("SELECT COUNT(*) FROM source_location")?,
            occurrence_count: self.count("SELECT COUNT(*) FROM occurrence")?,
            error_count: self.count("SELECT COUNT(*) FROM error")?,
            fatal_error_count: self.count("SELECT COUNT(*) FROM error WHERE fatal = 1")?,
        })
    }

    /// True if the database holds neither nodes nor errors.
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.count("SELECT COUNT(*) FROM node")? == 0
            && self.count("SELECT COUNT(*) FROM error")? == 0)
    }

    // ---- nodes ----

    pub fn get_node_by_id(&self, id: Id) -> StorageResult<Option<Node>> {
        Ok(self
            .conn
            .prepare_cached(&format!("SELECT {} FROM node WHERE id = ?1", NODE_COLUMNS))?
            .query_row([id], node_from_row)
            .optional()?)
    }

    pub fn get_node_by_serialized_name(&self, name: &str) -> StorageResult<Option<Node>> {
        Ok(self
            .conn
            .prepare_cached(&format!(
                "SELECT {} FROM node WHERE serialized_name = ?1",
                NODE_COLUMNS
            ))?
            .query_row([name], node_from_row)
            .optional()?)
    }

    pub fn get_all_nodes(&self) -> StorageResult<Vec<Node>> {
        self.collect(
            &format!("SELECT {} FROM node ORDER BY id", NODE_COLUMNS),
            [],
            node_from_row,
        )
    }

    pub fn get_symbol_by_id(&self, id: Id) -> StorageResult<Option<Symbol>> {
        Ok(self
            .conn
            .prepare_cached("SELECT id, definition_kind FROM symbol WHERE id = ?1")?
            .query_row([id], |row| {
                Ok(Symbol {
                    id: row.get(0)?,
                    definition_kind: kind_column(row, 1, DefinitionKind::from_code)?,
                })
            })
            .optional()?)
    }

    pub fn get_all_local_symbols(&self) -> StorageResult<Vec<LocalSymbol>> {
        self.collect("SELECT id, name FROM local_symbol ORDER BY id", [], |row| {
            Ok(LocalSymbol {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })
    }

    // ---- files ----

    pub fn get_file_by_path(&self, path: &str) -> StorageResult<Option<File>> {
        Ok(self
            .conn
            .prepare_cached(&format!("SELECT {} FROM file WHERE path = ?1", FILE_COLUMNS))?
            .query_row([path], file_from_row)
            .optional()?)
    }

    pub fn get_all_files(&self) -> StorageResult<Vec<File>> {
        self.collect(
            &format!("SELECT {} FROM file ORDER BY path", FILE_COLUMNS),
            [],
            file_from_row,
        )
    }

    // ---- edges ----

    pub fn get_edge_by_id(&self, id: Id) -> StorageResult<Option<Edge>> {
        Ok(self
            .conn
            .prepare_cached(&format!("SELECT {} FROM edge WHERE id = ?1", EDGE_COLUMNS))?
            .query_row([id], edge_from_row)
            .optional()?)
    }

    pub fn get_edges_by_source_id(&self, source_id: Id) -> StorageResult<Vec<Edge>> {
        self.collect(
            &format!(
                "SELECT {} FROM edge WHERE source_node_id = ?1 ORDER BY id",
                EDGE_COLUMNS
            ),
            [source_id],
            edge_from_row,
        )
    }

    pub fn get_edges_by_target_id(&self, target_id: Id) -> StorageResult<Vec<Edge>> {
        self.collect(
            &format!(
                "SELECT {} FROM edge WHERE target_node_id = ?1 ORDER BY id",
                EDGE_COLUMNS
            ),
            [target_id],
            edge_from_row,
        )
    }

    pub fn get_edges_by_kind(&self, kind: EdgeKind) -> StorageResult<Vec<Edge>> {
        self.collect(
            &format!("SELECT {} FROM edge WHERE type = ?1 ORDER BY id", EDGE_COLUMNS),
            [kind.code()],
            edge_from_row,
        )
    }

    pub fn get_all_edges(&self) -> StorageResult<Vec<Edge>> {
        self.collect(
            &format!("SELECT {} FROM edge ORDER BY id", EDGE_COLUMNS),
            [],
            edge_from_row,
        )
    }

    // ---- locations ----

    pub fn get_source_locations_for_file(&self, file_id: Id) -> StorageResult<Vec<SourceLocation>> {
        self.collect(
            &format!(
                "SELECT {} FROM source_location WHERE file_node_id = ?1
                 ORDER BY start_line, start_column, end_line, end_column",
                SOURCE_LOCATION_COLUMNS
            ),
            [file_id],
            source_location_from_row,
        )
    }

    pub fn get_occurrences_for_element_ids(&self, ids: &[Id]) -> StorageResult<Vec<Occurrence>> {
        self.collect_for_ids(
            "SELECT element_id, source_location_id FROM occurrence WHERE element_id = ?1",
            ids,
            occurrence_from_row,
        )
    }

    pub fn get_occurrences_for_location_ids(&self, ids: &[Id]) -> StorageResult<Vec<Occurrence>> {
        self.collect_for_ids(
            "SELECT element_id, source_location_id FROM occurrence WHERE source_location_id = ?1",
            ids,
            occurrence_from_row,
        )
    }

    pub fn get_component_accesses_by_node_ids(
        &self,
        ids: &[Id],
    ) -> StorageResult<Vec<ComponentAccess>> {
        self.collect_for_ids(
            "SELECT node_id, type FROM component_access WHERE node_id = ?1",
            ids,
            |row| {
                Ok(ComponentAccess {
                    node_id: row.get(0)?,
                    kind: kind_column(row, 1, AccessKind::from_code)?,
                })
            },
        )
    }

    pub fn get_comment_locations_for_file(
        &self,
        file_id: Id,
    ) -> StorageResult<Vec<CommentLocation>> {
        self.collect(
            "SELECT file_node_id, start_line, start_column, end_line, end_column
             FROM comment_location WHERE file_node_id = ?1 ORDER BY start_line, start_column",
            [file_id],
            |row| {
                Ok(CommentLocation {
                    file_id: row.get(0)?,
                    start_line: row.get(1)?,
                    start_column: row.get(2)?,
                    end_line: row.get(3)?,
                    end_column: row.get(4)?,
                })
            },
        )
    }

    // ---- errors ----

    /// Every stored error, fatal ones first.
    pub fn get_errors(&self) -> StorageResult<Vec<ErrorRecord>> {
        self.collect(
            &format!(
                "SELECT {} FROM error ORDER BY fatal DESC, file_path, line, column_number, id",
                ERROR_COLUMNS
            ),
            [],
            error_from_row,
        )
    }
}

fn occurrence_from_row(row: &Row<'_>) -> rusqlite::Result<Occurrence> {
    Ok(Occurrence {
        element_id: row.get(0)?,
        source_location_id: row.get(1)?,
    })
}

// ============================================================================
// Tests
// ============================================================================
