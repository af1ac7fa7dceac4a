//! Persistent index storage on SQLite.
//!
//! [`SqliteIndexStorage`] is the final destination of an indexing run. It
//! implements [`Storage`] with the same identity rules as the in-memory
//! storage, so the merge engine can inject into it directly. Ids for nodes,
//! edges, local symbols and errors come from one `element` table; source
//! locations have their own id sequence.
//!
//! Identity lookups during a merge go through in-memory temp indices that
//! are loaded lazily from the database (whole tables for nodes, edges, local
//! symbols and errors; one file at a time for source locations). They are
//! dropped whenever the database changes behind them: on abort, removal and
//! clear.

mod query;
mod remove;
mod schema;

use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::path::{Path, PathBuf};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::storage::Storage;
use crate::types::{
    CommentLocation, ComponentAccess, Edge, EdgeKey, ErrorKey, ErrorRecord, File, Id, LocalSymbol,
    Node, NodeKind, Occurrence, SourceLocation, SourceLocationKey, Symbol,
};

pub use query::StorageStats;
pub use schema::STORAGE_VERSION;

// ============================================================================
// Storage Mode
// ============================================================================

/// Access mode flags of a [`SqliteIndexStorage`].
///
/// `WRITE` allows mutations, `READ` keeps lookup indices, `CLEAR` wipes the
/// database on open.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageMode(u8);

impl StorageMode {
    pub const NONE: StorageMode = StorageMode(0);
    pub const READ: StorageMode = StorageMode(1);
    pub const WRITE: StorageMode = StorageMode(2);
    pub const CLEAR: StorageMode = StorageMode(4);
    pub const READ_WRITE: StorageMode = StorageMode(1 | 2);

    /// True if every flag of `other` is set.
    pub fn contains(self, other: StorageMode) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any flag of `other` is set.
    pub fn intersects(self, other: StorageMode) -> bool {
        self.0 & other.0 != 0
    }

    /// Mutations are allowed (`WRITE` or `CLEAR`).
    pub fn is_writable(self) -> bool {
        self.intersects(StorageMode::WRITE | StorageMode::CLEAR)
    }
}

impl BitOr for StorageMode {
    type Output = StorageMode;

    fn bitor(self, rhs: StorageMode) -> StorageMode {
        StorageMode(self.0 | rhs.0)
    }
}

impl fmt::Debug for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        for (flag, name) in [
            (StorageMode::READ, "READ"),
            (StorageMode::WRITE, "WRITE"),
            (StorageMode::CLEAR, "CLEAR"),
        ] {
            if self.contains(flag) {
                names.push(name);
            }
        }
        if names.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

// ============================================================================
// Column Conversions
// ============================================================================

impl ToSql for Id {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let raw = i64::try_from(self.0)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        Ok(ToSqlOutput::from(raw))
    }
}

impl FromSql for Id {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = i64::column_result(value)?;
        u64::try_from(raw)
            .map(Id)
            .map_err(|_| FromSqlError::OutOfRange(raw))
    }
}

/// Read an integer kind code from column `idx`.
pub(crate) fn kind_column<K>(
    row: &Row<'_>,
    idx: usize,
    from_code: fn(i64) -> Option<K>,
) -> rusqlite::Result<K> {
    let code: i64 = row.get(idx)?;
    from_code(code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("unknown kind code {}", code).into(),
        )
    })
}

// ============================================================================
// Temp Indices
// ============================================================================

/// Identity lookups used while writing. `None` means not loaded yet.
#[derive(Debug, Default)]
struct TempIndices {
    nodes: Option<HashMap<String, (Id, NodeKind)>>,
    edges: Option<HashMap<EdgeKey, Id>>,
    local_symbols: Option<HashMap<String, Id>>,
    errors: Option<HashMap<ErrorKey, Id>>,
    /// Loaded per file id.
    source_locations: HashMap<Id, HashMap<SourceLocationKey, Id>>,
}

impl TempIndices {
    fn clear(&mut self) {
        *self = TempIndices::default();
    }
}

fn ensure_loaded<T: Default>(
    slot: &mut Option<T>,
    load: impl FnOnce() -> StorageResult<T>,
) -> StorageResult<&mut T> {
    if slot.is_none() {
        *slot = Some(load()?);
    }
    Ok(slot.get_or_insert_with(T::default))
}

fn load_node_index(conn: &Connection) -> StorageResult<HashMap<String, (Id, NodeKind)>> {
    let mut stmt = conn.prepare("SELECT id, type, serialized_name FROM node")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(2)?,
            (row.get(0)?, kind_column(row, 1, NodeKind::from_code)?),
        ))
    })?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

fn load_edge_index(conn: &Connection) -> StorageResult<HashMap<EdgeKey, Id>> {
    let mut stmt = conn.prepare("SELECT id, type, source_node_id, target_node_id FROM edge")?;
    let rows = stmt.query_map([], query::edge_from_row)?;
    let mut index = HashMap::new();
    for edge in rows {
        let edge = edge?;
        index.insert(edge.key(), edge.id);
    }
    Ok(index)
}

fn load_local_symbol_index(conn: &Connection) -> StorageResult<HashMap<String, Id>> {
    let mut stmt = conn.prepare("SELECT id, name FROM local_symbol")?;
    let rows = stmt.query_map([], |row| Ok((row.get(1)?, row.get(0)?)))?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

fn load_error_index(conn: &Connection) -> StorageResult<HashMap<ErrorKey, Id>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM error", query::ERROR_COLUMNS))?;
    let rows = stmt.query_map([], query::error_from_row)?;
    let mut index = HashMap::new();
    for error in rows {
        let error = error?;
        index.insert(error.key(), error.id);
    }
    Ok(index)
}

fn load_source_location_index(
    conn: &Connection,
    file_id: Id,
) -> StorageResult<HashMap<SourceLocationKey, Id>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM source_location WHERE file_node_id = ?1",
        query::SOURCE_LOCATION_COLUMNS
    ))?;
    let rows = stmt.query_map([file_id], query::source_location_from_row)?;
    let mut index = HashMap::new();
    for location in rows {
        let location = location?;
        index.insert(location.key(), location.id);
    }
    Ok(index)
}

fn insert_element(conn: &Connection) -> StorageResult<Id> {
    conn.prepare_cached("INSERT INTO element DEFAULT VALUES")?
        .execute([])?;
    Ok(Id(conn.last_insert_rowid() as u64))
}

fn node_exists(conn: &Connection, id: Id) -> StorageResult<bool> {
    Ok(conn
        .prepare_cached("SELECT 1 FROM node WHERE id = ?1")?
        .query_row([id], |_| Ok(()))
        .optional()?
        .is_some())
}

// ============================================================================
// SqliteIndexStorage
// ============================================================================

/// The persistent index database.
pub struct SqliteIndexStorage {
    conn: Connection,
    path: PathBuf,
    mode: StorageMode,
    rebuilt: bool,
    in_injection: bool,
    temp: TempIndices,
}

impl fmt::Debug for SqliteIndexStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteIndexStorage")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("rebuilt", &self.rebuilt)
            .finish()
    }
}

impl SqliteIndexStorage {
    /// Open (or create) the database at `path`.
    ///
    /// A writable open of a database with another schema version rebuilds
    /// it empty and reports [`was_rebuilt`](Self::was_rebuilt); a read-only
    /// open fails with [`StorageError::VersionMismatch`].
    pub fn open(path: &Path, mode: StorageMode) -> StorageResult<Self> {
        let conn = Connection::open(path).map_err(|e| StorageError::Open {
            path: path.to_path_buf(),
            reason: format!("failed to open database: {}", e),
        })?;
        Self::with_connection(conn, path.to_path_buf(), mode)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory(mode: StorageMode) -> StorageResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StorageError::Open {
            path: PathBuf::from(":memory:"),
            reason: format!("failed to open in-memory database: {}", e),
        })?;
        Self::with_connection(conn, PathBuf::from(":memory:"), mode)
    }

    fn with_connection(conn: Connection, path: PathBuf, mode: StorageMode) -> StorageResult<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| StorageError::Open {
            path: path.clone(),
            reason: format!("failed to configure database: {}", e),
        })?;

        let mut storage = SqliteIndexStorage {
            conn,
            path,
            mode,
            rebuilt: false,
            in_injection: false,
            temp: TempIndices::default(),
        };
        storage.setup()?;
        info!(path = %storage.path.display(), ?mode, "index database opened");
        Ok(storage)
    }

    fn setup(&mut self) -> StorageResult<()> {
        let writable = self.mode.is_writable();
        if self.mode.contains(StorageMode::CLEAR) {
            self.recreate()?;
        }

        match self.stored_version()? {
            Some(found) if found == STORAGE_VERSION => {}
            None if writable => self.recreate()?,
            Some(found) if writable => {
                warn!(
                    found,
                    expected = STORAGE_VERSION,
                    "index database version mismatch, rebuilding"
                );
                self.recreate()?;
                self.rebuilt = true;
            }
            found => {
                return Err(StorageError::VersionMismatch {
                    found: found.unwrap_or(0),
                    expected: STORAGE_VERSION,
                })
            }
        }

        schema::apply_indices(&self.conn, self.mode)
    }

    fn recreate(&mut self) -> StorageResult<()> {
        schema::drop_tables(&self.conn)?;
        schema::create_tables(&self.conn)?;
        self.set_meta(schema::META_STORAGE_VERSION, &STORAGE_VERSION.to_string())?;
        self.temp.clear();
        Ok(())
    }

    fn stored_version(&self) -> StorageResult<Option<u32>> {
        if !schema::table_exists(&self.conn, "meta")? {
            return Ok(None);
        }
        let value = self.get_meta(schema::META_STORAGE_VERSION)?;
        Ok(value.map(|value| value.trim().parse().unwrap_or(0)))
    }

    fn get_meta(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn set_meta(&self, key: &str, value: &str) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO meta(key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn require_write(&self, operation: &str) -> StorageResult<()> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(StorageError::ReadOnly {
                operation: operation.to_string(),
            })
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Switch modes, creating and dropping indices to match.
    pub fn set_mode(&mut self, mode: StorageMode) -> StorageResult<()> {
        self.mode = mode;
        schema::apply_indices(&self.conn, mode)
    }

    /// True if opening found an incompatible schema and started over.
    pub fn was_rebuilt(&self) -> bool {
        self.rebuilt
    }

    /// Schema version this build reads and writes.
    pub fn get_static_version() -> u32 {
        STORAGE_VERSION
    }

    /// Drop every record and start from an empty schema.
    pub fn clear(&mut self) -> StorageResult<()> {
        self.require_write("clear")?;
        self.recreate()?;
        schema::apply_indices(&self.conn, self.mode)?;
        info!(path = %self.path.display(), "index database cleared");
        Ok(())
    }

    /// Store the project settings text the index was built with.
    pub fn set_project_settings_text(&mut self, text: &str) -> StorageResult<()> {
        self.require_write("store project settings")?;
        self.set_meta(schema::META_PROJECT_SETTINGS, text)
    }

    /// The stored project settings text, empty if never stored.
    pub fn get_project_settings_text(&self) -> StorageResult<String> {
        Ok(self
            .get_meta(schema::META_PROJECT_SETTINGS)?
            .unwrap_or_default())
    }
}

// ============================================================================
// Storage Implementation
// ============================================================================

impl Storage for SqliteIndexStorage {
    fn add_node(&mut self, node: &Node) -> StorageResult<Id> {
        self.require_write("add node")?;
        let conn = &self.conn;
        let index = ensure_loaded(&mut self.temp.nodes, || load_node_index(conn))?;

        if let Some(entry) = index.get_mut(&node.serialized_name) {
            if entry.1 < node.kind {
                conn.prepare_cached("UPDATE node SET type = ?1 WHERE id = ?2")?
                    .execute(params![node.kind.code(), entry.0])?;
                entry.1 = node.kind;
            }
            return Ok(entry.0);
        }

        let id = insert_element(conn)?;
        conn.prepare_cached("INSERT INTO node(id, type, serialized_name) VALUES (?1, ?2, ?3)")?
            .execute(params![id, node.kind.code(), node.serialized_name])?;
        index.insert(node.serialized_name.clone(), (id, node.kind));
        Ok(id)
    }

    fn add_file(&mut self, file: &File) -> StorageResult<()> {
        self.require_write("add file")?;
        if !node_exists(&self.conn, file.id)? {
            debug!(id = %file.id, path = %file.path, "file without node ignored");
            return Ok(());
        }
        self.conn
            .prepare_cached(
                "INSERT INTO file(id, path, language, modification_time, indexed, complete, line_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                     indexed = file.indexed OR excluded.indexed,
                     complete = file.complete OR excluded.complete,
                     language = CASE WHEN excluded.language != '' THEN excluded.language ELSE file.language END,
                     modification_time = CASE WHEN excluded.modification_time != ''
                         THEN excluded.modification_time ELSE file.modification_time END,
                     line_count = MAX(file.line_count, excluded.line_count)",
            )?
            .execute(params![
                file.id,
                file.path,
                file.language,
                file.modification_time,
                file.indexed,
                file.complete,
                file.line_count,
            ])?;
        Ok(())
    }

    fn add_symbol(&mut self, symbol: &Symbol) -> StorageResult<()> {
        self.require_write("add symbol")?;
        self.conn
            .prepare_cached(
                "INSERT OR IGNORE INTO symbol(id, definition_kind)
                 SELECT ?1, ?2 WHERE EXISTS (SELECT 1 FROM node WHERE id = ?1)",
            )?
            .execute(params![symbol.id, symbol.definition_kind.code()])?;
        Ok(())
    }

    fn add_edge(&mut self, edge: &Edge) -> StorageResult<Id> {
        self.require_write("add edge")?;
        let conn = &self.conn;
        let index = ensure_loaded(&mut self.temp.edges, || load_edge_index(conn))?;

        let key = edge.key();
        if let Some(&id) = index.get(&key) {
            return Ok(id);
        }
        if !node_exists(conn, edge.source_id)? || !node_exists(conn, edge.target_id)? {
            return Ok(Id::NONE);
        }

        let id = insert_element(conn)?;
        conn.prepare_cached(
            "INSERT INTO edge(id, type, source_node_id, target_node_id) VALUES (?1, ?2, ?3, ?4)",
        )?
        .execute(params![id, edge.kind.code(), edge.source_id, edge.target_id])?;
        index.insert(key, id);
        Ok(id)
    }

    fn add_local_symbol(&mut self, symbol: &LocalSymbol) -> StorageResult<Id> {
        self.require_write("add local symbol")?;
        let conn = &self.conn;
        let index = ensure_loaded(&mut self.temp.local_symbols, || {
            load_local_symbol_index(conn)
        })?;

        if let Some(&id) = index.get(&symbol.name) {
            return Ok(id);
        }
        let id = insert_element(conn)?;
        conn.prepare_cached("INSERT INTO local_symbol(id, name) VALUES (?1, ?2)")?
            .execute(params![id, symbol.name])?;
        index.insert(symbol.name.clone(), id);
        Ok(id)
    }

    fn add_source_location(&mut self, location: &SourceLocation) -> StorageResult<Id> {
        self.require_write("add source location")?;
        let conn = &self.conn;
        let file_id = location.file_id;

        if !self.temp.source_locations.contains_key(&file_id) {
            if !node_exists(conn, file_id)? {
                return Ok(Id::NONE);
            }
            let loaded = load_source_location_index(conn, file_id)?;
            self.temp.source_locations.insert(file_id, loaded);
        }
        let index = self.temp.source_locations.entry(file_id).or_default();

        let key = location.key();
        if let Some(&id) = index.get(&key) {
            return Ok(id);
        }
        conn.prepare_cached(
            "INSERT INTO source_location(file_node_id, start_line, start_column, end_line, end_column, type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?
        .execute(params![
            file_id,
            location.start_line,
            location.start_column,
            location.end_line,
            location.end_column,
            location.kind.code(),
        ])?;
        let id = Id(conn.last_insert_rowid() as u64);
        index.insert(key, id);
        Ok(id)
    }

    fn add_occurrences(&mut self, occurrences: &[Occurrence]) -> StorageResult<()> {
        self.require_write("add occurrences")?;
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR IGNORE INTO occurrence(element_id, source_location_id)
             SELECT ?1, ?2
             WHERE EXISTS (SELECT 1 FROM element WHERE id = ?1)
               AND EXISTS (SELECT 1 FROM source_location WHERE id = ?2)",
        )?;
        for occurrence in occurrences {
            stmt.execute(params![occurrence.element_id, occurrence.source_location_id])?;
        }
        Ok(())
    }

    fn add_component_access(&mut self, access: &ComponentAccess) -> StorageResult<()> {
        self.require_write("add component access")?;
        self.conn
            .prepare_cached(
                "INSERT OR IGNORE INTO component_access(node_id, type)
                 SELECT ?1, ?2 WHERE EXISTS (SELECT 1 FROM node WHERE id = ?1)",
            )?
            .execute(params![access.node_id, access.kind.code()])?;
        Ok(())
    }

    fn add_comment_location(&mut self, location: &CommentLocation) -> StorageResult<()> {
        self.require_write("add comment location")?;
        self.conn
            .prepare_cached(
                "INSERT OR IGNORE INTO comment_location(file_node_id, start_line, start_column, end_line, end_column)
                 SELECT ?1, ?2, ?3, ?4, ?5 WHERE EXISTS (SELECT 1 FROM node WHERE id = ?1)",
            )?
            .execute(params![
                location.file_id,
                location.start_line,
                location.start_column,
                location.end_line,
                location.end_column,
            ])?;
        Ok(())
    }

    fn add_error(&mut self, error: &ErrorRecord) -> StorageResult<Id> {
        self.require_write("add error")?;
        let conn = &self.conn;
        let index = ensure_loaded(&mut self.temp.errors, || load_error_index(conn))?;

        let key = error.key();
        if let Some(&id) = index.get(&key) {
            return Ok(id);
        }
        let id = insert_element(conn)?;
        conn.prepare_cached(
            "INSERT INTO error(id, message, file_path, line, column_number, translation_unit, fatal, indexed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?
        .execute(params![
            id,
            error.message,
            error.file_path,
            error.line,
            error.column,
            error.translation_unit,
            error.fatal,
            error.indexed,
        ])?;
        index.insert(key, id);
        Ok(id)
    }

    fn start_injection(&mut self) -> StorageResult<()> {
        self.require_write("inject")?;
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.in_injection = true;
        Ok(())
    }

    fn finish_injection(&mut self) -> StorageResult<()> {
        if self.in_injection {
            self.conn.execute_batch("COMMIT")?;
            self.in_injection = false;
        }
        Ok(())
    }

    fn abort_injection(&mut self) {
        if self.in_injection {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "rollback of failed injection failed");
            }
            self.in_injection = false;
        }
        // Rolled-back rows may still sit in the lookups.
        self.temp.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intermediate::IntermediateStorage;
    use crate::types::{AccessKind, DefinitionKind, EdgeKind, LocationKind};
    use tempfile::TempDir;

    fn writable() -> SqliteIndexStorage {
        SqliteIndexStorage::open_in_memory(StorageMode::READ_WRITE).unwrap()
    }

    mod mode_tests {
        use super::*;

        #[test]
        fn flags_combine() {
            let mode = StorageMode::READ | StorageMode::CLEAR;
            assert!(mode.contains(StorageMode::READ));
            assert!(!mode.contains(StorageMode::WRITE));
            assert!(mode.is_writable());
            assert!(!StorageMode::READ.is_writable());
            assert_eq!(format!("{:?}", mode), "READ|CLEAR");
            assert_eq!(format!("{:?}", StorageMode::NONE), "NONE");
        }
    }

    mod open_tests {
        use super::*;

        #[test]
        fn fresh_database_has_current_version() {
            let storage = writable();
            assert_eq!(
                storage.stored_version().unwrap(),
                Some(SqliteIndexStorage::get_static_version())
            );
            assert!(!storage.was_rebuilt());
        }

        #[test]
        fn version_mismatch_rebuilds_when_writable() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("index.sqlite");
            {
                let mut storage = SqliteIndexStorage::open(&path, StorageMode::WRITE).unwrap();
                storage.add_node(&Node::new(NodeKind::Function, "f")).unwrap();
                storage.set_meta(schema::META_STORAGE_VERSION, "1").unwrap();
            }

            let err = SqliteIndexStorage::open(&path, StorageMode::READ).unwrap_err();
            assert!(matches!(
                err,
                StorageError::VersionMismatch { found: 1, expected } if expected == STORAGE_VERSION
            ));

            let storage = SqliteIndexStorage::open(&path, StorageMode::READ_WRITE).unwrap();
            assert!(storage.was_rebuilt());
            assert!(storage.get_all_nodes().unwrap().is_empty());
        }

        #[test]
        fn read_only_rejects_missing_database_schema() {
            let err = SqliteIndexStorage::open_in_memory(StorageMode::READ).unwrap_err();
            assert!(matches!(err, StorageError::VersionMismatch { found: 0, .. }));
        }

        #[test]
        fn clear_mode_wipes_on_open() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("index.sqlite");
            {
                let mut storage = SqliteIndexStorage::open(&path, StorageMode::WRITE).unwrap();
                storage.add_node(&Node::new(NodeKind::Function, "f")).unwrap();
            }
            let storage =
                SqliteIndexStorage::open(&path, StorageMode::WRITE | StorageMode::CLEAR).unwrap();
            assert!(storage.get_all_nodes().unwrap().is_empty());
        }

        #[test]
        fn read_only_rejects_writes() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("index.sqlite");
            drop(SqliteIndexStorage::open(&path, StorageMode::WRITE).unwrap());

            let mut storage = SqliteIndexStorage::open(&path, StorageMode::READ).unwrap();
            let err = storage
                .add_node(&Node::new(NodeKind::Function, "f"))
                .unwrap_err();
            assert!(matches!(err, StorageError::ReadOnly { .. }));
            assert!(storage.inject(&IntermediateStorage::new()).is_err());
        }

        #[test]
        fn project_settings_round_trip() {
            let mut storage = writable();
            assert_eq!(storage.get_project_settings_text().unwrap(), "");
            storage.set_project_settings_text("[index]\nthreads = 2\n").unwrap();
            assert_eq!(
                storage.get_project_settings_text().unwrap(),
                "[index]\nthreads = 2\n"
            );
        }
    }

    mod conversion_tests {
        use super::*;

        #[test]
        fn ids_outside_rowid_range_are_rejected() {
            let conn = Connection::open_in_memory().unwrap();
            let stored: Id = conn
                .query_row("SELECT ?1", [Id::MAX], |row| row.get(0))
                .unwrap();
            assert_eq!(stored, Id::MAX);

            let too_large = conn.query_row("SELECT ?1", [Id(u64::MAX)], |row| row.get::<_, Id>(0));
            assert!(matches!(too_large, Err(rusqlite::Error::ToSqlConversionFailure(_))));

            let negative = conn.query_row("SELECT -1", [], |row| row.get::<_, Id>(0));
            assert!(negative.is_err());
        }
    }

    mod identity_tests {
        use super::*;

        #[test]
        fn nodes_dedup_and_upgrade_kind() {
            let mut storage = writable();
            let first = storage.add_node(&Node::new(NodeKind::Symbol, "foo")).unwrap();
            let second = storage.add_node(&Node::new(NodeKind::Function, "foo")).unwrap();
            let third = storage.add_node(&Node::new(NodeKind::Type, "foo")).unwrap();
            assert_eq!(first, second);
            assert_eq!(first, third);

            let node = storage.get_node_by_id(first).unwrap().unwrap();
            assert_eq!(node.kind, NodeKind::Function);
        }

        #[test]
        fn ids_come_from_one_element_sequence() {
            let mut storage = writable();
            let a = storage.add_node(&Node::new(NodeKind::Function, "a")).unwrap();
            let b = storage.add_node(&Node::new(NodeKind::Function, "b")).unwrap();
            let edge = storage.add_edge(&Edge::new(EdgeKind::Call, a, b)).unwrap();
            let local = storage.add_local_symbol(&LocalSymbol::new("a<0:0>")).unwrap();
            let error = storage.add_error(&ErrorRecord::new("boom", "a.cpp")).unwrap();

            let mut ids = vec![a, b, edge, local, error];
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), 5);
        }

        #[test]
        fn dangling_references_are_not_stored() {
            let mut storage = writable();
            let a = storage.add_node(&Node::new(NodeKind::Function, "a")).unwrap();
            let missing = Id(9999);

            assert_eq!(
                storage.add_edge(&Edge::new(EdgeKind::Call, a, missing)).unwrap(),
                Id::NONE
            );
            assert_eq!(
                storage
                    .add_source_location(&SourceLocation::new(
                        missing,
                        (1, 1),
                        (1, 2),
                        LocationKind::Token
                    ))
                    .unwrap(),
                Id::NONE
            );
            storage.add_file(&File::new(missing, "gone.cpp")).unwrap();
            storage
                .add_symbol(&Symbol::new(missing, DefinitionKind::Explicit))
                .unwrap();
            storage
                .add_occurrence(&Occurrence::new(a, missing))
                .unwrap();

            let stats = storage.get_stats().unwrap();
            assert_eq!(stats.edge_count, 0);
            assert_eq!(stats.file_count, 0);
            assert_eq!(stats.source_location_count, 0);
            assert_eq!(stats.occurrence_count, 0);
        }

        #[test]
        fn file_flags_merge() {
            let mut storage = writable();
            let id = storage.add_node(&Node::new(NodeKind::File, "a.cpp")).unwrap();
            storage
                .add_file(&File::new(id, "a.cpp").with_flags(false, false))
                .unwrap();
            storage
                .add_file(
                    &File::new(id, "a.cpp")
                        .with_flags(true, false)
                        .with_language("cpp")
                        .with_line_count(40),
                )
                .unwrap();

            let file = storage.get_file_by_path("a.cpp").unwrap().unwrap();
            assert!(file.indexed);
            assert!(!file.complete);
            assert_eq!(file.language, "cpp");
            assert_eq!(file.line_count, 40);
        }

        #[test]
        fn first_symbol_and_access_win() {
            let mut storage = writable();
            let id = storage.add_node(&Node::new(NodeKind::Field, "x")).unwrap();
            storage
                .add_symbol(&Symbol::new(id, DefinitionKind::Explicit))
                .unwrap();
            storage
                .add_symbol(&Symbol::new(id, DefinitionKind::Implicit))
                .unwrap();
            storage
                .add_component_access(&ComponentAccess::new(id, AccessKind::Private))
                .unwrap();
            storage
                .add_component_access(&ComponentAccess::new(id, AccessKind::Public))
                .unwrap();

            assert_eq!(
                storage.get_symbol_by_id(id).unwrap().unwrap().definition_kind,
                DefinitionKind::Explicit
            );
            let accesses = storage.get_component_accesses_by_node_ids(&[id]).unwrap();
            assert_eq!(accesses, vec![ComponentAccess::new(id, AccessKind::Private)]);
        }

        #[test]
        fn lookups_survive_reopen() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("index.sqlite");
            let (node, location) = {
                let mut storage = SqliteIndexStorage::open(&path, StorageMode::WRITE).unwrap();
                let file = storage.add_node(&Node::new(NodeKind::File, "a.cpp")).unwrap();
                storage.add_file(&File::new(file, "a.cpp")).unwrap();
                let location = storage
                    .add_source_location(&SourceLocation::new(
                        file,
                        (1, 1),
                        (1, 3),
                        LocationKind::Token,
                    ))
                    .unwrap();
                (file, location)
            };

            let mut storage = SqliteIndexStorage::open(&path, StorageMode::WRITE).unwrap();
            assert_eq!(
                storage.add_node(&Node::new(NodeKind::File, "a.cpp")).unwrap(),
                node
            );
            assert_eq!(
                storage
                    .add_source_location(&SourceLocation::new(
                        node,
                        (1, 1),
                        (1, 3),
                        LocationKind::Token
                    ))
                    .unwrap(),
                location
            );
        }
    }

    mod injection_tests {
        use super::*;

        fn unit() -> IntermediateStorage {
            let mut storage = IntermediateStorage::new();
            let file = storage.add_node(&Node::new(NodeKind::File, "a.cpp"));
            storage.add_file(&File::new(file, "a.cpp").with_language("cpp"));
            let main = storage.add_node(&Node::new(NodeKind::Function, "main"));
            let helper = storage.add_node(&Node::new(NodeKind::Function, "helper"));
            let call = storage.add_edge(&Edge::new(EdgeKind::Call, main, helper));
            let location = storage.add_source_location(&SourceLocation::new(
                file,
                (3, 5),
                (3, 10),
                LocationKind::Token,
            ));
            storage.add_occurrence(Occurrence::new(call, location));
            storage.add_occurrence(Occurrence::new(helper, location));
            storage
        }

        #[test]
        fn inject_is_idempotent() {
            let mut storage = writable();
            storage.inject(&unit()).unwrap();
            let before = storage.get_stats().unwrap();
            storage.inject(&unit()).unwrap();
            let after = storage.get_stats().unwrap();

            assert_eq!(before, after);
            assert_eq!(after.node_count, 3);
            assert_eq!(after.edge_count, 1);
            assert_eq!(after.occurrence_count, 2);
        }

        #[test]
        fn abort_rolls_back() {
            let mut storage = writable();
            storage.start_injection().unwrap();
            storage.add_node(&Node::new(NodeKind::Function, "f")).unwrap();
            storage.abort_injection();

            assert!(storage.get_all_nodes().unwrap().is_empty());
            // The rolled-back node is not served from the lookup cache.
            let id = storage.add_node(&Node::new(NodeKind::Function, "f")).unwrap();
            assert!(storage.get_node_by_id(id).unwrap().is_some());
        }
    }
}
