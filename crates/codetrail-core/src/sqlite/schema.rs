//! Table layout and mode-dependent indices of the index database.

use rusqlite::Connection;
use tracing::debug;

use super::StorageMode;
use crate::error::StorageResult;

/// Schema version written to `meta`. A database with another version is
/// rebuilt from scratch rather than migrated.
pub const STORAGE_VERSION: u32 = 3;

pub(crate) const META_STORAGE_VERSION: &str = "storage_version";
pub(crate) const META_PROJECT_SETTINGS: &str = "project_settings";

/// Every table, in creation order (referenced tables first).
const TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    id    INTEGER PRIMARY KEY,
    key   TEXT NOT NULL UNIQUE,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS element (
    id INTEGER PRIMARY KEY AUTOINCREMENT
);

CREATE TABLE IF NOT EXISTS node (
    id              INTEGER NOT NULL PRIMARY KEY REFERENCES element(id) ON DELETE CASCADE,
    type            INTEGER NOT NULL,
    serialized_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS symbol (
    id              INTEGER NOT NULL PRIMARY KEY REFERENCES node(id) ON DELETE CASCADE,
    definition_kind INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS file (
    id                INTEGER NOT NULL PRIMARY KEY REFERENCES node(id) ON DELETE CASCADE,
    path              TEXT NOT NULL,
    language          TEXT NOT NULL,
    modification_time TEXT NOT NULL,
    indexed           INTEGER NOT NULL,
    complete          INTEGER NOT NULL,
    line_count        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS edge (
    id             INTEGER NOT NULL PRIMARY KEY REFERENCES element(id) ON DELETE CASCADE,
    type           INTEGER NOT NULL,
    source_node_id INTEGER NOT NULL REFERENCES node(id) ON DELETE CASCADE,
    target_node_id INTEGER NOT NULL REFERENCES node(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS local_symbol (
    id   INTEGER NOT NULL PRIMARY KEY REFERENCES element(id) ON DELETE CASCADE,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS source_location (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    file_node_id INTEGER NOT NULL REFERENCES node(id) ON DELETE CASCADE,
    start_line   INTEGER NOT NULL,
    start_column INTEGER NOT NULL,
    end_line     INTEGER NOT NULL,
    end_column   INTEGER NOT NULL,
    type         INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS occurrence (
    element_id         INTEGER NOT NULL REFERENCES element(id) ON DELETE CASCADE,
    source_location_id INTEGER NOT NULL REFERENCES source_location(id) ON DELETE CASCADE,
    PRIMARY KEY (element_id, source_location_id)
);

CREATE TABLE IF NOT EXISTS component_access (
    node_id INTEGER NOT NULL PRIMARY KEY REFERENCES node(id) ON DELETE CASCADE,
    type    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS comment_location (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    file_node_id INTEGER NOT NULL REFERENCES node(id) ON DELETE CASCADE,
    start_line   INTEGER NOT NULL,
    start_column INTEGER NOT NULL,
    end_line     INTEGER NOT NULL,
    end_column   INTEGER NOT NULL,
    UNIQUE (file_node_id, start_line, start_column, end_line, end_column)
);

CREATE TABLE IF NOT EXISTS error (
    id               INTEGER NOT NULL PRIMARY KEY REFERENCES element(id) ON DELETE CASCADE,
    message          TEXT NOT NULL,
    file_path        TEXT NOT NULL,
    line             INTEGER NOT NULL,
    column_number    INTEGER NOT NULL,
    translation_unit TEXT NOT NULL,
    fatal            INTEGER NOT NULL,
    indexed          INTEGER NOT NULL
);
"#;

/// Tables in drop order (referencing tables first).
const TABLE_NAMES: &[&str] = &[
    "error",
    "comment_location",
    "component_access",
    "occurrence",
    "source_location",
    "local_symbol",
    "edge",
    "file",
    "symbol",
    "node",
    "element",
    "meta",
];

/// A secondary index and the modes that want it.
struct IndexDef {
    name: &'static str,
    columns: &'static str,
    modes: StorageMode,
}

/// Read-only indices serve UI lookups and slow down bulk inserts, so a
/// write-only connection drops them.
const INDICES: &[IndexDef] = &[
    IndexDef {
        name: "node_serialized_name_index",
        columns: "node(serialized_name)",
        modes: StorageMode::READ,
    },
    IndexDef {
        name: "file_path_index",
        columns: "file(path)",
        modes: StorageMode::READ,
    },
    IndexDef {
        name: "edge_source_node_id_index",
        columns: "edge(source_node_id)",
        modes: StorageMode::READ_WRITE,
    },
    IndexDef {
        name: "edge_target_node_id_index",
        columns: "edge(target_node_id)",
        modes: StorageMode::READ_WRITE,
    },
    IndexDef {
        name: "source_location_file_node_id_index",
        columns: "source_location(file_node_id)",
        modes: StorageMode::READ_WRITE,
    },
    IndexDef {
        name: "occurrence_source_location_id_index",
        columns: "occurrence(source_location_id)",
        modes: StorageMode::READ_WRITE,
    },
    IndexDef {
        name: "error_file_path_index",
        columns: "error(file_path)",
        modes: StorageMode::READ_WRITE,
    },
];

pub(crate) fn create_tables(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(TABLES)?;
    Ok(())
}

pub(crate) fn drop_tables(conn: &Connection) -> StorageResult<()> {
    let mut sql = String::new();
    for table in TABLE_NAMES {
        sql.push_str(&format!("DROP TABLE IF EXISTS {};\n", table));
    }
    conn.execute_batch(&sql)?;
    Ok(())
}

pub(crate) fn table_exists(conn: &Connection, name: &str) -> StorageResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Create the indices `mode` wants and drop the rest.
pub(crate) fn apply_indices(conn: &Connection, mode: StorageMode) -> StorageResult<()> {
    for index in INDICES {
        let sql = if mode.intersects(index.modes) {
            format!("CREATE INDEX IF NOT EXISTS {} ON {};", index.name, index.columns)
        } else {
            format!("DROP INDEX IF EXISTS {};", index.name)
        };
        conn.execute_batch(&sql)?;
    }
    debug!(?mode, "indices updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE '%_index'")
            .unwrap();
        let names = stmt.query_map([], |row| row.get(0)).unwrap();
        names.map(|name| name.unwrap()).collect()
    }

    #[test]
    fn create_and_drop_tables() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        for table in TABLE_NAMES {
            assert!(table_exists(&conn, table).unwrap(), "missing {}", table);
        }
        create_tables(&conn).unwrap();
        drop_tables(&conn).unwrap();
        assert!(!table_exists(&conn, "node").unwrap());
    }

    #[test]
    fn indices_follow_mode() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();

        apply_indices(&conn, StorageMode::WRITE).unwrap();
        let names = index_names(&conn);
        assert!(names.contains(&"edge_source_node_id_index".to_string()));
        assert!(!names.contains(&"node_serialized_name_index".to_string()));

        apply_indices(&conn, StorageMode::READ).unwrap();
        let names = index_names(&conn);
        assert!(names.contains(&"node_serialized_name_index".to_string()));
        assert_eq!(names.len(), INDICES.len());
    }
}
