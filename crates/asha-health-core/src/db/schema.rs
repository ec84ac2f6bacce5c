//! SQLite schema definition and additive migrations.

use rusqlite::Connection;
use tracing::debug;

use super::{DbError, DbResult};

/// Complete database schema. Every statement is idempotent; nothing is ever dropped.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Patients
-- ============================================================================

CREATE TABLE IF NOT EXISTS patients (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    village TEXT NOT NULL DEFAULT '',
    age INTEGER NOT NULL DEFAULT 0,
    gender TEXT NOT NULL DEFAULT '',
    last_visit TEXT NOT NULL DEFAULT '',         -- YYYY-MM-DD
    status TEXT NOT NULL DEFAULT 'general',      -- pregnant, child_care, anc, general
    next_visit TEXT NOT NULL DEFAULT '',         -- YYYY-MM-DD
    contact TEXT NOT NULL DEFAULT '',
    territory_state TEXT NOT NULL DEFAULT '',
    territory_district TEXT NOT NULL DEFAULT '',
    territory_block TEXT NOT NULL DEFAULT '',
    territory_village TEXT NOT NULL DEFAULT '',
    form_data TEXT,                              -- opaque JSON
    updated_at TEXT NOT NULL,
    is_dirty INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_patients_updated_at ON patients(updated_at);
CREATE INDEX IF NOT EXISTS idx_patients_dirty ON patients(is_dirty);

-- ============================================================================
-- Outbox (Append-Only - rows are only inserted or deleted)
-- ============================================================================

CREATE TABLE IF NOT EXISTS outbox (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    action TEXT NOT NULL,
    payload TEXT NOT NULL,                       -- full JSON snapshot
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_outbox_entity ON outbox(entity, entity_id);

CREATE TRIGGER IF NOT EXISTS outbox_no_update BEFORE UPDATE ON outbox
BEGIN
    SELECT RAISE(ABORT, 'Outbox entries are immutable');
END;

-- ============================================================================
-- Users
-- ============================================================================

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    asha_id TEXT NOT NULL,
    phone TEXT NOT NULL,
    supervisor_id TEXT NOT NULL DEFAULT '',
    territory_state TEXT NOT NULL DEFAULT '',
    territory_district TEXT NOT NULL DEFAULT '',
    territory_block TEXT NOT NULL DEFAULT '',
    territory_village TEXT NOT NULL DEFAULT '',
    preferred_language TEXT,
    created_at TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
);

-- ============================================================================
-- Sync State
-- ============================================================================

CREATE TABLE IF NOT EXISTS sync_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// An optional column introduced after the first release.
#[derive(Debug, Clone, Copy)]
pub struct AdditiveColumn {
    pub table: &'static str,
    pub column: &'static str,
    pub definition: &'static str,
}

/// Columns added after release, applied in order on every start.
pub const ADDITIVE_COLUMNS: &[AdditiveColumn] = &[AdditiveColumn {
    table: "users",
    column: "preferred_language",
    definition: "TEXT",
}];

/// Add a column, treating "already exists" as success.
///
/// Any other failure is returned as [`DbError::Schema`]; callers must treat it as fatal.
pub fn apply_additive_column(conn: &Connection, column: &AdditiveColumn) -> DbResult<()> {
    let sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        column.table, column.column, column.definition
    );

    match conn.execute(&sql, []) {
        Ok(_) => {
            debug!(table = column.table, column = column.column, "added column");
            Ok(())
        }
        Err(e) if is_duplicate_column(&e) => Ok(()),
        Err(e) => Err(DbError::Schema(format!(
            "adding {}.{} failed: {}",
            column.table, column.column, e
        ))),
    }
}

fn is_duplicate_column(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => msg.contains("duplicate column name"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_valid() {
        let conn = Connection::open_in_memory().unwrap();
        let result = conn.execute_batch(SCHEMA);
        assert!(result.is_ok(), "Schema should be valid SQL: {:?}", result);
    }

    #[test]
    fn test_schema_is_rerunnable() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn.execute(
            "INSERT INTO patients (id, updated_at) VALUES ('p1', '2024-01-15T10:00:00Z')",
            [],
        )
        .unwrap();

        conn.execute_batch(SCHEMA).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_existing_column_is_tolerated() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        for column in ADDITIVE_COLUMNS {
            apply_additive_column(&conn, column).unwrap();
            apply_additive_column(&conn, column).unwrap();
        }
    }

    #[test]
    fn test_missing_column_is_added() {
        let conn = Connection::open_in_memory().unwrap();
        // A users table from before preferred_language existed
        conn.execute_batch(
            "CREATE TABLE users (id TEXT PRIMARY KEY, name TEXT, email TEXT UNIQUE)",
        )
        .unwrap();

        apply_additive_column(&conn, &ADDITIVE_COLUMNS[0]).unwrap();

        conn.execute(
            "INSERT INTO users (id, name, email, preferred_language) VALUES ('u1', 'A', 'a@x', 'hi')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_other_failures_propagate() {
        let conn = Connection::open_in_memory().unwrap();
        let bogus = AdditiveColumn {
            table: "no_such_table",
            column: "extra",
            definition: "TEXT",
        };

        let result = apply_additive_column(&conn, &bogus);
        assert!(matches!(result, Err(DbError::Schema(_))));
    }

    #[test]
    fn test_outbox_rows_are_immutable() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn.execute(
            "INSERT INTO outbox (entity, entity_id, action, payload, created_at) VALUES ('patient', 'p1', 'upsert', '{}', 'now')",
            [],
        )
        .unwrap();

        let result = conn.execute("UPDATE outbox SET payload = '[]'", []);
        assert!(result.is_err());
    }
}
