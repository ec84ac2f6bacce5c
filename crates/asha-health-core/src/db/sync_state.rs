//! Sync bookkeeping key/value operations.

use rusqlite::{params, OptionalExtension};

use super::{Database, DbResult};

/// RFC 3339 time of the last online sync cycle that completed.
pub const LAST_SYNC_AT: &str = "last_sync_at";

/// Progress marker for the legacy store import (`in_progress` / `done`).
pub const LEGACY_MIGRATION: &str = "legacy_migration";

impl Database {
    /// Get sync state value.
    pub fn get_sync_state(&self, key: &str) -> DbResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?",
                [key],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Set sync state value.
    pub fn set_sync_state(&self, key: &str, value: &str) -> DbResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_state (key, value, updated_at) VALUES (?, ?, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }
}
