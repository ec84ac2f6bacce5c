//! Database layer for the on-device record store.

mod schema;
mod patients;
mod outbox;
mod users;
mod sync_state;

pub use schema::*;
#[allow(unused_imports)]
pub use patients::*;
#[allow(unused_imports)]
pub use outbox::*;
#[allow(unused_imports)]
pub use users::*;
pub use sync_state::*;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use thiserror::Error;
use tracing::{debug, info};

/// How long a writer waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("A user with email {0} already exists")]
    EmailExists(String),

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Schema migration failed: {0}")]
    Schema(String),

    #[error("Storage task failed: {0}")]
    Task(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL lets readers proceed while the single writer commits
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!(journal_mode = %mode, path = %path.as_ref().display(), "opened database");

        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create tables if absent and apply additive column migrations.
    ///
    /// Safe to call any number of times. A failure here leaves the store unusable
    /// and must abort startup.
    pub fn initialize(&self) -> DbResult<()> {
        self.conn
            .execute_batch(SCHEMA)
            .map_err(|e| DbError::Schema(e.to_string()))?;

        for column in ADDITIVE_COLUMNS {
            apply_additive_column(&self.conn, column)?;
        }

        info!("database schema ready");
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// Current time as stored in `updated_at` / `created_at` columns.
///
/// Microsecond precision keeps lexical order equal to write order.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A timestamp strictly after `latest`: the current time, or `latest` plus one
/// microsecond if the wall clock has stepped back behind it.
pub(crate) fn timestamp_after(latest: Option<&str>) -> String {
    let now = Utc::now().timestamp_micros();
    let floor = latest
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.timestamp_micros() + 1);
    let micros = floor.map_or(now, |floor| floor.max(now));

    match DateTime::<Utc>::from_timestamp_micros(micros) {
        Some(at) => at.to_rfc3339_opts(SecondsFormat::Micros, true),
        None => now_timestamp(),
    }
}

/// Parse stored JSON text, yielding `None` for empty or malformed input.
pub(crate) fn parse_json_tolerant(text: Option<&str>) -> Option<serde_json::Value> {
    let text = text?;
    if text.is_empty() {
        return None;
    }
    serde_json::from_str(text).ok()
}

/// `?, ?, ?` for an `IN (...)` clause.
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
