//! Async handle over the on-device database.
//!
//! Every operation runs on tokio's blocking pool behind a single mutex, so the
//! store has exactly one writer at a time and callers never block their own task
//! on SQLite I/O.

use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::db::{Database, DbError, DbResult, FlushCounts, LAST_SYNC_AT};
use crate::models::{NewUser, OutboxEntry, PatientRecord, UserRecord};

/// Cloneable, thread-safe access to the record store and outbox.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
}

impl Store {
    /// Wrap an opened database.
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open (and initialize) the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    /// In-memory store (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Run `f` against the database on the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut Database) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut guard = db
                .lock()
                .map_err(|e| DbError::Task(format!("Lock poisoned: {}", e)))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| DbError::Task(e.to_string()))?
    }

    // =========================================================================
    // Record Store
    // =========================================================================

    /// Write a patient and enqueue its outbox entry atomically.
    pub async fn upsert(&self, record: PatientRecord) -> DbResult<()> {
        self.run(move |db| db.upsert_patient(&record)).await
    }

    /// All patients, most recently written first.
    pub async fn get_all(&self) -> DbResult<Vec<PatientRecord>> {
        self.run(|db| db.list_patients()).await
    }

    pub async fn get(&self, id: impl Into<String>) -> DbResult<Option<PatientRecord>> {
        let id = id.into();
        self.run(move |db| db.get_patient(&id)).await
    }

    /// Clear the dirty flag on exactly `ids`.
    pub async fn mark_clean(&self, ids: Vec<String>) -> DbResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.run(move |db| db.mark_patients_clean(&ids)).await
    }

    pub async fn patient_count(&self) -> DbResult<i64> {
        self.run(|db| db.count_patients()).await
    }

    pub async fn dirty_patient_ids(&self) -> DbResult<Vec<String>> {
        self.run(|db| db.list_dirty_patient_ids()).await
    }

    // =========================================================================
    // Outbox
    // =========================================================================

    /// All pending outbox entries in enqueue order.
    pub async fn drain_read(&self) -> DbResult<Vec<OutboxEntry>> {
        self.run(|db| db.list_outbox()).await
    }

    /// Delete exactly these entries.
    pub async fn remove_processed(&self, ids: Vec<i64>) -> DbResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.run(move |db| db.remove_outbox_entries(&ids)).await
    }

    /// Remove confirmed entries and clean their patients in one transaction.
    pub async fn complete_flush(
        &self,
        entity_ids: Vec<String>,
        outbox_ids: Vec<i64>,
    ) -> DbResult<FlushCounts> {
        self.run(move |db| db.complete_flush(&entity_ids, &outbox_ids))
            .await
    }

    pub async fn pending_count(&self) -> DbResult<i64> {
        self.run(|db| db.count_outbox()).await
    }

    // =========================================================================
    // Sync bookkeeping
    // =========================================================================

    /// When the last online sync cycle completed, if ever.
    pub async fn last_synced_at(&self) -> DbResult<Option<String>> {
        self.run(|db| db.get_sync_state(LAST_SYNC_AT)).await
    }

    pub async fn record_sync_completed(&self, at: String) -> DbResult<()> {
        self.run(move |db| db.set_sync_state(LAST_SYNC_AT, &at)).await
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub async fn create_user(&self, user: NewUser) -> DbResult<UserRecord> {
        self.run(move |db| db.create_user(&user)).await
    }

    pub async fn get_user_by_email(&self, email: String) -> DbResult<Option<UserRecord>> {
        self.run(move |db| db.get_user_by_email(&email)).await
    }

    pub async fn get_user_by_credentials(
        &self,
        email: String,
        password: String,
    ) -> DbResult<Option<UserRecord>> {
        self.run(move |db| db.get_user_by_credentials(&email, &password))
            .await
    }

    pub async fn list_users(&self) -> DbResult<Vec<UserRecord>> {
        self.run(|db| db.list_users()).await
    }

    pub async fn update_preferred_language(
        &self,
        user_id: String,
        language: String,
    ) -> DbResult<bool> {
        self.run(move |db| db.update_user_preferred_language(&user_id, &language))
            .await
    }
}
