//! One-time import from the legacy flat store.
//!
//! Earlier app versions kept every patient in a single JSON array. On first launch
//! of a relational build the array is replayed through [`Store::upsert`], then the
//! legacy store is deleted. A `legacy_migration` marker in `sync_state` lets an
//! import interrupted by a crash resume on the next launch.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{DbError, LEGACY_MIGRATION};
use crate::models::{PatientRecord, PatientStatus};
use crate::store::Store;

const MARKER_IN_PROGRESS: &str = "in_progress";
const MARKER_DONE: &str = "done";

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] DbError),
}

/// Where the legacy JSON array lives.
#[async_trait]
pub trait LegacyStore: Send + Sync {
    /// Raw document bytes, or `None` if there is no legacy data.
    ///
    /// Bytes are not checked for encoding here; a document that is not valid
    /// UTF-8 JSON is reported as unreadable by the migration.
    async fn load(&self) -> Result<Option<Vec<u8>>, MigrationError>;

    /// Delete the legacy data. Deleting something already gone is not an error.
    async fn remove(&self) -> Result<(), MigrationError>;
}

/// Legacy store kept as a JSON file on disk.
#[derive(Debug, Clone)]
pub struct FileLegacyStore {
    path: PathBuf,
}

impl FileLegacyStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl LegacyStore for FileLegacyStore {
    async fn load(&self) -> Result<Option<Vec<u8>>, MigrationError> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self) -> Result<(), MigrationError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Already migrated, or the relational store already holds patients.
    NotNeeded,
    /// No legacy document, or an empty array.
    NoLegacyData,
    /// The legacy document is not a UTF-8 JSON array; it is left in place.
    Unreadable,
    Completed { imported: usize, skipped: usize },
}

/// Import legacy patients if this device still needs it.
pub async fn migrate_legacy(
    store: &Store,
    legacy: &dyn LegacyStore,
) -> Result<MigrationOutcome, MigrationError> {
    let marker = store.run(|db| db.get_sync_state(LEGACY_MIGRATION)).await?;
    let resuming = marker.as_deref() == Some(MARKER_IN_PROGRESS);
    if marker.as_deref() == Some(MARKER_DONE) {
        return Ok(MigrationOutcome::NotNeeded);
    }
    if !resuming && store.patient_count().await? > 0 {
        return Ok(MigrationOutcome::NotNeeded);
    }

    let Some(raw) = legacy.load().await? else {
        return no_legacy_data(store, resuming).await;
    };
    let items = match serde_json::from_slice::<Value>(&raw) {
        Ok(Value::Array(items)) => items,
        Ok(Value::Null) => return no_legacy_data(store, resuming).await,
        Ok(_) | Err(_) => {
            warn!("legacy patient store is not a JSON array, leaving it in place");
            return Ok(MigrationOutcome::Unreadable);
        }
    };
    if items.is_empty() {
        return no_legacy_data(store, resuming).await;
    }

    set_marker(store, MARKER_IN_PROGRESS).await?;
    if resuming {
        info!(records = items.len(), "resuming interrupted legacy migration");
    }

    let mut imported = 0;
    let mut skipped = 0;
    for (index, item) in items.iter().enumerate() {
        let Some(record) = legacy_record(item) else {
            warn!(index, "legacy patient has no id, skipping");
            skipped += 1;
            continue;
        };
        let id = record.id.clone();
        match store.upsert(record).await {
            Ok(()) => imported += 1,
            Err(e) => {
                warn!(id = %id, error = %e, "failed to migrate legacy patient");
                skipped += 1;
            }
        }
    }

    legacy.remove().await?;
    set_marker(store, MARKER_DONE).await?;
    info!(imported, skipped, "legacy patients migrated");

    Ok(MigrationOutcome::Completed { imported, skipped })
}

/// Nothing to import. A resumed run got as far as removing the legacy store
/// last time, so it is finished now.
async fn no_legacy_data(
    store: &Store,
    resuming: bool,
) -> Result<MigrationOutcome, MigrationError> {
    if resuming {
        info!("legacy store already removed, finishing interrupted migration");
        set_marker(store, MARKER_DONE).await?;
    }
    Ok(MigrationOutcome::NoLegacyData)
}

async fn set_marker(store: &Store, value: &'static str) -> Result<(), MigrationError> {
    store
        .run(move |db| db.set_sync_state(LEGACY_MIGRATION, value))
        .await?;
    Ok(())
}

/// Best-effort extraction of one legacy entry. `None` without a usable id.
fn legacy_record(item: &Value) -> Option<PatientRecord> {
    let id = match item.get("id")? {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };

    let territory = item.get("territory");
    let territory_field = |key: &str| territory.map(|t| text(t, key)).unwrap_or_default();

    let status = text(item, "status");
    let form_data = match item.get("formData") {
        Some(value) if truthy(value) => value.clone(),
        _ => Value::Object(Default::default()),
    };

    Some(PatientRecord {
        id,
        name: text(item, "name"),
        village: text(item, "village"),
        age: number(item.get("age")),
        gender: text(item, "gender"),
        last_visit: text(item, "lastVisit"),
        status: if status.is_empty() {
            PatientStatus::General.as_str().to_string()
        } else {
            status
        },
        next_visit: text(item, "nextVisit"),
        contact: text(item, "contact"),
        territory_state: territory_field("state"),
        territory_district: territory_field("district"),
        territory_block: territory_field("block"),
        territory_village: territory_field("village"),
        form_data: Some(form_data),
        ..Default::default()
    })
}

fn text(item: &Value, key: &str) -> String {
    match item.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Numeric coercion; anything unparseable becomes 0.
fn number(value: Option<&Value>) -> i64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|n| n.is_finite())
        .map(|n| n.trunc() as i64)
        .unwrap_or(0)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}
