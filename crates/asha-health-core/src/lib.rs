//! ASHA Health Core Library
//!
//! Offline-first patient record store and outbox sync for community health workers.
//!
//! # Architecture
//!
//! ```text
//!   Form save ──► Store::upsert ──┬──► patients (is_dirty = 1)
//!                                 └──► outbox   (append-only)      one transaction
//!                                          │
//!   Startup / Foreground / Reconnect / Manual
//!                                          │
//!                                   SyncEngine::attempt_sync
//!                                          │
//!                         probe ──► drain_read ──► RemoteIngest
//!                                                      │
//!                                 confirmed ◄──────────┘
//!                                     │
//!                      complete_flush: remove entries + clean rows
//! ```
//!
//! # Core Principle
//!
//! **A patient is clean only once the remote has confirmed it.** A local write is
//! durable before it is acknowledged, and the outbox is the sole source of truth for
//! what still has to leave the device.
//!
//! # Modules
//!
//! - [`db`]: SQLite schema and synchronous storage operations
//! - [`models`]: Domain types (PatientRecord, OutboxEntry, UserRecord)
//! - [`store`]: Async, cloneable handle over the database
//! - [`sync`]: Sync engine, connectivity probes and remote ingestion
//! - [`migration`]: One-time import from the legacy flat store
//! - [`export`]: JSON and CSV roster export

pub mod config;
pub mod db;
pub mod export;
pub mod logging;
pub mod migration;
pub mod models;
pub mod store;
pub mod sync;

// Re-export commonly used types
pub use config::CoreConfig;
pub use db::Database;
pub use export::PatientExport;
pub use migration::{migrate_legacy, FileLegacyStore, LegacyStore, MigrationOutcome};
pub use models::{NewUser, OutboxEntry, PatientRecord, PatientStatus, UserRecord};
pub use store::Store;
pub use sync::{
    ConnectivityProbe, HttpIngestClient, HttpProbe, RemoteIngest, SimulatedRemote, StaticProbe,
    SyncEngine, SyncOutcome, SyncReport, SyncTrigger,
};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
#[uniffi(flat_error)]
pub enum AshaError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Email already registered: {0}")]
    EmailExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<db::DbError> for AshaError {
    fn from(e: db::DbError) -> Self {
        match e {
            db::DbError::EmailExists(email) => AshaError::EmailExists(email),
            db::DbError::NotFound(what) => AshaError::NotFound(what),
            other => AshaError::DatabaseError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AshaError {
    fn from(e: serde_json::Error) -> Self {
        AshaError::SerializationError(e.to_string())
    }
}

impl From<sync::SyncError> for AshaError {
    fn from(e: sync::SyncError) -> Self {
        match e {
            sync::SyncError::Storage(db) => db.into(),
        }
    }
}

impl From<sync::RemoteError> for AshaError {
    fn from(e: sync::RemoteError) -> Self {
        AshaError::NetworkError(e.to_string())
    }
}

impl From<migration::MigrationError> for AshaError {
    fn from(e: migration::MigrationError) -> Self {
        match e {
            migration::MigrationError::Storage(db) => db.into(),
            other => AshaError::MigrationError(other.to_string()),
        }
    }
}

impl From<::config::ConfigError> for AshaError {
    fn from(e: ::config::ConfigError) -> Self {
        AshaError::ConfigError(e.to_string())
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Install the log subscriber. Safe to call more than once.
#[uniffi::export]
pub fn init_logging() {
    logging::init_logging();
}

/// Load configuration from an optional YAML file plus `ASHA__*` environment variables.
#[uniffi::export]
pub fn load_config(path: Option<String>) -> Result<FfiCoreConfig, AshaError> {
    let config = CoreConfig::load(path.as_deref().map(std::path::Path::new))?;
    Ok(config.into())
}

/// Open or create the on-device database and wire up sync.
///
/// Without an `ingest_url`, confirmed delivery is simulated.
#[uniffi::export]
pub fn open_core(config: FfiCoreConfig) -> Result<Arc<AshaCore>, AshaError> {
    let config: CoreConfig = config.into();
    let store = Store::open(&config.database_path)?;

    let probe = Arc::new(HttpProbe::new(
        config.probe_url.clone(),
        config.probe_timeout(),
    )?);
    let remote: Arc<dyn RemoteIngest> = match &config.ingest_url {
        Some(url) => Arc::new(HttpIngestClient::new(url.clone(), config.ingest_timeout())?),
        None => {
            warn!("no ingest_url configured, sync will simulate remote acceptance");
            Arc::new(SimulatedRemote)
        }
    };

    let engine = SyncEngine::new(store.clone(), probe, remote, config.probe_timeout());
    Ok(Arc::new(AshaCore::new(
        store,
        engine,
        None,
        config.legacy_store_path,
    )))
}

/// Create an in-memory core (for testing).
///
/// There is no network probe: reachability follows [`AshaCore::set_connectivity`],
/// and the remote accepts everything.
#[uniffi::export]
pub fn open_core_in_memory() -> Result<Arc<AshaCore>, AshaError> {
    let store = Store::open_in_memory()?;
    let probe = StaticProbe::new(false);
    let engine = SyncEngine::new(
        store.clone(),
        Arc::new(probe.clone()),
        Arc::new(SimulatedRemote),
        CoreConfig::for_test().probe_timeout(),
    );
    Ok(Arc::new(AshaCore::new(store, engine, Some(probe), None)))
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe handle for the host app.
#[derive(uniffi::Object)]
pub struct AshaCore {
    store: Store,
    engine: SyncEngine,
    connectivity: watch::Sender<bool>,
    manual_probe: Option<StaticProbe>,
    legacy_store_path: Option<String>,
}

impl AshaCore {
    fn new(
        store: Store,
        engine: SyncEngine,
        manual_probe: Option<StaticProbe>,
        legacy_store_path: Option<String>,
    ) -> Self {
        let (connectivity, _) = watch::channel(false);
        Self {
            store,
            engine,
            connectivity,
            manual_probe,
            legacy_store_path,
        }
    }

    /// The underlying store, for Rust callers.
    pub fn store(&self) -> &Store {
        &self.store
    }
}

#[uniffi::export(async_runtime = "tokio")]
impl AshaCore {
    // =========================================================================
    // Patient Operations
    // =========================================================================

    /// Save a patient and queue it for sync.
    pub async fn upsert_patient(&self, patient: FfiPatient) -> Result<(), AshaError> {
        let record = patient.into_record()?;
        self.store.upsert(record).await?;
        Ok(())
    }

    /// All patients, most recently written first.
    pub async fn get_all_patients(&self) -> Result<Vec<FfiPatient>, AshaError> {
        let patients = self.store.get_all().await?;
        Ok(patients.into_iter().map(|p| p.into()).collect())
    }

    pub async fn get_patient(&self, id: String) -> Result<Option<FfiPatient>, AshaError> {
        let patient = self.store.get(id).await?;
        Ok(patient.map(|p| p.into()))
    }

    /// Number of changes waiting to be confirmed by the remote.
    pub async fn pending_sync_count(&self) -> Result<i64, AshaError> {
        Ok(self.store.pending_count().await?)
    }

    // =========================================================================
    // Sync Operations
    // =========================================================================

    pub async fn sync_now(&self) -> Result<FfiSyncReport, AshaError> {
        Ok(self.engine.sync_now().await?.into())
    }

    pub async fn on_app_start(&self) -> Result<FfiSyncReport, AshaError> {
        Ok(self.engine.on_startup().await?.into())
    }

    pub async fn on_app_foreground(&self) -> Result<FfiSyncReport, AshaError> {
        Ok(self.engine.on_foreground().await?.into())
    }

    /// Report the platform's network state.
    pub fn set_connectivity(&self, online: bool) {
        if let Some(probe) = &self.manual_probe {
            probe.set_online(online);
        }
        self.connectivity.send_replace(online);
    }

    /// Sync on every reconnect reported through [`AshaCore::set_connectivity`].
    pub async fn start_connectivity_sync(&self) {
        self.engine.start(self.connectivity.subscribe());
    }

    pub fn stop_connectivity_sync(&self) {
        self.engine.stop();
    }

    /// When the last online sync cycle completed, if ever.
    pub async fn last_synced_at(&self) -> Result<Option<String>, AshaError> {
        Ok(self.store.last_synced_at().await?)
    }

    // =========================================================================
    // Migration
    // =========================================================================

    /// Import patients from the legacy flat store, if configured and still needed.
    pub async fn migrate_legacy(&self) -> Result<FfiMigrationResult, AshaError> {
        let Some(path) = &self.legacy_store_path else {
            return Ok(MigrationOutcome::NoLegacyData.into());
        };
        let legacy = FileLegacyStore::new(path);
        Ok(migrate_legacy(&self.store, &legacy).await?.into())
    }

    // =========================================================================
    // Export Operations
    // =========================================================================

    pub async fn export_patients_json(&self) -> Result<String, AshaError> {
        let export = PatientExport::new(self.store.get_all().await?);
        Ok(export.to_json()?)
    }

    pub async fn export_patients_csv(&self) -> Result<String, AshaError> {
        let export = PatientExport::new(self.store.get_all().await?);
        Ok(export.to_csv())
    }

    // =========================================================================
    // User Operations
    // =========================================================================

    /// Register an operator. Fails with `EmailExists` for a taken email.
    pub async fn create_user(&self, user: FfiNewUser) -> Result<FfiUser, AshaError> {
        if user.email.trim().is_empty() {
            return Err(AshaError::InvalidInput("email is required".into()));
        }
        let created = self.store.create_user(user.into()).await?;
        Ok(created.into())
    }

    pub async fn get_user_by_email(&self, email: String) -> Result<Option<FfiUser>, AshaError> {
        let user = self.store.get_user_by_email(email).await?;
        Ok(user.map(|u| u.into()))
    }

    /// Active operator matching these credentials, if any.
    pub async fn login(
        &self,
        email: String,
        password: String,
    ) -> Result<Option<FfiUser>, AshaError> {
        let user = self.store.get_user_by_credentials(email, password).await?;
        Ok(user.map(|u| u.into()))
    }

    pub async fn list_users(&self) -> Result<Vec<FfiUser>, AshaError> {
        let users = self.store.list_users().await?;
        Ok(users.into_iter().map(|u| u.into()).collect())
    }

    pub async fn update_preferred_language(
        &self,
        user_id: String,
        language: String,
    ) -> Result<bool, AshaError> {
        Ok(self.store.update_preferred_language(user_id, language).await?)
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe configuration.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCoreConfig {
    pub database_path: String,
    pub probe_url: String,
    pub probe_timeout_ms: u64,
    pub ingest_url: Option<String>,
    pub ingest_timeout_ms: u64,
    pub legacy_store_path: Option<String>,
}

impl From<CoreConfig> for FfiCoreConfig {
    fn from(config: CoreConfig) -> Self {
        Self {
            database_path: config.database_path,
            probe_url: config.probe_url,
            probe_timeout_ms: config.probe_timeout_ms,
            ingest_url: config.ingest_url,
            ingest_timeout_ms: config.ingest_timeout_ms,
            legacy_store_path: config.legacy_store_path,
        }
    }
}

impl From<FfiCoreConfig> for CoreConfig {
    fn from(config: FfiCoreConfig) -> Self {
        CoreConfig {
            database_path: config.database_path,
            probe_url: config.probe_url,
            probe_timeout_ms: config.probe_timeout_ms,
            ingest_url: config.ingest_url,
            ingest_timeout_ms: config.ingest_timeout_ms,
            legacy_store_path: config.legacy_store_path,
        }
    }
}

/// FFI-safe patient. `form_data_json` carries the opaque form payload as JSON text.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatient {
    pub id: String,
    pub name: String,
    pub village: String,
    pub age: i64,
    pub gender: String,
    pub last_visit: String,
    pub status: String,
    pub next_visit: String,
    pub contact: String,
    pub territory_state: String,
    pub territory_district: String,
    pub territory_block: String,
    pub territory_village: String,
    pub form_data_json: Option<String>,
    pub updated_at: Option<String>,
    pub is_dirty: bool,
}

impl FfiPatient {
    fn into_record(self) -> Result<PatientRecord, AshaError> {
        if self.id.trim().is_empty() {
            return Err(AshaError::InvalidInput("patient id is required".into()));
        }
        let form_data = match self.form_data_json.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Some(serde_json::from_str(raw)?),
            _ => None,
        };
        Ok(PatientRecord {
            id: self.id,
            name: self.name,
            village: self.village,
            age: self.age,
            gender: self.gender,
            last_visit: self.last_visit,
            status: self.status,
            next_visit: self.next_visit,
            contact: self.contact,
            territory_state: self.territory_state,
            territory_district: self.territory_district,
            territory_block: self.territory_block,
            territory_village: self.territory_village,
            form_data,
            updated_at: self.updated_at,
            is_dirty: self.is_dirty,
        })
    }
}

impl From<PatientRecord> for FfiPatient {
    fn from(patient: PatientRecord) -> Self {
        Self {
            form_data_json: patient.form_data.as_ref().map(|v| v.to_string()),
            id: patient.id,
            name: patient.name,
            village: patient.village,
            age: patient.age,
            gender: patient.gender,
            last_visit: patient.last_visit,
            status: patient.status,
            next_visit: patient.next_visit,
            contact: patient.contact,
            territory_state: patient.territory_state,
            territory_district: patient.territory_district,
            territory_block: patient.territory_block,
            territory_village: patient.territory_village,
            updated_at: patient.updated_at,
            is_dirty: patient.is_dirty,
        }
    }
}

/// FFI-safe sync report.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSyncReport {
    /// `startup`, `foreground`, `connectivity_restored` or `manual`
    pub trigger: String,
    /// `already_running`, `offline`, `nothing_pending`, `remote_unavailable` or `flushed`
    pub outcome: String,
    pub attempted: u32,
    pub confirmed: u32,
    pub rejected: u32,
    pub reason: Option<String>,
    pub should_notify_failure: bool,
}

impl From<SyncReport> for FfiSyncReport {
    fn from(report: SyncReport) -> Self {
        let should_notify_failure = report.should_notify_failure();
        let (outcome, attempted, confirmed, rejected, reason) = match report.outcome {
            SyncOutcome::AlreadyRunning => ("already_running", 0, 0, 0, None),
            SyncOutcome::Offline => ("offline", 0, 0, 0, None),
            SyncOutcome::NothingPending => ("nothing_pending", 0, 0, 0, None),
            SyncOutcome::RemoteUnavailable(reason) => ("remote_unavailable", 0, 0, 0, Some(reason)),
            SyncOutcome::Flushed {
                attempted,
                confirmed,
                rejected,
            } => ("flushed", attempted, confirmed, rejected, None),
        };
        Self {
            trigger: report.trigger.as_str().to_string(),
            outcome: outcome.to_string(),
            attempted: attempted as u32,
            confirmed: confirmed as u32,
            rejected: rejected as u32,
            reason,
            should_notify_failure,
        }
    }
}

/// FFI-safe legacy migration result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMigrationResult {
    /// `not_needed`, `no_legacy_data`, `unreadable` or `completed`
    pub outcome: String,
    pub imported: u32,
    pub skipped: u32,
}

impl From<MigrationOutcome> for FfiMigrationResult {
    fn from(outcome: MigrationOutcome) -> Self {
        let (outcome, imported, skipped) = match outcome {
            MigrationOutcome::NotNeeded => ("not_needed", 0, 0),
            MigrationOutcome::NoLegacyData => ("no_legacy_data", 0, 0),
            MigrationOutcome::Unreadable => ("unreadable", 0, 0),
            MigrationOutcome::Completed { imported, skipped } => ("completed", imported, skipped),
        };
        Self {
            outcome: outcome.to_string(),
            imported: imported as u32,
            skipped: skipped as u32,
        }
    }
}

/// FFI-safe registration input.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub asha_id: String,
    pub phone: String,
    pub supervisor_id: Option<String>,
    pub territory_state: Option<String>,
    pub territory_district: Option<String>,
    pub territory_block: Option<String>,
    pub territory_village: Option<String>,
    pub preferred_language: Option<String>,
}

impl From<FfiNewUser> for NewUser {
    fn from(user: FfiNewUser) -> Self {
        NewUser {
            id: None,
            name: user.name,
            email: user.email,
            password: user.password,
            asha_id: user.asha_id,
            phone: user.phone,
            supervisor_id: user.supervisor_id,
            territory_state: user.territory_state,
            territory_district: user.territory_district,
            territory_block: user.territory_block,
            territory_village: user.territory_village,
            preferred_language: user.preferred_language,
        }
    }
}

/// FFI-safe operator. Never carries the password hash.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub asha_id: String,
    pub phone: String,
    pub supervisor_id: String,
    pub territory_state: String,
    pub territory_district: String,
    pub territory_block: String,
    pub territory_village: String,
    pub preferred_language: Option<String>,
    pub created_at: String,
    pub is_active: bool,
}

impl From<UserRecord> for FfiUser {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            asha_id: user.asha_id,
            phone: user.phone,
            supervisor_id: user.supervisor_id,
            territory_state: user.territory_state,
            territory_district: user.territory_district,
            territory_block: user.territory_block,
            territory_village: user.territory_village,
            preferred_language: user.preferred_language,
            created_at: user.created_at,
            is_active: user.is_active,
        }
    }
}
