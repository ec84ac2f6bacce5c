//! Outbox flushing and connectivity-driven sync.
//!
//! A sync cycle probes connectivity, reads the outbox in enqueue order, hands the
//! batch to the remote, and then removes confirmed entries and cleans their
//! patients in one transaction. Unconfirmed entries stay queued for the next cycle.
//!
//! At most one cycle runs per engine at a time; an overlapping request returns
//! [`SyncOutcome::AlreadyRunning`] immediately.

mod probe;
mod remote;
#[cfg(test)]
mod test_server;

pub use probe::*;
pub use remote::*;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::db::{now_timestamp, DbError};
use crate::models::PATIENT_ENTITY;
use crate::store::Store;

/// Errors that abort a sync cycle.
///
/// Network trouble is not an error: it shows up as an outcome.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),
}

/// What asked for a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Startup,
    Foreground,
    ConnectivityRestored,
    Manual,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Startup => "startup",
            SyncTrigger::Foreground => "foreground",
            SyncTrigger::ConnectivityRestored => "connectivity_restored",
            SyncTrigger::Manual => "manual",
        }
    }
}

/// How a sync cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another cycle was in flight; nothing was done.
    AlreadyRunning,
    /// The probe failed or timed out.
    Offline,
    /// Online, but the outbox was empty.
    NothingPending,
    /// The remote could not be reached or answered garbage; every entry stays queued.
    RemoteUnavailable(String),
    /// The batch was delivered. `confirmed + rejected == attempted`.
    Flushed {
        attempted: usize,
        confirmed: usize,
        rejected: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub outcome: SyncOutcome,
}

impl SyncReport {
    /// Whether the user should be told the sync did not go through.
    ///
    /// Only manual syncs surface failures; background triggers stay silent.
    pub fn should_notify_failure(&self) -> bool {
        if self.trigger != SyncTrigger::Manual {
            return false;
        }
        match &self.outcome {
            SyncOutcome::Offline | SyncOutcome::RemoteUnavailable(_) => true,
            SyncOutcome::Flushed { confirmed, .. } => *confirmed == 0,
            SyncOutcome::AlreadyRunning | SyncOutcome::NothingPending => false,
        }
    }
}

/// Holds the single-flight flag for the duration of one cycle.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct EngineInner {
    store: Store,
    probe: Arc<dyn ConnectivityProbe>,
    remote: Arc<dyn RemoteIngest>,
    probe_timeout: Duration,
    syncing: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let listener = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = listener.take() {
            handle.abort();
        }
    }
}

/// Flushes the outbox to the remote.
///
/// Cloning shares the same single-flight flag and listener.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn new(
        store: Store,
        probe: Arc<dyn ConnectivityProbe>,
        remote: Arc<dyn RemoteIngest>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                probe,
                remote,
                probe_timeout,
                syncing: AtomicBool::new(false),
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Whether a cycle is in flight right now.
    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::Acquire)
    }

    /// Run one sync cycle unless another is already in flight.
    pub async fn attempt_sync(&self, trigger: SyncTrigger) -> Result<SyncReport, SyncError> {
        let Some(_guard) = FlightGuard::acquire(&self.inner.syncing) else {
            debug!(trigger = trigger.as_str(), "sync already in flight");
            return Ok(SyncReport {
                trigger,
                outcome: SyncOutcome::AlreadyRunning,
            });
        };

        let outcome = self.inner.run_cycle().await?;
        debug!(trigger = trigger.as_str(), ?outcome, "sync cycle finished");
        Ok(SyncReport { trigger, outcome })
    }

    pub async fn on_startup(&self) -> Result<SyncReport, SyncError> {
        self.attempt_sync(SyncTrigger::Startup).await
    }

    pub async fn on_foreground(&self) -> Result<SyncReport, SyncError> {
        self.attempt_sync(SyncTrigger::Foreground).await
    }

    pub async fn sync_now(&self) -> Result<SyncReport, SyncError> {
        self.attempt_sync(SyncTrigger::Manual).await
    }

    /// Watch `connectivity` and sync on every offline-to-online transition.
    ///
    /// Syncs once right away if the signal already reads online. Calling this while
    /// a listener is running does nothing. Must be called inside a tokio runtime.
    pub fn start(&self, mut connectivity: watch::Receiver<bool>) {
        let mut listener = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("connectivity listener already running");
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut was_online = *connectivity.borrow_and_update();
            if was_online && !sync_from_listener(&weak).await {
                return;
            }

            while connectivity.changed().await.is_ok() {
                let online = *connectivity.borrow_and_update();
                let restored = online && !was_online;
                was_online = online;
                if restored && !sync_from_listener(&weak).await {
                    break;
                }
            }
            debug!("connectivity listener stopped");
        });
        *listener = Some(handle);
        info!("connectivity listener started");
    }

    /// Stop the connectivity listener, if any.
    pub fn stop(&self) {
        let mut listener = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = listener.take() {
            handle.abort();
            info!("connectivity listener stopped");
        }
    }

    pub fn is_listening(&self) -> bool {
        self.inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

/// Returns false once the engine is gone.
async fn sync_from_listener(weak: &Weak<EngineInner>) -> bool {
    let Some(inner) = weak.upgrade() else {
        return false;
    };
    let engine = SyncEngine { inner };
    if let Err(e) = engine.attempt_sync(SyncTrigger::ConnectivityRestored).await {
        warn!(error = %e, "sync after reconnect failed");
    }
    true
}

impl EngineInner {
    async fn run_cycle(&self) -> Result<SyncOutcome, SyncError> {
        let online = tokio::time::timeout(self.probe_timeout, self.probe.is_reachable())
            .await
            .unwrap_or(false);
        if !online {
            debug!("offline, skipping sync");
            return Ok(SyncOutcome::Offline);
        }

        let entries = self.store.drain_read().await?;
        if entries.is_empty() {
            self.store.record_sync_completed(now_timestamp()).await?;
            return Ok(SyncOutcome::NothingPending);
        }

        let batch: Vec<IngestEntry> = entries.iter().map(IngestEntry::from).collect();
        for entry in batch.iter().filter(|e| e.payload.is_null()) {
            warn!(
                outbox_id = entry.outbox_id,
                entity_id = %entry.entity_id,
                "outbox entry has an unreadable payload"
            );
        }

        let outcomes = match self.remote.ingest(&batch).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(error = %e, pending = batch.len(), "remote ingestion failed, entries stay queued");
                return Ok(SyncOutcome::RemoteUnavailable(e.to_string()));
            }
        };

        let mut accepted = HashSet::new();
        for outcome in &outcomes {
            if outcome.accepted {
                accepted.insert(outcome.outbox_id);
            } else {
                debug!(
                    outbox_id = outcome.outbox_id,
                    reason = outcome.reason.as_deref().unwrap_or(""),
                    "remote rejected entry"
                );
            }
        }

        let mut outbox_ids = Vec::new();
        let mut entity_ids: Vec<String> = Vec::new();
        for entry in entries.iter().filter(|e| accepted.contains(&e.id)) {
            outbox_ids.push(entry.id);
            if entry.entity == PATIENT_ENTITY && !entity_ids.contains(&entry.entity_id) {
                entity_ids.push(entry.entity_id.clone());
            }
        }

        let attempted = entries.len();
        let confirmed = outbox_ids.len();
        if confirmed > 0 {
            let counts = self.store.complete_flush(entity_ids, outbox_ids).await?;
            self.store.record_sync_completed(now_timestamp()).await?;
            info!(
                attempted,
                confirmed,
                cleaned = counts.cleaned_patients,
                "outbox flushed"
            );
        }

        Ok(SyncOutcome::Flushed {
            attempted,
            confirmed,
            rejected: attempted - confirmed,
        })
    }
}
