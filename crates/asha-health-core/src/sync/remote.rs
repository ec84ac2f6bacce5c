//! Remote ingestion contract and clients.
//!
//! The system of record receives batches of outbox entries and answers with one
//! accept/reject outcome per entry. Delivery is at-least-once: the same entry can
//! arrive again after an ambiguous failure, so the remote must treat a repeated
//! `idempotency_key` as a no-op.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::models::OutboxEntry;

/// Remote transport errors.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote answered with status {0}")]
    Status(u16),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// One outbox entry as delivered to the remote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestEntry {
    pub outbox_id: i64,
    pub entity: String,
    pub entity_id: String,
    pub action: String,
    /// `null` when the stored payload could not be parsed
    pub payload: serde_json::Value,
    pub created_at: String,
    pub idempotency_key: String,
}

impl From<&OutboxEntry> for IngestEntry {
    fn from(entry: &OutboxEntry) -> Self {
        Self {
            outbox_id: entry.id,
            entity: entry.entity.clone(),
            entity_id: entry.entity_id.clone(),
            action: entry.action.clone(),
            payload: entry.payload.clone().unwrap_or(serde_json::Value::Null),
            created_at: entry.created_at.clone(),
            idempotency_key: idempotency_key(&entry.entity_id, &entry.raw_payload),
        }
    }
}

/// Remote verdict for one entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub outbox_id: i64,
    pub accepted: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl IngestOutcome {
    pub fn accepted(outbox_id: i64) -> Self {
        Self {
            outbox_id,
            accepted: true,
            reason: None,
        }
    }

    pub fn rejected(outbox_id: i64, reason: impl Into<String>) -> Self {
        Self {
            outbox_id,
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

/// Key identifying an `(entity_id, payload)` pair across redeliveries.
pub fn idempotency_key(entity_id: &str, raw_payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(raw_payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// The system of record's ingestion endpoint.
///
/// Entries missing from the returned outcomes count as not confirmed.
#[async_trait]
pub trait RemoteIngest: Send + Sync {
    async fn ingest(&self, batch: &[IngestEntry]) -> Result<Vec<IngestOutcome>, RemoteError>;
}

/// Accepts every entry without contacting anything.
///
/// Matches the deployed app, which has no backend yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedRemote;

#[async_trait]
impl RemoteIngest for SimulatedRemote {
    async fn ingest(&self, batch: &[IngestEntry]) -> Result<Vec<IngestOutcome>, RemoteError> {
        Ok(batch
            .iter()
            .map(|entry| IngestOutcome::accepted(entry.outbox_id))
            .collect())
    }
}

#[derive(Serialize)]
struct IngestRequest<'a> {
    entries: &'a [IngestEntry],
}

#[derive(Deserialize)]
struct IngestResponse {
    results: Vec<IngestOutcome>,
}

/// JSON-over-HTTP ingestion client.
///
/// POSTs `{"entries": [...]}` and expects `{"results": [...]}` back.
pub struct HttpIngestClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpIngestClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl RemoteIngest for HttpIngestClient {
    async fn ingest(&self, batch: &[IngestEntry]) -> Result<Vec<IngestOutcome>, RemoteError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&IngestRequest { entries: batch })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }

        let body: IngestResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Protocol(e.to_string()))?;
        debug!(
            sent = batch.len(),
            answered = body.results.len(),
            "remote ingestion answered"
        );
        Ok(body.results)
    }
}
