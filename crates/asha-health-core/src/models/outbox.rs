//! Outbox models.

use serde::{Deserialize, Serialize};

/// Entity name used for patient outbox entries.
pub const PATIENT_ENTITY: &str = "patient";

/// Kind of change recorded in the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxAction {
    Upsert,
}

impl OutboxAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxAction::Upsert => "upsert",
        }
    }
}

impl std::str::FromStr for OutboxAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upsert" => Ok(OutboxAction::Upsert),
            other => Err(format!("Unknown outbox action: {}", other)),
        }
    }
}

/// A pending change awaiting confirmation by the remote system of record.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    /// Monotonic; defines FIFO order
    pub id: i64,
    pub entity: String,
    pub entity_id: String,
    /// Kept as text so unknown actions from newer schemas survive a read
    pub action: String,
    /// Full snapshot at enqueue time, `None` if the stored text is not valid JSON
    pub payload: Option<serde_json::Value>,
    /// Stored payload text exactly as enqueued
    pub raw_payload: String,
    pub created_at: String,
}
