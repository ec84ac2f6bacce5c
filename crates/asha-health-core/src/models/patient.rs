//! Patient models.

use serde::{Deserialize, Serialize};

/// A patient record as captured by a field worker.
///
/// The serialized form is also the outbox payload, so field names follow the
/// shape the remote system of record already consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    /// Globally unique, immutable once assigned
    pub id: String,
    pub name: String,
    pub village: String,
    pub age: i64,
    pub gender: String,
    /// `YYYY-MM-DD`, display only
    pub last_visit: String,
    /// One of [`PatientStatus`], stored verbatim
    pub status: String,
    /// `YYYY-MM-DD`, display only
    pub next_visit: String,
    pub contact: String,
    #[serde(rename = "territory_state")]
    pub territory_state: String,
    #[serde(rename = "territory_district")]
    pub territory_district: String,
    #[serde(rename = "territory_block")]
    pub territory_block: String,
    #[serde(rename = "territory_village")]
    pub territory_village: String,
    /// Opaque form payload; never interpreted by the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_data: Option<serde_json::Value>,
    /// Set by the store on every write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// True while the latest local state is unconfirmed by the remote
    #[serde(default)]
    pub is_dirty: bool,
}

impl PatientRecord {
    /// Create a record with the given id and name; everything else empty.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: PatientStatus::General.as_str().to_string(),
            ..Default::default()
        }
    }

    /// Parsed status, if it is one of the known classifications.
    pub fn status_kind(&self) -> Option<PatientStatus> {
        self.status.parse().ok()
    }
}

/// Care classification derived by the capturing form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatientStatus {
    Pregnant,
    ChildCare,
    Anc,
    General,
}

impl PatientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatientStatus::Pregnant => "pregnant",
            PatientStatus::ChildCare => "child_care",
            PatientStatus::Anc => "anc",
            PatientStatus::General => "general",
        }
    }
}

impl std::str::FromStr for PatientStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pregnant" => Ok(PatientStatus::Pregnant),
            "child_care" => Ok(PatientStatus::ChildCare),
            "anc" => Ok(PatientStatus::Anc),
            "general" => Ok(PatientStatus::General),
            other => Err(format!("Unknown patient status: {}", other)),
        }
    }
}
