//! Patient roster export for sharing off-device.

use serde::{Deserialize, Serialize};

use crate::db::now_timestamp;
use crate::models::PatientRecord;

const CSV_HEADER: &str = "id,name,village,age,gender,lastVisit,status,nextVisit,contact,territory_state,territory_district,territory_block,territory_village";

/// Snapshot of every stored patient.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientExport {
    /// Export timestamp
    pub exported_at: String,
    pub patients: Vec<PatientRecord>,
}

impl PatientExport {
    pub fn new(patients: Vec<PatientRecord>) -> Self {
        Self {
            exported_at: now_timestamp(),
            patients,
        }
    }

    /// Export to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Export to CSV, one row per patient, CRLF line endings.
    ///
    /// The header line is always followed by a separator, even with no rows.
    pub fn to_csv(&self) -> String {
        let rows: Vec<String> = self
            .patients
            .iter()
            .map(|p| {
                [
                    escape_csv(&p.id),
                    escape_csv(&p.name),
                    escape_csv(&p.village),
                    p.age.to_string(),
                    escape_csv(&p.gender),
                    escape_csv(&p.last_visit),
                    escape_csv(&p.status),
                    escape_csv(&p.next_visit),
                    escape_csv(&p.contact),
                    escape_csv(&p.territory_state),
                    escape_csv(&p.territory_district),
                    escape_csv(&p.territory_block),
                    escape_csv(&p.territory_village),
                ]
                .join(",")
            })
            .collect();

        format!("{}\r\n{}", CSV_HEADER, rows.join("\r\n"))
    }
}

/// Escape a CSV field.
fn escape_csv(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
