//! Patient database operations.

use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::outbox::append_outbox_entry;
use super::{parse_json_tolerant, placeholders, timestamp_after, Database, DbResult};
use crate::models::{OutboxAction, PatientRecord, PATIENT_ENTITY};

const PATIENT_COLUMNS: &str = r#"
    id, name, village, age, gender, last_visit, status, next_visit, contact,
    territory_state, territory_district, territory_block, territory_village,
    form_data, updated_at, is_dirty
"#;

impl Database {
    /// Insert or overwrite a patient and enqueue its outbox entry in one transaction.
    ///
    /// `updated_at` is always set here and the row is always left dirty. Either both
    /// the row and the outbox entry land, or neither does. `updated_at` is kept
    /// later than every stored one, so list order follows write order even if the
    /// device clock steps backwards.
    pub fn upsert_patient(&mut self, patient: &PatientRecord) -> DbResult<()> {
        let form_data = match &patient.form_data {
            Some(value) => serde_json::to_string(value)?,
            None => "{}".to_string(),
        };
        let payload = serde_json::to_string(patient)?;

        let tx = self.conn.transaction()?;
        let latest: Option<String> =
            tx.query_row("SELECT MAX(updated_at) FROM patients", [], |row| row.get(0))?;
        let now = timestamp_after(latest.as_deref());
        tx.execute(
            r#"
            INSERT INTO patients (
                id, name, village, age, gender, last_visit, status, next_visit, contact,
                territory_state, territory_district, territory_block, territory_village,
                form_data, updated_at, is_dirty
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 1)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                village = excluded.village,
                age = excluded.age,
                gender = excluded.gender,
                last_visit = excluded.last_visit,
                status = excluded.status,
                next_visit = excluded.next_visit,
                contact = excluded.contact,
                territory_state = excluded.territory_state,
                territory_district = excluded.territory_district,
                territory_block = excluded.territory_block,
                territory_village = excluded.territory_village,
                form_data = excluded.form_data,
                updated_at = excluded.updated_at,
                is_dirty = 1
            "#,
            params![
                patient.id,
                patient.name,
                patient.village,
                patient.age,
                patient.gender,
                patient.last_visit,
                patient.status,
                patient.next_visit,
                patient.contact,
                patient.territory_state,
                patient.territory_district,
                patient.territory_block,
                patient.territory_village,
                form_data,
                now,
            ],
        )?;
        append_outbox_entry(
            &tx,
            PATIENT_ENTITY,
            &patient.id,
            OutboxAction::Upsert,
            &payload,
            &now,
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Get a patient by ID.
    pub fn get_patient(&self, id: &str) -> DbResult<Option<PatientRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM patients WHERE id = ?", PATIENT_COLUMNS),
                [id],
                patient_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// List all patients, most recently written first.
    pub fn list_patients(&self) -> DbResult<Vec<PatientRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM patients ORDER BY updated_at DESC, rowid DESC",
            PATIENT_COLUMNS
        ))?;

        let rows = stmt.query_map([], patient_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Clear the dirty flag on exactly these patients. Leaves `updated_at` alone.
    ///
    /// Only valid once the matching outbox entries are confirmed; see
    /// [`Database::complete_flush`] for the guarded variant used by sync.
    pub fn mark_patients_clean(&self, ids: &[String]) -> DbResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE patients SET is_dirty = 0 WHERE id IN ({})",
            placeholders(ids.len())
        );
        let rows_affected = self.conn.execute(&sql, params_from_iter(ids.iter()))?;
        Ok(rows_affected)
    }

    /// Number of stored patients.
    pub fn count_patients(&self) -> DbResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))
            .map_err(Into::into)
    }

    /// IDs of patients with unconfirmed local changes.
    pub fn list_dirty_patient_ids(&self) -> DbResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM patients WHERE is_dirty = 1 ORDER BY updated_at")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<PatientRecord> {
    let form_data: Option<String> = row.get(13)?;
    let is_dirty: i64 = row.get(15)?;
    Ok(PatientRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        village: row.get(2)?,
        age: row.get(3)?,
        gender: row.get(4)?,
        last_visit: row.get(5)?,
        status: row.get(6)?,
        next_visit: row.get(7)?,
        contact: row.get(8)?,
        territory_state: row.get(9)?,
        territory_district: row.get(10)?,
        territory_block: row.get(11)?,
        territory_village: row.get(12)?,
        form_data: parse_json_tolerant(form_data.as_deref()),
        updated_at: row.get(14)?,
        is_dirty: is_dirty != 0,
    })
}
