//! Outbox database operations.

use rusqlite::{params, params_from_iter, Connection};

use super::{parse_json_tolerant, placeholders, Database, DbResult};
use crate::models::{OutboxAction, OutboxEntry, PATIENT_ENTITY};

/// Rows changed by a completed flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushCounts {
    pub removed_entries: usize,
    pub cleaned_patients: usize,
}

/// Append one entry. Must run inside the transaction that wrote the entity.
pub(crate) fn append_outbox_entry(
    conn: &Connection,
    entity: &str,
    entity_id: &str,
    action: OutboxAction,
    payload: &str,
    created_at: &str,
) -> DbResult<i64> {
    conn.execute(
        r#"
        INSERT INTO outbox (entity, entity_id, action, payload, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![entity, entity_id, action.as_str(), payload, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

impl Database {
    /// All pending entries in enqueue order.
    pub fn list_outbox(&self) -> DbResult<Vec<OutboxEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, entity, entity_id, action, payload, created_at
            FROM outbox
            ORDER BY id ASC
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            let raw_payload: String = row.get(4)?;
            Ok(OutboxEntry {
                id: row.get(0)?,
                entity: row.get(1)?,
                entity_id: row.get(2)?,
                action: row.get(3)?,
                payload: parse_json_tolerant(Some(&raw_payload)),
                raw_payload,
                created_at: row.get(5)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Number of pending entries.
    pub fn count_outbox(&self) -> DbResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))
            .map_err(Into::into)
    }

    /// Delete exactly these entries. Irreversible; only after confirmed delivery.
    pub fn remove_outbox_entries(&self, ids: &[i64]) -> DbResult<usize> {
        remove_entries(&self.conn, ids)
    }

    /// Finish a sync run: drop confirmed entries and clean the patients they covered.
    ///
    /// Runs in one transaction. A patient is only marked clean when no entry for it
    /// is left in the outbox, so an edit that raced the flush or a rejected later
    /// edit keeps the row dirty.
    pub fn complete_flush(
        &mut self,
        entity_ids: &[String],
        outbox_ids: &[i64],
    ) -> DbResult<FlushCounts> {
        let tx = self.conn.transaction()?;

        let removed_entries = remove_entries(&tx, outbox_ids)?;

        let cleaned_patients = if entity_ids.is_empty() {
            0
        } else {
            let sql = format!(
                r#"
                UPDATE patients SET is_dirty = 0
                WHERE id IN ({})
                  AND NOT EXISTS (
                      SELECT 1 FROM outbox
                      WHERE outbox.entity = ? AND outbox.entity_id = patients.id
                  )
                "#,
                placeholders(entity_ids.len())
            );
            let mut values: Vec<&str> = entity_ids.iter().map(String::as_str).collect();
            values.push(PATIENT_ENTITY);
            tx.execute(&sql, params_from_iter(values))?
        };

        tx.commit()?;
        Ok(FlushCounts {
            removed_entries,
            cleaned_patients,
        })
    }
}

fn remove_entries(conn: &Connection, ids: &[i64]) -> DbResult<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let sql = format!("DELETE FROM outbox WHERE id IN ({})", placeholders(ids.len()));
    let rows_affected = conn.execute(&sql, params_from_iter(ids.iter()))?;
    Ok(rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PatientRecord;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_list_outbox_in_insertion_order() {
        let mut db = setup_db();
        for name in ["first", "second", "third"] {
            db.upsert_patient(&PatientRecord::new("p1", name)).unwrap();
        }

        let entries = db.list_outbox().unwrap();
        let names: Vec<&str> = entries
            .iter()
            .map(|e| e.payload.as_ref().unwrap()["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert!(entries.windows(2).all(|w| w[0].id < w[1].id));
        assert!(entries.iter().all(|e| e.action == "upsert"));
    }

    #[test]
    fn test_malformed_payload_reads_as_none() {
        let db = setup_db();
        append_outbox_entry(
            db.conn(),
            PATIENT_ENTITY,
            "p1",
            OutboxAction::Upsert,
            "{truncated",
            "2024-01-15T10:00:00Z",
        )
        .unwrap();

        let entries = db.list_outbox().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload, None);
        assert_eq!(entries[0].raw_payload, "{truncated");
    }

    #[test]
    fn test_remove_exact_entries() {
        let mut db = setup_db();
        for id in ["p1", "p2", "p3"] {
            db.upsert_patient(&PatientRecord::new(id, "x")).unwrap();
        }
        let entries = db.list_outbox().unwrap();

        assert_eq!(db.remove_outbox_entries(&[]).unwrap(), 0);
        assert_eq!(
            db.remove_outbox_entries(&[entries[0].id, entries[2].id]).unwrap(),
            2
        );

        let remaining = db.list_outbox().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].entity_id, "p2");
    }

    #[test]
    fn test_complete_flush_cleans_confirmed_patients() {
        let mut db = setup_db();
        db.upsert_patient(&PatientRecord::new("p1", "Rita")).unwrap();
        db.upsert_patient(&PatientRecord::new("p2", "Sunita")).unwrap();
        let entries = db.list_outbox().unwrap();

        let counts = db
            .complete_flush(&["p1".to_string()], &[entries[0].id])
            .unwrap();

        assert_eq!(
            counts,
            FlushCounts {
                removed_entries: 1,
                cleaned_patients: 1
            }
        );
        assert!(!db.get_patient("p1").unwrap().unwrap().is_dirty);
        assert!(db.get_patient("p2").unwrap().unwrap().is_dirty);
        assert_eq!(db.count_outbox().unwrap(), 1);
    }

    #[test]
    fn test_complete_flush_keeps_patient_dirty_while_entries_remain() {
        let mut db = setup_db();
        db.upsert_patient(&PatientRecord::new("p1", "edit one")).unwrap();
        db.upsert_patient(&PatientRecord::new("p1", "edit two")).unwrap();
        let entries = db.list_outbox().unwrap();

        // Only the first edit was confirmed
        let counts = db
            .complete_flush(&["p1".to_string()], &[entries[0].id])
            .unwrap();

        assert_eq!(counts.removed_entries, 1);
        assert_eq!(counts.cleaned_patients, 0);
        assert!(db.get_patient("p1").unwrap().unwrap().is_dirty);
    }
}
