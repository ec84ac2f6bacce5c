//! Property tests for outbox ordering and dirty-bit convergence.

use std::collections::{BTreeSet, HashSet};

use asha_health_core::db::Database;
use asha_health_core::PatientRecord;
use proptest::prelude::*;

fn patient_ids() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(prop::sample::select(vec!["p1", "p2", "p3", "p4"]), 1..30)
        .prop_map(|ids| ids.into_iter().map(String::from).collect())
}

proptest! {
    #[test]
    fn outbox_preserves_enqueue_order(ids in patient_ids()) {
        let mut db = Database::open_in_memory().unwrap();
        for (i, id) in ids.iter().enumerate() {
            db.upsert_patient(&PatientRecord::new(id.clone(), format!("edit {}", i))).unwrap();
        }

        let entries = db.list_outbox().unwrap();
        prop_assert_eq!(entries.len(), ids.len());

        let drained: Vec<String> = entries.iter().map(|e| e.entity_id.clone()).collect();
        prop_assert_eq!(&drained, &ids);
        prop_assert!(entries.windows(2).all(|w| w[0].id < w[1].id));

        for (i, entry) in entries.iter().enumerate() {
            let expected = format!("edit {}", i);
            prop_assert_eq!(entry.payload.as_ref().unwrap()["name"].as_str(), Some(expected.as_str()));
        }
    }

    #[test]
    fn confirmed_prefix_converges(ids in patient_ids(), confirm in 0usize..30) {
        let mut db = Database::open_in_memory().unwrap();
        for id in &ids {
            db.upsert_patient(&PatientRecord::new(id.clone(), "x")).unwrap();
        }

        let entries = db.list_outbox().unwrap();
        let confirmed = &entries[..confirm.min(entries.len())];
        let outbox_ids: Vec<i64> = confirmed.iter().map(|e| e.id).collect();
        let entity_ids: Vec<String> = confirmed
            .iter()
            .map(|e| e.entity_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        db.complete_flush(&entity_ids, &outbox_ids).unwrap();

        // Dirty exactly when an entry is still queued
        let queued: HashSet<String> = db
            .list_outbox()
            .unwrap()
            .into_iter()
            .map(|e| e.entity_id)
            .collect();
        let dirty: HashSet<String> = db.list_dirty_patient_ids().unwrap().into_iter().collect();
        prop_assert_eq!(dirty, queued);
        prop_assert_eq!(db.count_outbox().unwrap() as usize, entries.len() - outbox_ids.len());
    }
}
