//! Host-facing API tests.

use std::time::Duration;

use asha_health_core::{
    load_config, open_core, open_core_in_memory, AshaError, FfiCoreConfig, FfiNewUser, FfiPatient,
};

fn patient(id: &str, name: &str) -> FfiPatient {
    FfiPatient {
        id: id.into(),
        name: name.into(),
        village: "Goal".into(),
        age: 24,
        gender: "female".into(),
        last_visit: "2024-01-10".into(),
        status: "anc".into(),
        next_visit: "2024-02-10".into(),
        contact: "9876543210".into(),
        territory_state: "Bihar".into(),
        territory_district: "Patna".into(),
        territory_block: "Danapur".into(),
        territory_village: "Goal".into(),
        form_data_json: Some(r#"{"ancVisits":2}"#.into()),
        updated_at: None,
        is_dirty: false,
    }
}

fn new_user(email: &str) -> FfiNewUser {
    FfiNewUser {
        name: "Asha Kumari".into(),
        email: email.into(),
        password: "secret".into(),
        asha_id: "ASHA-001".into(),
        phone: "9876543210".into(),
        supervisor_id: None,
        territory_state: Some("Bihar".into()),
        territory_district: None,
        territory_block: None,
        territory_village: None,
        preferred_language: None,
    }
}

#[tokio::test]
async fn test_patient_roundtrip_and_manual_sync() {
    let core = open_core_in_memory().unwrap();
    core.upsert_patient(patient("p1", "Rita")).await.unwrap();

    let all = core.get_all_patients().await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].is_dirty);
    assert_eq!(all[0].form_data_json.as_deref(), Some(r#"{"ancVisits":2}"#));

    let offline = core.sync_now().await.unwrap();
    assert_eq!(offline.outcome, "offline");
    assert_eq!(offline.trigger, "manual");
    assert!(offline.should_notify_failure);
    assert_eq!(core.pending_sync_count().await.unwrap(), 1);

    core.set_connectivity(true);
    let report = core.sync_now().await.unwrap();
    assert_eq!(report.outcome, "flushed");
    assert_eq!(report.confirmed, 1);
    assert!(!report.should_notify_failure);

    let p1 = core.get_patient("p1".into()).await.unwrap().unwrap();
    assert!(!p1.is_dirty);
    assert!(core.last_synced_at().await.unwrap().is_some());
}

#[tokio::test]
async fn test_invalid_patient_input() {
    let core = open_core_in_memory().unwrap();

    let result = core.upsert_patient(patient("", "Nameless")).await;
    assert!(matches!(result, Err(AshaError::InvalidInput(_))));

    let mut broken = patient("p1", "Rita");
    broken.form_data_json = Some("{not json".into());
    let result = core.upsert_patient(broken).await;
    assert!(matches!(result, Err(AshaError::SerializationError(_))));

    assert_eq!(core.pending_sync_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_connectivity_listener() {
    let core = open_core_in_memory().unwrap();
    core.upsert_patient(patient("p1", "Rita")).await.unwrap();
    core.start_connectivity_sync().await;

    core.set_connectivity(true);
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while core.pending_sync_count().await.unwrap() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(drained.is_ok());

    core.stop_connectivity_sync();
}

#[tokio::test]
async fn test_exports() {
    let core = open_core_in_memory().unwrap();
    core.upsert_patient(patient("p1", "Rita, Devi")).await.unwrap();

    let csv = core.export_patients_csv().await.unwrap();
    let lines: Vec<&str> = csv.split("\r\n").collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("p1,\"Rita, Devi\",Goal,24,female"));

    let json: serde_json::Value =
        serde_json::from_str(&core.export_patients_json().await.unwrap()).unwrap();
    assert_eq!(json["patients"][0]["name"], "Rita, Devi");
}

#[tokio::test]
async fn test_user_registration_and_login() {
    let core = open_core_in_memory().unwrap();

    let user = core.create_user(new_user("Asha@Example.org")).await.unwrap();
    assert_eq!(user.email, "asha@example.org");
    assert_eq!(user.preferred_language.as_deref(), Some("en"));

    let duplicate = core.create_user(new_user("asha@example.org")).await;
    assert!(matches!(duplicate, Err(AshaError::EmailExists(_))));

    let missing = core.create_user(new_user("  ")).await;
    assert!(matches!(missing, Err(AshaError::InvalidInput(_))));

    assert!(core
        .login("ASHA@example.org".into(), "secret".into())
        .await
        .unwrap()
        .is_some());
    assert!(core
        .login("asha@example.org".into(), "wrong".into())
        .await
        .unwrap()
        .is_none());

    assert!(core
        .update_preferred_language(user.id.clone(), "hi".into())
        .await
        .unwrap());
    let users = core.list_users().await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].preferred_language.as_deref(), Some("hi"));
}

#[tokio::test]
async fn test_open_core_with_legacy_store() {
    let dir = tempfile::tempdir().unwrap();
    let legacy_path = dir.path().join("patients.json");
    std::fs::write(
        &legacy_path,
        r#"[{"id": 1, "name": "Rita"}, {"id": "2", "name": "Sunita", "age": "31"}]"#,
    )
    .unwrap();

    let mut config = load_config(None).unwrap();
    config.database_path = dir.path().join("asha.db").to_string_lossy().into_owned();
    config.legacy_store_path = Some(legacy_path.to_string_lossy().into_owned());
    config.ingest_url = None;

    let core = open_core(config).unwrap();
    let result = core.migrate_legacy().await.unwrap();
    assert_eq!(result.outcome, "completed");
    assert_eq!(result.imported, 2);
    assert!(!legacy_path.exists());

    let again = core.migrate_legacy().await.unwrap();
    assert_eq!(again.outcome, "not_needed");
    assert_eq!(core.get_all_patients().await.unwrap().len(), 2);
}

#[test]
fn test_config_record_defaults() {
    let config: FfiCoreConfig = asha_health_core::CoreConfig::for_test().into();
    assert_eq!(config.probe_timeout_ms, 3000);
    assert_eq!(config.ingest_timeout_ms, 15_000);
}
