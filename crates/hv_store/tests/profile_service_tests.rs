//! Integration tests for the profile service against a real SQLite
//! file: first-run seeding, transactional CRUD, task mutations with
//! trust recomputation, search, export and store maintenance.

use hv_store::db::{Store, SCHEMA_VERSION};
use hv_store::error::StoreError;
use hv_store::export::{export_profile, export_profiles, ProfileExport, ProfilesExport};
use hv_store::models::{MigrationKind, TrustLevel};
use hv_store::profiles::{AccountSeed, ProfileService};
use serde_json::json;
use tempfile::tempdir;

async fn open_service() -> (tempfile::TempDir, ProfileService) {
    let dir = tempdir().unwrap();
    let store = Store::open(&dir.path().join("haven.db")).await.unwrap();
    (dir, ProfileService::new(store))
}

fn jane() -> AccountSeed {
    AccountSeed {
        display_name: "Jane Dale".to_string(),
        email: Some("jane@example.com".to_string()),
        phone: Some("+47 555 0101".to_string()),
        pin: Some("4821".to_string()),
        password: None,
    }
}

#[tokio::test]
async fn first_run_seeds_the_task_catalog_once() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("haven.db");

    let store = Store::open(&path).await.unwrap();
    assert_eq!(store.task_definitions().await.unwrap().len(), 8);
    let records = store.migration_records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, MigrationKind::Schema);
    assert_eq!(records[0].target_version, SCHEMA_VERSION);
    drop(store);

    // Reopening the same file must not seed again.
    let store = Store::open(&path).await.unwrap();
    assert_eq!(store.task_definitions().await.unwrap().len(), 8);
    assert_eq!(store.migration_records().await.unwrap().len(), 1);
}

#[tokio::test]
async fn new_profile_starts_with_eight_incomplete_tasks() {
    let (_dir, service) = open_service().await;
    let id = service.create_profile(jane()).await.unwrap();
    let profile = service.get_profile(&id).await.unwrap();

    assert_eq!(profile.tasks.len(), 8);
    assert!(profile.tasks.iter().all(|t| !t.completed && !t.verified));
    assert_eq!(profile.trust.total, 0.0);
    assert_eq!(profile.trust.level, TrustLevel::Minimal);
    assert_eq!(profile.trust.completed_tasks, 0);
    assert_eq!(profile.sync.version, 1);

    // The seed PIN arrives in plaintext and must land hashed.
    let pin = profile.account.pin.expect("pin credential");
    assert_ne!(pin.hash, "4821");
    assert!(pin.verify("4821").unwrap());
    assert!(profile.last_accessed_at.is_some());
}

#[tokio::test]
async fn duplicate_email_is_rejected() {
    let (_dir, service) = open_service().await;
    service.create_profile(jane()).await.unwrap();

    let err = service.create_profile(jane()).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateAccount(_)));
    assert_eq!(service.list_profiles().await.unwrap().len(), 1);
}

#[tokio::test]
async fn empty_display_name_is_rejected() {
    let (_dir, service) = open_service().await;
    let err = service
        .create_profile(AccountSeed { display_name: "  ".to_string(), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[tokio::test]
async fn completing_a_task_updates_trust_in_the_same_read() {
    let (_dir, service) = open_service().await;
    let id = service.create_profile(jane()).await.unwrap();

    service
        .complete_task(&id, "set-pin", Some(json!({"method": "pin"})))
        .await
        .unwrap();
    let profile = service.get_profile(&id).await.unwrap();

    assert_eq!(profile.trust.total, 12.5);
    assert_eq!(profile.trust.completed_tasks, 1);
    let task = profile.tasks.iter().find(|t| t.definition_id == "set-pin").unwrap();
    assert!(task.completed);
    assert_eq!(task.payload, Some(json!({"method": "pin"})));
}

#[tokio::test]
async fn verification_adds_the_bonus_and_requires_completion() {
    let (_dir, service) = open_service().await;
    let id = service.create_profile(jane()).await.unwrap();

    let err = service.verify_task(&id, "verify-email").await.unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    service.complete_task(&id, "verify-email", None).await.unwrap();
    service.verify_task(&id, "verify-email").await.unwrap();
    let profile = service.get_profile(&id).await.unwrap();
    // 12.5 + 1.25 bonus, rounded to the nearest half.
    assert_eq!(profile.trust.total, 14.0);
}

#[tokio::test]
async fn uncompleting_clears_verification_too() {
    let (_dir, service) = open_service().await;
    let id = service.create_profile(jane()).await.unwrap();
    service.complete_task(&id, "verify-email", None).await.unwrap();
    service.verify_task(&id, "verify-email").await.unwrap();

    service.uncomplete_task(&id, "verify-email").await.unwrap();
    let profile = service.get_profile(&id).await.unwrap();
    let task = profile.tasks.iter().find(|t| t.definition_id == "verify-email").unwrap();
    assert!(!task.completed && !task.verified);
    assert!(task.completed_at.is_none() && task.verified_at.is_none());
    assert_eq!(profile.trust.total, 0.0);
}

#[tokio::test]
async fn completing_all_tasks_caps_at_one_hundred() {
    let (_dir, service) = open_service().await;
    let id = service.create_profile(jane()).await.unwrap();
    for def in service.store().task_definitions().await.unwrap() {
        service.complete_task(&id, &def.id, None).await.unwrap();
        if def.verification_required {
            service.verify_task(&id, &def.id).await.unwrap();
        }
    }
    let profile = service.get_profile(&id).await.unwrap();
    assert_eq!(profile.trust.total, 100.0);
    assert_eq!(profile.trust.level, TrustLevel::Trusted);
    assert_eq!(profile.trust.completed_tasks, 8);
}

#[tokio::test]
async fn unknown_profile_and_task_are_not_found() {
    let (_dir, service) = open_service().await;
    let id = service.create_profile(jane()).await.unwrap();

    assert!(matches!(
        service.get_profile("no-such-profile").await.unwrap_err(),
        StoreError::NotFound(_)
    ));
    assert!(matches!(
        service.complete_task(&id, "no-such-task", None).await.unwrap_err(),
        StoreError::NotFound(_)
    ));
}

#[tokio::test]
async fn delete_removes_account_and_tasks_with_the_profile() {
    let (_dir, service) = open_service().await;
    let id = service.create_profile(jane()).await.unwrap();

    service.delete_profile(&id).await.unwrap();
    assert!(matches!(service.get_profile(&id).await.unwrap_err(), StoreError::NotFound(_)));

    let stats = service.store().stats().await.unwrap();
    assert_eq!(stats.profiles, 0);
    assert_eq!(stats.accounts, 0);
    assert_eq!(stats.tasks, 0);
    // Reference data survives.
    assert_eq!(stats.task_definitions, 8);
}

#[tokio::test]
async fn update_profile_replaces_data_and_rejects_email_clashes() {
    let (_dir, service) = open_service().await;
    let id = service.create_profile(jane()).await.unwrap();
    let other = service
        .create_profile(AccountSeed {
            display_name: "Ola Berg".to_string(),
            email: Some("ola@example.com".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let mut profile = service.get_profile(&id).await.unwrap();
    profile.account.display_name = "Jane D.".to_string();
    service.update_profile(&profile).await.unwrap();
    assert_eq!(service.get_profile(&id).await.unwrap().account.display_name, "Jane D.");

    let mut clashing = service.get_profile(&other).await.unwrap();
    clashing.account.email = Some("jane@example.com".to_string());
    let err = service.update_profile(&clashing).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateAccount(_)));
}

#[tokio::test]
async fn search_matches_name_email_and_phone_case_insensitively() {
    let (_dir, service) = open_service().await;
    service.create_profile(jane()).await.unwrap();
    service
        .create_profile(AccountSeed {
            display_name: "Ola Berg".to_string(),
            email: Some("ola@example.com".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let by_name = service.search_profiles("JANE").await.unwrap();
    assert_eq!(by_name.len(), 1);
    assert_eq!(by_name[0].account.display_name, "Jane Dale");

    assert_eq!(service.search_profiles("example.com").await.unwrap().len(), 2);
    assert_eq!(service.search_profiles("555 0101").await.unwrap().len(), 1);
    assert!(service.search_profiles("   ").await.unwrap().is_empty());
    assert!(service.search_profiles("nobody").await.unwrap().is_empty());
}

#[tokio::test]
async fn search_folds_case_beyond_ascii() {
    let (_dir, service) = open_service().await;
    service
        .create_profile(AccountSeed {
            display_name: "ÖSTEN ÅBERG".to_string(),
            email: Some("osten@example.com".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let hits = service.search_profiles("östen").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].account.display_name, "ÖSTEN ÅBERG");
    assert_eq!(service.search_profiles("åberg").await.unwrap().len(), 1);
}

#[tokio::test]
async fn export_envelopes_carry_version_and_timestamp() {
    let (_dir, service) = open_service().await;
    let id = service.create_profile(jane()).await.unwrap();
    let profile = service.get_profile(&id).await.unwrap();

    let single: ProfileExport =
        serde_json::from_str(&export_profile(&profile).unwrap()).unwrap();
    assert_eq!(single.version, "1.0");
    assert!(single.exported_at > 0);
    assert_eq!(single.profile.id, id);

    let all = service.list_profiles().await.unwrap();
    let bulk: ProfilesExport = serde_json::from_str(&export_profiles(&all).unwrap()).unwrap();
    assert_eq!(bulk.version, "1.0");
    assert_eq!(bulk.profiles.len(), 1);
}

#[tokio::test]
async fn clear_wipes_user_data_but_keeps_reference_data() {
    let (_dir, service) = open_service().await;
    service.create_profile(jane()).await.unwrap();

    service.store().clear().await.unwrap();
    let stats = service.store().stats().await.unwrap();
    assert_eq!(stats.profiles, 0);
    assert_eq!(stats.accounts, 0);
    assert_eq!(stats.tasks, 0);
    assert_eq!(stats.task_definitions, 8);
    assert_eq!(stats.migration_records, 1);

    // The catalog survives, so new profiles still get their tasks.
    let id = service.create_profile(jane()).await.unwrap();
    assert_eq!(service.get_profile(&id).await.unwrap().tasks.len(), 8);
}

#[tokio::test]
async fn stats_track_completed_tasks() {
    let (_dir, service) = open_service().await;
    let id = service.create_profile(jane()).await.unwrap();
    service.complete_task(&id, "set-pin", None).await.unwrap();
    service.complete_task(&id, "register-services", None).await.unwrap();

    let stats = service.store().stats().await.unwrap();
    assert_eq!(stats.tasks, 8);
    assert_eq!(stats.completed_tasks, 2);
}
