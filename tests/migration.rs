//! Plaintext-to-encrypted migration over the in-memory stores.

mod common;

use std::sync::{Arc, Mutex};

use common::{contact, Harness, RecordingConfirmation, COLLECTION, USER};
use contact_vault::{
    DocumentStore, JobOptions, MigrationCheck, MigrationOutcome, MigrationState, Prompt,
    VaultError,
};

#[tokio::test]
async fn migration_encrypts_legacy_corpus() {
    let h = Harness::new();
    h.seed_plaintext(5).await;
    let engine = h.vault.migration();

    let confirm = RecordingConfirmation::new(true);
    let outcome = engine
        .run(USER, &confirm, &JobOptions::default())
        .await
        .unwrap();
    let MigrationOutcome::Completed(report) = outcome else {
        panic!("expected a completed migration, got {outcome:?}");
    };
    assert_eq!(report.migrated, 5);
    assert_eq!(confirm.asked(), vec![Prompt::Migration]);
    assert_eq!(engine.state(), MigrationState::Done);

    for stored in h.documents.snapshot(COLLECTION) {
        assert_eq!(stored["_encrypted"], true);
        assert!(!stored["phone"].as_str().unwrap().starts_with("090-"));
        // Non-sensitive attributes stay readable
        assert!(stored["name"].as_str().unwrap().starts_with("Name "));
    }

    let all = h.vault.store(Some(USER)).get_all().await.unwrap();
    assert_eq!(all.len(), 5);
    assert!(all.iter().all(|r| r["phone"].as_str().unwrap().starts_with("090-p")));
}

#[tokio::test]
async fn second_run_performs_no_mutations() {
    let h = Harness::new();
    h.seed_plaintext(3).await;
    let engine = h.vault.migration();
    engine.migrate(USER, &JobOptions::default()).await.unwrap();
    let writes = h.documents.write_count();

    // Direct re-run: every record is already marked
    let report = engine.migrate(USER, &JobOptions::default()).await.unwrap();
    assert_eq!(report.migrated, 0);
    assert_eq!(report.skipped, 3);

    // Flow re-run: the flag short-circuits the check
    let outcome = engine
        .run(USER, &RecordingConfirmation::new(true), &JobOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome, MigrationOutcome::NotNeeded);
    assert_eq!(h.documents.write_count(), writes);
}

#[tokio::test]
async fn interrupted_corpus_is_finished_on_rerun() {
    let h = Harness::new();
    h.seed_plaintext(2).await;
    h.seed_encrypted(2).await;
    let engine = h.vault.migration();

    let report = engine.migrate(USER, &JobOptions::default()).await.unwrap();
    assert_eq!(report.total, 4);
    assert_eq!(report.migrated, 2);
    assert_eq!(report.skipped, 2);

    let all = h.vault.store(Some(USER)).get_all().await.unwrap();
    assert!(all
        .iter()
        .all(|r| r["email"].as_str().unwrap().ends_with("@example.com")));
}

#[tokio::test]
async fn declined_migration_asks_again_next_time() {
    let h = Harness::new();
    h.seed_plaintext(1).await;
    let engine = h.vault.migration();

    let err = engine
        .run(USER, &RecordingConfirmation::new(false), &JobOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::UserDeclined));
    assert_eq!(engine.check(USER).await.unwrap(), MigrationCheck::LegacyDataPresent);
}

#[tokio::test]
async fn encrypted_sample_sets_flag_without_migrating() {
    let h = Harness::new();
    h.seed_encrypted(1).await;
    let engine = h.vault.migration();
    assert_eq!(engine.check(USER).await.unwrap(), MigrationCheck::NoLegacyData);
    assert!(h.vault.settings().is_migrated(USER).unwrap());
    assert_eq!(engine.check(USER).await.unwrap(), MigrationCheck::AlreadyMigrated);
}

#[tokio::test]
async fn progress_is_fractional_and_monotonic() {
    let h = Harness::new();
    h.seed_plaintext(4).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let options = JobOptions::default().with_progress(move |p| sink.lock().unwrap().push(p.fraction()));
    h.vault.migration().migrate(USER, &options).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![0.25, 0.5, 0.75, 1.0]);
}

#[tokio::test]
async fn records_written_after_migration_stay_encrypted() {
    let h = Harness::new();
    h.seed_plaintext(1).await;
    h.vault.migration().migrate(USER, &JobOptions::default()).await.unwrap();

    let store = h.vault.store(Some(USER));
    store.save(&contact("new")).await.unwrap();
    let raw = h.documents.get(COLLECTION, "new").await.unwrap().unwrap();
    assert_eq!(raw["_encrypted"], true);
    assert_eq!(store.get("new").await.unwrap().unwrap()["phone"], "090-new");
}
