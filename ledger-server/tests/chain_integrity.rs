//! Whole-chain verification against real record sequences, including
//! tampering scenarios and lock contention.

mod common;

use std::time::Duration;

use common::TestHarness;
use ledger_server::chain::CHAIN_GENESIS;
use ledger_server::chain::verify::ChainStatus;
use ledger_server::locks::{LockBackend, tenant_record_key};
use shared::models::EventType;

const TENANT: i64 = 42;

#[tokio::test]
async fn empty_chain_verifies_trivially_valid() {
    let harness = TestHarness::new().await;

    let result = harness.verifier.verify_chain_integrity(99).await;

    assert_eq!(result.status, ChainStatus::Valid);
    assert!(result.is_valid);
    assert_eq!(result.total_records, 0);
    assert_eq!(result.valid_records, 0);
    assert!(result.break_at_record_id.is_none());
}

#[tokio::test]
async fn untampered_chain_verifies_valid() {
    let harness = TestHarness::new().await;
    harness.seed_tenant(TENANT).await;

    let r1 = harness
        .records
        .create_alta_record(&harness.invoice(TENANT, "001"))
        .await
        .unwrap();
    let r2 = harness
        .records
        .create_alta_record(&harness.invoice(TENANT, "002"))
        .await
        .unwrap();
    let r3 = harness.records.create_anulacion_record(r1.id).await.unwrap();

    // Chain linkage is what the orchestrator promised.
    assert_eq!(r1.hash_previous, CHAIN_GENESIS);
    assert_eq!(r2.hash_previous, r1.hash_record);
    assert_eq!(r3.hash_previous, r2.hash_record);
    assert_eq!(r3.hash_record.len(), 64);

    let result = harness.verifier.verify_chain_integrity(TENANT).await;
    assert_eq!(result.status, ChainStatus::Valid);
    assert_eq!(result.total_records, 3);
    assert_eq!(result.valid_records, 3);
}

#[tokio::test]
async fn tampered_content_breaks_at_the_exact_record() {
    let harness = TestHarness::new().await;
    harness.seed_tenant(TENANT).await;

    for reference in ["001", "002", "003"] {
        harness
            .records
            .create_alta_record(&harness.invoice(TENANT, reference))
            .await
            .unwrap();
    }
    let records = ledger_server::db::repository::invoice_record::load_sequence(
        &harness.pool,
        TENANT,
        None,
    )
    .await
    .unwrap();
    let victim = &records[1];

    // Mutate a stored business field without recomputing hashes.
    sqlx::query("UPDATE invoice_record SET importe_total = '9999.99' WHERE id = ?1")
        .bind(victim.id)
        .execute(&harness.pool)
        .await
        .unwrap();

    let result = harness.verifier.verify_chain_integrity(TENANT).await;
    assert_eq!(result.status, ChainStatus::Broken);
    assert!(!result.is_valid);
    assert_eq!(result.break_at_record_id, Some(victim.id));
    assert_eq!(result.total_records, 3);
    // Nothing past the break may be reported valid.
    assert_eq!(result.valid_records, 1);
    assert_ne!(result.expected_hash, result.actual_hash);
    assert_eq!(result.actual_hash.as_deref(), Some(victim.hash_record.as_str()));
}

#[tokio::test]
async fn tampered_linkage_breaks_at_the_exact_record() {
    let harness = TestHarness::new().await;
    harness.seed_tenant(TENANT).await;

    for reference in ["001", "002", "003"] {
        harness
            .records
            .create_alta_record(&harness.invoice(TENANT, reference))
            .await
            .unwrap();
    }
    let records = ledger_server::db::repository::invoice_record::load_sequence(
        &harness.pool,
        TENANT,
        None,
    )
    .await
    .unwrap();
    let second_hash = records[1].hash_record.clone();
    let third = &records[2];

    let fake = "f".repeat(64);
    sqlx::query("UPDATE invoice_record SET hash_previous = ?1 WHERE id = ?2")
        .bind(&fake)
        .bind(third.id)
        .execute(&harness.pool)
        .await
        .unwrap();

    let result = harness.verifier.verify_chain_integrity(TENANT).await;
    assert_eq!(result.status, ChainStatus::Broken);
    assert_eq!(result.break_at_record_id, Some(third.id));
    assert_eq!(result.expected_hash.as_deref(), Some(second_hash.as_str()));
    assert_eq!(result.actual_hash.as_deref(), Some(fake.as_str()));
}

#[tokio::test]
async fn break_and_recovery_are_attested_in_the_event_ledger() {
    let harness = TestHarness::new().await;
    harness.seed_tenant(TENANT).await;

    harness
        .records
        .create_alta_record(&harness.invoice(TENANT, "001"))
        .await
        .unwrap();
    let original = ledger_server::db::repository::invoice_record::load_sequence(
        &harness.pool,
        TENANT,
        None,
    )
    .await
    .unwrap()
    .remove(0);

    sqlx::query("UPDATE invoice_record SET importe_total = '1.00' WHERE id = ?1")
        .bind(original.id)
        .execute(&harness.pool)
        .await
        .unwrap();
    let broken = harness.verifier.verify_chain_integrity(TENANT).await;
    assert_eq!(broken.status, ChainStatus::Broken);

    // Undo the tampering: the next pass is a recovery.
    sqlx::query("UPDATE invoice_record SET importe_total = ?1 WHERE id = ?2")
        .bind(&original.importe_total)
        .bind(original.id)
        .execute(&harness.pool)
        .await
        .unwrap();
    let recovered = harness.verifier.verify_chain_integrity(TENANT).await;
    assert_eq!(recovered.status, ChainStatus::Valid);

    let events = harness
        .events
        .storage()
        .query_recent(TENANT, 50, 0)
        .await
        .unwrap();
    assert!(events.iter().any(|e| e.event_type == EventType::ChainBreak));
    assert!(events.iter().any(|e| e.event_type == EventType::ChainRecovery));
    assert!(events.iter().any(|e| e.event_type == EventType::IntegrityCheck));
}

#[tokio::test]
async fn lock_contention_yields_error_not_broken() {
    let harness = TestHarness::new().await;
    harness.seed_tenant(TENANT).await;
    harness
        .records
        .create_alta_record(&harness.invoice(TENANT, "001"))
        .await
        .unwrap();

    let key = tenant_record_key(TENANT);
    assert!(
        harness
            .local_locks
            .acquire(&key, Duration::from_millis(100))
            .await
    );

    let result = harness.verifier.verify_chain_integrity(TENANT).await;
    harness.local_locks.release(&key).await;

    // Retryable operational condition, explicitly distinct from `broken`.
    assert_eq!(result.status, ChainStatus::Error);
    assert!(!result.is_valid);
    assert!(result.break_at_record_id.is_none());
    assert!(result.error_message.unwrap().to_lowercase().contains("lock"));

    let after = harness.verifier.verify_chain_integrity(TENANT).await;
    assert_eq!(after.status, ChainStatus::Valid);
}
