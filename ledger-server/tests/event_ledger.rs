//! Event ledger chaining, genesis linkage, tamper detection and the
//! AUDIT_ACCESS trace left by history reads.

mod common;

use common::TestHarness;
use ledger_server::eventlog::EVENT_CHAIN_GENESIS;
use shared::models::EventType;

const TENANT: i64 = 7;

#[tokio::test]
async fn events_chain_from_the_fixed_genesis() {
    let harness = TestHarness::new().await;

    for i in 0..5 {
        let entry = harness
            .events
            .log_event(
                EventType::AeatSubmit,
                TENANT,
                None,
                serde_json::json!({ "batch_id": i }),
            )
            .await
            .expect("event appended");
        assert_eq!(entry.hash_event.len(), 64);
    }

    let mut entries = harness
        .events
        .storage()
        .query_recent(TENANT, 50, 0)
        .await
        .unwrap();
    entries.reverse(); // chronological

    assert_eq!(entries.len(), 5);
    assert_eq!(entries[0].hash_previous_event, EVENT_CHAIN_GENESIS);
    for window in entries.windows(2) {
        assert_eq!(window[1].hash_previous_event, window[0].hash_event);
    }

    let report = harness.events.verify_integrity(TENANT).await.unwrap();
    assert!(report.chain_intact);
    assert_eq!(report.total_entries, 5);
    assert_eq!(report.valid_entries, 5);
}

#[tokio::test]
async fn tenants_have_independent_event_chains() {
    let harness = TestHarness::new().await;

    let a = harness
        .events
        .log_event(EventType::SystemStart, 1, None, serde_json::json!({}))
        .await
        .unwrap();
    let b = harness
        .events
        .log_event(EventType::SystemStart, 2, None, serde_json::json!({}))
        .await
        .unwrap();

    // Both tenants start from genesis, not from each other.
    assert_eq!(a.hash_previous_event, EVENT_CHAIN_GENESIS);
    assert_eq!(b.hash_previous_event, EVENT_CHAIN_GENESIS);
}

#[tokio::test]
async fn tampered_event_details_break_verification() {
    let harness = TestHarness::new().await;

    for i in 0..3 {
        harness
            .events
            .log_event(
                EventType::RecordCreate,
                TENANT,
                Some(i),
                serde_json::json!({ "invoice_number": format!("VF-2026-{i:03}") }),
            )
            .await
            .unwrap();
    }
    let mut entries = harness
        .events
        .storage()
        .query_recent(TENANT, 10, 0)
        .await
        .unwrap();
    entries.reverse();
    let victim = &entries[1];

    sqlx::query("UPDATE event_log SET details = '{\"invoice_number\":\"FORGED\"}' WHERE id = ?1")
        .bind(victim.id)
        .execute(&harness.pool)
        .await
        .unwrap();

    let report = harness.events.verify_integrity(TENANT).await.unwrap();
    assert!(!report.chain_intact);
    assert_eq!(report.valid_entries, 1);
    let first_break = report.first_break.expect("break reported");
    assert_eq!(first_break.entry_id, victim.id);
    assert_ne!(first_break.expected_hash, first_break.actual_hash);
}

#[tokio::test]
async fn history_reads_leave_an_audit_access_trace() {
    let harness = TestHarness::new().await;

    harness
        .events
        .log_event(EventType::ConfigChange, TENANT, None, serde_json::json!({}))
        .await
        .unwrap();

    let history = harness.events.history(TENANT, 10, 0).await.unwrap();
    assert_eq!(history.len(), 1);

    let entries = harness
        .events
        .storage()
        .query_recent(TENANT, 10, 0)
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].event_type, EventType::AuditAccess);

    // The access trace chains onto the ledger like any other entry.
    let report = harness.events.verify_integrity(TENANT).await.unwrap();
    assert!(report.chain_intact);
}
