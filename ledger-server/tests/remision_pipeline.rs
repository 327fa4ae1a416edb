//! Submission pipeline behavior: batching, guards, response handling,
//! backoff re-queueing, terminal failure and the circuit breaker.

mod common;

use common::{TestHarness, correcto_response, parcial_response, test_remision_config};
use ledger_server::db::repository::{invoice_record, pipeline_state, remision_batch};
use ledger_server::remision::{GuardRefusal, SubmitOutcome};
use shared::models::{AeatStatus, BatchStatus, EventType, InvoiceRecord};

const TENANT: i64 = 42;

async fn seed_pending_records(harness: &TestHarness, count: usize) -> Vec<InvoiceRecord> {
    harness.seed_tenant(TENANT).await;
    for i in 0..count {
        harness
            .records
            .create_alta_record(&harness.invoice(TENANT, &format!("{:03}", i + 1)))
            .await
            .unwrap();
    }
    invoice_record::load_sequence(&harness.pool, TENANT, None)
        .await
        .unwrap()
}

/// Queue the pending records into exactly one batch and return its id.
async fn queue_single_batch(harness: &TestHarness) -> i64 {
    assert_eq!(harness.remision.process_queue().await.unwrap(), 1);
    let due = harness.remision.due_batches().await.unwrap();
    assert_eq!(due.len(), 1);
    due[0].id
}

#[tokio::test]
async fn oversized_pending_queues_are_split_not_truncated() {
    let mut config = test_remision_config();
    config.max_records_per_batch = 2;
    let harness = TestHarness::with_remision_config(config).await;
    seed_pending_records(&harness, 5).await;

    let created = harness.remision.process_queue().await.unwrap();
    assert_eq!(created, 3); // 2 + 2 + 1

    let due = harness.remision.due_batches().await.unwrap();
    assert_eq!(due.len(), 3);
    let total: i64 = due.iter().map(|b| b.total_records).sum();
    assert_eq!(total, 5);

    // Every record ended up in exactly one batch.
    for record in invoice_record::load_sequence(&harness.pool, TENANT, None)
        .await
        .unwrap()
    {
        assert!(record.remision_batch_id.is_some());
    }
}

#[tokio::test]
async fn flow_control_refuses_without_touching_the_network() {
    let harness = TestHarness::new().await;
    seed_pending_records(&harness, 1).await;
    let batch_id = queue_single_batch(&harness).await;

    pipeline_state::set_last_submit_at(&harness.pool, shared::util::now_millis())
        .await
        .unwrap();

    let outcome = harness.remision.submit_batch(batch_id).await.unwrap();
    match outcome {
        SubmitOutcome::Refused(GuardRefusal::FlowControl { retry_in_ms }) => {
            assert!(retry_in_ms > 0);
        }
        other => panic!("expected flow-control refusal, got {other:?}"),
    }
    assert_eq!(harness.aeat.call_count(), 0);

    // The batch is untouched and still queued.
    let batch = remision_batch::find_by_id(&harness.pool, batch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Queued);
    assert_eq!(batch.attempt_count, 0);
}

#[tokio::test]
async fn open_circuit_breaker_refuses_with_a_distinct_kind() {
    let harness = TestHarness::new().await;
    seed_pending_records(&harness, 1).await;
    let batch_id = queue_single_batch(&harness).await;

    let open_until = shared::util::now_millis() + 60_000;
    pipeline_state::open_circuit_breaker(&harness.pool, open_until)
        .await
        .unwrap();

    let outcome = harness.remision.submit_batch(batch_id).await.unwrap();
    match outcome {
        SubmitOutcome::Refused(refusal) => {
            // Must be distinguishable from a flow-control refusal.
            assert_eq!(refusal, GuardRefusal::CircuitBreakerOpen { open_until });
            assert!(!matches!(refusal, GuardRefusal::FlowControl { .. }));
        }
        other => panic!("expected breaker refusal, got {other:?}"),
    }
    assert_eq!(harness.aeat.call_count(), 0);
}

#[tokio::test]
async fn accepted_response_updates_batch_and_records() {
    let harness = TestHarness::new().await;
    let records = seed_pending_records(&harness, 2).await;
    let batch_id = queue_single_batch(&harness).await;

    let numbers: Vec<&str> = records.iter().map(|r| r.numero_factura.as_str()).collect();
    harness.aeat.push_response(correcto_response(&numbers)).await;

    let outcome = harness.remision.submit_batch(batch_id).await.unwrap();
    let SubmitOutcome::Completed(result) = outcome else {
        panic!("expected completed submission");
    };
    assert_eq!(result.status, BatchStatus::Accepted);
    assert_eq!(result.accepted_records, 2);
    assert_eq!(result.rejected_records, 0);
    assert!(!result.will_retry);
    assert_eq!(harness.aeat.call_count(), 1);

    let batch = remision_batch::find_by_id(&harness.pool, batch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Accepted);
    assert_eq!(batch.attempt_count, 1);
    assert_eq!(batch.csv.as_deref(), Some("CSV-TEST-0001"));
    assert!(batch.sent_at.is_some());
    assert!(batch.response_at.is_some());

    for record in invoice_record::find_by_batch(&harness.pool, batch_id)
        .await
        .unwrap()
    {
        assert_eq!(record.aeat_status, AeatStatus::Accepted);
        assert!(record.submitted_at.is_some());
    }

    // Flow control stamped; the ledger holds the submit/response pair.
    assert!(pipeline_state::last_submit_at(&harness.pool).await.unwrap().is_some());
    let events = harness.events.storage().query_recent(TENANT, 50, 0).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == EventType::AeatSubmit));
    assert!(events.iter().any(|e| e.event_type == EventType::AeatResponse));
}

#[tokio::test]
async fn partially_accepted_response_rejects_only_the_failing_record() {
    let harness = TestHarness::new().await;
    let records = seed_pending_records(&harness, 2).await;
    let batch_id = queue_single_batch(&harness).await;

    harness
        .aeat
        .push_response(parcial_response(
            &[records[0].numero_factura.as_str()],
            &[records[1].numero_factura.as_str()],
        ))
        .await;

    let SubmitOutcome::Completed(result) = harness.remision.submit_batch(batch_id).await.unwrap()
    else {
        panic!("expected completed submission");
    };
    assert_eq!(result.status, BatchStatus::PartiallyAccepted);
    assert_eq!(result.accepted_records, 1);
    assert_eq!(result.rejected_records, 1);

    let stored = invoice_record::find_by_batch(&harness.pool, batch_id)
        .await
        .unwrap();
    assert_eq!(stored[0].aeat_status, AeatStatus::Accepted);
    assert_eq!(stored[1].aeat_status, AeatStatus::Rejected);
    assert_eq!(stored[1].aeat_response_code.as_deref(), Some("1117"));
    assert_eq!(
        stored[1].aeat_response_message.as_deref(),
        Some("Huella incorrecta")
    );
}

#[tokio::test]
async fn transport_failure_requeues_with_backoff() {
    let harness = TestHarness::new().await;
    seed_pending_records(&harness, 1).await;
    let batch_id = queue_single_batch(&harness).await;

    harness.aeat.push_transport_error("connection reset").await;

    let before = shared::util::now_millis();
    let SubmitOutcome::Completed(result) = harness.remision.submit_batch(batch_id).await.unwrap()
    else {
        panic!("expected completed submission");
    };
    assert_eq!(result.status, BatchStatus::Queued);
    assert!(result.will_retry);

    let batch = remision_batch::find_by_id(&harness.pool, batch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Queued);
    assert_eq!(batch.attempt_count, 1);
    assert!(batch.next_attempt_at.unwrap() >= before + 1000);
    assert_eq!(batch.error_message.as_deref(), Some("connection reset"));

    // A failed transport never stamps the flow-control window, and the
    // failure streak advanced.
    assert!(pipeline_state::last_submit_at(&harness.pool).await.unwrap().is_none());
    assert_eq!(pipeline_state::consecutive_failures(&harness.pool).await.unwrap(), 1);

    // The batch is not yet due; the backoff deadline gates it.
    assert!(harness.remision.due_batches().await.unwrap().is_empty());
}

#[tokio::test]
async fn ambiguous_response_is_retryable_never_accepted() {
    let harness = TestHarness::new().await;
    seed_pending_records(&harness, 1).await;
    let batch_id = queue_single_batch(&harness).await;

    harness.aeat.push_response("<html>502 Bad Gateway</html>").await;

    let SubmitOutcome::Completed(result) = harness.remision.submit_batch(batch_id).await.unwrap()
    else {
        panic!("expected completed submission");
    };
    assert_eq!(result.status, BatchStatus::Queued);
    assert!(result.will_retry);

    // No record may be silently marked accepted on an ambiguous outcome.
    for record in invoice_record::find_by_batch(&harness.pool, batch_id)
        .await
        .unwrap()
    {
        assert_ne!(record.aeat_status, AeatStatus::Accepted);
    }
}

#[tokio::test]
async fn exhausted_attempts_fail_terminally_and_flag_manual_intervention() {
    let mut config = test_remision_config();
    config.max_retries = 1;
    let harness = TestHarness::with_remision_config(config).await;
    seed_pending_records(&harness, 1).await;
    let batch_id = queue_single_batch(&harness).await;

    harness.aeat.push_transport_error("timeout").await;

    let SubmitOutcome::Completed(result) = harness.remision.submit_batch(batch_id).await.unwrap()
    else {
        panic!("expected completed submission");
    };
    assert_eq!(result.status, BatchStatus::Failed);
    assert!(!result.will_retry);

    let batch = remision_batch::find_by_id(&harness.pool, batch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);

    let events = harness.events.storage().query_recent(TENANT, 50, 0).await.unwrap();
    assert!(
        events
            .iter()
            .any(|e| e.event_type == EventType::ManualIntervention)
    );
}

#[tokio::test]
async fn rearmed_terminal_batch_can_be_resubmitted() {
    let mut config = test_remision_config();
    config.max_retries = 1;
    let harness = TestHarness::with_remision_config(config).await;
    let records = seed_pending_records(&harness, 1).await;
    let batch_id = queue_single_batch(&harness).await;

    harness.aeat.push_transport_error("timeout").await;
    let SubmitOutcome::Completed(result) = harness.remision.submit_batch(batch_id).await.unwrap()
    else {
        panic!("expected completed submission");
    };
    assert_eq!(result.status, BatchStatus::Failed);

    // Operator re-arms the batch once the outage is resolved.
    remision_batch::reset_for_manual_retry(&harness.pool, batch_id)
        .await
        .unwrap();
    let batch = remision_batch::find_by_id(&harness.pool, batch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Queued);
    assert_eq!(batch.attempt_count, 0);

    let numbers: Vec<&str> = records.iter().map(|r| r.numero_factura.as_str()).collect();
    harness.aeat.push_response(correcto_response(&numbers)).await;
    let SubmitOutcome::Completed(retry) = harness.remision.submit_batch(batch_id).await.unwrap()
    else {
        panic!("expected completed submission");
    };
    assert_eq!(retry.status, BatchStatus::Accepted);
}

#[tokio::test]
async fn repeated_failures_open_the_circuit_breaker() {
    let mut config = test_remision_config();
    config.circuit_breaker_threshold = 2;
    config.retry_backoff_base_seconds = 0;
    let harness = TestHarness::with_remision_config(config).await;
    seed_pending_records(&harness, 1).await;
    let batch_id = queue_single_batch(&harness).await;

    harness.aeat.push_transport_error("timeout 1").await;
    harness.aeat.push_transport_error("timeout 2").await;

    let SubmitOutcome::Completed(first) = harness.remision.submit_batch(batch_id).await.unwrap()
    else {
        panic!("expected completed submission");
    };
    assert!(first.will_retry);
    assert!(
        pipeline_state::circuit_breaker_until(&harness.pool)
            .await
            .unwrap()
            .is_none()
    );

    let SubmitOutcome::Completed(second) = harness.remision.submit_batch(batch_id).await.unwrap()
    else {
        panic!("expected completed submission");
    };
    assert!(second.will_retry);

    // Threshold reached: the breaker is now open and refuses the next try.
    let open_until = pipeline_state::circuit_breaker_until(&harness.pool)
        .await
        .unwrap()
        .expect("breaker open");
    assert!(open_until > shared::util::now_millis());

    let outcome = harness.remision.submit_batch(batch_id).await.unwrap();
    assert!(matches!(
        outcome,
        SubmitOutcome::Refused(GuardRefusal::CircuitBreakerOpen { .. })
    ));
    assert_eq!(harness.aeat.call_count(), 2);

    // A later successful exchange closes the breaker again.
    pipeline_state::reset_circuit_breaker(&harness.pool).await.unwrap();
    assert!(
        pipeline_state::circuit_breaker_until(&harness.pool)
            .await
            .unwrap()
            .is_none()
    );
}
