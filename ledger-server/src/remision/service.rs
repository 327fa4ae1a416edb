//! Remision service
//!
//! Delivers pending records to the AEAT while respecting the authority's
//! rate constraints and degrading gracefully under sustained failure.
//!
//! Guard sequence before any network traffic, each refusal distinguishable
//! by kind so callers never misattribute a scheduling refusal as an
//! external-system fault:
//! 1. circuit breaker (open after repeated consecutive failures),
//! 2. flow control (minimum spacing between submissions),
//! 3. batch sizing (the pending queue is split, never truncated).
//!
//! Batch lifecycle: `queued → sent → {accepted | partially_accepted |
//! failed}`. A transport failure re-queues the batch in place with an
//! exponential backoff deadline until the attempt ceiling is reached, after
//! which the batch is terminally failed and flagged for manual
//! intervention.

use std::sync::Arc;

use sqlx::SqlitePool;

use shared::models::{
    AeatEnvironment, AeatStatus, BatchStatus, EventType, InvoiceRecord, RemisionBatch,
};

use crate::aeat::{AeatClient, AeatError, AeatResponse, GlobalStatus, soap};
use crate::db::repository::{invoice_record, pipeline_state, remision_batch, tenant_config};
use crate::eventlog::EventLogService;
use crate::utils::{AppError, AppResult};

/// Pipeline tunables (see `core::config` for the env-var table).
#[derive(Debug, Clone)]
pub struct RemisionConfig {
    pub flow_control_seconds: u64,
    pub max_retries: u32,
    pub retry_backoff_base_seconds: u64,
    pub retry_backoff_cap_seconds: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_pause_seconds: u64,
    pub max_records_per_batch: usize,
    pub endpoint_production: String,
    pub endpoint_testing: String,
    pub software_id: String,
    pub software_version: String,
}

/// A scheduling refusal. Not an error in the batch data and not an
/// external-system fault: the batch stays queued untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardRefusal {
    /// The breaker is open until the given timestamp (Unix millis)
    CircuitBreakerOpen { open_until: i64 },
    /// Minimum spacing since the last submission has not elapsed
    FlowControl { retry_in_ms: i64 },
}

impl std::fmt::Display for GuardRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardRefusal::CircuitBreakerOpen { open_until } => write!(
                f,
                "Circuit breaker is open until {open_until} (too many consecutive failures)"
            ),
            GuardRefusal::FlowControl { retry_in_ms } => write!(
                f,
                "Flow control: minimum interval between submissions not met, retry in {retry_in_ms}ms"
            ),
        }
    }
}

/// Result of a submission attempt that got past the guards.
#[derive(Debug, Clone)]
pub struct RemisionResult {
    pub batch_id: i64,
    pub status: BatchStatus,
    pub accepted_records: i64,
    pub rejected_records: i64,
    pub csv: Option<String>,
    pub error_message: Option<String>,
    /// Whether the batch was re-queued for another attempt
    pub will_retry: bool,
    pub elapsed_ms: i64,
}

/// Outcome of `submit_batch`.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// A guard refused the submission; no network traffic happened
    Refused(GuardRefusal),
    /// An attempt ran to completion (accepted, rejected, or re-queued)
    Completed(RemisionResult),
}

pub struct RemisionService {
    pool: SqlitePool,
    client: Arc<dyn AeatClient>,
    events: Arc<EventLogService>,
    config: RemisionConfig,
}

impl RemisionService {
    pub fn new(
        pool: SqlitePool,
        client: Arc<dyn AeatClient>,
        events: Arc<EventLogService>,
        config: RemisionConfig,
    ) -> Self {
        Self {
            pool,
            client,
            events,
            config,
        }
    }

    // ========================================================================
    // Queue processing
    // ========================================================================

    /// Group unbatched pending records per tenant and create queued batches,
    /// splitting oversized queues by the configured maximum. Returns the
    /// number of batches created.
    pub async fn process_queue(&self) -> AppResult<u32> {
        let pending = invoice_record::find_unbatched_pending(&self.pool).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut batches_created = 0u32;
        let mut chunk: Vec<InvoiceRecord> = Vec::new();

        // Records arrive ordered by (tenant_id, id); flush at every tenant
        // boundary and whenever a chunk reaches the configured maximum.
        let mut pending_iter = pending.into_iter().peekable();
        while let Some(record) = pending_iter.next() {
            let tenant_id = record.tenant_id;
            chunk.push(record);

            let tenant_boundary = pending_iter
                .peek()
                .map(|next| next.tenant_id != tenant_id)
                .unwrap_or(true);
            if chunk.len() >= self.config.max_records_per_batch || tenant_boundary {
                self.create_batch(&mut chunk).await?;
                batches_created += 1;
            }
        }

        Ok(batches_created)
    }

    async fn create_batch(&self, chunk: &mut Vec<InvoiceRecord>) -> AppResult<()> {
        let tenant_id = match chunk.first() {
            Some(record) => record.tenant_id,
            None => return Ok(()),
        };

        let environment = tenant_config::find_by_tenant(&self.pool, tenant_id)
            .await?
            .map(|c| c.aeat_environment)
            .unwrap_or(AeatEnvironment::Testing);

        let batch =
            remision_batch::create(&self.pool, tenant_id, environment, chunk.len() as i64).await?;
        for record in chunk.iter() {
            invoice_record::assign_batch(&self.pool, record.id, batch.id).await?;
        }

        tracing::info!(
            batch_id = batch.id,
            tenant_id,
            records = chunk.len(),
            "Created remision batch"
        );
        chunk.clear();
        Ok(())
    }

    /// Queued batches whose backoff deadline has passed.
    pub async fn due_batches(&self) -> AppResult<Vec<RemisionBatch>> {
        Ok(remision_batch::find_due(&self.pool, shared::util::now_millis()).await?)
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Run one submission attempt for a queued batch.
    pub async fn submit_batch(&self, batch_id: i64) -> AppResult<SubmitOutcome> {
        let started = std::time::Instant::now();
        let batch = remision_batch::find_by_id(&self.pool, batch_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("remision batch {batch_id}")))?;

        if batch.status != BatchStatus::Queued {
            return Err(AppError::validation(format!(
                "Batch {batch_id} is not queued (status {:?})",
                batch.status
            )));
        }

        let now = shared::util::now_millis();

        // Guard 1: circuit breaker.
        if let Some(open_until) = pipeline_state::circuit_breaker_until(&self.pool).await?
            && open_until > now
        {
            tracing::warn!(batch_id, open_until, "Circuit breaker is open, skipping batch");
            return Ok(SubmitOutcome::Refused(GuardRefusal::CircuitBreakerOpen {
                open_until,
            }));
        }

        // Guard 2: flow control.
        let flow_window_ms = (self.config.flow_control_seconds * 1000) as i64;
        if let Some(last) = pipeline_state::last_submit_at(&self.pool).await? {
            let elapsed = now - last;
            if elapsed < flow_window_ms {
                let retry_in_ms = flow_window_ms - elapsed;
                tracing::info!(batch_id, retry_in_ms, "Flow control window not elapsed");
                return Ok(SubmitOutcome::Refused(GuardRefusal::FlowControl {
                    retry_in_ms,
                }));
            }
        }

        let records = invoice_record::find_by_batch(&self.pool, batch_id).await?;
        if records.is_empty() {
            remision_batch::mark_failed(&self.pool, batch_id, "No records found for batch").await?;
            return Ok(SubmitOutcome::Completed(RemisionResult {
                batch_id,
                status: BatchStatus::Failed,
                accepted_records: 0,
                rejected_records: 0,
                csv: None,
                error_message: Some("No records found for batch".into()),
                will_retry: false,
                elapsed_ms: started.elapsed().as_millis() as i64,
            }));
        }

        let envelope = soap::build_soap_envelope(
            &records,
            &self.config.software_id,
            &self.config.software_version,
        )
        .map_err(|e| AppError::validation(e.to_string()))?;

        let attempt = remision_batch::mark_sent(&self.pool, batch_id, now).await?;

        self.events
            .log_event(
                EventType::AeatSubmit,
                batch.tenant_id,
                None,
                serde_json::json!({
                    "description": format!(
                        "Submitting batch {batch_id} with {} records",
                        records.len()
                    ),
                    "batch_id": batch_id,
                    "record_count": records.len(),
                    "attempt": attempt,
                }),
            )
            .await;

        let endpoint = match batch.aeat_environment {
            AeatEnvironment::Production => &self.config.endpoint_production,
            AeatEnvironment::Testing => &self.config.endpoint_testing,
        };

        match self.client.send(endpoint, &envelope).await {
            Ok(raw) => {
                // Transport succeeded: stamp the flow-control window.
                pipeline_state::set_last_submit_at(&self.pool, shared::util::now_millis()).await?;

                let response = soap::parse_aeat_response(&raw);
                if response.is_unusable() {
                    let message = response
                        .error_message
                        .unwrap_or_else(|| "Unrecognizable AEAT response".into());
                    return self
                        .handle_transport_failure(&batch, attempt, &message, started)
                        .await;
                }

                self.handle_response(&batch, &records, response, attempt, started)
                    .await
            }
            Err(AeatError::Validation(msg)) => Err(AppError::validation(msg)),
            Err(AeatError::Transport(msg)) => {
                self.handle_transport_failure(&batch, attempt, &msg, started)
                    .await
            }
        }
    }

    /// A parsed authority verdict: update the batch, the individual records
    /// and the breaker, and attest the response in the ledger.
    async fn handle_response(
        &self,
        batch: &RemisionBatch,
        records: &[InvoiceRecord],
        response: AeatResponse,
        attempt: i64,
        started: std::time::Instant,
    ) -> AppResult<SubmitOutcome> {
        let now = shared::util::now_millis();
        let status = match response.global_status {
            Some(GlobalStatus::Correcto) => BatchStatus::Accepted,
            Some(GlobalStatus::ParcialmenteCorrecto) => BatchStatus::PartiallyAccepted,
            _ => BatchStatus::Failed,
        };

        remision_batch::record_outcome(
            &self.pool,
            batch.id,
            status,
            response.accepted_count,
            response.rejected_count,
            response.csv.as_deref(),
            response.error_message.as_deref(),
            now,
        )
        .await?;

        self.update_record_statuses(records, &response, now).await?;

        // An answered submission closes the failure streak, whatever the
        // business verdict was.
        pipeline_state::reset_circuit_breaker(&self.pool).await?;

        self.events
            .log_event(
                EventType::AeatResponse,
                batch.tenant_id,
                None,
                serde_json::json!({
                    "description": format!(
                        "AEAT response for batch {}: {:?}",
                        batch.id, response.global_status
                    ),
                    "batch_id": batch.id,
                    "accepted": response.accepted_count,
                    "rejected": response.rejected_count,
                    "csv": response.csv.clone(),
                    "attempt": attempt,
                }),
            )
            .await;

        if status == BatchStatus::Failed {
            // Business rejection: retrying the identical payload cannot
            // succeed, so the batch is terminal and needs an operator.
            self.flag_manual_intervention(batch, response.error_message.as_deref())
                .await;
        }

        tracing::info!(
            batch_id = batch.id,
            ?status,
            accepted = response.accepted_count,
            rejected = response.rejected_count,
            "Batch submission completed"
        );

        Ok(SubmitOutcome::Completed(RemisionResult {
            batch_id: batch.id,
            status,
            accepted_records: response.accepted_count,
            rejected_records: response.rejected_count,
            csv: response.csv,
            error_message: response.error_message,
            will_retry: false,
            elapsed_ms: started.elapsed().as_millis() as i64,
        }))
    }

    /// Per-record verdicts, looked up by invoice number. A record with no
    /// line of its own inherits acceptance only from a fully successful
    /// batch.
    async fn update_record_statuses(
        &self,
        records: &[InvoiceRecord],
        response: &AeatResponse,
        submitted_at: i64,
    ) -> AppResult<()> {
        for record in records {
            let outcome = response
                .record_results
                .iter()
                .find(|r| r.invoice_number == record.numero_factura);

            let (status, code, message) = match outcome {
                Some(result) => (
                    if result.status.is_accepted() {
                        AeatStatus::Accepted
                    } else {
                        AeatStatus::Rejected
                    },
                    result.code.clone(),
                    result.message.clone(),
                ),
                None if response.is_success() => (AeatStatus::Accepted, None, None),
                // No verdict for this record: leave it submitted for audit.
                None => (AeatStatus::Submitted, None, None),
            };

            invoice_record::update_submission(
                &self.pool,
                record.id,
                status,
                code.as_deref(),
                message.as_deref(),
                submitted_at,
            )
            .await?;
        }
        Ok(())
    }

    /// Transport-level failure (timeout, connection error, malformed body):
    /// retryable. Re-queue with backoff while attempts remain, terminally
    /// fail otherwise, and feed the circuit breaker either way.
    async fn handle_transport_failure(
        &self,
        batch: &RemisionBatch,
        attempt: i64,
        message: &str,
        started: std::time::Instant,
    ) -> AppResult<SubmitOutcome> {
        tracing::warn!(
            batch_id = batch.id,
            attempt,
            error = %message,
            "AEAT communication error"
        );

        let failures = pipeline_state::record_failure(&self.pool).await?;
        if failures >= self.config.circuit_breaker_threshold as i64 {
            let open_until = shared::util::now_millis()
                + (self.config.circuit_breaker_pause_seconds * 1000) as i64;
            pipeline_state::open_circuit_breaker(&self.pool, open_until).await?;
            tracing::error!(
                consecutive_failures = failures,
                open_until,
                "Circuit breaker opened after repeated AEAT failures"
            );
        }

        let will_retry = attempt < self.config.max_retries as i64;
        if will_retry {
            let delay_ms = backoff_delay_ms(
                self.config.retry_backoff_base_seconds,
                attempt as u32,
                self.config.retry_backoff_cap_seconds,
            );
            let next_attempt_at = shared::util::now_millis() + delay_ms;
            remision_batch::schedule_retry(&self.pool, batch.id, next_attempt_at, message).await?;
            tracing::warn!(
                batch_id = batch.id,
                attempt,
                delay_ms,
                "Batch re-queued with backoff"
            );
        } else {
            remision_batch::mark_failed(&self.pool, batch.id, message).await?;
            self.flag_manual_intervention(batch, Some(message)).await;
        }

        self.events
            .log(crate::eventlog::EventDraft {
                event_type: EventType::AeatResponse,
                tenant_id: batch.tenant_id,
                actor_id: None,
                target_record_id: None,
                severity: shared::models::EventSeverity::Warning,
                details: serde_json::json!({
                    "description": format!(
                        "Batch {} attempt {attempt} failed: {message}",
                        batch.id
                    ),
                    "batch_id": batch.id,
                    "attempt": attempt,
                    "will_retry": will_retry,
                }),
                ip_address: None,
            })
            .await;

        Ok(SubmitOutcome::Completed(RemisionResult {
            batch_id: batch.id,
            status: if will_retry {
                BatchStatus::Queued
            } else {
                BatchStatus::Failed
            },
            accepted_records: 0,
            rejected_records: 0,
            csv: None,
            error_message: Some(message.to_string()),
            will_retry,
            elapsed_ms: started.elapsed().as_millis() as i64,
        }))
    }

    /// Terminal batch failure: visible through the ledger and the operator
    /// alert path.
    async fn flag_manual_intervention(&self, batch: &RemisionBatch, reason: Option<&str>) {
        tracing::error!(
            batch_id = batch.id,
            tenant_id = batch.tenant_id,
            reason = reason.unwrap_or("unknown"),
            "Batch terminally failed, manual intervention required"
        );
        self.events
            .log_event(
                EventType::ManualIntervention,
                batch.tenant_id,
                None,
                serde_json::json!({
                    "description": format!("Batch {} requires manual intervention", batch.id),
                    "batch_id": batch.id,
                    "reason": reason,
                }),
            )
            .await;
    }
}

/// Exponential backoff: `base × 2^(attempt-1)`, capped.
fn backoff_delay_ms(base_seconds: u64, attempt: u32, cap_seconds: u64) -> i64 {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = base_seconds.saturating_mul(1u64 << exponent);
    (delay.min(cap_seconds) * 1000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay_ms(30, 1, 900), 30_000);
        assert_eq!(backoff_delay_ms(30, 2, 900), 60_000);
        assert_eq!(backoff_delay_ms(30, 3, 900), 120_000);
        assert_eq!(backoff_delay_ms(30, 6, 900), 900_000);
        assert_eq!(backoff_delay_ms(30, 60, 900), 900_000);
    }

    #[test]
    fn test_guard_refusals_are_distinguishable() {
        let breaker = GuardRefusal::CircuitBreakerOpen { open_until: 10 };
        let flow = GuardRefusal::FlowControl { retry_in_ms: 10 };
        assert_ne!(breaker, flow);
        assert!(breaker.to_string().to_lowercase().contains("circuit breaker"));
        assert!(flow.to_string().to_lowercase().contains("flow control"));
    }
}
