//! Whole-chain verification
//!
//! Walks a tenant's record sequence from genesis, recomputing every digest
//! and checking every link. Verification takes the same tenant lock as
//! record creation: a chain being appended to is a moving target.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use sqlx::SqlitePool;

use shared::models::EventType;

use crate::chain::{self, CHAIN_GENESIS, RecordHashFields};
use crate::db::repository::{invoice_record, pipeline_state};
use crate::eventlog::EventLogService;
use crate::locks::{LockBackend, tenant_record_key};

const CHAIN_STATUS_VALID: &str = "valid";
const CHAIN_STATUS_BROKEN: &str = "broken";

/// Overall verdict of a verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    /// Every link and every content digest checked out
    Valid,
    /// A link or content digest failed; evidence of tampering or an append bug
    Broken,
    /// The pass could not run (lock contention, storage failure) — retryable,
    /// not evidence of tampering
    Error,
}

/// Outcome of a verification pass (value object, not persisted).
#[derive(Debug, Clone, Serialize)]
pub struct ChainIntegrityResult {
    pub tenant_id: i64,
    pub status: ChainStatus,
    pub is_valid: bool,
    pub total_records: u64,
    pub valid_records: u64,
    /// First record where either the linkage or the content digest failed
    pub break_at_record_id: Option<i64>,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
    pub verification_time_ms: i64,
    pub error_message: Option<String>,
}

impl ChainIntegrityResult {
    fn valid(tenant_id: i64, total: u64, elapsed_ms: i64) -> Self {
        Self {
            tenant_id,
            status: ChainStatus::Valid,
            is_valid: true,
            total_records: total,
            valid_records: total,
            break_at_record_id: None,
            expected_hash: None,
            actual_hash: None,
            verification_time_ms: elapsed_ms,
            error_message: None,
        }
    }

    fn broken(
        tenant_id: i64,
        total: u64,
        valid: u64,
        record_id: i64,
        expected: String,
        actual: String,
        message: String,
        elapsed_ms: i64,
    ) -> Self {
        Self {
            tenant_id,
            status: ChainStatus::Broken,
            is_valid: false,
            total_records: total,
            valid_records: valid,
            break_at_record_id: Some(record_id),
            expected_hash: Some(expected),
            actual_hash: Some(actual),
            verification_time_ms: elapsed_ms,
            error_message: Some(message),
        }
    }

    fn error(tenant_id: i64, message: String, elapsed_ms: i64) -> Self {
        Self {
            tenant_id,
            status: ChainStatus::Error,
            is_valid: false,
            total_records: 0,
            valid_records: 0,
            break_at_record_id: None,
            expected_hash: None,
            actual_hash: None,
            verification_time_ms: elapsed_ms,
            error_message: Some(message),
        }
    }
}

/// Verifier for tenant invoice chains.
#[derive(Clone)]
pub struct ChainVerifier {
    pool: SqlitePool,
    locks: Arc<dyn LockBackend>,
    events: Arc<EventLogService>,
    lock_timeout: Duration,
}

impl ChainVerifier {
    pub fn new(
        pool: SqlitePool,
        locks: Arc<dyn LockBackend>,
        events: Arc<EventLogService>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            locks,
            events,
            lock_timeout,
        }
    }

    /// Verify a tenant's whole invoice chain.
    ///
    /// Emits INTEGRITY_CHECK for every completed pass, CHAIN_BREAK when a
    /// break is found and CHAIN_RECOVERY when a previously broken chain
    /// verifies clean again.
    pub async fn verify_chain_integrity(&self, tenant_id: i64) -> ChainIntegrityResult {
        let start = Instant::now();
        let lock_key = tenant_record_key(tenant_id);

        if !self.locks.acquire(&lock_key, self.lock_timeout).await {
            let elapsed = start.elapsed().as_millis() as i64;
            tracing::warn!(
                tenant_id,
                "Chain verification skipped: could not acquire tenant lock"
            );
            return ChainIntegrityResult::error(
                tenant_id,
                format!(
                    "Lock contention: tenant {tenant_id} chain is busy, retry verification later"
                ),
                elapsed,
            );
        }

        let result = self.walk_chain(tenant_id, start).await;
        self.locks.release(&lock_key).await;

        self.report(&result).await;
        result
    }

    async fn walk_chain(&self, tenant_id: i64, start: Instant) -> ChainIntegrityResult {
        let records = match invoice_record::load_sequence(&self.pool, tenant_id, None).await {
            Ok(records) => records,
            Err(e) => {
                return ChainIntegrityResult::error(
                    tenant_id,
                    format!("Failed to load record sequence: {e}"),
                    start.elapsed().as_millis() as i64,
                );
            }
        };

        let total = records.len() as u64;
        let mut expected = CHAIN_GENESIS.to_string();
        let mut valid = 0u64;

        for record in &records {
            // Link check: stored hash_previous must equal the running value.
            if record.hash_previous != expected {
                return ChainIntegrityResult::broken(
                    tenant_id,
                    total,
                    valid,
                    record.id,
                    expected,
                    record.hash_previous.clone(),
                    format!("Record {} is not linked to its predecessor", record.id),
                    start.elapsed().as_millis() as i64,
                );
            }

            // Content check: recomputed digest must equal the stored one.
            let fields = RecordHashFields::from_record(record);
            let recomputed = match chain::calculate_record_hash(
                &fields,
                record.record_type,
                &record.hash_previous,
            ) {
                Ok(hash) => hash,
                // A stored record with blank canonical fields cannot have
                // produced its stored digest: treat as content tampering.
                Err(_) => String::new(),
            };
            if recomputed != record.hash_record {
                return ChainIntegrityResult::broken(
                    tenant_id,
                    total,
                    valid,
                    record.id,
                    recomputed,
                    record.hash_record.clone(),
                    format!("Record {} content does not match its digest", record.id),
                    start.elapsed().as_millis() as i64,
                );
            }

            valid += 1;
            expected = record.hash_record.clone();
        }

        ChainIntegrityResult::valid(tenant_id, total, start.elapsed().as_millis() as i64)
    }

    /// Ledger bookkeeping for a completed pass: INTEGRITY_CHECK always,
    /// CHAIN_BREAK / CHAIN_RECOVERY on status transitions.
    async fn report(&self, result: &ChainIntegrityResult) {
        let tenant_id = result.tenant_id;

        match result.status {
            ChainStatus::Error => {
                // Operational condition, nothing to attest in the ledger.
                return;
            }
            ChainStatus::Broken => {
                tracing::error!(
                    tenant_id,
                    break_at = ?result.break_at_record_id,
                    expected = ?result.expected_hash,
                    actual = ?result.actual_hash,
                    "Invoice chain integrity BROKEN"
                );
            }
            ChainStatus::Valid => {
                tracing::info!(
                    tenant_id,
                    total_records = result.total_records,
                    elapsed_ms = result.verification_time_ms,
                    "Invoice chain verified"
                );
            }
        }

        self.events
            .log_event(
                EventType::IntegrityCheck,
                tenant_id,
                None,
                serde_json::json!({
                    "status": result.status,
                    "total_records": result.total_records,
                    "valid_records": result.valid_records,
                    "verification_time_ms": result.verification_time_ms,
                }),
            )
            .await;

        let previous = pipeline_state::chain_status(&self.pool, tenant_id)
            .await
            .ok()
            .flatten();

        match result.status {
            ChainStatus::Broken => {
                self.events
                    .log_event(
                        EventType::ChainBreak,
                        tenant_id,
                        result.break_at_record_id,
                        serde_json::json!({
                            "break_at_record_id": result.break_at_record_id,
                            "expected_hash": result.expected_hash,
                            "actual_hash": result.actual_hash,
                            "error": result.error_message,
                        }),
                    )
                    .await;
                if let Err(e) =
                    pipeline_state::set_chain_status(&self.pool, tenant_id, CHAIN_STATUS_BROKEN)
                        .await
                {
                    tracing::warn!(tenant_id, error = %e, "Failed to persist chain status");
                }
            }
            ChainStatus::Valid => {
                if previous.as_deref() == Some(CHAIN_STATUS_BROKEN) {
                    self.events
                        .log_event(
                            EventType::ChainRecovery,
                            tenant_id,
                            None,
                            serde_json::json!({
                                "total_records": result.total_records,
                            }),
                        )
                        .await;
                }
                if let Err(e) =
                    pipeline_state::set_chain_status(&self.pool, tenant_id, CHAIN_STATUS_VALID)
                        .await
                {
                    tracing::warn!(tenant_id, error = %e, "Failed to persist chain status");
                }
            }
            ChainStatus::Error => {}
        }
    }
}
