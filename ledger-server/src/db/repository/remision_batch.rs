//! Remision Batch Repository

use shared::models::{AeatEnvironment, BatchStatus, RemisionBatch};
use sqlx::SqlitePool;

use super::{RepoError, RepoResult};

pub async fn create(
    pool: &SqlitePool,
    tenant_id: i64,
    environment: AeatEnvironment,
    total_records: i64,
) -> RepoResult<RemisionBatch> {
    let now = shared::util::now_millis();
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO remision_batch (tenant_id, status, aeat_environment, total_records, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id",
    )
    .bind(tenant_id)
    .bind(BatchStatus::Queued)
    .bind(environment)
    .bind(total_records)
    .bind(now)
    .fetch_one(pool)
    .await?;

    find_by_id(pool, id)
        .await?
        .ok_or_else(|| RepoError::Database("Failed to read remision batch after insert".into()))
}

pub async fn find_by_id(pool: &SqlitePool, id: i64) -> RepoResult<Option<RemisionBatch>> {
    let batch = sqlx::query_as::<_, RemisionBatch>("SELECT * FROM remision_batch WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(batch)
}

/// Queued batches whose backoff delay (if any) has elapsed.
pub async fn find_due(pool: &SqlitePool, now: i64) -> RepoResult<Vec<RemisionBatch>> {
    let batches = sqlx::query_as::<_, RemisionBatch>(
        "SELECT * FROM remision_batch WHERE status = ?1 AND (next_attempt_at IS NULL OR next_attempt_at <= ?2) ORDER BY id",
    )
    .bind(BatchStatus::Queued)
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(batches)
}

/// Transition a batch to `sent` for a new attempt; returns the new attempt count.
pub async fn mark_sent(pool: &SqlitePool, batch_id: i64, sent_at: i64) -> RepoResult<i64> {
    let attempts = sqlx::query_scalar::<_, i64>(
        "UPDATE remision_batch SET status = ?1, sent_at = ?2, attempt_count = attempt_count + 1, next_attempt_at = NULL WHERE id = ?3 \
         RETURNING attempt_count",
    )
    .bind(BatchStatus::Sent)
    .bind(sent_at)
    .bind(batch_id)
    .fetch_one(pool)
    .await?;
    Ok(attempts)
}

/// Record the authority's verdict for an attempt that received a response.
#[allow(clippy::too_many_arguments)]
pub async fn record_outcome(
    pool: &SqlitePool,
    batch_id: i64,
    status: BatchStatus,
    accepted: i64,
    rejected: i64,
    csv: Option<&str>,
    error_message: Option<&str>,
    response_at: i64,
) -> RepoResult<()> {
    sqlx::query(
        "UPDATE remision_batch SET status = ?1, accepted_records = ?2, rejected_records = ?3, csv = ?4, error_message = ?5, response_at = ?6 WHERE id = ?7",
    )
    .bind(status)
    .bind(accepted)
    .bind(rejected)
    .bind(csv)
    .bind(error_message)
    .bind(response_at)
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Re-queue a failed attempt with a backoff deadline (same batch id).
pub async fn schedule_retry(
    pool: &SqlitePool,
    batch_id: i64,
    next_attempt_at: i64,
    error_message: &str,
) -> RepoResult<()> {
    sqlx::query(
        "UPDATE remision_batch SET status = ?1, next_attempt_at = ?2, error_message = ?3 WHERE id = ?4",
    )
    .bind(BatchStatus::Queued)
    .bind(next_attempt_at)
    .bind(error_message)
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Terminal failure: attempts exhausted or unrecoverable outcome.
pub async fn mark_failed(
    pool: &SqlitePool,
    batch_id: i64,
    error_message: &str,
) -> RepoResult<()> {
    sqlx::query(
        "UPDATE remision_batch SET status = ?1, next_attempt_at = NULL, error_message = ?2 WHERE id = ?3",
    )
    .bind(BatchStatus::Failed)
    .bind(error_message)
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Force the attempt counter (used by operator tooling when re-arming a
/// terminally failed batch for manual re-submission).
pub async fn reset_for_manual_retry(pool: &SqlitePool, batch_id: i64) -> RepoResult<()> {
    sqlx::query(
        "UPDATE remision_batch SET status = ?1, attempt_count = 0, next_attempt_at = NULL, error_message = NULL WHERE id = ?2",
    )
    .bind(BatchStatus::Queued)
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(())
}
