//! Pipeline State Repository
//!
//! Persisted key-value state shared by every worker process: flow-control
//! timestamp, circuit-breaker counters and the per-tenant chain status
//! memory. Counter updates are single-statement upserts so concurrent
//! workers cannot lose increments.

use sqlx::SqlitePool;

use super::RepoResult;

const KEY_LAST_SUBMIT_AT: &str = "verifactu.last_submit_at";
const KEY_CONSECUTIVE_FAILURES: &str = "verifactu.consecutive_failures";
const KEY_CIRCUIT_BREAKER_UNTIL: &str = "verifactu.circuit_breaker_until";

pub async fn get(pool: &SqlitePool, key: &str) -> RepoResult<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM pipeline_state WHERE key = ?1")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

pub async fn set(pool: &SqlitePool, key: &str, value: &str) -> RepoResult<()> {
    let now = shared::util::now_millis();
    sqlx::query(
        "INSERT INTO pipeline_state (key, value, updated_at) VALUES (?1, ?2, ?3) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete(pool: &SqlitePool, key: &str) -> RepoResult<()> {
    sqlx::query("DELETE FROM pipeline_state WHERE key = ?1")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}

async fn get_i64(pool: &SqlitePool, key: &str) -> RepoResult<Option<i64>> {
    Ok(get(pool, key).await?.and_then(|v| v.parse().ok()))
}

/// Atomically increment an integer-valued key and return the new value.
async fn increment(pool: &SqlitePool, key: &str) -> RepoResult<i64> {
    let now = shared::util::now_millis();
    let value = sqlx::query_scalar::<_, i64>(
        "INSERT INTO pipeline_state (key, value, updated_at) VALUES (?1, '1', ?2) \
         ON CONFLICT(key) DO UPDATE SET value = CAST(CAST(pipeline_state.value AS INTEGER) + 1 AS TEXT), updated_at = excluded.updated_at \
         RETURNING CAST(value AS INTEGER)",
    )
    .bind(key)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(value)
}

// ========== Flow control ==========

pub async fn last_submit_at(pool: &SqlitePool) -> RepoResult<Option<i64>> {
    get_i64(pool, KEY_LAST_SUBMIT_AT).await
}

pub async fn set_last_submit_at(pool: &SqlitePool, ts: i64) -> RepoResult<()> {
    set(pool, KEY_LAST_SUBMIT_AT, &ts.to_string()).await
}

// ========== Circuit breaker ==========

pub async fn circuit_breaker_until(pool: &SqlitePool) -> RepoResult<Option<i64>> {
    get_i64(pool, KEY_CIRCUIT_BREAKER_UNTIL).await
}

pub async fn open_circuit_breaker(pool: &SqlitePool, until: i64) -> RepoResult<()> {
    set(pool, KEY_CIRCUIT_BREAKER_UNTIL, &until.to_string()).await
}

pub async fn consecutive_failures(pool: &SqlitePool) -> RepoResult<i64> {
    Ok(get_i64(pool, KEY_CONSECUTIVE_FAILURES).await?.unwrap_or(0))
}

/// Register one more consecutive failure; returns the running total.
pub async fn record_failure(pool: &SqlitePool) -> RepoResult<i64> {
    increment(pool, KEY_CONSECUTIVE_FAILURES).await
}

/// A successful submission closes the breaker and clears the failure streak.
pub async fn reset_circuit_breaker(pool: &SqlitePool) -> RepoResult<()> {
    set(pool, KEY_CONSECUTIVE_FAILURES, "0").await?;
    delete(pool, KEY_CIRCUIT_BREAKER_UNTIL).await
}

// ========== Chain status memory (break/recovery transitions) ==========

fn chain_status_key(tenant_id: i64) -> String {
    format!("verifactu.chain_status.{tenant_id}")
}

pub async fn chain_status(pool: &SqlitePool, tenant_id: i64) -> RepoResult<Option<String>> {
    get(pool, &chain_status_key(tenant_id)).await
}

pub async fn set_chain_status(pool: &SqlitePool, tenant_id: i64, status: &str) -> RepoResult<()> {
    set(pool, &chain_status_key(tenant_id), status).await
}
