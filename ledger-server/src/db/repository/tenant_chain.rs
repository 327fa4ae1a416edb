//! Tenant Chain State Repository
//!
//! Cached head of each tenant's invoice chain (last record id/hash plus a
//! running count). The cache is advanced after every append; verification
//! and append always read the authoritative previous hash from the record
//! sequence itself.

use shared::models::TenantChainState;
use sqlx::SqlitePool;

use super::RepoResult;

pub async fn get(pool: &SqlitePool, tenant_id: i64) -> RepoResult<Option<TenantChainState>> {
    let state = sqlx::query_as::<_, TenantChainState>(
        "SELECT * FROM tenant_chain_state WHERE tenant_id = ?1",
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?;
    Ok(state)
}

/// Advance the chain head after an append.
pub async fn advance(
    pool: &SqlitePool,
    tenant_id: i64,
    record_id: i64,
    record_hash: &str,
) -> RepoResult<()> {
    let now = shared::util::now_millis();
    sqlx::query(
        "INSERT INTO tenant_chain_state (tenant_id, last_record_id, last_record_hash, record_count, updated_at) \
         VALUES (?1, ?2, ?3, 1, ?4) \
         ON CONFLICT(tenant_id) DO UPDATE SET last_record_id = excluded.last_record_id, last_record_hash = excluded.last_record_hash, record_count = tenant_chain_state.record_count + 1, updated_at = excluded.updated_at",
    )
    .bind(tenant_id)
    .bind(record_id)
    .bind(record_hash)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}
