//! Tenant Config Repository

use shared::models::{AeatEnvironment, TenantConfig, TenantConfigUpdate};
use sqlx::SqlitePool;

use super::{RepoError, RepoResult};

/// Create payload for a tenant configuration.
#[derive(Debug, Clone)]
pub struct NewTenantConfig {
    pub tenant_id: i64,
    pub nif: String,
    pub nombre_fiscal: String,
    pub serie_facturacion: String,
    pub aeat_environment: AeatEnvironment,
    pub certificate_ref: Option<String>,
}

pub async fn create(pool: &SqlitePool, data: &NewTenantConfig) -> RepoResult<TenantConfig> {
    let now = shared::util::now_millis();
    sqlx::query(
        "INSERT INTO tenant_config (tenant_id, nif, nombre_fiscal, serie_facturacion, aeat_environment, certificate_ref, is_active, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)",
    )
    .bind(data.tenant_id)
    .bind(&data.nif)
    .bind(&data.nombre_fiscal)
    .bind(&data.serie_facturacion)
    .bind(data.aeat_environment)
    .bind(&data.certificate_ref)
    .bind(now)
    .execute(pool)
    .await?;

    find_by_tenant(pool, data.tenant_id)
        .await?
        .ok_or_else(|| RepoError::Database("Failed to read tenant config after insert".into()))
}

pub async fn find_by_tenant(pool: &SqlitePool, tenant_id: i64) -> RepoResult<Option<TenantConfig>> {
    let config = sqlx::query_as::<_, TenantConfig>(
        "SELECT * FROM tenant_config WHERE tenant_id = ?1",
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?;
    Ok(config)
}

pub async fn list_active(pool: &SqlitePool) -> RepoResult<Vec<TenantConfig>> {
    let configs = sqlx::query_as::<_, TenantConfig>(
        "SELECT * FROM tenant_config WHERE is_active = 1 ORDER BY tenant_id",
    )
    .fetch_all(pool)
    .await?;
    Ok(configs)
}

pub async fn update(
    pool: &SqlitePool,
    tenant_id: i64,
    data: &TenantConfigUpdate,
) -> RepoResult<TenantConfig> {
    let now = shared::util::now_millis();
    let rows = sqlx::query(
        "UPDATE tenant_config SET nif = COALESCE(?1, nif), nombre_fiscal = COALESCE(?2, nombre_fiscal), serie_facturacion = COALESCE(?3, serie_facturacion), aeat_environment = COALESCE(?4, aeat_environment), certificate_ref = COALESCE(?5, certificate_ref), is_active = COALESCE(?6, is_active), updated_at = ?7 WHERE tenant_id = ?8",
    )
    .bind(&data.nif)
    .bind(&data.nombre_fiscal)
    .bind(&data.serie_facturacion)
    .bind(data.aeat_environment)
    .bind(&data.certificate_ref)
    .bind(data.is_active)
    .bind(now)
    .bind(tenant_id)
    .execute(pool)
    .await?;

    if rows.rows_affected() == 0 {
        return Err(RepoError::NotFound(format!("tenant config for tenant {tenant_id}")));
    }
    find_by_tenant(pool, tenant_id)
        .await?
        .ok_or_else(|| RepoError::Database("Failed to read tenant config after update".into()))
}
