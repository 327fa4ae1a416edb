//! Invoice Record Repository
//!
//! Append-then-mutate-metadata: rows are inserted once with their business
//! and chain fields final; only the AEAT submission envelope is updated
//! afterwards. There is no delete (legal retention).

use shared::models::{AeatStatus, InvoiceRecord, NewInvoiceRecord};
use sqlx::SqlitePool;

use super::{RepoError, RepoResult};

pub async fn create(pool: &SqlitePool, data: &NewInvoiceRecord) -> RepoResult<InvoiceRecord> {
    let now = shared::util::now_millis();
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO invoice_record (tenant_id, record_type, nif_emisor, nombre_emisor, numero_factura, fecha_expedicion, tipo_factura, clave_regimen, base_imponible, tipo_impositivo, cuota_tributaria, importe_total, hash_previous, hash_record, aeat_status, original_record_id, software_id, software_version, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19) \
         RETURNING id",
    )
    .bind(data.tenant_id)
    .bind(data.record_type)
    .bind(&data.nif_emisor)
    .bind(&data.nombre_emisor)
    .bind(&data.numero_factura)
    .bind(&data.fecha_expedicion)
    .bind(&data.tipo_factura)
    .bind(&data.clave_regimen)
    .bind(&data.base_imponible)
    .bind(&data.tipo_impositivo)
    .bind(&data.cuota_tributaria)
    .bind(&data.importe_total)
    .bind(&data.hash_previous)
    .bind(&data.hash_record)
    .bind(AeatStatus::Pending)
    .bind(data.original_record_id)
    .bind(&data.software_id)
    .bind(&data.software_version)
    .bind(now)
    .fetch_one(pool)
    .await?;

    find_by_id(pool, id)
        .await?
        .ok_or_else(|| RepoError::Database("Failed to read invoice record after insert".into()))
}

pub async fn find_by_id(pool: &SqlitePool, id: i64) -> RepoResult<Option<InvoiceRecord>> {
    let record = sqlx::query_as::<_, InvoiceRecord>("SELECT * FROM invoice_record WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(record)
}

/// Digest of the most recent record in the tenant's chain, `None` when the
/// chain is empty. The record sequence itself is authoritative here, not the
/// cached chain head.
pub async fn load_last_hash(pool: &SqlitePool, tenant_id: i64) -> RepoResult<Option<String>> {
    let hash = sqlx::query_scalar::<_, String>(
        "SELECT hash_record FROM invoice_record WHERE tenant_id = ?1 ORDER BY id DESC LIMIT 1",
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?;
    Ok(hash)
}

/// Full ordered record sequence for a tenant, optionally starting at `from_id`.
pub async fn load_sequence(
    pool: &SqlitePool,
    tenant_id: i64,
    from_id: Option<i64>,
) -> RepoResult<Vec<InvoiceRecord>> {
    let records = match from_id {
        Some(from) => {
            sqlx::query_as::<_, InvoiceRecord>(
                "SELECT * FROM invoice_record WHERE tenant_id = ?1 AND id >= ?2 ORDER BY id",
            )
            .bind(tenant_id)
            .bind(from)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, InvoiceRecord>(
                "SELECT * FROM invoice_record WHERE tenant_id = ?1 ORDER BY id",
            )
            .bind(tenant_id)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(records)
}

/// Pending records not yet assigned to a remision batch, ordered by tenant
/// then chain position.
pub async fn find_unbatched_pending(pool: &SqlitePool) -> RepoResult<Vec<InvoiceRecord>> {
    let records = sqlx::query_as::<_, InvoiceRecord>(
        "SELECT * FROM invoice_record WHERE aeat_status = ?1 AND remision_batch_id IS NULL ORDER BY tenant_id, id",
    )
    .bind(AeatStatus::Pending)
    .fetch_all(pool)
    .await?;
    Ok(records)
}

pub async fn find_by_batch(pool: &SqlitePool, batch_id: i64) -> RepoResult<Vec<InvoiceRecord>> {
    let records = sqlx::query_as::<_, InvoiceRecord>(
        "SELECT * FROM invoice_record WHERE remision_batch_id = ?1 ORDER BY id",
    )
    .bind(batch_id)
    .fetch_all(pool)
    .await?;
    Ok(records)
}

pub async fn assign_batch(pool: &SqlitePool, record_id: i64, batch_id: i64) -> RepoResult<()> {
    let rows = sqlx::query("UPDATE invoice_record SET remision_batch_id = ?1 WHERE id = ?2")
        .bind(batch_id)
        .bind(record_id)
        .execute(pool)
        .await?;
    if rows.rows_affected() == 0 {
        return Err(RepoError::NotFound(format!("invoice record {record_id}")));
    }
    Ok(())
}

pub async fn set_qr_url(pool: &SqlitePool, record_id: i64, qr_url: &str) -> RepoResult<()> {
    sqlx::query("UPDATE invoice_record SET qr_url = ?1 WHERE id = ?2")
        .bind(qr_url)
        .bind(record_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Update the submission envelope of a record. Business and chain fields are
/// deliberately not reachable from here.
pub async fn update_submission(
    pool: &SqlitePool,
    record_id: i64,
    status: AeatStatus,
    response_code: Option<&str>,
    response_message: Option<&str>,
    submitted_at: i64,
) -> RepoResult<()> {
    sqlx::query(
        "UPDATE invoice_record SET aeat_status = ?1, aeat_response_code = ?2, aeat_response_message = ?3, submitted_at = ?4 WHERE id = ?5",
    )
    .bind(status)
    .bind(response_code)
    .bind(response_message)
    .bind(submitted_at)
    .bind(record_id)
    .execute(pool)
    .await?;
    Ok(())
}
