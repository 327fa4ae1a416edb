//! Record orchestration service
//!
//! The only writer of `hash_record`/`hash_previous`. Every append runs
//! under the tenant's advisory lock: without it, two concurrent creations
//! could read the same chain head and each compute a valid-looking but
//! divergent next link, silently forking the chain.
//!
//! Creation pipeline, in order:
//! 1. Acquire the tenant lock (fail fast if unavailable).
//! 2. Load the tenant configuration.
//! 3. Read the last chain digest and compute the new one.
//! 4. Persist the record with `aeat_status = pending`.
//! 5. Best-effort verification-URL artifact.
//! 6. Advance the cached chain head.
//! 7. Append a RECORD_CREATE / RECORD_CANCEL ledger event.
//! 8. Release the lock (all paths).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::SqlitePool;

use shared::models::{EventType, InvoiceRecord, NewInvoiceRecord, RecordType, TenantConfig};

use crate::chain::{self, CHAIN_GENESIS, RecordHashFields};
use crate::db::repository::{invoice_record, tenant_chain, tenant_config};
use crate::eventlog::EventLogService;
use crate::locks::{LockBackend, tenant_record_key};
use crate::qr::{ArtifactError, ArtifactGenerator};
use crate::utils::{AppError, AppResult};

/// Default Spanish VAT rate applied when the source invoice carries none.
const DEFAULT_VAT_RATE: Decimal = Decimal::from_parts(2100, 0, 0, false, 2);

/// Default VAT regime key.
const DEFAULT_CLAVE_REGIMEN: &str = "01";

/// Billing-side invoice data handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct SourceInvoice {
    pub tenant_id: i64,
    /// Source system invoice reference, becomes the `{SERIE}-{YYYY}-{n}` suffix
    pub invoice_reference: String,
    /// Gross amount due (VAT included)
    pub amount_due: Decimal,
    /// VAT rate percentage; defaults to 21.00 when absent
    pub tax_rate: Option<Decimal>,
    /// AEAT invoice type code; defaults to F1 (complete invoice)
    pub invoice_type: Option<String>,
    /// Issue date; defaults to today
    pub issue_date: Option<chrono::NaiveDate>,
}

pub struct RecordService {
    pool: SqlitePool,
    locks: Arc<dyn LockBackend>,
    events: Arc<EventLogService>,
    artifacts: Arc<dyn ArtifactGenerator>,
    lock_timeout: Duration,
    software_id: String,
    software_version: String,
}

impl RecordService {
    pub fn new(
        pool: SqlitePool,
        locks: Arc<dyn LockBackend>,
        events: Arc<EventLogService>,
        artifacts: Arc<dyn ArtifactGenerator>,
        lock_timeout: Duration,
        software_id: impl Into<String>,
        software_version: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            locks,
            events,
            artifacts,
            lock_timeout,
            software_id: software_id.into(),
            software_version: software_version.into(),
        }
    }

    /// Create an alta (registration) record from a billing invoice.
    pub async fn create_alta_record(&self, invoice: &SourceInvoice) -> AppResult<InvoiceRecord> {
        let tenant_id = invoice.tenant_id;
        self.with_tenant_lock(tenant_id, self.alta_locked(invoice))
            .await
    }

    /// Create an anulacion (cancellation) record for an existing record.
    pub async fn create_anulacion_record(&self, original_id: i64) -> AppResult<InvoiceRecord> {
        let original = invoice_record::find_by_id(&self.pool, original_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("invoice record {original_id}")))?;

        self.with_tenant_lock(original.tenant_id, self.anulacion_locked(original))
            .await
    }

    /// Create a rectificativa (correction) record: an alta-tagged R1 record
    /// referencing the record being corrected.
    pub async fn create_rectificativa_record(
        &self,
        invoice: &SourceInvoice,
        original_id: i64,
    ) -> AppResult<InvoiceRecord> {
        let original = invoice_record::find_by_id(&self.pool, original_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("invoice record {original_id}")))?;

        let mut corrected = invoice.clone();
        corrected.invoice_type = Some("R1".to_string());
        self.with_tenant_lock(
            invoice.tenant_id,
            self.rectificativa_locked(corrected, original),
        )
        .await
    }

    /// Run `op` under the tenant's exclusive append lock, releasing it on
    /// every path. Lock acquisition failure is fail-fast and retryable.
    async fn with_tenant_lock<F>(&self, tenant_id: i64, op: F) -> AppResult<InvoiceRecord>
    where
        F: Future<Output = AppResult<InvoiceRecord>>,
    {
        let lock_key = tenant_record_key(tenant_id);
        if !self.locks.acquire(&lock_key, self.lock_timeout).await {
            return Err(AppError::lock_unavailable(format!(
                "Could not acquire record lock for tenant {tenant_id}"
            )));
        }

        let result = op.await;
        self.locks.release(&lock_key).await;
        result
    }

    async fn alta_locked(&self, invoice: &SourceInvoice) -> AppResult<InvoiceRecord> {
        let tenant_id = invoice.tenant_id;
        let config = self.load_tenant_config(tenant_id).await?;

        let numero_factura = generate_invoice_number(&config, invoice);
        let fecha_expedicion = invoice
            .issue_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(shared::util::today_iso);
        let tipo_factura = invoice
            .invoice_type
            .clone()
            .unwrap_or_else(|| "F1".to_string());
        let rate = invoice.tax_rate.unwrap_or(DEFAULT_VAT_RATE);
        let (base_imponible, cuota_tributaria) = derive_tax_amounts(invoice.amount_due, rate);
        let importe_total = format_amount(invoice.amount_due);

        let fields = RecordHashFields {
            nif_emisor: config.nif.clone(),
            numero_factura: numero_factura.clone(),
            fecha_expedicion: fecha_expedicion.clone(),
            tipo_factura: tipo_factura.clone(),
            cuota_tributaria: cuota_tributaria.clone(),
            importe_total: importe_total.clone(),
        };

        let previous_hash = self.load_previous_hash(tenant_id).await?;
        let record_hash = chain::calculate_alta_hash(&fields, &previous_hash)
            .map_err(|e| AppError::validation(e.to_string()))?;

        let record = self
            .persist(NewInvoiceRecord {
                tenant_id,
                record_type: RecordType::Alta,
                nif_emisor: config.nif.clone(),
                nombre_emisor: config.nombre_fiscal.clone(),
                numero_factura: numero_factura.clone(),
                fecha_expedicion,
                tipo_factura,
                clave_regimen: DEFAULT_CLAVE_REGIMEN.to_string(),
                base_imponible,
                tipo_impositivo: format_amount(rate),
                cuota_tributaria,
                importe_total,
                hash_previous: previous_hash,
                hash_record: record_hash.clone(),
                original_record_id: None,
                software_id: self.software_id.clone(),
                software_version: self.software_version.clone(),
            })
            .await?;

        self.events
            .log_event(
                EventType::RecordCreate,
                tenant_id,
                Some(record.id),
                serde_json::json!({
                    "description": format!("Alta record created for invoice {numero_factura}"),
                    "invoice_number": numero_factura,
                    "hash": record_hash,
                }),
            )
            .await;

        tracing::info!(
            record_id = record.id,
            tenant_id,
            invoice = %record.numero_factura,
            "Alta record created"
        );
        Ok(record)
    }

    async fn anulacion_locked(&self, original: InvoiceRecord) -> AppResult<InvoiceRecord> {
        let tenant_id = original.tenant_id;

        let fields = RecordHashFields {
            nif_emisor: original.nif_emisor.clone(),
            numero_factura: original.numero_factura.clone(),
            fecha_expedicion: shared::util::today_iso(),
            tipo_factura: original.tipo_factura.clone(),
            cuota_tributaria: original.cuota_tributaria.clone(),
            importe_total: original.importe_total.clone(),
        };

        let previous_hash = self.load_previous_hash(tenant_id).await?;
        let record_hash = chain::calculate_anulacion_hash(&fields, &previous_hash)
            .map_err(|e| AppError::validation(e.to_string()))?;

        let record = self
            .persist(NewInvoiceRecord {
                tenant_id,
                record_type: RecordType::Anulacion,
                nif_emisor: original.nif_emisor.clone(),
                nombre_emisor: original.nombre_emisor.clone(),
                numero_factura: original.numero_factura.clone(),
                fecha_expedicion: fields.fecha_expedicion.clone(),
                tipo_factura: original.tipo_factura.clone(),
                clave_regimen: original.clave_regimen.clone(),
                base_imponible: original.base_imponible.clone(),
                tipo_impositivo: original.tipo_impositivo.clone(),
                cuota_tributaria: original.cuota_tributaria.clone(),
                importe_total: original.importe_total.clone(),
                hash_previous: previous_hash,
                hash_record: record_hash.clone(),
                original_record_id: Some(original.id),
                software_id: self.software_id.clone(),
                software_version: self.software_version.clone(),
            })
            .await?;

        self.events
            .log_event(
                EventType::RecordCancel,
                tenant_id,
                Some(record.id),
                serde_json::json!({
                    "description": format!(
                        "Anulacion record created for invoice {}",
                        original.numero_factura
                    ),
                    "original_record_id": original.id,
                    "hash": record_hash,
                }),
            )
            .await;

        tracing::info!(
            record_id = record.id,
            tenant_id,
            original_record_id = original.id,
            "Anulacion record created"
        );
        Ok(record)
    }

    async fn rectificativa_locked(
        &self,
        invoice: SourceInvoice,
        original: InvoiceRecord,
    ) -> AppResult<InvoiceRecord> {
        let tenant_id = invoice.tenant_id;
        let config = self.load_tenant_config(tenant_id).await?;

        let numero_factura = generate_invoice_number(&config, &invoice);
        let fecha_expedicion = invoice
            .issue_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(shared::util::today_iso);
        let tipo_factura = invoice
            .invoice_type
            .clone()
            .unwrap_or_else(|| "R1".to_string());
        let rate = invoice.tax_rate.unwrap_or(DEFAULT_VAT_RATE);
        let (base_imponible, cuota_tributaria) = derive_tax_amounts(invoice.amount_due, rate);
        let importe_total = format_amount(invoice.amount_due);

        let fields = RecordHashFields {
            nif_emisor: config.nif.clone(),
            numero_factura: numero_factura.clone(),
            fecha_expedicion: fecha_expedicion.clone(),
            tipo_factura: tipo_factura.clone(),
            cuota_tributaria: cuota_tributaria.clone(),
            importe_total: importe_total.clone(),
        };

        let previous_hash = self.load_previous_hash(tenant_id).await?;
        let record_hash = chain::calculate_alta_hash(&fields, &previous_hash)
            .map_err(|e| AppError::validation(e.to_string()))?;

        let record = self
            .persist(NewInvoiceRecord {
                tenant_id,
                record_type: RecordType::Alta,
                nif_emisor: config.nif.clone(),
                nombre_emisor: config.nombre_fiscal.clone(),
                numero_factura: numero_factura.clone(),
                fecha_expedicion,
                tipo_factura: tipo_factura.clone(),
                clave_regimen: original.clave_regimen.clone(),
                base_imponible,
                tipo_impositivo: format_amount(rate),
                cuota_tributaria,
                importe_total,
                hash_previous: previous_hash,
                hash_record: record_hash.clone(),
                original_record_id: Some(original.id),
                software_id: self.software_id.clone(),
                software_version: self.software_version.clone(),
            })
            .await?;

        self.events
            .log_event(
                EventType::RecordCreate,
                tenant_id,
                Some(record.id),
                serde_json::json!({
                    "description": format!(
                        "Rectificativa record created for invoice {numero_factura}"
                    ),
                    "original_record_id": original.id,
                    "rectificativa_type": tipo_factura,
                    "hash": record_hash,
                }),
            )
            .await;

        tracing::info!(
            record_id = record.id,
            tenant_id,
            original_record_id = original.id,
            "Rectificativa record created"
        );
        Ok(record)
    }

    /// Insert the record, attach the verification artifact (best effort) and
    /// advance the cached chain head.
    async fn persist(&self, data: NewInvoiceRecord) -> AppResult<InvoiceRecord> {
        let mut record = invoice_record::create(&self.pool, &data).await?;

        match self.artifacts.build_verification_url(&record) {
            Ok(url) => {
                invoice_record::set_qr_url(&self.pool, record.id, &url).await?;
                record.qr_url = Some(url);
            }
            Err(ArtifactError::Disabled) => {
                tracing::debug!(record_id = record.id, "Artifact generation disabled");
            }
            Err(e) => {
                // Degrade to artifact-pending; never abort record creation.
                tracing::warn!(
                    record_id = record.id,
                    error = %e,
                    "Verification artifact failed, record left artifact-pending"
                );
            }
        }

        tenant_chain::advance(&self.pool, record.tenant_id, record.id, &record.hash_record)
            .await?;

        Ok(record)
    }

    async fn load_previous_hash(&self, tenant_id: i64) -> AppResult<String> {
        Ok(invoice_record::load_last_hash(&self.pool, tenant_id)
            .await?
            .unwrap_or_else(|| CHAIN_GENESIS.to_string()))
    }

    async fn load_tenant_config(&self, tenant_id: i64) -> AppResult<TenantConfig> {
        tenant_config::find_by_tenant(&self.pool, tenant_id)
            .await?
            .ok_or_else(|| {
                AppError::validation(format!(
                    "No VeriFactu tenant configuration found for tenant {tenant_id}. Configure the tenant before creating records."
                ))
            })
    }
}

/// Invoice number format: `{SERIE}-{YYYY}-{reference}`.
fn generate_invoice_number(config: &TenantConfig, invoice: &SourceInvoice) -> String {
    let year = chrono::Local::now().format("%Y");
    format!(
        "{}-{}-{}",
        config.serie_facturacion, year, invoice.invoice_reference
    )
}

/// Split a gross amount into (tax base, tax amount) for the given VAT rate.
fn derive_tax_amounts(amount_due: Decimal, rate: Decimal) -> (String, String) {
    let hundred = Decimal::from_str("100").unwrap_or_default();
    let base = if rate > Decimal::ZERO {
        (amount_due / (Decimal::ONE + rate / hundred))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    } else {
        amount_due.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    };
    let cuota = amount_due - base;
    (format_amount(base), format_amount(cuota))
}

/// Canonical 2-decimal string form of an amount (half away from zero).
fn format_amount(value: Decimal) -> String {
    format!(
        "{:.2}",
        value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    )
}
