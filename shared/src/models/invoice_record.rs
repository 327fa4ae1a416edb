//! Invoice Record Model
//!
//! One immutable entry in a tenant's invoice chain. Business and chain
//! fields are written once at creation; only the AEAT submission envelope
//! (`aeat_status`, response metadata) evolves afterwards. Records are never
//! deleted (legal retention).

use serde::{Deserialize, Serialize};

/// Record type in the invoice chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "lowercase"))]
pub enum RecordType {
    /// New invoice registration
    Alta,
    /// Cancellation of a previously registered invoice
    Anulacion,
}

impl RecordType {
    /// Literal tag that participates in the canonical hash payload.
    pub fn tag(&self) -> &'static str {
        match self {
            RecordType::Alta => "alta",
            RecordType::Anulacion => "anulacion",
        }
    }
}

/// AEAT submission status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "lowercase"))]
pub enum AeatStatus {
    Pending,
    Submitted,
    Accepted,
    Rejected,
}

/// Invoice record entity.
///
/// Monetary amounts are stored as 2-decimal strings (`"210.00"`): the hash
/// payload is defined over the exact string form, so the stored value and
/// the hashed value can never drift apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct InvoiceRecord {
    pub id: i64,
    pub tenant_id: i64,
    pub record_type: RecordType,
    pub nif_emisor: String,
    pub nombre_emisor: String,
    pub numero_factura: String,
    /// Issue date, ISO `YYYY-MM-DD`
    pub fecha_expedicion: String,
    /// AEAT invoice type code (F1, F2, R1, ...)
    pub tipo_factura: String,
    /// AEAT VAT regime key
    pub clave_regimen: String,
    pub base_imponible: String,
    pub tipo_impositivo: String,
    pub cuota_tributaria: String,
    pub importe_total: String,
    /// Digest of the previous record in this tenant's chain, empty for the first
    pub hash_previous: String,
    /// SHA-256 digest of this record (64 lowercase hex chars)
    pub hash_record: String,
    pub aeat_status: AeatStatus,
    pub aeat_response_code: Option<String>,
    pub aeat_response_message: Option<String>,
    pub submitted_at: Option<i64>,
    /// AEAT verification URL; None while artifact generation is pending
    pub qr_url: Option<String>,
    pub remision_batch_id: Option<i64>,
    /// For anulacion/rectificativa records, the record being cancelled/corrected
    pub original_record_id: Option<i64>,
    pub software_id: String,
    pub software_version: String,
    pub created_at: i64,
}

/// Create payload for a new invoice record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvoiceRecord {
    pub tenant_id: i64,
    pub record_type: RecordType,
    pub nif_emisor: String,
    pub nombre_emisor: String,
    pub numero_factura: String,
    pub fecha_expedicion: String,
    pub tipo_factura: String,
    pub clave_regimen: String,
    pub base_imponible: String,
    pub tipo_impositivo: String,
    pub cuota_tributaria: String,
    pub importe_total: String,
    pub hash_previous: String,
    pub hash_record: String,
    pub original_record_id: Option<i64>,
    pub software_id: String,
    pub software_version: String,
}
