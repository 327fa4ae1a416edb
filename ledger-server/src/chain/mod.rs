//! Invoice hash chain engine
//!
//! Pure, deterministic digest computation over the canonical record tuple.
//! The digest binds each record to its predecessor: identical inputs always
//! produce identical output, which is what allows the tax authority to
//! re-verify chains on its side.
//!
//! Canonical payload (comma-joined, in this order):
//! `nif_emisor, numero_factura, fecha_expedicion, tipo_factura,
//! cuota_tributaria, importe_total, <record tag>, <previous hash>`
//! where the previous hash is the empty string for the first record of a
//! tenant's chain.

pub mod scheduler;
pub mod verify;

use sha2::{Digest, Sha256};
use thiserror::Error;

use shared::models::{InvoiceRecord, RecordType};

/// Previous-hash value for the first record of a chain.
pub const CHAIN_GENESIS: &str = "";

/// Hash derivation errors
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Missing required canonical fields: {0}")]
    MissingFields(String),
}

/// The canonical field tuple that participates in a record digest.
#[derive(Debug, Clone)]
pub struct RecordHashFields {
    pub nif_emisor: String,
    pub numero_factura: String,
    pub fecha_expedicion: String,
    pub tipo_factura: String,
    pub cuota_tributaria: String,
    pub importe_total: String,
}

impl RecordHashFields {
    pub fn from_record(record: &InvoiceRecord) -> Self {
        Self {
            nif_emisor: record.nif_emisor.clone(),
            numero_factura: record.numero_factura.clone(),
            fecha_expedicion: record.fecha_expedicion.clone(),
            tipo_factura: record.tipo_factura.clone(),
            cuota_tributaria: record.cuota_tributaria.clone(),
            importe_total: record.importe_total.clone(),
        }
    }

    /// All canonical fields must be present: a partial hash is never produced.
    fn validate(&self) -> Result<(), ChainError> {
        let mut missing = Vec::new();
        if self.nif_emisor.trim().is_empty() {
            missing.push("nif_emisor");
        }
        if self.numero_factura.trim().is_empty() {
            missing.push("numero_factura");
        }
        if self.fecha_expedicion.trim().is_empty() {
            missing.push("fecha_expedicion");
        }
        if self.tipo_factura.trim().is_empty() {
            missing.push("tipo_factura");
        }
        if self.cuota_tributaria.trim().is_empty() {
            missing.push("cuota_tributaria");
        }
        if self.importe_total.trim().is_empty() {
            missing.push("importe_total");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ChainError::MissingFields(missing.join(", ")))
        }
    }
}

/// Digest for an alta (registration) record.
pub fn calculate_alta_hash(
    fields: &RecordHashFields,
    previous_hash: &str,
) -> Result<String, ChainError> {
    calculate_record_hash(fields, RecordType::Alta, previous_hash)
}

/// Digest for an anulacion (cancellation) record.
///
/// Same algorithm as the alta digest with a different literal tag, so a
/// cancellation can never collide with the registration it cancels.
pub fn calculate_anulacion_hash(
    fields: &RecordHashFields,
    previous_hash: &str,
) -> Result<String, ChainError> {
    calculate_record_hash(fields, RecordType::Anulacion, previous_hash)
}

/// SHA-256 over the canonical comma-joined tuple, 64 lowercase hex chars.
pub fn calculate_record_hash(
    fields: &RecordHashFields,
    record_type: RecordType,
    previous_hash: &str,
) -> Result<String, ChainError> {
    fields.validate()?;

    let canonical = format!(
        "{},{},{},{},{},{},{},{}",
        fields.nif_emisor,
        fields.numero_factura,
        fields.fecha_expedicion,
        fields.tipo_factura,
        fields.cuota_tributaria,
        fields.importe_total,
        record_type.tag(),
        previous_hash,
    );

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fields() -> RecordHashFields {
        RecordHashFields {
            nif_emisor: "B12345678".to_string(),
            numero_factura: "VF-2026-001".to_string(),
            fecha_expedicion: "2026-02-16".to_string(),
            tipo_factura: "F1".to_string(),
            cuota_tributaria: "210.00".to_string(),
            importe_total: "1210.00".to_string(),
        }
    }

    #[test]
    fn test_alta_hash_known_vector() {
        // SHA256("B12345678,VF-2026-001,2026-02-16,F1,210.00,1210.00,alta,")
        let hash = calculate_alta_hash(&sample_fields(), CHAIN_GENESIS).unwrap();
        assert_eq!(
            hash,
            "cfdf00a87c5025cdcfe719086e01d71319bec6f8eb624f2a7f751cb650cd2c06"
        );
    }

    #[test]
    fn test_anulacion_hash_known_vector() {
        let hash = calculate_anulacion_hash(&sample_fields(), CHAIN_GENESIS).unwrap();
        assert_eq!(
            hash,
            "48a92f60c7e3f47291a94114d5cb37bd2d23ea22f3264179f9b7090d75346bfd"
        );
    }

    #[test]
    fn test_hash_deterministic_and_well_formed() {
        let h1 = calculate_alta_hash(&sample_fields(), "abc").unwrap();
        let h2 = calculate_alta_hash(&sample_fields(), "abc").unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_alta_and_anulacion_differ_for_same_fields() {
        let fields = sample_fields();
        for prev in ["", "aa", "cfdf00a87c5025cdcfe719086e01d713"] {
            let alta = calculate_alta_hash(&fields, prev).unwrap();
            let anulacion = calculate_anulacion_hash(&fields, prev).unwrap();
            assert_ne!(alta, anulacion);
        }
    }

    #[test]
    fn test_chain_position_sensitivity() {
        let fields = sample_fields();
        let h1 = calculate_alta_hash(&fields, "prev-a").unwrap();
        let h2 = calculate_alta_hash(&fields, "prev-b").unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_missing_fields_are_named() {
        let mut fields = sample_fields();
        fields.numero_factura = String::new();
        fields.importe_total = "  ".to_string();

        let err = calculate_alta_hash(&fields, CHAIN_GENESIS).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("numero_factura"));
        assert!(msg.contains("importe_total"));
        assert!(!msg.contains("nif_emisor"));
    }
}
