//! Verification artifact generation
//!
//! Derives the AEAT cotejo (verification) URL for a record. QR image
//! rendering lives outside this service; only the deterministic URL is
//! produced here. The generator is a capability interface with a no-op
//! implementation selected at startup, so the record pipeline never
//! branches on whether artifacts are enabled.

use shared::models::InvoiceRecord;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Artifact generation switched off for this deployment
    #[error("Artifact generation disabled")]
    Disabled,
    #[error("Invalid record data: {0}")]
    InvalidRecord(String),
}

/// Verification-URL generator boundary.
pub trait ArtifactGenerator: Send + Sync {
    /// Deterministic AEAT verification URL for a record, derived from the
    /// issuer tax id, invoice number, issue date and total amount.
    fn build_verification_url(&self, record: &InvoiceRecord) -> Result<String, ArtifactError>;
}

/// URL builder against the AEAT cotejo endpoint.
pub struct AeatQrGenerator {
    base_url: String,
}

impl AeatQrGenerator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl ArtifactGenerator for AeatQrGenerator {
    fn build_verification_url(&self, record: &InvoiceRecord) -> Result<String, ArtifactError> {
        // AEAT expects the issue date as dd-mm-yyyy.
        let fecha = chrono::NaiveDate::parse_from_str(&record.fecha_expedicion, "%Y-%m-%d")
            .map_err(|e| {
                ArtifactError::InvalidRecord(format!(
                    "unparseable fecha_expedicion {:?}: {e}",
                    record.fecha_expedicion
                ))
            })?
            .format("%d-%m-%Y")
            .to_string();

        Ok(format!(
            "{}?nif={}&numserie={}&fecha={}&importe={}",
            self.base_url,
            encode_query(&record.nif_emisor),
            encode_query(&record.numero_factura),
            encode_query(&fecha),
            encode_query(&record.importe_total),
        ))
    }
}

/// Null implementation for deployments without artifact generation.
pub struct NoopArtifactGenerator;

impl ArtifactGenerator for NoopArtifactGenerator {
    fn build_verification_url(&self, _record: &InvoiceRecord) -> Result<String, ArtifactError> {
        Err(ArtifactError::Disabled)
    }
}

/// Minimal percent-encoding for URL query values.
fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            other => {
                out.push_str(&format!("%{:02X}", other));
            }
        }
    }
    out
}
