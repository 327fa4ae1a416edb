//! Tenant Models
//!
//! Per-tenant VeriFactu configuration plus the cached chain head. The chain
//! head is informational (counters, last ids); the authoritative previous
//! hash is always read from the record sequence itself.

use serde::{Deserialize, Serialize};

use super::remision_batch::AeatEnvironment;

/// Tenant VeriFactu configuration entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct TenantConfig {
    pub id: i64,
    pub tenant_id: i64,
    /// Issuer tax id
    pub nif: String,
    /// Issuer legal name
    pub nombre_fiscal: String,
    /// Invoice series prefix used in `{SERIE}-{YYYY}-{n}` numbers
    pub serie_facturacion: String,
    pub aeat_environment: AeatEnvironment,
    /// Reference to the tenant's PKCS#12 certificate in the credential store
    pub certificate_ref: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Update payload for a tenant configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantConfigUpdate {
    pub nif: Option<String>,
    pub nombre_fiscal: Option<String>,
    pub serie_facturacion: Option<String>,
    pub aeat_environment: Option<AeatEnvironment>,
    pub certificate_ref: Option<String>,
    pub is_active: Option<bool>,
}

/// Cached head of a tenant's invoice chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct TenantChainState {
    pub tenant_id: i64,
    pub last_record_id: Option<i64>,
    pub last_record_hash: Option<String>,
    pub record_count: i64,
    pub updated_at: i64,
}
