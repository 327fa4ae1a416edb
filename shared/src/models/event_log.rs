//! Event Ledger Model
//!
//! The SIF event log: an independent, append-only record of system-level
//! lifecycle events, hash-chained per tenant separately from the invoice
//! chain. Entries are never updated or removed; they exist to reconstruct
//! what happened and in what order even if the invoice chain itself were
//! compromised.

use serde::{Deserialize, Serialize};

/// Fixed vocabulary of ledger event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum EventType {
    SystemStart,
    RecordCreate,
    RecordCancel,
    ChainBreak,
    ChainRecovery,
    AeatSubmit,
    AeatResponse,
    CertificateChange,
    ConfigChange,
    AuditAccess,
    IntegrityCheck,
    ManualIntervention,
}

impl EventType {
    /// Severity assigned when the caller does not override it.
    pub fn default_severity(&self) -> EventSeverity {
        match self {
            EventType::ChainBreak => EventSeverity::Critical,
            EventType::ManualIntervention => EventSeverity::Critical,
            EventType::ChainRecovery => EventSeverity::Warning,
            EventType::CertificateChange => EventSeverity::Warning,
            _ => EventSeverity::Info,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "lowercase"))]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// One entry in the event ledger (immutable).
///
/// `details` holds the structured payload as its canonical JSON string; the
/// entry hash covers the previous entry's hash plus the canonical JSON of
/// the entry without its hash fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct EventLogEntry {
    pub id: i64,
    pub event_type: EventType,
    pub tenant_id: i64,
    pub actor_id: Option<String>,
    pub target_record_id: Option<i64>,
    pub severity: EventSeverity,
    pub details: String,
    pub ip_address: Option<String>,
    pub hash_previous_event: String,
    pub hash_event: String,
    pub created_at: i64,
}
