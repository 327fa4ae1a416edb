//! Event ledger service
//!
//! Best-effort append surface over the storage layer. Event logging is
//! telemetry for forensics: a write failure is worth a local warning but
//! must never abort the business operation that triggered it.

use shared::models::{EventLogEntry, EventType};
use sqlx::SqlitePool;

use super::storage::{
    EventChainVerification, EventDraft, EventLogResult, EventLogStorage,
};

pub struct EventLogService {
    storage: EventLogStorage,
}

impl EventLogService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            storage: EventLogStorage::new(pool),
        }
    }

    /// Append an event with the type's default severity and no actor
    /// context. Returns the entry when the write succeeded.
    pub async fn log_event(
        &self,
        event_type: EventType,
        tenant_id: i64,
        target_record_id: Option<i64>,
        details: serde_json::Value,
    ) -> Option<EventLogEntry> {
        self.log(EventDraft {
            event_type,
            tenant_id,
            actor_id: None,
            target_record_id,
            severity: event_type.default_severity(),
            details,
            ip_address: None,
        })
        .await
    }

    /// Append a fully specified event. Failures are swallowed after a local
    /// warning.
    pub async fn log(&self, draft: EventDraft) -> Option<EventLogEntry> {
        let event_type = draft.event_type;
        let tenant_id = draft.tenant_id;
        match self.storage.append(draft).await {
            Ok(entry) => {
                tracing::debug!(
                    event_id = entry.id,
                    event_type = %entry.event_type,
                    tenant_id = entry.tenant_id,
                    "Event ledger entry recorded"
                );
                Some(entry)
            }
            Err(e) => {
                tracing::warn!(
                    event_type = %event_type,
                    tenant_id = tenant_id,
                    error = %e,
                    "Failed to write event ledger entry, continuing"
                );
                None
            }
        }
    }

    /// Read a tenant's event history, newest first. The read itself leaves
    /// an AUDIT_ACCESS trace in the ledger.
    pub async fn history(
        &self,
        tenant_id: i64,
        limit: i64,
        offset: i64,
    ) -> EventLogResult<Vec<EventLogEntry>> {
        let entries = self.storage.query_recent(tenant_id, limit, offset).await?;

        self.log_event(
            EventType::AuditAccess,
            tenant_id,
            None,
            serde_json::json!({
                "entries_returned": entries.len(),
                "offset": offset,
            }),
        )
        .await;

        Ok(entries)
    }

    /// Verify the tenant's event chain.
    pub async fn verify_integrity(&self, tenant_id: i64) -> EventLogResult<EventChainVerification> {
        self.storage.verify_integrity(tenant_id).await
    }

    pub fn storage(&self) -> &EventLogStorage {
        &self.storage
    }
}
