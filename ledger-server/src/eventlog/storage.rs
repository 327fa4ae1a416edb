//! Event ledger SQLite storage layer
//!
//! Append-only by construction: this module exposes `append`, reads and
//! chain verification — no update or delete exists at any layer.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::json;
use sha2::{Digest, Sha256};
use shared::models::{EventLogEntry, EventSeverity, EventType};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::Mutex;

/// Previous-hash value for the first event of a tenant's ledger.
pub const EVENT_CHAIN_GENESIS: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Storage errors
#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for EventLogError {
    fn from(err: sqlx::Error) -> Self {
        EventLogError::Database(err.to_string())
    }
}

pub type EventLogResult<T> = Result<T, EventLogError>;

/// Append request for one ledger entry.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: EventType,
    pub tenant_id: i64,
    pub actor_id: Option<String>,
    pub target_record_id: Option<i64>,
    pub severity: EventSeverity,
    pub details: serde_json::Value,
    pub ip_address: Option<String>,
}

/// Outcome of an event-chain verification pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EventChainVerification {
    pub tenant_id: i64,
    pub total_entries: u64,
    pub valid_entries: u64,
    pub chain_intact: bool,
    pub first_break: Option<EventChainBreak>,
}

/// First point where the event chain fails.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EventChainBreak {
    pub entry_id: i64,
    pub expected_hash: String,
    pub actual_hash: String,
}

/// Event ledger storage (SQLite).
///
/// Appends are serialized per tenant so two concurrent writers can never
/// read the same chain head.
#[derive(Clone)]
pub struct EventLogStorage {
    pool: SqlitePool,
    append_locks: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl EventLogStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            append_locks: Arc::new(DashMap::new()),
        }
    }

    /// Append one entry to the tenant's event chain.
    ///
    /// 1. Read the tenant's current chain head (genesis if none).
    /// 2. Hash the previous digest plus the canonical entry payload.
    /// 3. Insert the entry.
    pub async fn append(&self, draft: EventDraft) -> EventLogResult<EventLogEntry> {
        let mutex = self
            .append_locks
            .entry(draft.tenant_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = mutex.lock().await;

        let previous_hash = sqlx::query_scalar::<_, String>(
            "SELECT hash_event FROM event_log WHERE tenant_id = ?1 ORDER BY id DESC LIMIT 1",
        )
        .bind(draft.tenant_id)
        .fetch_optional(&self.pool)
        .await?
        .unwrap_or_else(|| EVENT_CHAIN_GENESIS.to_string());

        let created_at = shared::util::now_millis();
        let details_json = serde_json::to_string(&draft.details)?;
        let canonical = canonical_entry_json(
            draft.event_type,
            draft.tenant_id,
            draft.actor_id.as_deref(),
            draft.target_record_id,
            draft.severity,
            &draft.details,
            draft.ip_address.as_deref(),
            created_at,
        )?;
        let hash_event = compute_event_hash(&previous_hash, &canonical);

        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO event_log (event_type, tenant_id, actor_id, target_record_id, severity, details, ip_address, hash_previous_event, hash_event, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) RETURNING id",
        )
        .bind(draft.event_type)
        .bind(draft.tenant_id)
        .bind(&draft.actor_id)
        .bind(draft.target_record_id)
        .bind(draft.severity)
        .bind(&details_json)
        .bind(&draft.ip_address)
        .bind(&previous_hash)
        .bind(&hash_event)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(EventLogEntry {
            id,
            event_type: draft.event_type,
            tenant_id: draft.tenant_id,
            actor_id: draft.actor_id,
            target_record_id: draft.target_record_id,
            severity: draft.severity,
            details: details_json,
            ip_address: draft.ip_address,
            hash_previous_event: previous_hash,
            hash_event,
            created_at,
        })
    }

    /// Most recent entries for a tenant, newest first.
    pub async fn query_recent(
        &self,
        tenant_id: i64,
        limit: i64,
        offset: i64,
    ) -> EventLogResult<Vec<EventLogEntry>> {
        let entries = sqlx::query_as::<_, EventLogEntry>(
            "SELECT * FROM event_log WHERE tenant_id = ?1 ORDER BY id DESC LIMIT ?2 OFFSET ?3",
        )
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Walk the tenant's event chain from genesis, checking both the
    /// hash linkage and each entry's content hash. Stops at the first
    /// failure: everything past an undetected break is unverifiable.
    pub async fn verify_integrity(&self, tenant_id: i64) -> EventLogResult<EventChainVerification> {
        let entries = sqlx::query_as::<_, EventLogEntry>(
            "SELECT * FROM event_log WHERE tenant_id = ?1 ORDER BY id",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        let total = entries.len() as u64;
        let mut expected = EVENT_CHAIN_GENESIS.to_string();
        let mut valid = 0u64;

        for entry in &entries {
            if entry.hash_previous_event != expected {
                return Ok(EventChainVerification {
                    tenant_id,
                    total_entries: total,
                    valid_entries: valid,
                    chain_intact: false,
                    first_break: Some(EventChainBreak {
                        entry_id: entry.id,
                        expected_hash: expected,
                        actual_hash: entry.hash_previous_event.clone(),
                    }),
                });
            }

            let recomputed = match recompute_entry_hash(entry) {
                Some(hash) => hash,
                // Details no longer parse as JSON: the content was altered.
                None => String::new(),
            };
            if recomputed != entry.hash_event {
                return Ok(EventChainVerification {
                    tenant_id,
                    total_entries: total,
                    valid_entries: valid,
                    chain_intact: false,
                    first_break: Some(EventChainBreak {
                        entry_id: entry.id,
                        expected_hash: recomputed,
                        actual_hash: entry.hash_event.clone(),
                    }),
                });
            }

            valid += 1;
            expected = entry.hash_event.clone();
        }

        Ok(EventChainVerification {
            tenant_id,
            total_entries: total,
            valid_entries: valid,
            chain_intact: true,
            first_break: None,
        })
    }
}

/// `SHA256(previous_hash || canonical_json)`, 64 lowercase hex chars.
fn compute_event_hash(previous_hash: &str, canonical_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(canonical_json.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Canonical JSON of an entry without its hash fields. serde_json maps keep
/// keys sorted, so the serialized form is stable across write and re-read.
#[allow(clippy::too_many_arguments)]
fn canonical_entry_json(
    event_type: EventType,
    tenant_id: i64,
    actor_id: Option<&str>,
    target_record_id: Option<i64>,
    severity: EventSeverity,
    details: &serde_json::Value,
    ip_address: Option<&str>,
    created_at: i64,
) -> Result<String, serde_json::Error> {
    let value = json!({
        "event_type": event_type,
        "tenant_id": tenant_id,
        "actor_id": actor_id,
        "target_record_id": target_record_id,
        "severity": severity,
        "details": details,
        "ip_address": ip_address,
        "created_at": created_at,
    });
    serde_json::to_string(&value)
}

fn recompute_entry_hash(entry: &EventLogEntry) -> Option<String> {
    let details: serde_json::Value = serde_json::from_str(&entry.details).ok()?;
    let canonical = canonical_entry_json(
        entry.event_type,
        entry.tenant_id,
        entry.actor_id.as_deref(),
        entry.target_record_id,
        entry.severity,
        &details,
        entry.ip_address.as_deref(),
        entry.created_at,
    )
    .ok()?;
    Some(compute_event_hash(&entry.hash_previous_event, &canonical))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_hash_shape_and_determinism() {
        let canonical = canonical_entry_json(
            EventType::RecordCreate,
            42,
            None,
            Some(7),
            EventSeverity::Info,
            &json!({"invoice_number": "VF-2026-001"}),
            None,
            1_700_000_000_000,
        )
        .unwrap();

        let h1 = compute_event_hash(EVENT_CHAIN_GENESIS, &canonical);
        let h2 = compute_event_hash(EVENT_CHAIN_GENESIS, &canonical);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_canonical_json_key_order_is_stable() {
        // Two logically identical detail objects built in different orders
        // must serialize identically.
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        let ca = canonical_entry_json(
            EventType::AeatSubmit, 1, None, None, EventSeverity::Info, &a, None, 0,
        )
        .unwrap();
        let cb = canonical_entry_json(
            EventType::AeatSubmit, 1, None, None, EventSeverity::Info, &b, None, 0,
        )
        .unwrap();
        assert_eq!(ca, cb);
    }

    #[test]
    fn test_hash_depends_on_previous() {
        let canonical = canonical_entry_json(
            EventType::AeatSubmit, 1, None, None, EventSeverity::Info, &json!({}), None, 0,
        )
        .unwrap();
        let h1 = compute_event_hash(EVENT_CHAIN_GENESIS, &canonical);
        let h2 = compute_event_hash(&h1, &canonical);
        assert_ne!(h1, h2);
    }
}
