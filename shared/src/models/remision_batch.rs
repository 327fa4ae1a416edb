//! Remision Batch Model
//!
//! A unit of work sent to the AEAT. Batches are created from the pending
//! queue and retried in place (same id) until the attempt ceiling is
//! reached.

use serde::{Deserialize, Serialize};

/// Batch lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum BatchStatus {
    Queued,
    Sent,
    Accepted,
    PartiallyAccepted,
    Failed,
}

/// AEAT target environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "lowercase"))]
pub enum AeatEnvironment {
    Production,
    Testing,
}

/// Remision batch entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct RemisionBatch {
    pub id: i64,
    pub tenant_id: i64,
    pub status: BatchStatus,
    pub aeat_environment: AeatEnvironment,
    pub total_records: i64,
    pub accepted_records: i64,
    pub rejected_records: i64,
    /// Number of submission attempts performed so far
    pub attempt_count: i64,
    /// Unix millis before which a re-queued batch must not be retried
    pub next_attempt_at: Option<i64>,
    pub error_message: Option<String>,
    /// AEAT secure verification code returned on acceptance
    pub csv: Option<String>,
    pub created_at: i64,
    pub sent_at: Option<i64>,
    pub response_at: Option<i64>,
}
