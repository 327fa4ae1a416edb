//! Unified error handling
//!
//! Application-level error taxonomy:
//!
//! | Class | Retryable | Examples |
//! |-------|-----------|----------|
//! | Validation | no | missing canonical field, unknown tenant config |
//! | LockUnavailable | yes (back off, retry whole operation) | tenant lock contention |
//! | ChainIntegrity | no (manual investigation) | broken hash link detected |
//! | Transport | yes (backoff up to attempt ceiling) | AEAT timeout, SOAP fault |
//! | Database / Internal | operational | storage failures, bugs |

use crate::db::repository::RepoError;

/// Application error enum
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ========== Caller errors ==========
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // ========== Concurrency ==========
    #[error("Lock unavailable: {0}")]
    LockUnavailable(String),

    // ========== Integrity ==========
    #[error("Chain integrity violation: {0}")]
    ChainIntegrity(String),

    // ========== External authority ==========
    #[error("Transport error: {0}")]
    Transport(String),

    // ========== System errors ==========
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn lock_unavailable(msg: impl Into<String>) -> Self {
        AppError::LockUnavailable(msg.into())
    }

    pub fn chain_integrity(msg: impl Into<String>) -> Self {
        AppError::ChainIntegrity(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        AppError::Transport(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        AppError::Database(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    /// Whether the caller may retry the whole operation after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::LockUnavailable(_) | AppError::Transport(_))
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound(msg) => AppError::NotFound(msg),
            RepoError::Validation(msg) => AppError::Validation(msg),
            RepoError::Database(msg) => AppError::Database(msg),
        }
    }
}

/// Result type for application operations
pub type AppResult<T> = Result<T, AppError>;
