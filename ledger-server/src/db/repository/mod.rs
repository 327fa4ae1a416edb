//! Repository Module
//!
//! Free-function repositories over the SQLite pool, one module per table.
//! All IDs are `i64` (`INTEGER PRIMARY KEY AUTOINCREMENT`), which is what
//! gives records their monotonic, storage-assigned chain order.

pub mod invoice_record;
pub mod pipeline_state;
pub mod remision_batch;
pub mod tenant_chain;
pub mod tenant_config;

use thiserror::Error;

/// Repository error types
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepoError::NotFound("row not found".into()),
            other => RepoError::Database(other.to_string()),
        }
    }
}

/// Result type for repository operations
pub type RepoResult<T> = Result<T, RepoError>;
