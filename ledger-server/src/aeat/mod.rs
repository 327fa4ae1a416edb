//! AEAT protocol adapter
//!
//! Builds the outbound SOAP payload for a batch of records, sends it over
//! HTTPS and parses the authority's response into per-record outcomes.
//! The transport is a trait so the pipeline can be exercised against a mock
//! authority.

pub mod client;
pub mod soap;

pub use client::{AeatClient, HttpAeatClient};
pub use soap::{AeatResponse, GlobalStatus, RecordOutcome, RecordResultStatus};

use thiserror::Error;

/// Protocol adapter errors
#[derive(Debug, Error)]
pub enum AeatError {
    /// Caller error: nothing to send
    #[error("Validation error: {0}")]
    Validation(String),
    /// Retryable transport-level failure (timeout, connection error,
    /// non-success HTTP status, empty body)
    #[error("AEAT communication error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for AeatError {
    fn from(err: reqwest::Error) -> Self {
        AeatError::Transport(err.to_string())
    }
}
