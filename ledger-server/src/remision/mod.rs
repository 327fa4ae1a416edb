//! AEAT Remision Pipeline
//!
//! Batches pending records, enforces the authority's rate constraints and
//! delivers batches with retry, backoff and a circuit breaker.

pub mod service;
pub mod worker;

pub use service::{GuardRefusal, RemisionConfig, RemisionResult, RemisionService, SubmitOutcome};
pub use worker::RemisionWorker;
