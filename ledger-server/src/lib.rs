//! VeriFactu invoice-integrity ledger service
//!
//! Produces a cryptographically chained, tamper-evident ledger of invoicing
//! events per tenant and submits them to the AEAT with strict ordering,
//! resiliency and legal-retention guarantees:
//!
//! - [`chain`] — deterministic record digests and whole-chain verification
//! - [`eventlog`] — independent, append-only, separately chained event ledger
//! - [`records`] — exclusive-append record orchestration under tenant locks
//! - [`remision`] — batched delivery with flow control, backoff and a
//!   circuit breaker
//!
//! The binary entry point lives in `src/main.rs`.

pub mod aeat;
pub mod chain;
pub mod core;
pub mod db;
pub mod eventlog;
pub mod locks;
pub mod qr;
pub mod records;
pub mod remision;
pub mod tenants;
pub mod utils;

pub use crate::core::{Config, ServerState};

/// Prepare the process environment: dotenv, working directory and logging.
pub fn setup_environment() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = Config::from_env();
    std::fs::create_dir_all(&config.work_dir)?;

    let log_dir = format!("{}/logs", config.work_dir.trim_end_matches('/'));
    std::fs::create_dir_all(&log_dir)?;

    let log_level = if config.is_development() { "debug" } else { "info" };
    if config.is_production() {
        utils::logger::init_logger_with_file(Some(log_level), Some(&log_dir));
    } else {
        utils::logger::init_logger_with_file(Some(log_level), None);
    }

    Ok(())
}
