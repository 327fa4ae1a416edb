//! Data models
//!
//! Row types for the invoice ledger, the remision pipeline and the event
//! ledger. DB row types use `#[cfg_attr(feature = "db", derive(sqlx::FromRow))]`.

pub mod event_log;
pub mod invoice_record;
pub mod remision_batch;
pub mod tenant;

// Re-exports
pub use event_log::*;
pub use invoice_record::*;
pub use remision_batch::*;
pub use tenant::*;
