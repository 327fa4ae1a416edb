//! Record Orchestration
//!
//! The single entry point that appends records to tenant invoice chains.

pub mod service;

pub use service::{RecordService, SourceInvoice};
