//! SIF Event Ledger
//!
//! Independent, append-only log of system lifecycle events, hash-chained
//! per tenant separately from the invoice chain. Used for audits and
//! forensic reconstruction: it answers "what happened and in what order"
//! even if the invoice chain itself were compromised.

pub mod service;
pub mod storage;

pub use service::EventLogService;
pub use storage::{
    EVENT_CHAIN_GENESIS, EventChainBreak, EventChainVerification, EventDraft, EventLogError,
    EventLogResult, EventLogStorage,
};
