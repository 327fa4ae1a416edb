//! Shared types for the VeriFactu ledger service
//!
//! Row models, status enums and small utilities used by `ledger-server`.
//! DB row types use `#[cfg_attr(feature = "db", derive(sqlx::FromRow))]`.
//! All IDs are `i64` (SQLite INTEGER PRIMARY KEY).

pub mod models;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};
