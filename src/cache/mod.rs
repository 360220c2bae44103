//! Versioned response cache for offline support.
//!
//! This module provides:
//! - Named cache stores persisted in SQLite, one of which is current
//! - Cache-first and network-first serving strategies over a fetcher
//! - Reconciliation that drops every store but the current one

mod layer;
mod result;
mod storage;

pub use layer::CacheLayer;
pub use result::{Served, ServedFrom};
pub use storage::{CacheStorage, EntrySummary, SqliteStorage};
