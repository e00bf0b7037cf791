//! In-memory store backend for the Vellum query layer.
//!
//! This crate provides an in-memory implementation of the [`Store`] trait from
//! `vellum-storage`. Filters, ordering (including substring-position relevance), grouping
//! and aggregates are evaluated in process. It backs the query-layer test suites and
//! exposes per-call counters through [`InMemoryStore::counters`].
//!
//! # Example
//!
//! ```ignore
//! use vellum_db_memory::InMemoryStore;
//! use vellum_storage::{Store, StoreQuery};
//!
//! let store = InMemoryStore::new();
//! store.insert("products", &row).await?;
//! let rows = store.select(&StoreQuery::new("products")).await?;
//! ```

pub mod query;
mod storage;

pub use storage::{InMemoryStore, StoreCounters};
pub use vellum_storage::{StorageError, Store};

/// Creates a new shareable in-memory store.
pub fn create_store() -> vellum_storage::DynStore {
    std::sync::Arc::new(InMemoryStore::new())
}
