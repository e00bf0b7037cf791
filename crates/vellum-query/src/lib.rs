//! # vellum-query
//!
//! Typed query layer over a [`vellum_storage::Store`].
//!
//! ## Overview
//!
//! - [`QueryEnv`]: store, collection schema, field types, cache and background tasks.
//! - [`QueryBuilder`]: fluent reads and writes on multi-entry collections.
//! - [`SingleQueryBuilder`]: read and update of single-entry collections.
//! - [`query_string`]: compiles `?where=...&order=...` into builder parameters.
//! - [`CacheLayer`]: latency-adaptive result cache with whole-namespace flushes.
//! - [`search`]: keyword columns and relevance ordering.
//!
//! ## Example
//!
//! ```ignore
//! use vellum_query::prelude::*;
//!
//! let env = QueryEnv::new(store, collections, FieldTypeRegistry::with_builtin());
//! let lamps = env
//!     .query("products")?
//!     .search("default", "desk lamp")
//!     .order_by_relevance("default")
//!     .some(vec![
//!         branch(|q| q.where_lt("price", 50)),
//!         branch(|q| q.where_eq("featured", true)),
//!     ])
//!     .paginate(1, 20)
//!     .await?;
//! ```

mod builder;
pub mod cache;
mod env;
mod error;
mod filter;
mod options;
pub mod pipeline;
pub mod query_string;
pub mod search;
mod single;
mod tasks;

pub use builder::{BatchErrors, Paginated, QueryBuilder, RecordsWithCount};
pub use cache::{
    CacheClient, CacheError, CacheLayer, CacheStatsSnapshot, CallbackPageCache, LocalCache,
    NoopPageCache, PageCache,
};
pub use env::QueryEnv;
pub use error::{FieldErrors, QueryError, Result, WriteOutcome};
pub use filter::{Branch, FilterScope, RecordsMatch, WhereBuilder, branch};
pub use options::{FieldValueType, OrderSpec, OrderTarget, QueryOptions};
pub use single::SingleQueryBuilder;
pub use tasks::BackgroundTasks;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::builder::{Paginated, QueryBuilder, RecordsWithCount};
    pub use crate::cache::{CacheClient, CacheLayer, LocalCache};
    pub use crate::env::QueryEnv;
    pub use crate::error::{FieldErrors, QueryError, WriteOutcome};
    pub use crate::filter::{RecordsMatch, WhereBuilder, branch};
    pub use crate::options::QueryOptions;
    pub use crate::single::SingleQueryBuilder;
    pub use vellum_core::prelude::*;
    pub use vellum_storage::{SortDirection, Store};
}
