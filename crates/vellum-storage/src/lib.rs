//! # vellum-storage
//!
//! Store abstraction layer for the Vellum query layer.
//!
//! This crate defines the [`Store`] trait that every backend implements, the filter tree
//! and query types passed to it, and the SQL translation shared by relational backends.
//! It contains no backend itself.
//!
//! ## Overview
//!
//! - [`FilterNode`]: AND/OR tree over `{field, operator, value}` leaves.
//! - [`StoreQuery`]: projection, filter, order, group and pagination for one table.
//! - [`SqlBuilder`]: parameterized SQL for a [`Dialect`].
//! - [`ConnectionSlot`]: lazily-initialized shared connection.

pub mod connection;
mod error;
mod query;
pub mod sql;
mod traits;

pub use connection::{ConnectionSlot, SlotStatus};
pub use error::{ErrorCategory, StorageError};
pub use query::{
    Aggregate, Arity, Condition, FilterNode, Operator, RawQueryResult, Row, SortDirection,
    SortKey, SortTarget, StoreQuery, UnknownOperator,
};
pub use sql::{BuiltQuery, Dialect, SqlBuilder, SqlValue};
pub use traits::Store;

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared store trait object.
pub type DynStore = std::sync::Arc<dyn Store>;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{ErrorCategory, StorageError};
    pub use crate::query::{
        Aggregate, FilterNode, Operator, RawQueryResult, Row, SortDirection, SortKey,
        StoreQuery,
    };
    pub use crate::sql::Dialect;
    pub use crate::traits::Store;
    pub use crate::{DynStore, StorageResult};
}
