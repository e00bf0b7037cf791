//! # vellum-core
//!
//! Schema-level building blocks shared by every Vellum crate.
//!
//! This crate does not talk to a store. It describes *what* a collection looks like and
//! *how* each of its fields behaves:
//!
//! - [`CollectionDefinition`] and [`CollectionRegistry`]: the resolved, read-only
//!   description of every collection.
//! - [`FieldType`] and [`FieldTypeRegistry`]: per-type sanitizers, validators, defaults,
//!   (de)serialization, population and keyword extraction.
//! - [`ConditionalLogic`]: activation rules that make a field depend on other fields.
//!
//! ## Example
//!
//! ```ignore
//! use vellum_core::{CollectionDefinition, FieldDeclaration, CacheQueries};
//! use serde_json::json;
//!
//! let products = CollectionDefinition::builder("products")
//!     .timestamps()
//!     .field("name", FieldDeclaration::new("text").with_options(json!({ "required": true })))
//!     .field("price", FieldDeclaration::new("number").with_options(json!({ "min": 0 })))
//!     .cache_queries(CacheQueries::Threshold(50))
//!     .build();
//! ```

pub mod conditional;
mod error;
pub mod field_type;
pub mod fields;
mod record;
pub mod registry;
pub mod schema;

pub use conditional::{ConditionOp, ConditionalLogic, ConditionalLogicResolver, FieldCondition};
pub use error::{CoreError, Result};
pub use field_type::{
    DefaultContext, FieldType, FieldTypeRegistry, KeywordContext, OperationScope,
    PopulateContext, Populator, RecordResolver, SanitizeContext, Sanitizer, StorageType,
    ValidateContext, ValidationFailure, Validator,
};
pub use record::{Operation, Record, now_millis, value_to_text};
pub use registry::CollectionRegistry;
pub use schema::{
    AdditionalOptions, CacheQueries, ClearCacheRules, CollectionBuilder, CollectionDefinition,
    CollectionMode, FieldDeclaration, KeywordExtractor, SINGLE_COLLECTIONS_TABLE, SearchField,
    Uniqueness,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use vellum_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::conditional::{ConditionOp, ConditionalLogic, FieldCondition};
    pub use crate::error::{CoreError, Result};
    pub use crate::field_type::{
        FieldType, FieldTypeRegistry, OperationScope, Sanitizer, StorageType, ValidationFailure,
        Validator,
    };
    pub use crate::record::{Operation, Record};
    pub use crate::registry::CollectionRegistry;
    pub use crate::schema::{
        CacheQueries, ClearCacheRules, CollectionDefinition, FieldDeclaration, SearchField,
        Uniqueness,
    };
}
