//! # vellum-runtime
//!
//! Wiring for applications embedding the Vellum query layer: configuration loading,
//! tracing setup, the Redis cache backend and a [`QueryLayer`] bootstrapped from
//! configuration.
//!
//! ```ignore
//! use vellum_runtime::{QueryLayer, config::loader::load_config, observability};
//!
//! let config = load_config(None)?;
//! observability::init_tracing_with_level(&config.logging.level);
//! let layer = QueryLayer::start(config, collections).await?;
//! let products = layer.query("products")?.where_lt("price", 100).all().await?;
//! ```

pub mod bootstrap;
pub mod config;
mod error;
pub mod observability;
pub mod redis_cache;

pub use bootstrap::{QueryLayer, QueryLayerBuilder, create_cache_layer};
pub use config::{AppConfig, CacheBackend, StorageBackend};
pub use error::{ConfigError, Result, RuntimeError};
pub use redis_cache::RedisCache;

pub mod prelude {
    pub use crate::bootstrap::{QueryLayer, QueryLayerBuilder};
    pub use crate::config::AppConfig;
    pub use crate::error::{ConfigError, RuntimeError};
    pub use vellum_query::prelude::*;
}
