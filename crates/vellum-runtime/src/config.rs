use serde::{Deserialize, Serialize};
use std::time::Duration;
use vellum_db_postgres::PostgresConfig;

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub languages: LanguageConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.languages.supported.is_empty() {
            return Err(ConfigError::invalid(
                "languages.supported must list at least one language",
            ));
        }
        if !self.languages.supported.contains(&self.languages.primary) {
            return Err(ConfigError::invalid(format!(
                "languages.primary '{}' is not in languages.supported",
                self.languages.primary
            )));
        }
        if self.storage.backend == StorageBackend::Postgres {
            if self.storage.postgres.url.is_empty() {
                return Err(ConfigError::invalid("storage.postgres.url must be set"));
            }
            if self.storage.postgres.pool_size == 0 {
                return Err(ConfigError::invalid("storage.postgres.pool_size must be > 0"));
            }
        }
        if self.cache.enabled && self.cache.backend == CacheBackend::Redis {
            if self.cache.redis.url.is_empty() {
                return Err(ConfigError::invalid("cache.redis.url must be set"));
            }
            if self.cache.redis.pool_size == 0 {
                return Err(ConfigError::invalid("cache.redis.pool_size must be > 0"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub postgres: PostgresConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Local,
    Redis,
}

/// Query cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Whether query results are cached at all
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub backend: CacheBackend,

    #[serde(default)]
    pub redis: RedisConfig,
}

fn default_cache_enabled() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            backend: CacheBackend::default(),
            redis: RedisConfig::default(),
        }
    }
}

/// Redis connection settings for the shared query cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379/0"). The database index is the
    /// cache namespace flushed on writes.
    #[serde(default = "default_redis_url")]
    pub url: String,

    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    2000
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LanguageConfig {
    #[serde(default = "default_languages")]
    pub supported: Vec<String>,
    #[serde(default = "default_primary_language")]
    pub primary: String,
}

fn default_languages() -> Vec<String> {
    vec![default_primary_language()]
}

fn default_primary_language() -> String {
    "en".to_string()
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            supported: default_languages(),
            primary: default_primary_language(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use crate::error::ConfigError;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "vellum.toml";

    /// Loads the configuration from a TOML file, then environment overrides such as
    /// `VELLUM__CACHE__BACKEND=redis`. A missing file is not an error.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        let path = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if path.exists() {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(
            Environment::with_prefix("VELLUM")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("languages.supported"),
        );
        let merged: AppConfig = builder.build()?.try_deserialize()?;
        merged.validate()?;
        Ok(merged)
    }
}
