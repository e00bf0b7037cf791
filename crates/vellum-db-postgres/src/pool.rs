//! Pool construction for [`PostgresStore`](crate::PostgresStore).
//!
//! The store opens its pool on first use through a connection slot, so a pool is built
//! from [`PostgresConfig`] in two steps: [`pool_options`] validates the sizing and
//! timeouts without touching the network, and [`create_pool`] connects with them.

use std::time::Duration;

use sqlx_core::pool::PoolOptions;
use sqlx_postgres::{PgPool, Postgres};
use tracing::{info, instrument};
use url::Url;

use crate::config::PostgresConfig;
use crate::error::{PostgresError, Result};

pub type PgPoolOptions = PoolOptions<Postgres>;

const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Pool options for `config`.
pub fn pool_options(config: &PostgresConfig) -> Result<PgPoolOptions> {
    if config.pool_size == 0 {
        return Err(PostgresError::config("pool_size must be at least 1"));
    }
    if config.connect_timeout_ms == 0 {
        return Err(PostgresError::config("connect_timeout_ms must be positive"));
    }
    let min_connections = match config.min_connections {
        Some(min) if min > config.pool_size => {
            return Err(PostgresError::config(format!(
                "min_connections ({min}) exceeds pool_size ({})",
                config.pool_size
            )));
        }
        Some(min) => min,
        None => (config.pool_size / 4).max(1),
    };

    // Broken connections surface as query errors and reset the store's slot.
    let options = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .min_connections(min_connections)
        .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
        .max_lifetime(
            config
                .max_lifetime_secs
                .map_or(DEFAULT_MAX_LIFETIME, Duration::from_secs),
        )
        .idle_timeout(config.idle_timeout_ms.map(Duration::from_millis))
        .test_before_acquire(false);
    Ok(options)
}

/// Connects a pool for the store.
#[instrument(skip(config), fields(url = %redacted_url(&config.url)))]
pub async fn create_pool(config: &PostgresConfig) -> Result<PgPool> {
    let options = pool_options(config)?;
    let pool = options.connect(&config.url).await?;
    info!(
        pool_size = config.pool_size,
        sync_schema = config.sync_schema,
        "Store connected to PostgreSQL"
    );
    Ok(pool)
}

/// The connection URL with any password replaced, for logs.
fn redacted_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                // Only fails for URLs that cannot carry credentials.
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => "<unparseable url>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_options_from_config() {
        let config = PostgresConfig::new("postgres://localhost/shop").with_pool_size(8);
        let options = pool_options(&config).unwrap();
        assert_eq!(options.get_max_connections(), 8);
        assert_eq!(options.get_min_connections(), 2);
        assert_eq!(options.get_acquire_timeout(), Duration::from_millis(5000));
        assert_eq!(options.get_max_lifetime(), Some(DEFAULT_MAX_LIFETIME));

        let tiny = config.with_pool_size(1);
        assert_eq!(pool_options(&tiny).unwrap().get_min_connections(), 1);
    }

    #[test]
    fn test_pool_options_reject_bad_sizing() {
        let empty = PostgresConfig::default().with_pool_size(0);
        assert!(matches!(pool_options(&empty), Err(PostgresError::Config { .. })));

        let mut inverted = PostgresConfig::default().with_pool_size(2);
        inverted.min_connections = Some(5);
        assert!(pool_options(&inverted).is_err());

        let no_timeout = PostgresConfig::default().with_connect_timeout_ms(0);
        assert!(pool_options(&no_timeout).is_err());
    }

    #[test]
    fn test_redacted_url() {
        assert_eq!(
            redacted_url("postgres://app:secret@db:5432/shop"),
            "postgres://app:****@db:5432/shop"
        );
        assert_eq!(
            redacted_url("postgres://app@db/shop"),
            "postgres://app@db/shop"
        );
        assert_eq!(redacted_url("not a url"), "<unparseable url>");
    }
}
