//! PostgreSQL connection pool bootstrap
//!
//! Builds a verified deadpool-postgres pool from environment configuration
//! and applies idempotent schema scripts at start-up.

use deadpool_postgres::tokio_postgres::{Config as PgConfig, NoTls};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime, TimeoutType};
use std::time::Duration;
use tracing::{debug, error, info};

pub use deadpool_postgres::PoolError;

pub type PgPool = Pool;

/// Database connection pool configuration
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Service name used in log fields
    pub service_name: String,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Maximum number of pooled connections
    pub max_connections: u32,
    /// Timeout for the start-up verification query
    pub connect_timeout_secs: u64,
    /// Timeout when waiting for a free connection
    pub acquire_timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            service_name: String::from("unknown"),
            database_url: String::new(),
            max_connections: 16,
            connect_timeout_secs: 5,
            acquire_timeout_secs: 10,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl DbConfig {
    /// Read pool settings from `DATABASE_URL` and the `DB_*` overrides.
    pub fn from_env(service_name: &str) -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL environment variable not set".to_string())?;
        let defaults = Self::default();

        Ok(Self {
            service_name: service_name.to_string(),
            database_url,
            max_connections: env_or("DB_MAX_CONNECTIONS", defaults.max_connections),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", defaults.connect_timeout_secs),
            acquire_timeout_secs: env_or("DB_ACQUIRE_TIMEOUT_SECS", defaults.acquire_timeout_secs),
        })
    }

    pub fn log_config(&self) {
        info!(
            service = %self.service_name,
            max_connections = self.max_connections,
            connect_timeout_secs = self.connect_timeout_secs,
            acquire_timeout_secs = self.acquire_timeout_secs,
            "database pool configuration"
        );
    }
}

/// Build a deadpool-postgres pool and verify it with `SELECT 1`.
pub async fn create_pool(config: DbConfig) -> Result<PgPool, PoolError> {
    debug!(
        service = %config.service_name,
        max = config.max_connections,
        "creating database pool"
    );

    let pg_config: PgConfig = config
        .database_url
        .parse()
        .map_err(PoolError::Backend)?;

    let mgr = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(mgr)
        .max_size(config.max_connections as usize)
        .wait_timeout(Some(Duration::from_secs(config.acquire_timeout_secs)))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|_| PoolError::Timeout(TimeoutType::Create))?;

    let verify = async {
        let client = pool.get().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(PoolError::Backend)?;
        Ok::<(), PoolError>(())
    };

    match tokio::time::timeout(Duration::from_secs(config.connect_timeout_secs), verify).await {
        Ok(Ok(())) => {
            info!(service = %config.service_name, "database pool created and verified");
            Ok(pool)
        }
        Ok(Err(e)) => {
            error!(service = %config.service_name, error = %e, "database verification failed");
            Err(e)
        }
        Err(_) => {
            error!(
                service = %config.service_name,
                timeout_secs = config.connect_timeout_secs,
                "database verification timed out"
            );
            Err(PoolError::Timeout(TimeoutType::Wait))
        }
    }
}

/// Run an idempotent schema script (`CREATE ... IF NOT EXISTS`).
pub async fn apply_schema(pool: &PgPool, sql: &str) -> Result<(), PoolError> {
    let client = pool.get().await?;
    client.batch_execute(sql).await.map_err(PoolError::Backend)?;
    info!("database schema applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DbConfig::default();
        assert_eq!(config.max_connections, 16);
        assert_eq!(config.connect_timeout_secs, 5);
        assert_eq!(config.acquire_timeout_secs, 10);
    }

    #[test]
    #[serial_test::serial]
    fn test_config_from_env_with_override() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/chat_test");
        std::env::set_var("DB_MAX_CONNECTIONS", "4");
        std::env::remove_var("DB_CONNECT_TIMEOUT_SECS");

        let config = DbConfig::from_env("chat-service").unwrap();
        assert_eq!(config.service_name, "chat-service");
        assert_eq!(config.database_url, "postgres://localhost/chat_test");
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.connect_timeout_secs, 5);

        std::env::remove_var("DB_MAX_CONNECTIONS");
        std::env::remove_var("DATABASE_URL");
    }

    #[test]
    #[serial_test::serial]
    fn test_config_from_env_requires_url() {
        std::env::remove_var("DATABASE_URL");
        assert!(DbConfig::from_env("chat-service").is_err());
    }
}
