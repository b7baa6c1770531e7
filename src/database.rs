//! Database connection pool and utilities
//!
//! Provides the PostgreSQL connection pool with:
//! - Configurable pool sizes and timeouts
//! - Health checking
//! - Slow statement logging
//! - Migrations for the dynamic feed tables

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::ConnectOptions;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Database connection pool
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    #[instrument(skip(config))]
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = create_pool(config).await?;
        Ok(Self { pool })
    }

    /// Get reference to the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if database is healthy
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Database {
                message: format!("Health check failed: {}", e).into(),
                source: Some(e),
            })?;
        Ok(())
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
        }
    }

    /// Close all connections gracefully
    pub async fn close(&self) {
        info!("Closing database connection pool...");
        self.pool.close().await;
        info!("Database connection pool closed");
    }
}

/// Pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
}

/// Create a connection pool with the given configuration
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    info!("Creating database connection pool...");
    debug!(
        "Pool config: max={}, min={}, connect_timeout={:?}",
        config.max_connections, config.min_connections, config.connect_timeout
    );

    let connect_options = PgConnectOptions::from_str(&config.url)
        .map_err(|e| Error::Config {
            message: format!("Invalid database URL: {}", e).into(),
            source: None,
        })?
        .statement_cache_capacity(config.statement_cache_size)
        .log_statements(log::LevelFilter::Debug)
        .log_slow_statements(log::LevelFilter::Warn, Duration::from_secs(1));

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(Some(config.idle_timeout))
        .max_lifetime(Some(config.max_lifetime))
        .connect_with(connect_options)
        .await
        .map_err(|e| Error::Database {
            message: format!("Failed to create connection pool: {}", e).into(),
            source: Some(e),
        })?;

    // Verify we can connect
    sqlx::query("SELECT 1").fetch_one(&pool).await.map_err(|e| Error::Database {
        message: format!("Failed to verify database connection: {}", e).into(),
        source: Some(e),
    })?;

    info!(
        "Database connection pool created (size: {}, idle: {})",
        pool.size(),
        pool.num_idle()
    );

    Ok(pool)
}

/// Run database migrations
#[instrument(skip(pool))]
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| Error::Migration(e.to_string()))?;

    info!("Database migrations completed successfully");
    Ok(())
}
