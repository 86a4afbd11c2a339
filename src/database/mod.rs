use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config;

/// Errors from the connection manager
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

static POOL: OnceCell<PgPool> = OnceCell::const_new();

/// Get the shared connection pool, creating it lazily from DATABASE_URL.
pub async fn pool() -> Result<PgPool, DatabaseError> {
    let pool = POOL
        .get_or_try_init(|| async {
            let url = std::env::var("DATABASE_URL")
                .map_err(|_| DatabaseError::ConfigMissing("DATABASE_URL"))?;
            let db_config = &config::config().database;

            let pool = PgPoolOptions::new()
                .max_connections(db_config.max_connections)
                .acquire_timeout(Duration::from_secs(db_config.connection_timeout))
                .connect(&url)
                .await?;

            info!("Created database pool ({} max connections)", db_config.max_connections);
            Ok::<_, DatabaseError>(pool)
        })
        .await?;
    Ok(pool.clone())
}

/// Pings the pool to ensure connectivity
pub async fn health_check() -> Result<(), DatabaseError> {
    let pool = pool().await?;
    sqlx::query("SELECT 1").execute(&pool).await?;
    Ok(())
}

/// Run pending migrations from the bundled migrations directory
pub async fn migrate() -> Result<(), DatabaseError> {
    let pool = pool().await?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| DatabaseError::Sqlx(sqlx::Error::Migrate(Box::new(e))))?;
    info!("Migrations applied");
    Ok(())
}
