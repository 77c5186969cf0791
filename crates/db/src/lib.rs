//! PostgreSQL persistence for the reservation engine.
//!
//! `repositories` holds the SQL, one zero-sized repo per table family taking a
//! pool or an open transaction. [`backend::PgBackend`] adapts those repos to
//! the `giftreg-core` store and directory traits.

use sqlx::postgres::PgPoolOptions;

pub mod backend;
pub mod models;
pub mod repositories;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Cheap round trip used by the `/health` endpoint.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
