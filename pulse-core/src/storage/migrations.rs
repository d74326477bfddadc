//! Database migrations.

use sqlx::PgPool;
use tracing::info;

use crate::error::{PulseError, Result};

const SCHEMA_VERSION: i64 = 1;

pub async fn run(pool: &PgPool) -> Result<()> {
    // Create schema_version table if not exists
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version BIGINT PRIMARY KEY
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| PulseError::MigrationFailed { reason: e.to_string() })?;

    // Get current schema version
    let current_version: Option<i64> =
        sqlx::query_scalar("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(pool)
            .await
            .map_err(|e| PulseError::MigrationFailed { reason: e.to_string() })?;

    let current_version = current_version.unwrap_or(0);

    if current_version >= SCHEMA_VERSION {
        info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    info!("Migrating database from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        migrate_to_v1(pool).await?;
    }

    Ok(())
}

async fn migrate_to_v1(pool: &PgPool) -> Result<()> {
    info!("Running migration to schema version 1");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metric_counters (
            name TEXT PRIMARY KEY,
            value BIGINT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| PulseError::MigrationFailed { reason: e.to_string() })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metric_gauges (
            name TEXT PRIMARY KEY,
            value DOUBLE PRECISION NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| PulseError::MigrationFailed { reason: e.to_string() })?;

    // Update schema version
    sqlx::query("DELETE FROM schema_version")
        .execute(pool)
        .await
        .map_err(|e| PulseError::MigrationFailed { reason: e.to_string() })?;

    sqlx::query("INSERT INTO schema_version (version) VALUES ($1)")
        .bind(1i64)
        .execute(pool)
        .await
        .map_err(|e| PulseError::MigrationFailed { reason: e.to_string() })?;

    info!("Migration to schema version 1 complete");
    Ok(())
}
