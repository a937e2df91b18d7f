//! Connection pools and the `stride db-init` bootstrap.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::info;

use crate::config::DbConfig;

/// Migrations embedded at compile time from `crates/stride-db/migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Tables created by the migrations, parents before children.
pub const APP_TABLES: [&str; 5] = ["users", "goals", "timelines", "plan_items", "tracked_goals"];

/// Pool for one API server process. Generation holds a connection only
/// while persisting, so streaming clients do not pin connections.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await
        .with_context(|| format!("failed to connect to database at {}", config.database_url))?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to run database migrations")?;

    info!(migrations = MIGRATOR.iter().count(), "stride schema up to date");
    Ok(())
}

/// A migrated pool, and whether the database had to be created first.
pub struct Bootstrap {
    pub pool: PgPool,
    pub created: bool,
}

/// Create the stride database if it is missing, connect, and migrate.
pub async fn bootstrap(config: &DbConfig) -> Result<Bootstrap> {
    let created = create_database_if_missing(config).await?;
    let pool = create_pool(config).await?;
    run_migrations(&pool).await?;
    Ok(Bootstrap { pool, created })
}

/// Database name from the URL, restricted to what can be spliced into
/// `CREATE DATABASE` unquoted.
fn checked_database_name(config: &DbConfig) -> Result<&str> {
    let Some(name) = config.database_name() else {
        bail!("database URL {} names no database", config.database_url);
    };
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("database name {name:?} may only contain ASCII letters, digits and '_'");
    }
    Ok(name)
}

async fn create_database_if_missing(config: &DbConfig) -> Result<bool> {
    let db_name = checked_database_name(config)?;
    let maintenance_url = config.maintenance_url();

    let maint_pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&maintenance_url)
        .await
        .with_context(|| format!("failed to connect to maintenance database at {maintenance_url}"))?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(db_name)
            .fetch_one(&maint_pool)
            .await
            .context("failed to query pg_database")?;

    if !exists {
        maint_pool
            .execute(format!("CREATE DATABASE {db_name}").as_str())
            .await
            .with_context(|| format!("failed to create database {db_name}"))?;
        info!(db = db_name, "database created");
    }

    maint_pool.close().await;
    Ok(!exists)
}

/// Row counts for [`APP_TABLES`], in the same order.
pub async fn table_counts(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let mut counts = Vec::with_capacity(APP_TABLES.len());
    for table in APP_TABLES {
        let query = format!("SELECT COUNT(*) FROM {table}");
        let count: i64 = sqlx::query_scalar(&query)
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to count rows in {table}"))?;
        counts.push((table.to_owned(), count));
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_tables_match_the_initial_migration() {
        let sql = include_str!("../migrations/0001_initial.sql");
        for table in APP_TABLES {
            assert!(sql.contains(&format!("CREATE TABLE {table} (")), "{table} missing");
        }
        assert_eq!(sql.matches("CREATE TABLE").count(), APP_TABLES.len());
    }

    #[test]
    fn database_name_must_be_a_plain_identifier() {
        let ok = DbConfig::new("postgresql://localhost:5432/stride_test_1?sslmode=disable");
        assert_eq!(checked_database_name(&ok).unwrap(), "stride_test_1");

        let quoted = DbConfig::new("postgresql://localhost/stride-dev");
        assert!(checked_database_name(&quoted).unwrap_err().to_string().contains("stride-dev"));

        let missing = DbConfig::new("postgresql://localhost:5432");
        assert!(checked_database_name(&missing).is_err());
    }
}
