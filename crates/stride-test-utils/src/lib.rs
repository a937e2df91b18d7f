//! Shared PostgreSQL for stride integration tests.
//!
//! Each test gets its own freshly migrated database inside one server:
//! - `STRIDE_TEST_PG_URL` set: use that server as-is.
//! - otherwise: start a container via testcontainers, shared per test
//!   binary through a `OnceCell`.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use stride_db::pool;
use stride_db::queries::users;

struct SharedServer {
    root_url: String,
    /// Keeps the container alive. `None` for an external server.
    _container: Option<ContainerAsync<Postgres>>,
}

static SERVER: OnceCell<SharedServer> = OnceCell::const_new();

async fn start_server() -> SharedServer {
    if let Ok(root_url) = std::env::var("STRIDE_TEST_PG_URL") {
        return SharedServer {
            root_url,
            _container: None,
        };
    }

    let container = Postgres::default()
        .with_tag("16-alpine")
        .start()
        .await
        .expect("failed to start PostgreSQL container");
    let host = container.get_host().await.expect("container host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("container port");

    SharedServer {
        root_url: format!("postgresql://postgres:postgres@{host}:{port}"),
        _container: Some(container),
    }
}

/// Server root URL (no database name) of the shared PostgreSQL.
pub async fn pg_url() -> &'static str {
    &SERVER.get_or_init(start_server).await.root_url
}

async fn connect(url: &str, max_connections: u32) -> PgPool {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(url)
        .await
        .unwrap_or_else(|e| panic!("failed to connect to {url}: {e}"))
}

async fn maintenance_pool() -> PgPool {
    let root = pg_url().await;
    connect(&format!("{root}/postgres"), 1).await
}

/// Create a uniquely named, migrated database.
///
/// Pass the returned name to [`drop_test_db`] when the test is done.
pub async fn create_test_db() -> (PgPool, String) {
    let db_name = format!("stride_test_{}", Uuid::new_v4().simple());

    let maint = maintenance_pool().await;
    maint
        .execute(format!("CREATE DATABASE {db_name}").as_str())
        .await
        .unwrap_or_else(|e| panic!("failed to create database {db_name}: {e}"));
    maint.close().await;

    let root = pg_url().await;
    let pool = connect(&format!("{root}/{db_name}"), 5).await;
    pool::run_migrations(&pool)
        .await
        .expect("migrations should apply to a fresh database");

    (pool, db_name)
}

/// Terminate connections to `db_name` and drop it. Idempotent.
pub async fn drop_test_db(db_name: &str) {
    let maint = maintenance_pool().await;
    let _ = maint
        .execute(
            format!(
                "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
                 WHERE datname = '{db_name}' AND pid <> pg_backend_pid()"
            )
            .as_str(),
        )
        .await;
    let _ = maint
        .execute(format!("DROP DATABASE IF EXISTS {db_name}").as_str())
        .await;
    maint.close().await;
}

/// Insert a user with the given generation quota and return its id.
pub async fn seed_user(pool: &PgPool, quota: i32) -> i64 {
    let email = format!("{}@example.test", Uuid::new_v4().simple());
    users::insert_user(pool, &email, quota)
        .await
        .expect("failed to seed user")
        .id
}
