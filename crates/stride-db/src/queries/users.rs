//! Database query functions for the `users` table.

use anyhow::{Context, Result};
use sqlx::PgExecutor;

use crate::models::User;

/// Insert a user with an initial generation quota.
pub async fn insert_user(executor: impl PgExecutor<'_>, email: &str, quota: i32) -> Result<User> {
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (email, generation_quota) VALUES ($1, $2) RETURNING *",
    )
    .bind(email)
    .bind(quota)
    .fetch_one(executor)
    .await
    .with_context(|| format!("failed to insert user {email:?}"))?;

    Ok(user)
}

pub async fn get_user(executor: impl PgExecutor<'_>, id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch user")?;

    Ok(user)
}

/// Consume one generation request.
///
/// Returns `false` without touching the row when the quota is already zero.
pub async fn decrement_quota(executor: impl PgExecutor<'_>, id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE users SET generation_quota = generation_quota - 1 \
         WHERE id = $1 AND generation_quota > 0",
    )
    .bind(id)
    .execute(executor)
    .await
    .context("failed to decrement generation quota")?;

    Ok(result.rows_affected() == 1)
}

/// Overwrite the remaining quota, e.g. from a periodic reset job.
pub async fn set_quota(executor: impl PgExecutor<'_>, id: i64, quota: i32) -> Result<()> {
    let result = sqlx::query("UPDATE users SET generation_quota = $1 WHERE id = $2")
        .bind(quota)
        .bind(id)
        .execute(executor)
        .await
        .context("failed to set generation quota")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("user {id} not found");
    }

    Ok(())
}
