//! Database query functions for the `tracked_goals` table.
//!
//! A user tracks at most one goal; `user_id` is the primary key.

use anyhow::{Context, Result};
use sqlx::PgExecutor;

use crate::models::TrackedGoal;

/// Point the user's tracked goal at `goal_id`, replacing any previous one.
pub async fn upsert_tracked_goal(
    executor: impl PgExecutor<'_>,
    user_id: i64,
    goal_id: i64,
) -> Result<TrackedGoal> {
    let row = sqlx::query_as::<_, TrackedGoal>(
        "INSERT INTO tracked_goals (user_id, goal_id) VALUES ($1, $2) \
         ON CONFLICT (user_id) DO UPDATE SET goal_id = EXCLUDED.goal_id, tracked_at = now() \
         RETURNING *",
    )
    .bind(user_id)
    .bind(goal_id)
    .fetch_one(executor)
    .await
    .context("failed to track goal")?;

    Ok(row)
}

pub async fn get_for_user(
    executor: impl PgExecutor<'_>,
    user_id: i64,
) -> Result<Option<TrackedGoal>> {
    let row = sqlx::query_as::<_, TrackedGoal>("SELECT * FROM tracked_goals WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch tracked goal")?;

    Ok(row)
}

pub async fn is_tracked(executor: impl PgExecutor<'_>, goal_id: i64) -> Result<bool> {
    let tracked: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tracked_goals WHERE goal_id = $1)")
            .bind(goal_id)
            .fetch_one(executor)
            .await
            .context("failed to check tracked goal")?;

    Ok(tracked)
}

pub async fn delete_for_goals(executor: impl PgExecutor<'_>, goal_ids: &[i64]) -> Result<u64> {
    let result = sqlx::query("DELETE FROM tracked_goals WHERE goal_id = ANY($1)")
        .bind(goal_ids)
        .execute(executor)
        .await
        .context("failed to delete tracked goals")?;

    Ok(result.rows_affected())
}
