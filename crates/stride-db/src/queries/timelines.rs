//! Database query functions for the `timelines` table.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgExecutor, Postgres, QueryBuilder};

use crate::models::{NewTimeline, Timeline};

/// Rows per INSERT statement, well under the bind parameter limit.
const INSERT_CHUNK: usize = 1000;

/// Insert timelines whose ids were allocated by the caller.
///
/// Parents may be inserted in the same call as their children.
pub async fn insert_timelines(conn: &mut PgConnection, rows: &[NewTimeline]) -> Result<u64> {
    let mut inserted = 0;
    for chunk in rows.chunks(INSERT_CHUNK) {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO timelines (id, goal_id, parent_timeline_id, title, timeline_type) ",
        );
        builder.push_values(chunk, |mut b, row| {
            b.push_bind(row.id)
                .push_bind(row.goal_id)
                .push_bind(row.parent_timeline_id)
                .push_bind(&row.title)
                .push_bind(row.timeline_type);
        });
        let result = builder
            .build()
            .execute(&mut *conn)
            .await
            .with_context(|| format!("failed to insert {} timelines", chunk.len()))?;
        inserted += result.rows_affected();
    }
    Ok(inserted)
}

/// All timelines of a goal in id (creation) order.
pub async fn list_for_goal(executor: impl PgExecutor<'_>, goal_id: i64) -> Result<Vec<Timeline>> {
    let rows = sqlx::query_as::<_, Timeline>(
        "SELECT * FROM timelines WHERE goal_id = $1 ORDER BY id",
    )
    .bind(goal_id)
    .fetch_all(executor)
    .await
    .context("failed to list timelines")?;

    Ok(rows)
}

/// Top-level timelines of a goal, i.e. the tracked steps, in id order.
pub async fn list_steps(executor: impl PgExecutor<'_>, goal_id: i64) -> Result<Vec<Timeline>> {
    let rows = sqlx::query_as::<_, Timeline>(
        "SELECT * FROM timelines \
         WHERE goal_id = $1 AND parent_timeline_id IS NULL \
         ORDER BY id",
    )
    .bind(goal_id)
    .fetch_all(executor)
    .await
    .context("failed to list timeline steps")?;

    Ok(rows)
}

pub async fn exists_for_goal(executor: impl PgExecutor<'_>, goal_id: i64) -> Result<bool> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM timelines WHERE goal_id = $1)")
            .bind(goal_id)
            .fetch_one(executor)
            .await
            .context("failed to check for existing timelines")?;

    Ok(exists)
}

/// Delete every timeline belonging to any of `goal_ids`.
///
/// Plan items referencing them must be deleted first.
pub async fn delete_for_goals(executor: impl PgExecutor<'_>, goal_ids: &[i64]) -> Result<u64> {
    let result = sqlx::query("DELETE FROM timelines WHERE goal_id = ANY($1)")
        .bind(goal_ids)
        .execute(executor)
        .await
        .context("failed to delete timelines")?;

    Ok(result.rows_affected())
}
