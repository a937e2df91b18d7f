//! Database query functions for the `plan_items` table.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgExecutor, Postgres, QueryBuilder};

use crate::models::{NewPlanItem, PlanItem, PlanItemStatus};

const INSERT_CHUNK: usize = 1000;

/// Insert plan items whose ids were allocated by the caller.
pub async fn insert_plan_items(conn: &mut PgConnection, rows: &[NewPlanItem]) -> Result<u64> {
    let mut inserted = 0;
    for chunk in rows.chunks(INSERT_CHUNK) {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO plan_items (id, timeline_id, goal_id, name, description, status) ",
        );
        builder.push_values(chunk, |mut b, row| {
            b.push_bind(row.id)
                .push_bind(row.timeline_id)
                .push_bind(row.goal_id)
                .push_bind(&row.name)
                .push_bind(&row.description)
                .push_bind(row.status);
        });
        let result = builder
            .build()
            .execute(&mut *conn)
            .await
            .with_context(|| format!("failed to insert {} plan items", chunk.len()))?;
        inserted += result.rows_affected();
    }
    Ok(inserted)
}

pub async fn get_plan_item(executor: impl PgExecutor<'_>, id: i64) -> Result<Option<PlanItem>> {
    let item = sqlx::query_as::<_, PlanItem>("SELECT * FROM plan_items WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch plan item")?;

    Ok(item)
}

/// Plan items attached to any of `timeline_ids`, in id order.
pub async fn list_for_timelines(
    executor: impl PgExecutor<'_>,
    timeline_ids: &[i64],
) -> Result<Vec<PlanItem>> {
    let items = sqlx::query_as::<_, PlanItem>(
        "SELECT * FROM plan_items WHERE timeline_id = ANY($1) ORDER BY id",
    )
    .bind(timeline_ids)
    .fetch_all(executor)
    .await
    .context("failed to list plan items")?;

    Ok(items)
}

/// Set the status of a plan item. Returns the updated row, or `None` if no
/// such item exists.
pub async fn update_status(
    executor: impl PgExecutor<'_>,
    id: i64,
    status: PlanItemStatus,
) -> Result<Option<PlanItem>> {
    let item = sqlx::query_as::<_, PlanItem>(
        "UPDATE plan_items SET status = $1 WHERE id = $2 RETURNING *",
    )
    .bind(status)
    .bind(id)
    .fetch_optional(executor)
    .await
    .context("failed to update plan item status")?;

    Ok(item)
}

pub async fn delete_for_goals(executor: impl PgExecutor<'_>, goal_ids: &[i64]) -> Result<u64> {
    let result = sqlx::query("DELETE FROM plan_items WHERE goal_id = ANY($1)")
        .bind(goal_ids)
        .execute(executor)
        .await
        .context("failed to delete plan items")?;

    Ok(result.rows_affected())
}
