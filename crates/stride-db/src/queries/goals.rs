//! Database query functions for the `goals` table.

use anyhow::{Context, Result};
use sqlx::PgExecutor;

use crate::models::Goal;

/// Column values for a goal about to be inserted.
#[derive(Debug, Clone)]
pub struct NewGoal<'a> {
    pub user_id: i64,
    pub name: &'a str,
    pub area_of_focus: &'a str,
    pub timeline: &'a str,
    pub parent_goal_id: Option<i64>,
    pub depth: i32,
}

/// Insert a goal with an empty plan.
pub async fn insert_goal(executor: impl PgExecutor<'_>, goal: &NewGoal<'_>) -> Result<Goal> {
    let row = sqlx::query_as::<_, Goal>(
        "INSERT INTO goals (user_id, name, area_of_focus, timeline, parent_goal_id, depth) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(goal.user_id)
    .bind(goal.name)
    .bind(goal.area_of_focus)
    .bind(goal.timeline)
    .bind(goal.parent_goal_id)
    .bind(goal.depth)
    .fetch_one(executor)
    .await
    .with_context(|| format!("failed to insert goal {:?}", goal.name))?;

    Ok(row)
}

pub async fn get_goal(executor: impl PgExecutor<'_>, id: i64) -> Result<Option<Goal>> {
    let goal = sqlx::query_as::<_, Goal>("SELECT * FROM goals WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch goal")?;

    Ok(goal)
}

/// Root goals (depth 0) owned by a user, oldest first.
pub async fn list_root_goals(executor: impl PgExecutor<'_>, user_id: i64) -> Result<Vec<Goal>> {
    let goals = sqlx::query_as::<_, Goal>(
        "SELECT * FROM goals WHERE user_id = $1 AND parent_goal_id IS NULL ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(executor)
    .await
    .context("failed to list root goals")?;

    Ok(goals)
}

/// Direct children of every goal in `parent_ids`, ordered by id.
pub async fn list_children_of(
    executor: impl PgExecutor<'_>,
    parent_ids: &[i64],
) -> Result<Vec<Goal>> {
    let goals = sqlx::query_as::<_, Goal>(
        "SELECT * FROM goals WHERE parent_goal_id = ANY($1) ORDER BY id",
    )
    .bind(parent_ids)
    .fetch_all(executor)
    .await
    .context("failed to list sub-goals")?;

    Ok(goals)
}

/// Find a direct child of `parent_id` by exact name.
pub async fn find_child_by_name(
    executor: impl PgExecutor<'_>,
    parent_id: i64,
    name: &str,
) -> Result<Option<Goal>> {
    let goal = sqlx::query_as::<_, Goal>(
        "SELECT * FROM goals WHERE parent_goal_id = $1 AND name = $2 ORDER BY id LIMIT 1",
    )
    .bind(parent_id)
    .bind(name)
    .fetch_optional(executor)
    .await
    .context("failed to look up sub-goal by name")?;

    Ok(goal)
}

/// Insert a sub-goal unless its parent already has a child with that name.
///
/// Returns `None` when another request created the child first.
pub async fn insert_child_if_absent(
    executor: impl PgExecutor<'_>,
    goal: &NewGoal<'_>,
) -> Result<Option<Goal>> {
    let row = sqlx::query_as::<_, Goal>(
        "INSERT INTO goals (user_id, name, area_of_focus, timeline, parent_goal_id, depth) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (parent_goal_id, name) DO NOTHING \
         RETURNING *",
    )
    .bind(goal.user_id)
    .bind(goal.name)
    .bind(goal.area_of_focus)
    .bind(goal.timeline)
    .bind(goal.parent_goal_id)
    .bind(goal.depth)
    .fetch_optional(executor)
    .await
    .with_context(|| format!("failed to insert sub-goal {:?}", goal.name))?;

    Ok(row)
}

/// Store generated plan text on a goal.
pub async fn update_plan(executor: impl PgExecutor<'_>, id: i64, plan: &str) -> Result<()> {
    let result = sqlx::query("UPDATE goals SET plan = $1 WHERE id = $2")
        .bind(plan)
        .bind(id)
        .execute(executor)
        .await
        .context("failed to update goal plan")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("goal {id} not found");
    }

    Ok(())
}

/// `(id, parent_goal_id)` for `root_id` and every goal below it.
pub async fn subtree_edges(
    executor: impl PgExecutor<'_>,
    root_id: i64,
) -> Result<Vec<(i64, Option<i64>)>> {
    let rows: Vec<(i64, Option<i64>)> = sqlx::query_as(
        "WITH RECURSIVE subtree AS ( \
             SELECT id, parent_goal_id FROM goals WHERE id = $1 \
             UNION ALL \
             SELECT g.id, g.parent_goal_id FROM goals g \
             JOIN subtree s ON g.parent_goal_id = s.id \
         ) \
         SELECT id, parent_goal_id FROM subtree",
    )
    .bind(root_id)
    .fetch_all(executor)
    .await
    .context("failed to collect goal subtree")?;

    Ok(rows)
}

/// Delete one goal row. Children must already be gone.
pub async fn delete_goal(executor: impl PgExecutor<'_>, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM goals WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await
        .with_context(|| format!("failed to delete goal {id}"))?;

    Ok(())
}
