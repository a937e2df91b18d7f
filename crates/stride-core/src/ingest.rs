//! Turning a goal's plan into timelines and plan items, and reading them back.
//!
//! Compilation happens at most once per goal: it is skipped when the goal
//! already has timelines. Every compilation runs under the id allocation
//! lease inside the caller's transaction, so ids never collide and a
//! failure leaves no partial rows.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use tracing::info;

use stride_db::models::{Goal, PlanItem, PlanItemStatus, Timeline};
use stride_db::queries::{allocation, goals, plan_items, timelines, tracked_goals};

use crate::compile::{CompiledPlan, IdStart, OutlineCompiler};
use crate::error::{StrideError, StrideResult};
use crate::outline::{Outline, parse_outline};

/// Rows written by one compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompileSummary {
    pub timelines: u64,
    pub plan_items: u64,
}

/// Write every row of a compiled plan.
pub async fn insert_compiled(conn: &mut PgConnection, compiled: &CompiledPlan) -> Result<CompileSummary> {
    let new_timelines: Vec<_> = compiled.timelines().cloned().collect();
    let new_items: Vec<_> = compiled.plan_items().cloned().collect();

    let timelines = timelines::insert_timelines(&mut *conn, &new_timelines).await?;
    let plan_items = plan_items::insert_plan_items(&mut *conn, &new_items).await?;
    Ok(CompileSummary {
        timelines,
        plan_items,
    })
}

/// Compile `outline` for `goal_id` unless the goal already has timelines.
///
/// Must run inside a transaction; the allocation lease is held until it
/// commits or rolls back.
pub async fn compile_into(
    conn: &mut PgConnection,
    compiler: OutlineCompiler,
    goal_id: i64,
    outline: &Outline,
) -> Result<Option<CompileSummary>> {
    allocation::acquire_id_lease(&mut *conn).await?;

    if timelines::exists_for_goal(&mut *conn, goal_id).await? {
        info!(goal_id, "goal already compiled, skipping");
        return Ok(None);
    }

    let (timeline, plan_item) = allocation::current_max_ids(&mut *conn).await?;
    let compiled = compiler.compile(outline, IdStart { timeline, plan_item }, goal_id);
    let summary = insert_compiled(conn, &compiled).await?;

    info!(
        goal_id,
        timelines = summary.timelines,
        plan_items = summary.plan_items,
        shape = %compiler.shape(),
        "compiled plan"
    );
    Ok(Some(summary))
}

/// Fetch a goal and check that `user_id` owns it.
pub async fn owned_goal(pool: &PgPool, user_id: i64, goal_id: i64) -> StrideResult<Goal> {
    let goal = goals::get_goal(pool, goal_id)
        .await?
        .ok_or_else(|| StrideError::not_found(format!("goal {goal_id}")))?;
    if goal.user_id != user_id {
        return Err(StrideError::Forbidden);
    }
    Ok(goal)
}

/// Outcome of [`track_goal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackOutcome {
    pub goal_id: i64,
    /// `None` when the goal had already been compiled earlier.
    pub compiled: Option<CompileSummary>,
}

/// Make `goal_id` the user's tracked goal and compile its plan if needed.
///
/// A user tracks one goal at a time; tracking another replaces it.
pub async fn track_goal(
    pool: &PgPool,
    compiler: OutlineCompiler,
    user_id: i64,
    goal_id: i64,
) -> StrideResult<TrackOutcome> {
    let goal = owned_goal(pool, user_id, goal_id).await?;
    if !goal.has_plan() {
        return Err(StrideError::validation(
            "goal has no generated plan to track yet",
        ));
    }

    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    tracked_goals::upsert_tracked_goal(&mut *tx, user_id, goal_id).await?;
    let outline = parse_outline(&goal.plan);
    let compiled = compile_into(&mut tx, compiler, goal_id, &outline).await?;
    tx.commit().await.context("failed to commit transaction")?;

    info!(user_id, goal_id, "goal tracked");
    Ok(TrackOutcome { goal_id, compiled })
}

/// A goal together with its derived tracked flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoalDetail {
    #[serde(flatten)]
    pub goal: Goal,
    pub is_tracked: bool,
}

pub async fn goal_detail(pool: &PgPool, user_id: i64, goal_id: i64) -> StrideResult<GoalDetail> {
    let goal = owned_goal(pool, user_id, goal_id).await?;
    let is_tracked = tracked_goals::is_tracked(pool, goal_id).await?;
    Ok(GoalDetail { goal, is_tracked })
}

/// One step of a tracked goal: a top-level timeline and its work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedStep {
    pub goal_id: i64,
    pub goal_name: String,
    pub step: usize,
    pub timeline: Timeline,
    /// Child timelines, present only for the timeline level-2 shape.
    pub sub_timelines: Vec<Timeline>,
    pub plan_items: Vec<PlanItem>,
    pub is_last_step: bool,
}

/// The `step`-th (0-based) top-level timeline of a goal with its items.
pub async fn tracked_step(
    pool: &PgPool,
    user_id: i64,
    goal_id: i64,
    step: usize,
) -> StrideResult<TrackedStep> {
    let goal = owned_goal(pool, user_id, goal_id).await?;
    let mut steps = timelines::list_steps(pool, goal_id).await?;
    let step_count = steps.len();
    if step >= step_count {
        return Err(StrideError::not_found(format!("step {step} of goal {goal_id}")));
    }
    let timeline = steps.swap_remove(step);
    let is_last_step = step + 1 == step_count;

    let sub_timelines: Vec<Timeline> = timelines::list_for_goal(pool, goal_id)
        .await?
        .into_iter()
        .filter(|t| t.parent_timeline_id == Some(timeline.id))
        .collect();
    let mut ids = vec![timeline.id];
    ids.extend(sub_timelines.iter().map(|t| t.id));
    let plan_items = plan_items::list_for_timelines(pool, &ids).await?;

    Ok(TrackedStep {
        goal_id,
        goal_name: goal.name,
        step,
        timeline,
        sub_timelines,
        plan_items,
        is_last_step,
    })
}

/// Set a plan item's status. The item must belong to one of the user's goals.
pub async fn update_plan_item_status(
    pool: &PgPool,
    user_id: i64,
    item_id: i64,
    status: PlanItemStatus,
) -> StrideResult<PlanItem> {
    let item = plan_items::get_plan_item(pool, item_id)
        .await?
        .ok_or_else(|| StrideError::not_found(format!("plan item {item_id}")))?;
    owned_goal(pool, user_id, item.goal_id).await?;

    let updated = plan_items::update_status(pool, item_id, status)
        .await?
        .ok_or_else(|| StrideError::not_found(format!("plan item {item_id}")))?;
    info!(item_id, %status, "plan item status updated");
    Ok(updated)
}
