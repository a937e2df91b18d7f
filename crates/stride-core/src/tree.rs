//! Goal / sub-goal tree.
//!
//! Goals reference their parent and carry a depth counter (0 for roots).
//! Nesting stops at [`MAX_GOAL_DEPTH`]; deletion removes a whole subtree
//! with everything derived from it.

use std::collections::HashMap;

use anyhow::Context;
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;

use stride_db::models::Goal;
use stride_db::queries::goals::{self, NewGoal};
use stride_db::queries::{plan_items, timelines, tracked_goals};

use crate::error::{MAX_GOAL_DEPTH, StrideError, StrideResult};
use crate::ingest::owned_goal;

/// Timeline label used when a root goal is created without one.
pub const DEFAULT_TIMELINE: &str = "1 year";

/// Depth of a new child of a goal at `parent_depth`.
pub fn child_depth(parent_depth: i32) -> StrideResult<i32> {
    if parent_depth >= MAX_GOAL_DEPTH {
        return Err(StrideError::DepthExceeded { parent_depth });
    }
    Ok(parent_depth + 1)
}

/// Order in which to delete the subtree rooted at `root`: every goal after
/// all of its descendants, `root` last.
///
/// `edges` holds `(id, parent_id)` pairs; ids outside the subtree are
/// ignored.
pub fn deletion_order(root: i64, edges: &[(i64, Option<i64>)]) -> Vec<i64> {
    let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
    for &(id, parent) in edges {
        if let Some(parent) = parent {
            children.entry(parent).or_default().push(id);
        }
    }
    for kids in children.values_mut() {
        kids.sort_unstable();
    }

    // Iterative post-order; a goal is emitted once all children are.
    let mut order = Vec::new();
    let mut stack = vec![(root, false)];
    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            order.push(id);
            continue;
        }
        stack.push((id, true));
        if let Some(kids) = children.get(&id) {
            for &kid in kids.iter().rev() {
                stack.push((kid, false));
            }
        }
    }
    order
}

/// Input for a new root goal.
#[derive(Debug, Clone, Default)]
pub struct RootGoalInput {
    pub name: String,
    pub area_of_focus: Option<String>,
    pub timeline: Option<String>,
}

pub async fn create_root_goal(
    pool: &PgPool,
    user_id: i64,
    input: &RootGoalInput,
) -> StrideResult<Goal> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(StrideError::validation("goal name is required"));
    }
    let timeline = input
        .timeline
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TIMELINE);

    let goal = goals::insert_goal(
        pool,
        &NewGoal {
            user_id,
            name,
            area_of_focus: input.area_of_focus.as_deref().unwrap_or("").trim(),
            timeline,
            parent_goal_id: None,
            depth: 0,
        },
    )
    .await?;

    info!(user_id, goal_id = goal.id, "goal created");
    Ok(goal)
}

fn new_child<'a>(parent: &'a Goal, name: &'a str) -> StrideResult<NewGoal<'a>> {
    let depth = child_depth(parent.depth)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(StrideError::validation("sub-goal name is required"));
    }
    Ok(NewGoal {
        user_id: parent.user_id,
        name,
        area_of_focus: "",
        timeline: &parent.timeline,
        parent_goal_id: Some(parent.id),
        depth,
    })
}

/// Create a child goal. Rejected when the parent is already at max depth.
pub async fn create_sub_goal(pool: &PgPool, parent: &Goal, name: &str) -> StrideResult<Goal> {
    let new_goal = new_child(parent, name)?;
    let goal = goals::insert_goal(pool, &new_goal).await?;

    info!(parent_id = parent.id, goal_id = goal.id, depth = goal.depth, "sub-goal created");
    Ok(goal)
}

/// Result of [`find_or_create_sub_goal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubGoalLookup {
    /// The child exists and already has a plan; nothing to generate.
    Planned(Goal),
    /// The child exists or was just created and still needs a plan.
    NeedsPlan(Goal),
}

impl SubGoalLookup {
    pub fn goal(&self) -> &Goal {
        match self {
            Self::Planned(goal) | Self::NeedsPlan(goal) => goal,
        }
    }
}

/// Look up a child of `parent` by exact name, creating it when absent.
///
/// Concurrent calls for the same name resolve to the same row: the insert
/// yields to a child created in the meantime and that child is returned.
pub async fn find_or_create_sub_goal(
    pool: &PgPool,
    parent: &Goal,
    name: &str,
) -> StrideResult<SubGoalLookup> {
    let lookup = |existing: Goal| {
        if existing.has_plan() {
            SubGoalLookup::Planned(existing)
        } else {
            SubGoalLookup::NeedsPlan(existing)
        }
    };

    if let Some(existing) = goals::find_child_by_name(pool, parent.id, name.trim()).await? {
        return Ok(lookup(existing));
    }

    let new_goal = new_child(parent, name)?;
    if let Some(created) = goals::insert_child_if_absent(pool, &new_goal).await? {
        info!(parent_id = parent.id, goal_id = created.id, depth = created.depth, "sub-goal created");
        return Ok(SubGoalLookup::NeedsPlan(created));
    }

    let existing = goals::find_child_by_name(pool, parent.id, new_goal.name)
        .await?
        .ok_or_else(|| StrideError::not_found(format!("sub-goal {:?}", new_goal.name)))?;
    Ok(lookup(existing))
}

/// Counts of rows removed by [`delete_goal_recursive`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeletionSummary {
    pub goals: usize,
    pub timelines: u64,
    pub plan_items: u64,
    pub tracked_goals: u64,
}

/// Delete a goal, its whole subtree, and every row derived from them.
pub async fn delete_goal_recursive(
    pool: &PgPool,
    user_id: i64,
    goal_id: i64,
) -> StrideResult<DeletionSummary> {
    owned_goal(pool, user_id, goal_id).await?;

    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    let edges = goals::subtree_edges(&mut *tx, goal_id).await?;
    let order = deletion_order(goal_id, &edges);

    let plan_items = plan_items::delete_for_goals(&mut *tx, &order).await?;
    let timelines = timelines::delete_for_goals(&mut *tx, &order).await?;
    let tracked_goals = tracked_goals::delete_for_goals(&mut *tx, &order).await?;
    for id in &order {
        goals::delete_goal(&mut *tx, *id).await?;
    }
    tx.commit().await.context("failed to commit transaction")?;

    let summary = DeletionSummary {
        goals: order.len(),
        timelines,
        plan_items,
        tracked_goals,
    };
    info!(user_id, goal_id, ?summary, "goal subtree deleted");
    Ok(summary)
}

/// A root goal with its direct sub-goals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoalWithSubGoals {
    #[serde(flatten)]
    pub goal: Goal,
    pub sub_goals: Vec<Goal>,
}

pub async fn list_goals_with_sub_goals(
    pool: &PgPool,
    user_id: i64,
) -> StrideResult<Vec<GoalWithSubGoals>> {
    let roots = goals::list_root_goals(pool, user_id).await?;
    let ids: Vec<i64> = roots.iter().map(|g| g.id).collect();
    let mut children: HashMap<i64, Vec<Goal>> = HashMap::new();
    for child in goals::list_children_of(pool, &ids).await? {
        if let Some(parent) = child.parent_goal_id {
            children.entry(parent).or_default().push(child);
        }
    }

    Ok(roots
        .into_iter()
        .map(|goal| {
            let sub_goals = children.remove(&goal.id).unwrap_or_default();
            GoalWithSubGoals { goal, sub_goals }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_cap_allows_three_levels_below_root() {
        assert_eq!(child_depth(0).unwrap(), 1);
        assert_eq!(child_depth(2).unwrap(), 3);
        assert!(matches!(
            child_depth(3),
            Err(StrideError::DepthExceeded { parent_depth: 3 })
        ));
    }

    #[test]
    fn deletion_order_is_post_order() {
        //      1
        //    /   \
        //   2     3
        //  / \
        // 4   5
        let edges = [
            (1, None),
            (2, Some(1)),
            (3, Some(1)),
            (4, Some(2)),
            (5, Some(2)),
        ];
        assert_eq!(deletion_order(1, &edges), vec![4, 5, 2, 3, 1]);
    }

    #[test]
    fn deletion_order_children_precede_parents() {
        let edges = [(10, Some(1)), (11, Some(10)), (12, Some(11)), (13, Some(10)), (1, None)];
        let order = deletion_order(1, &edges);
        let position: HashMap<i64, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        assert_eq!(order.len(), 5);
        for (id, parent) in edges {
            if let Some(parent) = parent {
                assert!(position[&id] < position[&parent], "{id} before {parent}");
            }
        }
        assert_eq!(order.last(), Some(&1));
    }

    #[test]
    fn deletion_order_ignores_other_trees() {
        let edges = [(1, None), (2, Some(1)), (7, None), (8, Some(7))];
        assert_eq!(deletion_order(2, &edges), vec![2]);
    }
}
