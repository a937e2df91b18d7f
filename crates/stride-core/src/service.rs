//! Goal operations as exposed to API callers.
//!
//! Every operation is scoped to the calling user. Validation, ownership and
//! quota are checked before a generation is started.

use serde::Serialize;
use sqlx::PgPool;
use tracing::info;

use stride_db::models::{Goal, PlanItem, PlanItemStatus};
use stride_db::queries::{goals, tracked_goals, users};

use crate::compile::OutlineCompiler;
use crate::error::{StrideError, StrideResult};
use crate::generation::{ParentContext, PlanPrompt};
use crate::ingest::{self, GoalDetail, TrackOutcome, TrackedStep, owned_goal};
use crate::pipeline::{PlanPipeline, PlanRequest, PlanRun};
use crate::tree::{
    self, DeletionSummary, GoalWithSubGoals, RootGoalInput, SubGoalLookup, child_depth,
};

/// Remaining quota and tracked goal of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub user_id: i64,
    pub email: String,
    pub generation_quota: i32,
    pub tracked_goal_id: Option<i64>,
}

/// Answer to a sub-goal request.
pub enum SubGoalResponse {
    /// A child with this name already has a plan.
    Existing(Goal),
    /// A plan is being generated for this child.
    Generating { goal: Goal, run: PlanRun },
}

#[derive(Clone)]
pub struct GoalService {
    pool: PgPool,
    pipeline: PlanPipeline,
    compiler: OutlineCompiler,
}

impl GoalService {
    pub fn new(pool: PgPool, pipeline: PlanPipeline, compiler: OutlineCompiler) -> Self {
        Self {
            pool,
            pipeline,
            compiler,
        }
    }

    pub fn pipeline(&self) -> &PlanPipeline {
        &self.pipeline
    }

    pub async fn profile(&self, user_id: i64) -> StrideResult<Profile> {
        let user = users::get_user(&self.pool, user_id)
            .await?
            .ok_or_else(|| StrideError::not_found(format!("user {user_id}")))?;
        let tracked = tracked_goals::get_for_user(&self.pool, user_id).await?;
        Ok(Profile {
            user_id: user.id,
            email: user.email,
            generation_quota: user.generation_quota,
            tracked_goal_id: tracked.map(|t| t.goal_id),
        })
    }

    async fn ensure_quota(&self, user_id: i64) -> StrideResult<()> {
        let user = users::get_user(&self.pool, user_id)
            .await?
            .ok_or_else(|| StrideError::not_found(format!("user {user_id}")))?;
        if user.generation_quota <= 0 {
            return Err(StrideError::QuotaExhausted);
        }
        Ok(())
    }

    pub async fn create_goal(&self, user_id: i64, input: &RootGoalInput) -> StrideResult<Goal> {
        tree::create_root_goal(&self.pool, user_id, input).await
    }

    pub async fn list_goals(&self, user_id: i64) -> StrideResult<Vec<GoalWithSubGoals>> {
        tree::list_goals_with_sub_goals(&self.pool, user_id).await
    }

    pub async fn goal_detail(&self, user_id: i64, goal_id: i64) -> StrideResult<GoalDetail> {
        ingest::goal_detail(&self.pool, user_id, goal_id).await
    }

    pub async fn delete_goal(&self, user_id: i64, goal_id: i64) -> StrideResult<DeletionSummary> {
        tree::delete_goal_recursive(&self.pool, user_id, goal_id).await
    }

    /// Generate the plan of an existing goal that has none yet.
    ///
    /// A plan is written once; tracked timelines are compiled from it.
    pub async fn generate_plan(&self, user_id: i64, goal_id: i64) -> StrideResult<PlanRun> {
        let goal = owned_goal(&self.pool, user_id, goal_id).await?;
        if goal.has_plan() {
            return Err(StrideError::validation(format!(
                "goal {goal_id} already has a plan"
            )));
        }
        self.ensure_quota(user_id).await?;

        let prompt = match goal.parent_goal_id {
            Some(parent_id) => {
                let parent = goals::get_goal(&self.pool, parent_id)
                    .await?
                    .ok_or_else(|| StrideError::not_found(format!("goal {parent_id}")))?;
                sub_goal_prompt(&goal.name, &parent)
            }
            None => PlanPrompt::for_goal(
                goal.name.clone(),
                Some(goal.area_of_focus.clone()),
                Some(goal.timeline.clone()),
            ),
        };

        self.pipeline
            .start(PlanRequest {
                user_id,
                goal_id,
                prompt,
            })
            .await
    }

    /// Return the named child of `parent_id` if it already has a plan,
    /// otherwise create or reuse it and start generating its plan.
    pub async fn request_sub_goal(
        &self,
        user_id: i64,
        parent_id: i64,
        name: &str,
    ) -> StrideResult<SubGoalResponse> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StrideError::validation("sub-goal name is required"));
        }
        let parent = owned_goal(&self.pool, user_id, parent_id).await?;

        if let Some(existing) = goals::find_child_by_name(&self.pool, parent.id, name).await? {
            if existing.has_plan() {
                return Ok(SubGoalResponse::Existing(existing));
            }
        }
        child_depth(parent.depth)?;
        self.ensure_quota(user_id).await?;

        let goal = match tree::find_or_create_sub_goal(&self.pool, &parent, name).await? {
            SubGoalLookup::Planned(goal) => return Ok(SubGoalResponse::Existing(goal)),
            SubGoalLookup::NeedsPlan(goal) => goal,
        };

        info!(user_id, parent_id, goal_id = goal.id, "generating sub-goal plan");
        let run = self
            .pipeline
            .start(PlanRequest {
                user_id,
                goal_id: goal.id,
                prompt: sub_goal_prompt(&goal.name, &parent),
            })
            .await?;
        Ok(SubGoalResponse::Generating { goal, run })
    }

    pub async fn track_goal(&self, user_id: i64, goal_id: i64) -> StrideResult<TrackOutcome> {
        ingest::track_goal(&self.pool, self.compiler, user_id, goal_id).await
    }

    pub async fn tracked_step(
        &self,
        user_id: i64,
        goal_id: i64,
        step: usize,
    ) -> StrideResult<TrackedStep> {
        ingest::tracked_step(&self.pool, user_id, goal_id, step).await
    }

    pub async fn update_plan_item(
        &self,
        user_id: i64,
        item_id: i64,
        status: PlanItemStatus,
    ) -> StrideResult<PlanItem> {
        ingest::update_plan_item_status(&self.pool, user_id, item_id, status).await
    }
}

fn sub_goal_prompt(name: &str, parent: &Goal) -> PlanPrompt {
    PlanPrompt::for_sub_goal(
        name,
        ParentContext {
            name: parent.name.clone(),
            plan: parent.plan.clone(),
        },
    )
}
