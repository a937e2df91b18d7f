//! Persistence of generated plans.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use tracing::warn;

use stride_db::queries::{goals, timelines, tracked_goals, users};

use crate::compile::OutlineCompiler;
use crate::ingest::{CompileSummary, compile_into};
use crate::outline::Outline;

/// A finished generation, ready to be stored.
#[derive(Debug, Clone)]
pub struct GeneratedPlan {
    pub user_id: i64,
    pub goal_id: i64,
    /// Raw text exactly as produced by the source.
    pub text: String,
}

/// What a persist call wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistReport {
    pub quota_charged: bool,
    pub compiled: Option<CompileSummary>,
}

/// Storage seam of the generation pipeline.
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Whether a finished plan for this goal should also be compiled:
    /// the goal is tracked and has no timelines yet.
    async fn needs_compilation(&self, goal_id: i64) -> Result<bool>;

    /// Store the plan text and charge the user's quota. With `outline`,
    /// also compile it into timelines and plan items. All-or-nothing.
    async fn persist(&self, plan: &GeneratedPlan, outline: Option<&Outline>) -> Result<PersistReport>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn PlanStore) {}
};

/// PostgreSQL-backed [`PlanStore`].
#[derive(Debug, Clone)]
pub struct PgPlanStore {
    pool: PgPool,
    compiler: OutlineCompiler,
}

impl PgPlanStore {
    pub fn new(pool: PgPool, compiler: OutlineCompiler) -> Self {
        Self { pool, compiler }
    }
}

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn needs_compilation(&self, goal_id: i64) -> Result<bool> {
        if !tracked_goals::is_tracked(&self.pool, goal_id).await? {
            return Ok(false);
        }
        Ok(!timelines::exists_for_goal(&self.pool, goal_id).await?)
    }

    async fn persist(&self, plan: &GeneratedPlan, outline: Option<&Outline>) -> Result<PersistReport> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        goals::update_plan(&mut *tx, plan.goal_id, &plan.text).await?;
        let quota_charged = users::decrement_quota(&mut *tx, plan.user_id).await?;
        if !quota_charged {
            // Checked before generation; another request used the last one.
            warn!(user_id = plan.user_id, goal_id = plan.goal_id, "quota already exhausted at persist time");
        }

        let compiled = match outline {
            Some(outline) => compile_into(&mut tx, self.compiler, plan.goal_id, outline).await?,
            None => None,
        };

        tx.commit().await.context("failed to commit transaction")?;
        Ok(PersistReport {
            quota_charged,
            compiled,
        })
    }
}
