//! Error taxonomy for goal and plan operations.

use thiserror::Error;

/// Maximum depth of a goal; roots are depth 0.
pub const MAX_GOAL_DEPTH: i32 = 3;

/// Failures surfaced to API callers.
///
/// Validation, quota, ownership and existence checks all happen before a
/// generative request is made. Failures after the client stream has closed
/// are logged instead of being returned.
#[derive(Debug, Error)]
pub enum StrideError {
    #[error("{0}")]
    Validation(String),

    #[error("no plan generation requests left")]
    QuotaExhausted,

    #[error("{0} not found")]
    NotFound(String),

    #[error("goal belongs to another user")]
    Forbidden,

    #[error("sub-goals cannot be nested below depth {max} (parent is at depth {parent_depth})", max = MAX_GOAL_DEPTH)]
    DepthExceeded { parent_depth: i32 },

    #[error("plan generation failed: {0:#}")]
    Upstream(anyhow::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StrideError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

pub type StrideResult<T> = Result<T, StrideError>;
