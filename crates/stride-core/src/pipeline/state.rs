//! Per-request state machine of the plan generation pipeline.

use std::fmt;

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::debug;

/// Phase of one plan generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Streaming,
    Parsing,
    Compiling,
    Persisting,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Streaming => "streaming",
            Self::Parsing => "parsing",
            Self::Compiling => "compiling",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Transition graph:
///
/// ```text
/// streaming  -> parsing
/// parsing    -> compiling   (tracked goal without timelines)
/// parsing    -> persisting
/// compiling  -> persisting
/// persisting -> done
/// any non-terminal -> failed
/// ```
pub fn is_valid_transition(from: PipelineState, to: PipelineState) -> bool {
    use PipelineState::*;

    if to == Failed {
        return !from.is_terminal();
    }
    matches!(
        (from, to),
        (Streaming, Parsing)
            | (Parsing, Compiling)
            | (Parsing, Persisting)
            | (Compiling, Persisting)
            | (Persisting, Done)
    )
}

/// Current phase of a running request.
#[derive(Debug)]
pub struct PipelineRun {
    goal_id: i64,
    state: PipelineState,
}

impl PipelineRun {
    pub fn new(goal_id: i64) -> Self {
        Self {
            goal_id,
            state: PipelineState::Streaming,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn advance(&mut self, to: PipelineState) -> Result<()> {
        if !is_valid_transition(self.state, to) {
            bail!(
                "invalid pipeline transition {} -> {} for goal {}",
                self.state,
                to,
                self.goal_id
            );
        }
        debug!(goal_id = self.goal_id, from = %self.state, to = %to, "pipeline transition");
        self.state = to;
        Ok(())
    }

    /// Move to `failed` unless already terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = PipelineState::Failed;
        }
    }
}
