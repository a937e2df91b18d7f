//! Generative text sources.
//!
//! A [`PlanSource`] turns a [`PlanPrompt`] into a stream of text fragments.
//! Fragments arrive at arbitrary positions in the text; re-segmentation and
//! persistence happen downstream in [`crate::pipeline`].

mod openai;
mod scripted;

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;

pub use openai::{OpenAiConfig, OpenAiSource};
pub use scripted::ScriptedSource;

/// Fragments of generated text, in order. An `Err` ends the stream.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Context of the goal a sub-goal plan is generated for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentContext {
    pub name: String,
    pub plan: String,
}

/// What to generate a plan for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanPrompt {
    pub goal_name: String,
    pub area_of_focus: Option<String>,
    pub timeline: Option<String>,
    pub parent: Option<ParentContext>,
}

/// One chat message in the request sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

const FORMAT_RULES: &str = "Answer in plain Markdown. \
Start every top-level phase of the plan with a \"# \" heading and every topic \
inside a phase with a \"## \" heading. Put each step on its own line starting \
with \"- \". Leave a blank line after every list. Do not number headings and \
do not use bold or italic text.";

impl PlanPrompt {
    pub fn for_goal(
        goal_name: impl Into<String>,
        area_of_focus: Option<String>,
        timeline: Option<String>,
    ) -> Self {
        Self {
            goal_name: goal_name.into(),
            area_of_focus: area_of_focus.filter(|s| !s.trim().is_empty()),
            timeline: timeline.filter(|s| !s.trim().is_empty()),
            parent: None,
        }
    }

    pub fn for_sub_goal(goal_name: impl Into<String>, parent: ParentContext) -> Self {
        Self {
            goal_name: goal_name.into(),
            area_of_focus: None,
            timeline: None,
            parent: Some(parent),
        }
    }

    /// Chat messages for an OpenAI-compatible completion request.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(5);
        match &self.parent {
            Some(parent) => {
                messages.push(ChatMessage::system(format!(
                    "You are an expert coach helping someone reach the goal \"{}\".",
                    parent.name
                )));
                messages.push(ChatMessage::system(format!(
                    "This is their current plan for that goal:\n{}",
                    parent.plan
                )));
                messages.push(ChatMessage::user(format!(
                    "Explain how to accomplish this step of the plan: {}",
                    self.goal_name
                )));
                messages.push(ChatMessage::system(
                    "List the concrete steps and point to useful resources.",
                ));
            }
            None => {
                messages.push(ChatMessage::system(format!(
                    "You are an expert coach for \"{}\".",
                    self.goal_name
                )));
                let mut ask = format!("My goal is: {}.", self.goal_name);
                if let Some(focus) = &self.area_of_focus {
                    ask.push_str(&format!(" I want to focus on {focus}."));
                }
                messages.push(ChatMessage::user(ask));
                let horizon = self.timeline.as_deref().unwrap_or("1 year");
                messages.push(ChatMessage::system(format!(
                    "Write a detailed plan that reaches the goal within {horizon}. \
                     Scale the number of phases to that horizon."
                )));
            }
        }
        messages.push(ChatMessage::system(FORMAT_RULES));
        messages
    }
}

/// Adapter interface for generative text services.
///
/// Object-safe so the server can hold an `Arc<dyn PlanSource>`.
#[async_trait]
pub trait PlanSource: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Submit the prompt. Errors returned here happen before any text was
    /// produced; errors inside the stream happen mid-generation.
    async fn open(&self, prompt: &PlanPrompt) -> Result<FragmentStream>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn PlanSource) {}
};
