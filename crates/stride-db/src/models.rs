use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Granularity of a timeline, inferred from its heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TimelineType {
    Day,
    Week,
    Month,
    Year,
    Topic,
}

impl fmt::Display for TimelineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
            Self::Topic => "topic",
        };
        f.write_str(s)
    }
}

impl FromStr for TimelineType {
    type Err = TimelineTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            "topic" => Ok(Self::Topic),
            other => Err(TimelineTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TimelineType`] string.
#[derive(Debug, Clone)]
pub struct TimelineTypeParseError(pub String);

impl fmt::Display for TimelineTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid timeline type: {:?}", self.0)
    }
}

impl std::error::Error for TimelineTypeParseError {}

// ---------------------------------------------------------------------------

/// Progress of a single plan item.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanItemStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl fmt::Display for PlanItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

impl FromStr for PlanItemStatus {
    type Err = PlanItemStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            other => Err(PlanItemStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PlanItemStatus`] string.
#[derive(Debug, Clone)]
pub struct PlanItemStatusParseError(pub String);

impl fmt::Display for PlanItemStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid plan item status: {:?}", self.0)
    }
}

impl std::error::Error for PlanItemStatusParseError {}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `users` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    /// Remaining plan generation requests.
    pub generation_quota: i32,
    pub created_at: DateTime<Utc>,
}

/// A row from the `goals` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Goal {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    /// Generated plan text. Empty until the first generation completes.
    pub plan: String,
    pub area_of_focus: String,
    /// Free-form horizon label such as "1 month".
    pub timeline: String,
    pub parent_goal_id: Option<i64>,
    /// 0 for root goals, parent depth + 1 otherwise.
    pub depth: i32,
    pub created_at: DateTime<Utc>,
}

impl Goal {
    pub fn has_plan(&self) -> bool {
        !self.plan.trim().is_empty()
    }
}

/// A row from the `timelines` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Timeline {
    pub id: i64,
    pub goal_id: i64,
    pub parent_timeline_id: Option<i64>,
    pub title: String,
    pub timeline_type: TimelineType,
}

/// A row from the `plan_items` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PlanItem {
    pub id: i64,
    pub timeline_id: i64,
    pub goal_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub status: PlanItemStatus,
}

/// A row from the `tracked_goals` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TrackedGoal {
    pub user_id: i64,
    pub goal_id: i64,
    pub tracked_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Insert payloads
// ---------------------------------------------------------------------------

/// A timeline row with its id already allocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTimeline {
    pub id: i64,
    pub goal_id: i64,
    pub parent_timeline_id: Option<i64>,
    pub title: String,
    pub timeline_type: TimelineType,
}

/// A plan item row with its id already allocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPlanItem {
    pub id: i64,
    pub timeline_id: i64,
    pub goal_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub status: PlanItemStatus,
}
