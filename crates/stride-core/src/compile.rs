//! Outline-to-relational compilation.
//!
//! Turns an [`Outline`] into the ordered timeline and plan item inserts for
//! one goal. Ids are allocated sequentially from caller-supplied starting
//! points; the caller is responsible for holding the id allocation lease
//! (see [`stride_db::queries::allocation`]) while the result is written.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use stride_db::models::{NewPlanItem, NewTimeline, PlanItemStatus, TimelineType};

use crate::outline::{Outline, OutlineSection};

/// How level-2 headings are materialized. Fixed per deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level2Shape {
    /// One plan item per subheading, its lines joined into the description.
    #[default]
    PlanItem,
    /// One child timeline per subheading, one plan item per line.
    Timeline,
}

impl fmt::Display for Level2Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlanItem => f.write_str("plan_item"),
            Self::Timeline => f.write_str("timeline"),
        }
    }
}

impl FromStr for Level2Shape {
    type Err = Level2ShapeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan_item" => Ok(Self::PlanItem),
            "timeline" => Ok(Self::Timeline),
            other => Err(Level2ShapeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Level2Shape`] string.
#[derive(Debug, Clone)]
pub struct Level2ShapeParseError(pub String);

impl fmt::Display for Level2ShapeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid level-2 shape: {:?} (expected plan_item or timeline)",
            self.0
        )
    }
}

impl std::error::Error for Level2ShapeParseError {}

/// Infer the granularity of a timeline from its heading.
///
/// Case-insensitive substring match, checked in the order day, week,
/// month, year; anything else is a topic.
pub fn classify_timeline(title: &str) -> TimelineType {
    let lower = title.to_lowercase();
    [
        ("day", TimelineType::Day),
        ("week", TimelineType::Week),
        ("month", TimelineType::Month),
        ("year", TimelineType::Year),
    ]
    .into_iter()
    .find_map(|(needle, kind)| lower.contains(needle).then_some(kind))
    .unwrap_or(TimelineType::Topic)
}

/// One row to insert, with every value bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum InsertOp {
    Timeline(NewTimeline),
    PlanItem(NewPlanItem),
}

/// Highest ids already in use; allocation starts one above each.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdStart {
    pub timeline: i64,
    pub plan_item: i64,
}

/// Ordered insert operations for one goal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompiledPlan {
    pub ops: Vec<InsertOp>,
}

impl CompiledPlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn timelines(&self) -> impl Iterator<Item = &NewTimeline> {
        self.ops.iter().filter_map(|op| match op {
            InsertOp::Timeline(t) => Some(t),
            InsertOp::PlanItem(_) => None,
        })
    }

    pub fn plan_items(&self) -> impl Iterator<Item = &NewPlanItem> {
        self.ops.iter().filter_map(|op| match op {
            InsertOp::PlanItem(p) => Some(p),
            InsertOp::Timeline(_) => None,
        })
    }
}

struct Allocator {
    last_timeline: i64,
    last_plan_item: i64,
}

impl Allocator {
    fn timeline(&mut self) -> i64 {
        self.last_timeline += 1;
        self.last_timeline
    }

    fn plan_item(&mut self) -> i64 {
        self.last_plan_item += 1;
        self.last_plan_item
    }
}

/// Deterministic outline compiler.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutlineCompiler {
    shape: Level2Shape,
}

impl OutlineCompiler {
    pub fn new(shape: Level2Shape) -> Self {
        Self { shape }
    }

    pub fn shape(&self) -> Level2Shape {
        self.shape
    }

    /// Emit inserts in outline order; every timeline precedes the plan items
    /// and child timelines that reference it.
    pub fn compile(&self, outline: &Outline, start: IdStart, goal_id: i64) -> CompiledPlan {
        let mut ids = Allocator {
            last_timeline: start.timeline,
            last_plan_item: start.plan_item,
        };
        let mut ops = Vec::new();

        for (heading, section) in outline.iter() {
            let timeline_id = ids.timeline();
            ops.push(InsertOp::Timeline(NewTimeline {
                id: timeline_id,
                goal_id,
                parent_timeline_id: None,
                title: heading.to_owned(),
                timeline_type: classify_timeline(heading),
            }));

            match section {
                OutlineSection::Flat(lines) => {
                    for line in lines {
                        ops.push(plan_item(ids.plan_item(), timeline_id, goal_id, line, None));
                    }
                }
                OutlineSection::Nested(groups) => match self.shape {
                    Level2Shape::PlanItem => {
                        for (subheading, lines) in groups {
                            let description = (!lines.is_empty()).then(|| lines.join("\n"));
                            ops.push(plan_item(
                                ids.plan_item(),
                                timeline_id,
                                goal_id,
                                subheading,
                                description,
                            ));
                        }
                    }
                    Level2Shape::Timeline => {
                        for (subheading, lines) in groups {
                            let child_id = ids.timeline();
                            ops.push(InsertOp::Timeline(NewTimeline {
                                id: child_id,
                                goal_id,
                                parent_timeline_id: Some(timeline_id),
                                title: subheading.clone(),
                                timeline_type: classify_timeline(subheading),
                            }));
                            for line in lines {
                                ops.push(plan_item(ids.plan_item(), child_id, goal_id, line, None));
                            }
                        }
                    }
                },
            }
        }

        CompiledPlan { ops }
    }
}

fn plan_item(
    id: i64,
    timeline_id: i64,
    goal_id: i64,
    name: &str,
    description: Option<String>,
) -> InsertOp {
    InsertOp::PlanItem(NewPlanItem {
        id,
        timeline_id,
        goal_id,
        name: name.to_owned(),
        description,
        status: PlanItemStatus::Todo,
    })
}
