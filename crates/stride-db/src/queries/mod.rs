//! Per-table query functions.
//!
//! Functions take any [`sqlx::PgExecutor`] so they run equally against the
//! pool or inside a caller-owned transaction.

pub mod allocation;
pub mod goals;
pub mod plan_items;
pub mod timelines;
pub mod tracked_goals;
pub mod users;
