//! Plan ingestion for the stride goal tracker.
//!
//! A plan is streamed from a [`generation::PlanSource`], re-cut into
//! markdown-safe pieces for the client, parsed into an [`outline::Outline`]
//! and, for tracked goals, compiled into timeline and plan item rows.

pub mod compile;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod outline;
pub mod pipeline;
pub mod resegment;
pub mod service;
pub mod store;
pub mod tree;

pub use error::{StrideError, StrideResult};
