//! Planning module.
//!
//! This module compares the declared resources against the last persisted
//! state and produces a typed plan of create, update, replace, destroy and
//! no-op actions.

mod diff;
mod generator;
mod plan;

pub use diff::{DiffEngine, classify_changes, update_payload};
pub use generator::PlanGenerator;
pub use plan::{
    ActionKind, AttributeChange, Plan, PlanCounts, PlanMode, PlannedAction, PlannedValue,
};
