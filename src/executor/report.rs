//! Run report.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::error::ActionFailed;
use crate::model::ResourceId;
use crate::resolver::StepKind;

/// Terminal status of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The provider call succeeded and the record was written.
    Applied,
    /// The step failed after its retries.
    Failed,
    /// A step it depended on failed.
    Blocked,
    /// The run was cancelled before or during the step.
    Cancelled,
}

/// Terminal status of one resource, aggregated over its steps.
///
/// Ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceStatus {
    /// Nothing to do.
    NoOp,
    /// Every step succeeded.
    Applied,
    /// Cancelled before completion.
    Cancelled,
    /// Not attempted because a dependency failed.
    Blocked,
    /// A step failed.
    Failed,
}

/// Outcome of one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    /// Index in the execution sequence.
    pub index: usize,
    /// Resource the step applied to.
    pub resource: ResourceId,
    /// Step kind.
    pub kind: StepKind,
    /// Terminal status.
    pub status: StepStatus,
    /// Provider calls made.
    pub attempts: u32,
    /// Logical tick at which the step started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<u64>,
    /// Logical tick at which the step finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<u64>,
    /// Failure or blocking reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Monotonic logical clock shared by the step tasks of one run.
#[derive(Debug, Default)]
pub struct LogicalClock(AtomicU64);

impl LogicalClock {
    /// Returns the next tick.
    pub fn tick(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Step outcomes in sequence order.
    pub steps: Vec<StepOutcome>,
    /// Aggregated status per resource.
    pub resources: BTreeMap<ResourceId, ResourceStatus>,
    /// Failed actions.
    #[serde(skip)]
    pub failures: Vec<ActionFailed>,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Applied => "applied",
            Self::NoOp => "no-op",
            Self::Cancelled => "cancelled",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl From<StepStatus> for ResourceStatus {
    fn from(status: StepStatus) -> Self {
        match status {
            StepStatus::Applied => Self::Applied,
            StepStatus::Failed => Self::Failed,
            StepStatus::Blocked => Self::Blocked,
            StepStatus::Cancelled => Self::Cancelled,
        }
    }
}

impl RunReport {
    /// Builds the report from step outcomes and unchanged resources.
    ///
    /// A resource takes the worst status of its steps.
    #[must_use]
    pub fn new(
        run_id: Uuid,
        mut steps: Vec<StepOutcome>,
        unchanged: &[ResourceId],
        failures: Vec<ActionFailed>,
    ) -> Self {
        steps.sort_by_key(|s| s.index);

        let mut resources: BTreeMap<ResourceId, ResourceStatus> = unchanged
            .iter()
            .map(|id| (id.clone(), ResourceStatus::NoOp))
            .collect();
        for step in &steps {
            let status = ResourceStatus::from(step.status);
            resources
                .entry(step.resource.clone())
                .and_modify(|s| *s = (*s).max(status))
                .or_insert(status);
        }

        Self {
            run_id,
            steps,
            resources,
            failures,
        }
    }

    /// Returns true if every step was applied.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Applied)
    }

    /// Resources in a given status.
    pub fn with_status(&self, status: ResourceStatus) -> impl Iterator<Item = &ResourceId> {
        self.resources
            .iter()
            .filter(move |(_, s)| **s == status)
            .map(|(id, _)| id)
    }

    /// Resources whose steps all succeeded.
    #[must_use]
    pub fn applied(&self) -> Vec<String> {
        self.with_status(ResourceStatus::Applied).map(ToString::to_string).collect()
    }

    /// Resources that failed, were blocked or were cancelled.
    #[must_use]
    pub fn incomplete(&self) -> Vec<String> {
        self.resources
            .iter()
            .filter(|(_, s)| **s > ResourceStatus::Applied)
            .map(|(id, _)| id.to_string())
            .collect()
    }

    /// Number of resources in a given status.
    #[must_use]
    pub fn count(&self, status: ResourceStatus) -> usize {
        self.with_status(status).count()
    }

    /// Outcome of the step of `kind` on `resource`.
    #[must_use]
    pub fn step(&self, resource: &ResourceId, kind: StepKind) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| &s.resource == resource && s.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(index: usize, resource: &str, kind: StepKind, status: StepStatus) -> StepOutcome {
        StepOutcome {
            index,
            resource: resource.parse().unwrap(),
            kind,
            status,
            attempts: 1,
            started: None,
            finished: None,
            message: None,
        }
    }

    #[test]
    fn test_worst_step_status_wins() {
        let report = RunReport::new(
            Uuid::new_v4(),
            vec![
                outcome(1, "aws_route_table.public", StepKind::DestroyDeposed, StepStatus::Failed),
                outcome(0, "aws_route_table.public", StepKind::CreateReplacement, StepStatus::Applied),
                outcome(2, "aws_subnet.a", StepKind::Update, StepStatus::Applied),
            ],
            &["aws_vpc.main".parse().unwrap()],
            Vec::new(),
        );

        assert!(!report.is_success());
        assert_eq!(report.steps[0].index, 0);
        assert_eq!(report.applied(), vec!["aws_subnet.a"]);
        assert_eq!(report.incomplete(), vec!["aws_route_table.public"]);
        assert_eq!(report.count(ResourceStatus::NoOp), 1);
    }

    #[test]
    fn test_leftover_deposed_cleanup_counts_as_applied() {
        let table: ResourceId = "aws_route_table.public".parse().unwrap();
        let report = RunReport::new(
            Uuid::new_v4(),
            vec![outcome(0, "aws_route_table.public", StepKind::DestroyDeposed, StepStatus::Applied)],
            std::slice::from_ref(&table),
            Vec::new(),
        );

        assert_eq!(report.resources[&table], ResourceStatus::Applied);
        assert_eq!(report.count(ResourceStatus::NoOp), 0);
        assert!(report.incomplete().is_empty());

        let failed = RunReport::new(
            Uuid::new_v4(),
            vec![outcome(0, "aws_route_table.public", StepKind::DestroyDeposed, StepStatus::Failed)],
            std::slice::from_ref(&table),
            Vec::new(),
        );
        assert_eq!(failed.resources[&table], ResourceStatus::Failed);
    }

    #[test]
    fn test_clock_is_monotonic() {
        let clock = LogicalClock::default();
        let a = clock.tick();
        let b = clock.tick();
        assert!(b > a);
    }
}
