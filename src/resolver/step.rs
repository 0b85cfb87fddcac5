//! Execution steps and the ordered sequence the executor consumes.

use serde::Serialize;
use std::fmt;

use crate::model::ResourceId;

/// A unit of provider work produced by lifecycle expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Create a new resource.
    Create,
    /// Create the new instance of a create-before-destroy replacement.
    CreateReplacement,
    /// Update a resource in place.
    Update,
    /// Destroy the current instance ahead of its recreation.
    DestroyExisting,
    /// Destroy an old instance left by a create-before-destroy replacement.
    DestroyDeposed,
    /// Destroy a resource for good.
    Destroy,
}

impl StepKind {
    /// Returns true for steps that bring an instance into its desired state.
    #[must_use]
    pub const fn is_provisioning(self) -> bool {
        matches!(self, Self::Create | Self::CreateReplacement | Self::Update)
    }

    /// Ready-set priority: creates first, then updates, destroys last.
    pub(super) const fn priority(self) -> u8 {
        match self {
            Self::Create | Self::CreateReplacement => 0,
            Self::Update => 1,
            Self::DestroyExisting | Self::DestroyDeposed | Self::Destroy => 2,
        }
    }

    /// Provider operation this step performs.
    #[must_use]
    pub const fn operation(self) -> &'static str {
        match self {
            Self::Create | Self::CreateReplacement => "create",
            Self::Update => "update",
            Self::DestroyExisting | Self::DestroyDeposed | Self::Destroy => "destroy",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::CreateReplacement => "create_replacement",
            Self::Update => "update",
            Self::DestroyExisting => "destroy_existing",
            Self::DestroyDeposed => "destroy_deposed",
            Self::Destroy => "destroy",
        };
        write!(f, "{s}")
    }
}

/// An ordered step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    /// Position in the sequence.
    pub index: usize,
    /// Resource the step applies to.
    pub resource: ResourceId,
    /// What the step does.
    pub kind: StepKind,
    /// Instance the step operates on; `None` for creates.
    pub provider_id: Option<String>,
    /// Indices of steps that must complete successfully first.
    pub dependencies: Vec<usize>,
    /// Parallelism hint; steps in the same wave are independent.
    pub wave: usize,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.resource)
    }
}

/// Totally ordered steps with dependency lists.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionSequence {
    steps: Vec<Step>,
    unchanged: Vec<ResourceId>,
}

impl ExecutionSequence {
    pub(super) const fn new(steps: Vec<Step>, unchanged: Vec<ResourceId>) -> Self {
        Self { steps, unchanged }
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Resources planned as no-ops.
    #[must_use]
    pub fn unchanged(&self) -> &[ResourceId] {
        &self.unchanged
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if there is nothing to execute.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Gets a step by index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// Finds the step of a given kind for a resource.
    #[must_use]
    pub fn position(&self, resource: &ResourceId, kind: StepKind) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.resource == *resource && s.kind == kind)
    }

    /// For each step, the indices of the steps that depend on it.
    #[must_use]
    pub fn dependents(&self) -> Vec<Vec<usize>> {
        let mut dependents = vec![Vec::new(); self.steps.len()];
        for step in &self.steps {
            for &dep in &step.dependencies {
                dependents[dep].push(step.index);
            }
        }
        dependents
    }

    /// Groups steps by wave.
    #[must_use]
    pub fn waves(&self) -> Vec<Vec<&Step>> {
        let mut waves: Vec<Vec<&Step>> = Vec::new();
        for step in &self.steps {
            if waves.len() <= step.wave {
                waves.resize_with(step.wave + 1, Vec::new);
            }
            waves[step.wave].push(step);
        }
        waves
    }
}
