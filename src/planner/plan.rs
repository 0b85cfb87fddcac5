//! Plan types.
//!
//! A plan is produced fresh per run and never persisted across runs; the
//! JSON form exists for audit output only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::model::{ResourceId, Value};

/// What a plan was generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    /// Converge state to the declarations.
    Apply,
    /// Remove every tracked resource.
    Destroy,
}

/// Kind of a planned action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Resource is new.
    Create,
    /// Resource changes in place.
    Update,
    /// Resource must be recreated.
    Replace,
    /// Resource is removed.
    Destroy,
    /// Resource is unchanged.
    NoOp,
}

/// Planned value of a changed attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedValue {
    /// Value is known at plan time.
    Known(Value),
    /// Value depends on a resource that does not exist yet.
    Unknown,
    /// Attribute is no longer declared.
    Removed,
}

/// Attribute-level change that triggered an update or replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeChange {
    /// Attribute name.
    pub attribute: String,
    /// Recorded value, if any.
    pub old: Option<Value>,
    /// Planned value.
    pub new: PlannedValue,
    /// Whether this change forces a replacement.
    pub requires_replace: bool,
}

/// A single planned action.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedAction {
    /// Resource the action applies to.
    pub resource: ResourceId,
    /// Action kind.
    pub kind: ActionKind,
    /// Changed attributes (create, update, replace).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<AttributeChange>,
    /// Human-readable reason.
    pub reason: String,
    /// Provider id of the existing instance, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Set when the action destroys a deposed instance rather than the
    /// current one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposed: Option<String>,
}

/// Number of actions by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanCounts {
    /// Creates.
    pub create: usize,
    /// In-place updates.
    pub update: usize,
    /// Replacements.
    pub replace: usize,
    /// Destroys, including deposed instances.
    pub destroy: usize,
    /// Unchanged resources.
    pub no_op: usize,
}

/// A complete plan.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// Run this plan belongs to.
    pub run_id: Uuid,
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Hash of the declarations this plan is based on.
    pub config_hash: String,
    /// What the plan was generated for.
    pub mode: PlanMode,
    /// Actions, declared resources in dependency order first, then removals.
    pub actions: Vec<PlannedAction>,
}

impl Plan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new(config_hash: &str, mode: PlanMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            mode,
            actions: Vec::new(),
        }
    }

    /// Returns the number of actions by kind.
    #[must_use]
    pub fn counts(&self) -> PlanCounts {
        let mut counts = PlanCounts::default();
        for action in &self.actions {
            match action.kind {
                ActionKind::Create => counts.create += 1,
                ActionKind::Update => counts.update += 1,
                ActionKind::Replace => counts.replace += 1,
                ActionKind::Destroy => counts.destroy += 1,
                ActionKind::NoOp => counts.no_op += 1,
            }
        }
        counts
    }

    /// Returns true if any action is not a no-op.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(PlannedAction::is_actionable)
    }

    /// Returns the actions that change something.
    pub fn actionable(&self) -> impl Iterator<Item = &PlannedAction> {
        self.actions.iter().filter(|a| a.is_actionable())
    }

    /// Returns the action for the current instance of a resource.
    #[must_use]
    pub fn action_for(&self, id: &ResourceId) -> Option<&PlannedAction> {
        self.actions
            .iter()
            .find(|a| a.resource == *id && a.deposed.is_none())
    }
}

impl PlannedAction {
    /// Creates an action with no attribute changes.
    #[must_use]
    pub fn new(resource: ResourceId, kind: ActionKind, reason: impl Into<String>) -> Self {
        Self {
            resource,
            kind,
            changes: Vec::new(),
            reason: reason.into(),
            provider_id: None,
            deposed: None,
        }
    }

    /// Returns true unless this is a no-op.
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        self.kind != ActionKind::NoOp
    }
}

impl PlanCounts {
    /// Returns the number of actionable entries.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.create + self.update + self.replace + self.destroy
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Destroy => "destroy",
            Self::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Known(value) => write!(f, "{value}"),
            Self::Unknown => write!(f, "(known after apply)"),
            Self::Removed => write!(f, "null"),
        }
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.resource)?;
        if let Some(deposed) = &self.deposed {
            write!(f, " (deposed {deposed})")?;
        }
        if !self.reason.is_empty() {
            write!(f, ": {}", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_changes() {
            return write!(f, "No changes. Infrastructure matches the configuration.");
        }

        let counts = self.counts();
        writeln!(
            f,
            "Plan: {} to create, {} to update, {} to replace, {} to destroy",
            counts.create, counts.update, counts.replace, counts.destroy
        )?;
        for action in self.actionable() {
            writeln!(f, "  {action}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_changes() {
        let mut plan = Plan::new("abc", PlanMode::Apply);
        assert!(!plan.has_changes());

        plan.actions.push(PlannedAction::new(
            ResourceId::new("aws_vpc", "main"),
            ActionKind::NoOp,
            "",
        ));
        assert!(!plan.has_changes());

        plan.actions.push(PlannedAction::new(
            ResourceId::new("aws_subnet", "a"),
            ActionKind::Replace,
            "forces replacement: cidr_block",
        ));
        let counts = plan.counts();
        assert_eq!(counts.replace, 1);
        assert_eq!(counts.no_op, 1);
        assert_eq!(counts.total_changes(), 1);
        assert!(plan.has_changes());
    }

    #[test]
    fn test_plan_json_shape() {
        let mut plan = Plan::new("abc", PlanMode::Destroy);
        let mut action = PlannedAction::new(
            ResourceId::new("aws_eip", "nat"),
            ActionKind::Update,
            "1 attribute(s) changed",
        );
        action.changes.push(AttributeChange {
            attribute: "tags".into(),
            old: None,
            new: PlannedValue::Unknown,
            requires_replace: false,
        });
        plan.actions.push(action);

        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["mode"], "destroy");
        assert_eq!(json["actions"][0]["resource"], "aws_eip.nat");
        assert_eq!(json["actions"][0]["kind"], "update");
        assert_eq!(json["actions"][0]["changes"][0]["new"], "unknown");
    }
}
