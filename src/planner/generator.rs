//! Plan Generator.
//!
//! Diffs the declared resources against a state snapshot. Desired resources
//! are walked in dependency order so every reference can be resolved against
//! what its target will look like after the plan is applied.

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::config::ConfigHasher;
use crate::error::ValidationError;
use crate::graph::DependencyGraph;
use crate::model::{Reference, Resource, ResourceId, ResourceSet, Value};
use crate::registry::Registry;
use crate::state::StateFile;

use super::diff::{DiffEngine, classify_changes};
use super::plan::{ActionKind, AttributeChange, Plan, PlanMode, PlannedAction, PlannedValue};

/// Resolved desired attributes; `None` means known after apply.
type ResolvedAttributes = BTreeMap<String, Option<Value>>;

/// Generates plans from declarations and a state snapshot.
#[derive(Debug, Clone, Copy)]
pub struct PlanGenerator<'a> {
    registry: &'a Registry,
}

/// Planning progress used to resolve references to earlier resources.
#[derive(Default)]
struct Planned {
    kinds: HashMap<ResourceId, ActionKind>,
    resolved: HashMap<ResourceId, ResolvedAttributes>,
}

impl<'a> PlanGenerator<'a> {
    /// Creates a generator using `registry` for change classification.
    #[must_use]
    pub const fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Generates a plan.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::PreventDestroy`] if the plan would destroy
    /// or replace a protected resource, or a cycle error from the graph.
    pub fn generate(
        &self,
        resources: &ResourceSet,
        graph: &DependencyGraph,
        state: &StateFile,
        mode: PlanMode,
    ) -> std::result::Result<Plan, ValidationError> {
        let config_hash = ConfigHasher::new().hash_resources(resources);
        let mut plan = Plan::new(&config_hash, mode);

        match mode {
            PlanMode::Apply => self.plan_apply(resources, graph, state, &mut plan)?,
            PlanMode::Destroy => Self::plan_destroy(resources, state, &mut plan)?,
        }
        Self::plan_deposed(state, &mut plan);

        let counts = plan.counts();
        debug!(
            "Generated {mode:?} plan: {} create, {} update, {} replace, {} destroy, {} no-op",
            counts.create, counts.update, counts.replace, counts.destroy, counts.no_op
        );
        Ok(plan)
    }

    fn plan_apply(
        &self,
        resources: &ResourceSet,
        graph: &DependencyGraph,
        state: &StateFile,
        plan: &mut Plan,
    ) -> std::result::Result<(), ValidationError> {
        let diff = DiffEngine::new(self.registry);
        let mut planned = Planned::default();

        for id in graph.topological_order()? {
            let Some(resource) = resources.get(&id) else {
                continue;
            };

            let attributes: ResolvedAttributes = resource
                .attributes
                .iter()
                .map(|(name, value)| {
                    let resolved = value.resolve(&|r| planned.lookup(r, state));
                    (name.clone(), resolved)
                })
                .collect();

            let action = match state.get(&id) {
                None => create_action(resource, &attributes),
                Some(record) => {
                    let changes = diff.diff(&id.resource_type, &attributes, &record.attributes);
                    let kind = classify_changes(&changes);
                    let mut action = PlannedAction::new(id.clone(), kind, change_reason(kind, &changes));
                    action.changes = changes;
                    action.provider_id = Some(record.provider_id.clone());
                    action
                }
            };

            if action.kind == ActionKind::Replace && resource.lifecycle.prevent_destroy {
                return Err(ValidationError::PreventDestroy {
                    resource: id.to_string(),
                    action: String::from("replace"),
                });
            }

            planned.kinds.insert(id.clone(), action.kind);
            planned.resolved.insert(id, attributes);
            plan.actions.push(action);
        }

        for (id, record) in &state.records {
            if resources.contains(id) {
                continue;
            }
            if record.lifecycle.prevent_destroy {
                return Err(ValidationError::PreventDestroy {
                    resource: id.to_string(),
                    action: String::from("destroy"),
                });
            }
            let mut action = PlannedAction::new(id.clone(), ActionKind::Destroy, "removed from configuration");
            action.provider_id = Some(record.provider_id.clone());
            plan.actions.push(action);
        }

        Ok(())
    }

    fn plan_destroy(
        resources: &ResourceSet,
        state: &StateFile,
        plan: &mut Plan,
    ) -> std::result::Result<(), ValidationError> {
        for (id, record) in &state.records {
            let lifecycle = resources.get(id).map_or(record.lifecycle, |r| r.lifecycle);
            if lifecycle.prevent_destroy {
                return Err(ValidationError::PreventDestroy {
                    resource: id.to_string(),
                    action: String::from("destroy"),
                });
            }
            let mut action = PlannedAction::new(id.clone(), ActionKind::Destroy, "destroy requested");
            action.provider_id = Some(record.provider_id.clone());
            plan.actions.push(action);
        }
        Ok(())
    }

    fn plan_deposed(state: &StateFile, plan: &mut Plan) {
        for (id, record) in &state.records {
            for deposed in &record.deposed {
                let mut action = PlannedAction::new(
                    id.clone(),
                    ActionKind::Destroy,
                    "deposed instance left by an interrupted replacement",
                );
                action.provider_id = Some(deposed.clone());
                action.deposed = Some(deposed.clone());
                plan.actions.push(action);
            }
        }
    }
}

impl Planned {
    /// Resolves a reference to an earlier resource in dependency order.
    fn lookup(&self, reference: &Reference, state: &StateFile) -> Option<Value> {
        let target = &reference.target;
        match self.kinds.get(target)? {
            ActionKind::Create | ActionKind::Replace => None,
            ActionKind::Update => {
                if let Some(desired) = self.resolved.get(target).and_then(|a| a.get(&reference.attribute)) {
                    return desired.clone();
                }
                state.get(target)?.lookup(&reference.attribute).cloned()
            }
            ActionKind::NoOp | ActionKind::Destroy => {
                state.get(target)?.lookup(&reference.attribute).cloned()
            }
        }
    }
}

fn create_action(resource: &Resource, attributes: &ResolvedAttributes) -> PlannedAction {
    let mut action = PlannedAction::new(resource.id.clone(), ActionKind::Create, "not in state");
    action.changes = attributes
        .iter()
        .map(|(name, value)| AttributeChange {
            attribute: name.clone(),
            old: None,
            new: value.clone().map_or(PlannedValue::Unknown, PlannedValue::Known),
            requires_replace: false,
        })
        .collect();
    action
}

fn change_reason(kind: ActionKind, changes: &[AttributeChange]) -> String {
    match kind {
        ActionKind::Replace => {
            let causes: Vec<&str> = changes
                .iter()
                .filter(|c| c.requires_replace)
                .map(|c| c.attribute.as_str())
                .collect();
            format!("forces replacement: {}", causes.join(", "))
        }
        ActionKind::Update => format!("{} attribute(s) changed", changes.len()),
        _ => String::new(),
    }
}
