//! Lifecycle expansion of plan actions into ordered steps.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::graph::DependencyGraph;
use crate::model::{ResourceId, ResourceSet};
use crate::planner::{ActionKind, Plan};
use crate::state::StateFile;

use super::order::PendingStep;
use super::step::StepKind;

/// Expansion of one plan into pending steps.
pub(super) struct Expansion<'a> {
    graph: &'a DependencyGraph,
    recorded_dependents: BTreeMap<&'a ResourceId, BTreeSet<&'a ResourceId>>,
    steps: Vec<PendingStep>,
    by_resource: HashMap<ResourceId, Vec<usize>>,
    provisioning: HashMap<ResourceId, usize>,
    leftovers: HashSet<usize>,
}

impl<'a> Expansion<'a> {
    pub(super) fn new(graph: &'a DependencyGraph, state: &'a StateFile) -> Self {
        let mut recorded_dependents: BTreeMap<&ResourceId, BTreeSet<&ResourceId>> = BTreeMap::new();
        for (id, record) in &state.records {
            for dep in &record.dependencies {
                recorded_dependents.entry(dep).or_default().insert(id);
            }
        }

        Self {
            graph,
            recorded_dependents,
            steps: Vec::new(),
            by_resource: HashMap::new(),
            provisioning: HashMap::new(),
            leftovers: HashSet::new(),
        }
    }

    /// Expands every actionable entry of `plan` and wires the ordering edges.
    pub(super) fn run(mut self, plan: &Plan, resources: &ResourceSet) -> Vec<PendingStep> {
        let create_before_destroy = self.create_before_destroy_set(plan, resources);

        for action in plan.actionable() {
            let id = &action.resource;
            let old = action.provider_id.clone();
            match (action.kind, &action.deposed) {
                (ActionKind::Destroy, Some(deposed)) => {
                    let step = self.push(id, StepKind::DestroyDeposed, Some(deposed.clone()));
                    self.leftovers.insert(step);
                }
                (ActionKind::Destroy, None) => {
                    self.push(id, StepKind::Destroy, old);
                }
                (ActionKind::Create, _) => {
                    let step = self.push(id, StepKind::Create, None);
                    self.provisioning.insert(id.clone(), step);
                }
                (ActionKind::Update, _) => {
                    let step = self.push(id, StepKind::Update, old);
                    self.provisioning.insert(id.clone(), step);
                }
                (ActionKind::Replace, _) if create_before_destroy.contains(id) => {
                    let create = self.push(id, StepKind::CreateReplacement, old.clone());
                    let destroy = self.push(id, StepKind::DestroyDeposed, old);
                    self.steps[destroy].dependencies.insert(create);
                    self.provisioning.insert(id.clone(), create);
                }
                (ActionKind::Replace, _) => {
                    let destroy = self.push(id, StepKind::DestroyExisting, old);
                    let create = self.push(id, StepKind::Create, None);
                    self.steps[create].dependencies.insert(destroy);
                    self.provisioning.insert(id.clone(), create);
                }
                (ActionKind::NoOp, _) => {}
            }
        }

        self.wire_provisioning();
        self.wire_destroys();
        self.steps
    }

    /// Replaced resources handled create-before-destroy, including replaced
    /// dependencies of such resources.
    fn create_before_destroy_set(&self, plan: &Plan, resources: &ResourceSet) -> HashSet<ResourceId> {
        let replaced: HashSet<&ResourceId> = plan
            .actions
            .iter()
            .filter(|a| a.kind == ActionKind::Replace)
            .map(|a| &a.resource)
            .collect();

        let mut set: HashSet<ResourceId> = HashSet::new();
        let mut queue: Vec<&ResourceId> = replaced
            .iter()
            .copied()
            .filter(|id| resources.get(id).is_some_and(|r| r.lifecycle.create_before_destroy))
            .collect();

        while let Some(id) = queue.pop() {
            if !set.insert(id.clone()) {
                continue;
            }
            for dep in self.graph.dependencies(id) {
                if replaced.contains(dep) && !set.contains(dep) {
                    debug!("Propagating create_before_destroy from {id} to {dep}");
                    queue.push(dep);
                }
            }
        }
        set
    }

    fn push(&mut self, resource: &ResourceId, kind: StepKind, provider_id: Option<String>) -> usize {
        let index = self.steps.len();
        self.steps.push(PendingStep {
            resource: resource.clone(),
            kind,
            provider_id,
            dependencies: BTreeSet::new(),
        });
        self.by_resource.entry(resource.clone()).or_default().push(index);
        index
    }

    /// Desired and recorded dependents of a resource.
    fn dependents_of(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        self.graph
            .dependents(id)
            .chain(self.recorded_dependents.get(id).into_iter().flatten().copied())
            .filter(|d| *d != id)
            .cloned()
            .collect()
    }

    fn steps_of(&self, id: &ResourceId) -> Vec<usize> {
        self.by_resource.get(id).cloned().unwrap_or_default()
    }

    fn destroy_steps_of(&self, id: &ResourceId) -> Vec<usize> {
        self.steps_of(id)
            .into_iter()
            .filter(|&i| !self.steps[i].kind.is_provisioning())
            .collect()
    }

    /// Leftover deposed destroys of a resource; its record must outlive them.
    fn leftovers_of(&self, id: &ResourceId) -> Vec<usize> {
        self.steps_of(id)
            .into_iter()
            .filter(|i| self.leftovers.contains(i))
            .collect()
    }

    /// Provisioning of a resource waits for provisioning of its dependencies.
    fn wire_provisioning(&mut self) {
        let edges: Vec<(usize, usize)> = self
            .provisioning
            .iter()
            .flat_map(|(id, &step)| {
                self.graph
                    .dependencies(id)
                    .filter_map(|dep| self.provisioning.get(dep))
                    .map(move |&dep_step| (step, dep_step))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (step, dep) in edges {
            self.steps[step].dependencies.insert(dep);
        }
    }

    /// Destroy steps wait for the resources that depended on what they remove.
    fn wire_destroys(&mut self) {
        let mut edges: Vec<(usize, usize)> = Vec::new();

        for (index, step) in self.steps.iter().enumerate() {
            let dependents = self.dependents_of(&step.resource);
            let waits: Vec<usize> = match step.kind {
                StepKind::DestroyExisting => dependents
                    .iter()
                    .flat_map(|d| self.destroy_steps_of(d))
                    .chain(self.leftovers_of(&step.resource))
                    .collect(),
                StepKind::DestroyDeposed if self.leftovers.contains(&index) => dependents
                    .iter()
                    .flat_map(|d| self.destroy_steps_of(d))
                    .collect(),
                StepKind::DestroyDeposed => dependents.iter().flat_map(|d| self.steps_of(d)).collect(),
                StepKind::Destroy => dependents
                    .iter()
                    .flat_map(|d| self.steps_of(d))
                    .chain(self.leftovers_of(&step.resource))
                    .collect(),
                StepKind::Create | StepKind::CreateReplacement | StepKind::Update => Vec::new(),
            };
            edges.extend(waits.into_iter().map(|w| (index, w)));
        }

        for (step, dep) in edges {
            if step != dep {
                self.steps[step].dependencies.insert(dep);
            }
        }
    }
}
