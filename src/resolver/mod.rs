//! Dependency Resolver.
//!
//! Expands plan actions into provider steps according to each resource's
//! lifecycle policy, then orders them with Kahn's algorithm.
//!
//! A replace expands into `destroy_existing` then `create`, or, under
//! `create_before_destroy`, into `create_replacement` then `destroy_deposed`.
//! The deposed instance is destroyed only after every dependent has finished
//! its own steps against the new instance. Destroys wait for everything that
//! depended on the destroyed resource, using both the declared graph and the
//! dependencies recorded in state.

mod expand;
mod order;
mod step;

use tracing::debug;

use crate::error::ValidationError;
use crate::graph::DependencyGraph;
use crate::model::ResourceSet;
use crate::planner::{ActionKind, Plan};
use crate::state::StateFile;

use expand::Expansion;

pub use step::{ExecutionSequence, Step, StepKind};

/// Turns a plan into an [`ExecutionSequence`].
#[derive(Debug, Clone, Copy)]
pub struct DependencyResolver<'a> {
    graph: &'a DependencyGraph,
    resources: &'a ResourceSet,
    state: &'a StateFile,
}

impl<'a> DependencyResolver<'a> {
    /// Creates a resolver over the declared graph and the planning snapshot.
    #[must_use]
    pub const fn new(graph: &'a DependencyGraph, resources: &'a ResourceSet, state: &'a StateFile) -> Self {
        Self {
            graph,
            resources,
            state,
        }
    }

    /// Resolves the plan into ordered steps.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnresolvableOrder`] if the expanded steps
    /// contain a cycle.
    pub fn resolve(&self, plan: &Plan) -> std::result::Result<ExecutionSequence, ValidationError> {
        let pending = Expansion::new(self.graph, self.state).run(plan, self.resources);
        let steps = order::order(pending)?;

        let unchanged = plan
            .actions
            .iter()
            .filter(|a| a.kind == ActionKind::NoOp)
            .map(|a| a.resource.clone())
            .collect();

        let sequence = ExecutionSequence::new(steps, unchanged);
        debug!(
            "Resolved {} steps in {} waves",
            sequence.len(),
            sequence.waves().len()
        );
        Ok(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::model::{LifecyclePolicy, Resource, ResourceId, Value};
    use crate::planner::{PlanMode, PlannedAction};
    use crate::registry::Registry;
    use crate::state::StateRecord;

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    fn reference(target: &str) -> Value {
        Value::reference(id(target), "id")
    }

    const CBD: LifecyclePolicy = LifecyclePolicy {
        create_before_destroy: true,
        prevent_destroy: false,
    };

    fn resolve(resources: &ResourceSet, state: &StateFile, actions: &[(&str, ActionKind)]) -> ExecutionSequence {
        let registry = Registry::builtin();
        let graph = GraphBuilder::new(&registry).build(resources).unwrap();
        let mut plan = Plan::new("hash", PlanMode::Apply);
        for (resource, kind) in actions {
            let mut action = PlannedAction::new(id(resource), *kind, "");
            if *kind != ActionKind::Create {
                action.provider_id = Some(format!("old-{resource}"));
            }
            plan.actions.push(action);
        }
        DependencyResolver::new(&graph, resources, state).resolve(&plan).unwrap()
    }

    fn pos(sequence: &ExecutionSequence, resource: &str, kind: StepKind) -> usize {
        sequence.position(&id(resource), kind).unwrap()
    }

    fn record(resource: &str, deps: &[&str]) -> StateRecord {
        let mut record = StateRecord::new(id(resource), format!("old-{resource}"));
        record.dependencies = deps.iter().map(|d| id(d)).collect();
        record
    }

    #[test]
    fn test_network_gateway_route_order() {
        let resources = ResourceSet::from_resources([
            Resource::new(id("aws_vpc.main")),
            Resource::new(id("aws_internet_gateway.main")).with_attribute("vpc_id", reference("aws_vpc.main")),
            Resource::new(id("aws_route_table.public"))
                .with_attribute("gateway_id", reference("aws_internet_gateway.main")),
        ])
        .unwrap();

        let sequence = resolve(
            &resources,
            &StateFile::new("net", "dev"),
            &[
                ("aws_vpc.main", ActionKind::Create),
                ("aws_internet_gateway.main", ActionKind::Create),
                ("aws_route_table.public", ActionKind::Create),
            ],
        );

        let order: Vec<String> = sequence.steps().iter().map(|s| s.resource.to_string()).collect();
        assert_eq!(
            order,
            vec!["aws_vpc.main", "aws_internet_gateway.main", "aws_route_table.public"]
        );
        let waves: Vec<usize> = sequence.steps().iter().map(|s| s.wave).collect();
        assert_eq!(waves, vec![0, 1, 2]);
    }

    #[test]
    fn test_explicit_only_dependency_orders_nat_allocation() {
        let resources = ResourceSet::from_resources([
            Resource::new(id("aws_vpc.main")),
            Resource::new(id("aws_internet_gateway.main")).with_attribute("vpc_id", reference("aws_vpc.main")),
            Resource::new(id("aws_eip.nat")).with_depends_on(id("aws_internet_gateway.main")),
        ])
        .unwrap();

        let sequence = resolve(
            &resources,
            &StateFile::new("net", "dev"),
            &[
                ("aws_vpc.main", ActionKind::Create),
                ("aws_internet_gateway.main", ActionKind::Create),
                ("aws_eip.nat", ActionKind::Create),
            ],
        );

        assert!(
            pos(&sequence, "aws_internet_gateway.main", StepKind::Create)
                < pos(&sequence, "aws_eip.nat", StepKind::Create)
        );
    }

    #[test]
    fn test_security_group_rule_reference_orders_web_first() {
        let resources = ResourceSet::from_resources([
            Resource::new(id("aws_security_group.db")).with_attribute(
                "ingress",
                Value::List(vec![Value::Map(
                    [("security_groups".to_string(), reference("aws_security_group.web"))].into(),
                )]),
            ),
            Resource::new(id("aws_security_group.web")),
        ])
        .unwrap();

        let sequence = resolve(
            &resources,
            &StateFile::new("net", "dev"),
            &[
                ("aws_security_group.db", ActionKind::Create),
                ("aws_security_group.web", ActionKind::Create),
            ],
        );

        let db = pos(&sequence, "aws_security_group.db", StepKind::Create);
        let web = pos(&sequence, "aws_security_group.web", StepKind::Create);
        assert!(web < db);
        assert_eq!(sequence.get(db).unwrap().dependencies, vec![web]);
    }

    #[test]
    fn test_create_before_destroy_defers_old_instance() {
        let resources = ResourceSet::from_resources([
            Resource::new(id("aws_route_table.public")).with_lifecycle(CBD),
            Resource::new(id("aws_route_table_association.a"))
                .with_attribute("route_table_id", reference("aws_route_table.public")),
        ])
        .unwrap();
        let mut state = StateFile::new("net", "dev");
        state.set(record("aws_route_table.public", &[]));
        state.set(record("aws_route_table_association.a", &["aws_route_table.public"]));

        let sequence = resolve(
            &resources,
            &state,
            &[
                ("aws_route_table.public", ActionKind::Replace),
                ("aws_route_table_association.a", ActionKind::Update),
            ],
        );

        let create = pos(&sequence, "aws_route_table.public", StepKind::CreateReplacement);
        let update = pos(&sequence, "aws_route_table_association.a", StepKind::Update);
        let destroy = pos(&sequence, "aws_route_table.public", StepKind::DestroyDeposed);
        assert!(create < update);
        assert!(update < destroy);
        assert!(sequence.get(destroy).unwrap().dependencies.contains(&update));
        assert_eq!(
            sequence.get(destroy).unwrap().provider_id.as_deref(),
            Some("old-aws_route_table.public")
        );
    }

    #[test]
    fn test_replace_without_cbd_destroys_first_and_blocks_dependents() {
        let resources = ResourceSet::from_resources([
            Resource::new(id("aws_vpc.main")),
            Resource::new(id("aws_subnet.a")).with_attribute("vpc_id", reference("aws_vpc.main")),
        ])
        .unwrap();
        let mut state = StateFile::new("net", "dev");
        state.set(record("aws_vpc.main", &[]));
        state.set(record("aws_subnet.a", &["aws_vpc.main"]));

        let sequence = resolve(
            &resources,
            &state,
            &[
                ("aws_vpc.main", ActionKind::Replace),
                ("aws_subnet.a", ActionKind::Replace),
            ],
        );

        let subnet_destroy = pos(&sequence, "aws_subnet.a", StepKind::DestroyExisting);
        let vpc_destroy = pos(&sequence, "aws_vpc.main", StepKind::DestroyExisting);
        let vpc_create = pos(&sequence, "aws_vpc.main", StepKind::Create);
        let subnet_create = pos(&sequence, "aws_subnet.a", StepKind::Create);
        assert!(subnet_destroy < vpc_destroy);
        assert!(vpc_destroy < vpc_create);
        assert!(vpc_create < subnet_create);
    }

    #[test]
    fn test_create_before_destroy_propagates_to_replaced_dependencies() {
        let resources = ResourceSet::from_resources([
            Resource::new(id("aws_vpc.main")),
            Resource::new(id("aws_subnet.a"))
                .with_attribute("vpc_id", reference("aws_vpc.main"))
                .with_lifecycle(CBD),
        ])
        .unwrap();
        let mut state = StateFile::new("net", "dev");
        state.set(record("aws_vpc.main", &[]));
        state.set(record("aws_subnet.a", &["aws_vpc.main"]));

        let sequence = resolve(
            &resources,
            &state,
            &[
                ("aws_vpc.main", ActionKind::Replace),
                ("aws_subnet.a", ActionKind::Replace),
            ],
        );

        assert!(sequence.position(&id("aws_vpc.main"), StepKind::DestroyExisting).is_none());
        let vpc_new = pos(&sequence, "aws_vpc.main", StepKind::CreateReplacement);
        let subnet_new = pos(&sequence, "aws_subnet.a", StepKind::CreateReplacement);
        let subnet_old = pos(&sequence, "aws_subnet.a", StepKind::DestroyDeposed);
        let vpc_old = pos(&sequence, "aws_vpc.main", StepKind::DestroyDeposed);
        assert!(vpc_new < subnet_new);
        assert!(subnet_new < subnet_old);
        assert!(subnet_old < vpc_old);
    }

    #[test]
    fn test_destroys_run_dependents_first() {
        let resources = ResourceSet::new();
        let mut state = StateFile::new("net", "dev");
        state.set(record("aws_vpc.main", &[]));
        state.set(record("aws_subnet.a", &["aws_vpc.main"]));
        state.set(record("aws_instance.web", &["aws_subnet.a"]));

        let sequence = resolve(
            &resources,
            &state,
            &[
                ("aws_instance.web", ActionKind::Destroy),
                ("aws_subnet.a", ActionKind::Destroy),
                ("aws_vpc.main", ActionKind::Destroy),
            ],
        );

        let order: Vec<String> = sequence.steps().iter().map(|s| s.resource.to_string()).collect();
        assert_eq!(order, vec!["aws_instance.web", "aws_subnet.a", "aws_vpc.main"]);
    }

    #[test]
    fn test_leftover_deposed_destroyed_before_record_removal() {
        let resources = ResourceSet::new();
        let mut state = StateFile::new("net", "dev");
        let mut vpc = record("aws_vpc.main", &[]);
        vpc.deposed.push("vpc-stale".into());
        state.set(vpc);

        let registry = Registry::builtin();
        let graph = GraphBuilder::new(&registry).build(&resources).unwrap();
        let mut plan = Plan::new("hash", PlanMode::Apply);
        let mut destroy = PlannedAction::new(id("aws_vpc.main"), ActionKind::Destroy, "removed");
        destroy.provider_id = Some("old-aws_vpc.main".into());
        let mut leftover = PlannedAction::new(id("aws_vpc.main"), ActionKind::Destroy, "deposed");
        leftover.deposed = Some("vpc-stale".into());
        plan.actions.push(destroy);
        plan.actions.push(leftover);

        let sequence = DependencyResolver::new(&graph, &resources, &state).resolve(&plan).unwrap();

        let stale = pos(&sequence, "aws_vpc.main", StepKind::DestroyDeposed);
        let current = pos(&sequence, "aws_vpc.main", StepKind::Destroy);
        assert_eq!(sequence.get(stale).unwrap().provider_id.as_deref(), Some("vpc-stale"));
        assert_eq!(sequence.get(current).unwrap().dependencies, vec![stale]);
    }

    #[test]
    fn test_no_op_resources_are_reported_unchanged() {
        let resources = ResourceSet::from_resources([Resource::new(id("aws_vpc.main"))]).unwrap();
        let sequence = resolve(
            &resources,
            &StateFile::new("net", "dev"),
            &[("aws_vpc.main", ActionKind::NoOp)],
        );
        assert!(sequence.is_empty());
        assert_eq!(sequence.unchanged(), &[id("aws_vpc.main")]);
    }
}
