//! Builds the dependency graph from declared resources.

use tracing::debug;

use crate::error::ValidationError;
use crate::model::{Resource, ResourceSet};
use crate::registry::Registry;

use super::dependency::{DependencyGraph, EdgeKind};

/// Builds a [`DependencyGraph`] and validates the declarations against it.
#[derive(Debug, Clone, Copy)]
pub struct GraphBuilder<'a> {
    registry: &'a Registry,
}

impl<'a> GraphBuilder<'a> {
    /// Creates a builder that checks types against `registry`.
    #[must_use]
    pub const fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Builds the graph.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for unknown types, references to
    /// undeclared resources or attributes, and dependency cycles.
    pub fn build(&self, resources: &ResourceSet) -> std::result::Result<DependencyGraph, ValidationError> {
        let mut graph = DependencyGraph::new();

        for resource in resources.iter() {
            if !self.registry.contains(&resource.id.resource_type) {
                return Err(ValidationError::UnknownResourceType {
                    resource_type: resource.id.resource_type.clone(),
                    resource: resource.id.to_string(),
                });
            }
            graph.add_node(resource.id.clone());
        }

        for resource in resources.iter() {
            self.add_implicit_edges(&mut graph, resources, resource)?;

            for target in &resource.depends_on {
                if !resources.contains(target) {
                    return Err(ValidationError::DanglingReference {
                        from: resource.id.to_string(),
                        to: target.to_string(),
                    });
                }
                graph.add_edge(&resource.id, target, EdgeKind::Explicit);
            }
        }

        if let Some(chain) = graph.find_cycle() {
            return Err(ValidationError::CyclicDependency {
                chain: chain.iter().map(ToString::to_string).collect(),
            });
        }

        debug!(
            "Built dependency graph: {} resources, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        Ok(graph)
    }

    fn add_implicit_edges(
        &self,
        graph: &mut DependencyGraph,
        resources: &ResourceSet,
        resource: &Resource,
    ) -> std::result::Result<(), ValidationError> {
        for (_, reference) in resource.references() {
            let Some(target) = resources.get(&reference.target) else {
                return Err(ValidationError::DanglingReference {
                    from: resource.id.to_string(),
                    to: reference.target.to_string(),
                });
            };

            let exported = self
                .registry
                .get(&target.id.resource_type)
                .is_some_and(|d| d.exports(&reference.attribute));
            if !exported && !target.attributes.contains_key(&reference.attribute) {
                return Err(ValidationError::UnresolvableReference {
                    from: resource.id.to_string(),
                    to: target.id.to_string(),
                    attribute: reference.attribute.clone(),
                });
            }

            graph.add_edge(&resource.id, &target.id, EdgeKind::Implicit);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResourceId, Value};

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    fn network() -> Vec<Resource> {
        vec![
            Resource::new(id("aws_vpc.main")).with_attribute("cidr_block", "10.0.0.0/16"),
            Resource::new(id("aws_subnet.public"))
                .with_attribute("vpc_id", Value::reference(id("aws_vpc.main"), "id"))
                .with_attribute("cidr_block", "10.0.1.0/24"),
            Resource::new(id("aws_internet_gateway.main"))
                .with_attribute("vpc_id", Value::reference(id("aws_vpc.main"), "id")),
        ]
    }

    #[test]
    fn test_network_with_gateway() {
        let registry = Registry::builtin();
        let set = ResourceSet::from_resources(network()).unwrap();
        let graph = GraphBuilder::new(&registry).build(&set).unwrap();

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        let order = graph.topological_order().unwrap();
        assert_eq!(order[0], id("aws_vpc.main"));
    }

    #[test]
    fn test_explicit_only_dependency() {
        let registry = Registry::builtin();
        let mut resources = network();
        resources.push(
            Resource::new(id("aws_eip.nat")).with_depends_on(id("aws_internet_gateway.main")),
        );
        let set = ResourceSet::from_resources(resources).unwrap();
        let graph = GraphBuilder::new(&registry).build(&set).unwrap();

        assert_eq!(
            graph.edge_kind(&id("aws_eip.nat"), &id("aws_internet_gateway.main")),
            Some(EdgeKind::Explicit)
        );
        let order = graph.topological_order().unwrap();
        let igw = order.iter().position(|r| *r == id("aws_internet_gateway.main")).unwrap();
        let eip = order.iter().position(|r| *r == id("aws_eip.nat")).unwrap();
        assert!(igw < eip);
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let registry = Registry::builtin();
        let set = ResourceSet::from_resources([Resource::new(id("aws_subnet.a"))
            .with_attribute("vpc_id", Value::reference(id("aws_vpc.missing"), "id"))])
        .unwrap();

        let err = GraphBuilder::new(&registry).build(&set).unwrap_err();
        assert_eq!(
            err,
            ValidationError::DanglingReference {
                from: "aws_subnet.a".into(),
                to: "aws_vpc.missing".into()
            }
        );
    }

    #[test]
    fn test_unresolvable_attribute_rejected() {
        let registry = Registry::builtin();
        let set = ResourceSet::from_resources([
            Resource::new(id("aws_vpc.main")),
            Resource::new(id("aws_subnet.a"))
                .with_attribute("vpc_id", Value::reference(id("aws_vpc.main"), "no_such_attr")),
        ])
        .unwrap();

        let err = GraphBuilder::new(&registry).build(&set).unwrap_err();
        assert!(matches!(err, ValidationError::UnresolvableReference { attribute, .. } if attribute == "no_such_attr"));
    }

    #[test]
    fn test_declared_attribute_is_referenceable() {
        let registry = Registry::builtin();
        let set = ResourceSet::from_resources(vec![
            Resource::new(id("aws_vpc.main")).with_attribute("cidr_block", "10.0.0.0/16"),
            Resource::new(id("aws_security_group.web"))
                .with_attribute("cidr", Value::reference(id("aws_vpc.main"), "cidr_block")),
        ])
        .unwrap();

        assert!(GraphBuilder::new(&registry).build(&set).is_ok());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let registry = Registry::builtin();
        let set = ResourceSet::from_resources([Resource::new(id("gcp_network.main"))]).unwrap();

        let err = GraphBuilder::new(&registry).build(&set).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownResourceType { .. }));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let registry = Registry::builtin();
        let set = ResourceSet::from_resources([Resource::new(id("aws_security_group.web"))
            .with_attribute("source", Value::reference(id("aws_security_group.web"), "id"))])
        .unwrap();

        let err = GraphBuilder::new(&registry).build(&set).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cyclic dependency: aws_security_group.web -> aws_security_group.web"
        );
    }

    #[test]
    fn test_mutual_security_groups_cycle() {
        let registry = Registry::builtin();
        let set = ResourceSet::from_resources([
            Resource::new(id("aws_security_group.db"))
                .with_attribute("ingress", Value::reference(id("aws_security_group.web"), "id")),
            Resource::new(id("aws_security_group.web"))
                .with_attribute("egress", Value::reference(id("aws_security_group.db"), "id")),
        ])
        .unwrap();

        let err = GraphBuilder::new(&registry).build(&set).unwrap_err();
        let ValidationError::CyclicDependency { chain } = err else {
            panic!("expected a cycle");
        };
        assert_eq!(
            chain,
            vec!["aws_security_group.db", "aws_security_group.web", "aws_security_group.db"]
        );
    }
}
