//! Dependency graph over declared resources.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Write;

use crate::error::ValidationError;
use crate::model::ResourceId;

/// How an edge was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Derived from an attribute reference.
    Implicit,
    /// Declared through `depends_on`.
    Explicit,
    /// Both referenced and listed in `depends_on`.
    Both,
}

impl EdgeKind {
    const fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Implicit, Self::Implicit) => Self::Implicit,
            (Self::Explicit, Self::Explicit) => Self::Explicit,
            _ => Self::Both,
        }
    }
}

/// Directed graph: an edge `a -> b` means "a depends on b".
///
/// Ordering never distinguishes edge kinds; they are kept for display.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    dependencies: BTreeMap<ResourceId, BTreeMap<ResourceId, EdgeKind>>,
    dependents: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
}

/// DFS colors for cycle detection.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node.
    pub fn add_node(&mut self, id: ResourceId) {
        self.dependents.entry(id.clone()).or_default();
        self.dependencies.entry(id).or_default();
    }

    /// Adds an edge `from -> to`, merging kinds if it already exists.
    pub fn add_edge(&mut self, from: &ResourceId, to: &ResourceId, kind: EdgeKind) {
        self.add_node(from.clone());
        self.add_node(to.clone());

        let edges = self.dependencies.entry(from.clone()).or_default();
        edges
            .entry(to.clone())
            .and_modify(|existing| *existing = existing.merge(kind))
            .or_insert(kind);

        self.dependents.entry(to.clone()).or_default().insert(from.clone());
    }

    /// Returns true if the node exists.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.dependencies.contains_key(id)
    }

    /// Iterates nodes in identity order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceId> {
        self.dependencies.keys()
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.dependencies.len()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(BTreeMap::len).sum()
    }

    /// Iterates all edges as `(from, to, kind)`.
    pub fn edges(&self) -> impl Iterator<Item = (&ResourceId, &ResourceId, EdgeKind)> {
        self.dependencies
            .iter()
            .flat_map(|(from, tos)| tos.iter().map(move |(to, kind)| (from, to, *kind)))
    }

    /// Direct dependencies of a node.
    pub fn dependencies(&self, id: &ResourceId) -> impl Iterator<Item = &ResourceId> {
        self.dependencies.get(id).into_iter().flat_map(BTreeMap::keys)
    }

    /// Direct dependents of a node.
    pub fn dependents(&self, id: &ResourceId) -> impl Iterator<Item = &ResourceId> {
        self.dependents.get(id).into_iter().flatten()
    }

    /// Kind of the edge `from -> to`, if present.
    #[must_use]
    pub fn edge_kind(&self, from: &ResourceId, to: &ResourceId) -> Option<EdgeKind> {
        self.dependencies.get(from).and_then(|e| e.get(to)).copied()
    }

    /// Every node that reaches `id` through dependency edges.
    #[must_use]
    pub fn transitive_dependents(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&ResourceId> = self.dependents(id).collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next.clone()) {
                queue.extend(self.dependents(next));
            }
        }
        seen
    }

    /// Finds a cycle, returned as a chain whose first node is repeated last.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<ResourceId>> {
        let mut marks: BTreeMap<&ResourceId, Mark> = BTreeMap::new();
        let mut path: Vec<&ResourceId> = Vec::new();

        for start in self.dependencies.keys() {
            if marks.contains_key(start) {
                continue;
            }
            if let Some(cycle) = self.visit(start, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        node: &'a ResourceId,
        marks: &mut BTreeMap<&'a ResourceId, Mark>,
        path: &mut Vec<&'a ResourceId>,
    ) -> Option<Vec<ResourceId>> {
        marks.insert(node, Mark::Visiting);
        path.push(node);

        for dep in self.dependencies(node) {
            match marks.get(dep) {
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                    let mut chain: Vec<ResourceId> =
                        path[start..].iter().map(|n| (*n).clone()).collect();
                    chain.push(dep.clone());
                    return Some(chain);
                }
                Some(Mark::Done) => {}
                None => {
                    if let Some(cycle) = self.visit(dep, marks, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        marks.insert(node, Mark::Done);
        None
    }

    /// Orders nodes so every dependency precedes its dependents.
    ///
    /// Uses Kahn's algorithm with identity order as the tie-break.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::CyclicDependency`] if the graph has a cycle.
    pub fn topological_order(&self) -> std::result::Result<Vec<ResourceId>, ValidationError> {
        let mut remaining: BTreeMap<&ResourceId, usize> = self
            .dependencies
            .iter()
            .map(|(id, deps)| (id, deps.len()))
            .collect();

        let mut ready: BTreeSet<&ResourceId> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(remaining.len());
        while let Some(next) = ready.pop_first() {
            remaining.remove(next);
            order.push(next.clone());
            for dependent in self.dependents(next) {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() == self.node_count() {
            Ok(order)
        } else {
            let chain = self.find_cycle().unwrap_or_default();
            Err(ValidationError::CyclicDependency {
                chain: chain.iter().map(ToString::to_string).collect(),
            })
        }
    }

    /// Renders the graph in Graphviz DOT format.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph landform {\n  rankdir = \"RL\";\n");
        for node in self.nodes() {
            let _ = writeln!(out, "  \"{node}\";");
        }
        for (from, to, kind) in self.edges() {
            let style = match kind {
                EdgeKind::Implicit => "solid",
                EdgeKind::Explicit => "dashed",
                EdgeKind::Both => "bold",
            };
            let _ = writeln!(out, "  \"{from}\" -> \"{to}\" [style = {style}];");
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&id("aws_route_table.public"), &id("aws_internet_gateway.main"), EdgeKind::Implicit);
        graph.add_edge(&id("aws_internet_gateway.main"), &id("aws_vpc.main"), EdgeKind::Implicit);

        let order = graph.topological_order().unwrap();
        assert_eq!(
            order,
            vec![
                id("aws_vpc.main"),
                id("aws_internet_gateway.main"),
                id("aws_route_table.public")
            ]
        );
    }

    #[test]
    fn test_edge_kinds_merge() {
        let mut graph = DependencyGraph::new();
        let a = id("aws_nat_gateway.main");
        let b = id("aws_internet_gateway.main");
        graph.add_edge(&a, &b, EdgeKind::Explicit);
        assert_eq!(graph.edge_kind(&a, &b), Some(EdgeKind::Explicit));
        graph.add_edge(&a, &b, EdgeKind::Implicit);
        assert_eq!(graph.edge_kind(&a, &b), Some(EdgeKind::Both));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_find_cycle_reports_chain() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&id("t.a"), &id("t.b"), EdgeKind::Implicit);
        graph.add_edge(&id("t.b"), &id("t.c"), EdgeKind::Implicit);
        graph.add_edge(&id("t.c"), &id("t.a"), EdgeKind::Explicit);

        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle, vec![id("t.a"), id("t.b"), id("t.c"), id("t.a")]);
        assert!(matches!(
            graph.topological_order(),
            Err(ValidationError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_transitive_dependents() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&id("t.b"), &id("t.a"), EdgeKind::Implicit);
        graph.add_edge(&id("t.c"), &id("t.b"), EdgeKind::Implicit);
        graph.add_node(id("t.d"));

        let dependents = graph.transitive_dependents(&id("t.a"));
        assert_eq!(dependents, BTreeSet::from([id("t.b"), id("t.c")]));
        assert!(graph.transitive_dependents(&id("t.d")).is_empty());
    }
}
