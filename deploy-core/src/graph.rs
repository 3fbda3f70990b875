//! Dependency graph over the services of a plan.
//!
//! Nodes are [`ServiceSpec`]s, edges point from a dependency to its dependent.
//! The topological order is computed with Kahn's algorithm, breaking ties by
//! declaration order so two runs of the same plan always walk the services in
//! the same sequence.

use crate::error::{DeployError, Result};
use crate::types::ServiceSpec;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::{debug, instrument};

/// Directed acyclic graph of services.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<ServiceSpec>,
    index: HashMap<String, usize>,
    /// `dependencies[i]`: nodes that must be Ready before `i`
    dependencies: Vec<Vec<usize>>,
    /// `dependents[i]`: nodes waiting on `i`
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from specs in declaration order, adding one edge per
    /// `depends_on` entry.
    #[instrument(skip(specs))]
    pub fn from_specs(specs: impl IntoIterator<Item = ServiceSpec>) -> Result<Self> {
        let mut graph = Self::new();
        for spec in specs {
            graph.add_node(spec)?;
        }

        let edges: Vec<(String, String)> = graph
            .nodes
            .iter()
            .flat_map(|s| s.depends_on.iter().map(move |d| (d.clone(), s.name.clone())))
            .collect();
        for (before, after) in edges {
            graph.add_edge(&before, &after)?;
        }

        debug!(services = graph.len(), "Built dependency graph");
        Ok(graph)
    }

    /// Add a node. Names must be unique.
    pub fn add_node(&mut self, spec: ServiceSpec) -> Result<()> {
        if self.index.contains_key(&spec.name) {
            return Err(DeployError::DuplicateService { service: spec.name });
        }
        self.index.insert(spec.name.clone(), self.nodes.len());
        self.nodes.push(spec);
        self.dependencies.push(Vec::new());
        self.dependents.push(Vec::new());
        Ok(())
    }

    /// Declare that `before` must be Ready before `after` starts.
    pub fn add_edge(&mut self, before: &str, after: &str) -> Result<()> {
        let to = self.index_of(after).ok_or_else(|| DeployError::PlanInvalid {
            reason: format!("unknown service '{}'", after),
        })?;
        let from = self.index_of(before).ok_or_else(|| DeployError::MissingDependency {
            service: after.to_string(),
            dependency: before.to_string(),
        })?;

        if !self.dependencies[to].contains(&from) {
            self.dependencies[to].push(from);
            self.dependents[from].push(to);
        }
        Ok(())
    }

    /// Node indices in dependency order, ties broken by declaration order.
    pub fn order_indices(&self) -> Result<Vec<usize>> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &dependent in &self.dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() != self.nodes.len() {
            let service = self
                .find_cycle()
                .map(|cycle| cycle.join(" -> "))
                .unwrap_or_else(|| "unknown".to_string());
            return Err(DeployError::CycleDetected { service });
        }

        debug!(order = ?order.iter().map(|&i| &self.nodes[i].name).collect::<Vec<_>>(), "Resolved order");
        Ok(order)
    }

    /// Services in dependency order.
    pub fn topological_order(&self) -> Result<Vec<&ServiceSpec>> {
        Ok(self.order_indices()?.into_iter().map(|i| &self.nodes[i]).collect())
    }

    /// Locate one cycle as a list of names, first name repeated at the end.
    fn find_cycle(&self) -> Option<Vec<String>> {
        fn visit(
            graph: &DependencyGraph,
            node: usize,
            visited: &mut HashSet<usize>,
            stack: &mut Vec<usize>,
        ) -> Option<Vec<usize>> {
            if let Some(pos) = stack.iter().position(|&n| n == node) {
                let mut cycle = stack[pos..].to_vec();
                cycle.push(node);
                return Some(cycle);
            }
            if !visited.insert(node) {
                return None;
            }
            stack.push(node);
            for &dep in &graph.dependencies[node] {
                if let Some(cycle) = visit(graph, dep, visited, stack) {
                    return Some(cycle);
                }
            }
            stack.pop();
            None
        }

        let mut visited = HashSet::new();
        for start in 0..self.nodes.len() {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(self, start, &mut visited, &mut stack) {
                return Some(cycle.into_iter().map(|i| self.nodes[i].name.clone()).collect());
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn spec(&self, index: usize) -> &ServiceSpec {
        &self.nodes[index]
    }

    pub fn get(&self, name: &str) -> Option<&ServiceSpec> {
        self.index_of(name).map(|i| &self.nodes[i])
    }

    /// Specs in declaration order.
    pub fn specs(&self) -> &[ServiceSpec] {
        &self.nodes
    }

    pub fn dependencies(&self, index: usize) -> &[usize] {
        &self.dependencies[index]
    }

    pub fn dependents(&self, index: usize) -> &[usize] {
        &self.dependents[index]
    }

    /// Every node `index` transitively depends on.
    pub fn ancestors(&self, index: usize) -> HashSet<usize> {
        self.reach(index, &self.dependencies)
    }

    /// Every node that transitively depends on `index`.
    pub fn descendants(&self, index: usize) -> HashSet<usize> {
        self.reach(index, &self.dependents)
    }

    fn reach(&self, index: usize, adjacency: &[Vec<usize>]) -> HashSet<usize> {
        let mut seen = HashSet::new();
        let mut queue = vec![index];
        while let Some(node) = queue.pop() {
            for &next in &adjacency[node] {
                if seen.insert(next) {
                    queue.push(next);
                }
            }
        }
        seen
    }
}
