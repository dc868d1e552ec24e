//! Dependency graph management using `petgraph`.
//!
//! Nodes are resources; an edge points from a dependency to the resource
//! that depends on it. Ordering is deterministic: among resources that are
//! ready at the same time, the one declared first comes first.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use cirrus_common::error::{CirrusError, Result};
use petgraph::Direction;
use petgraph::graph::NodeIndex;

/// A dependency graph of resources.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: petgraph::Graph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Creates an empty dependency graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource node, returning the existing node if already present.
    pub fn add_resource(&mut self, name: impl Into<String>) -> NodeIndex {
        let name = name.into();
        if let Some(&index) = self.nodes.get(&name) {
            return index;
        }
        let index = self.graph.add_node(name.clone());
        let _ = self.nodes.insert(name, index);
        index
    }

    /// Adds a dependency edge: `dependent` depends on `dependency`.
    ///
    /// The graph edge points from `dependency` to `dependent`. Repeated
    /// calls for the same pair add a single edge.
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) {
        let dependent = self.add_resource(dependent);
        let dependency = self.add_resource(dependency);
        let _ = self.graph.update_edge(dependency, dependent, ());
    }

    /// Returns the number of resources.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of distinct dependency edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns `true` if the graph has a node called `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Direct dependencies of `name`, in declaration order.
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Direct dependents of `name`, in declaration order.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Every resource that directly or indirectly depends on `name`.
    pub fn transitive_dependents(&self, name: &str) -> Vec<&str> {
        let Some(&start) = self.nodes.get(name) else {
            return Vec::new();
        };
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        let _ = seen.remove(&start);
        let mut found: Vec<NodeIndex> = seen.into_iter().collect();
        found.sort_unstable();
        found.into_iter().map(|i| self.graph[i].as_str()).collect()
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
        let Some(&index) = self.nodes.get(name) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(index, direction).collect();
        found.sort_unstable();
        found.into_iter().map(|i| self.graph[i].as_str()).collect()
    }

    /// Returns a topological ordering of resources.
    ///
    /// Dependencies appear before the resources that depend on them; ties
    /// are broken by insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`CirrusError::Cycle`] naming one offending cycle if the
    /// graph is not acyclic. A resource depending on itself is a cycle.
    pub fn resolve_order(&self) -> Result<Vec<String>> {
        if petgraph::algo::is_cyclic_directed(&self.graph) {
            let path = self.find_cycle().unwrap_or_default();
            tracing::debug!(cycle = ?path, "dependency cycle found");
            return Err(CirrusError::Cycle { path });
        }

        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|i| self.graph.neighbors_directed(i, Direction::Incoming).count())
            .collect();
        let mut ready: BinaryHeap<Reverse<NodeIndex>> = self
            .graph
            .node_indices()
            .filter(|i| in_degree[i.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(self.graph[node].clone());
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                let degree = &mut in_degree[next.index()];
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
        Ok(order)
    }

    /// Finds one cycle, returned with its first resource repeated at the end.
    ///
    /// The cycle through the earliest-declared resource that sits on any
    /// cycle is reported.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let component = petgraph::algo::tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || scc.iter().any(|&n| self.graph.contains_edge(n, n)))
            .min_by_key(|scc| scc.iter().min().copied())?;
        let members: HashSet<NodeIndex> = component.iter().copied().collect();
        let start = *component.iter().min()?;

        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            let mut next: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(node, Direction::Outgoing)
                .filter(|n| members.contains(n))
                .collect();
            next.sort_unstable();
            for candidate in next {
                if candidate == start {
                    return Some(self.cycle_path(start, node, &parent));
                }
                if let std::collections::hash_map::Entry::Vacant(entry) = parent.entry(candidate) {
                    let _ = entry.insert(node);
                    queue.push_back(candidate);
                }
            }
        }
        None
    }

    fn cycle_path(
        &self,
        start: NodeIndex,
        last: NodeIndex,
        parent: &HashMap<NodeIndex, NodeIndex>,
    ) -> Vec<String> {
        let mut reversed = Vec::new();
        let mut current = last;
        while current != start {
            reversed.push(current);
            match parent.get(&current) {
                Some(&previous) => current = previous,
                None => break,
            }
        }
        std::iter::once(start)
            .chain(reversed.into_iter().rev())
            .chain(std::iter::once(start))
            .map(|i| self.graph[i].clone())
            .collect()
    }

    /// Renders the graph in Graphviz DOT format.
    pub fn to_dot(&self) -> String {
        let dot = petgraph::dot::Dot::with_config(&self.graph, &[petgraph::dot::Config::EdgeNoLabel]);
        format!("{dot:?}")
    }
}
