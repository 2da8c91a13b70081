//! Build graph: cycle detection and build ordering.
//!
//! An edge `A -> B` means "A depends on B", so B is built first. Names that
//! only ever appear as dependency targets are leaves with no dependencies
//! of their own.

use crate::source::DependencySet;
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;
use tracing::{debug, trace};

/// The graph cannot be ordered because it contains a cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("circular dependency detected: {}", .cycle.join(" -> "))]
pub struct CycleError {
    /// The nodes on the cycle, starting and ending with the same name.
    pub cycle: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Node {
    name: String,
    dependencies: Vec<String>,
}

/// Dependency edges between named build units.
///
/// Nodes keep the order they were first added in. That order is the
/// tie-breaker whenever several nodes become buildable at once, so the
/// same input always produces the same build order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

/// DFS marker for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

impl BuildGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from `(name, dependencies)` pairs, in iteration order.
    pub fn from_edges<I, K, D, S>(edges: I) -> Self
    where
        I: IntoIterator<Item = (K, D)>,
        K: Into<String>,
        D: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut graph = Self::new();
        for (name, deps) in edges {
            graph.add_node(name, deps);
        }
        graph
    }

    /// A graph with one root node that depends on every entry of `set`.
    #[must_use]
    pub fn for_package(root: &str, set: &DependencySet) -> Self {
        let mut graph = Self::new();
        graph.add_node(root, set.names());
        graph
    }

    /// Add a node with its dependencies.
    ///
    /// Adding a name that already exists replaces its dependency list but
    /// keeps its original position.
    pub fn add_node<D, S>(&mut self, name: impl Into<String>, dependencies: D)
    where
        D: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let dependencies = dependencies.into_iter().map(Into::into).collect();

        if let Some(&idx) = self.index.get(&name) {
            trace!("Replacing dependencies of node: {}", name);
            self.nodes[idx].dependencies = dependencies;
            return;
        }

        self.index.insert(name.clone(), self.nodes.len());
        self.nodes.push(Node { name, dependencies });
    }

    /// Returns the number of declared nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no nodes were declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if `name` was declared as a node.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Declared node names, in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name.as_str())
    }

    /// Direct dependencies of a declared node.
    #[must_use]
    pub fn dependencies(&self, name: &str) -> Option<&[String]> {
        self.index
            .get(name)
            .map(|&idx| self.nodes[idx].dependencies.as_slice())
    }

    /// Index every name, including undeclared targets appended after the
    /// declared nodes, and de-duplicate each dependency list.
    fn adjacency(&self) -> (Vec<&str>, Vec<Vec<usize>>) {
        let mut names: Vec<&str> = self.nodes.iter().map(|n| n.name.as_str()).collect();
        let mut lookup: HashMap<&str, usize> =
            names.iter().enumerate().map(|(i, n)| (*n, i)).collect();

        let mut edges = Vec::with_capacity(names.len());
        for node in &self.nodes {
            let mut seen = HashSet::new();
            let mut targets = Vec::new();
            for dep in &node.dependencies {
                let idx = *lookup.entry(dep.as_str()).or_insert_with(|| {
                    names.push(dep.as_str());
                    names.len() - 1
                });
                if seen.insert(idx) {
                    targets.push(idx);
                }
            }
            edges.push(targets);
        }
        edges.resize(names.len(), Vec::new());

        (names, edges)
    }

    /// Returns true if the graph contains a cycle.
    #[must_use]
    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// Find a cycle with a depth-first search.
    ///
    /// Returns the path of the first cycle found, with the repeated node at
    /// both ends (`a -> b -> a`).
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let (names, edges) = self.adjacency();
        let mut marks = vec![Mark::Unvisited; names.len()];

        for start in 0..names.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }

            // (node, index of the next dependency to visit)
            let mut stack = vec![(start, 0usize)];
            marks[start] = Mark::OnStack;

            while let Some((node, next)) = stack.last_mut() {
                let node = *node;
                let Some(&dep) = edges[node].get(*next) else {
                    marks[node] = Mark::Done;
                    stack.pop();
                    continue;
                };
                *next += 1;

                match marks[dep] {
                    Mark::OnStack => {
                        let from = stack.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                        let mut cycle: Vec<String> = stack[from..]
                            .iter()
                            .map(|(n, _)| names[*n].to_string())
                            .collect();
                        cycle.push(names[dep].to_string());
                        debug!("Cycle found: {}", cycle.join(" -> "));
                        return Some(cycle);
                    }
                    Mark::Unvisited => {
                        marks[dep] = Mark::OnStack;
                        stack.push((dep, 0));
                    }
                    Mark::Done => {}
                }
            }
        }

        None
    }

    /// Compute a build order with Kahn's algorithm.
    ///
    /// A node's in-degree is the number of distinct dependencies it has.
    /// Nodes with none are ready first; finishing a node releases the nodes
    /// that depend on it. Every node appears after all of its dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`CycleError`] if some nodes can never become ready.
    pub fn topological_order(&self) -> Result<Vec<String>, CycleError> {
        let (names, edges) = self.adjacency();

        let mut remaining: Vec<usize> = edges.iter().map(Vec::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); names.len()];
        for (node, targets) in edges.iter().enumerate() {
            for &target in targets {
                dependents[target].push(node);
            }
        }

        let mut ready: VecDeque<usize> = (0..names.len()).filter(|&i| remaining[i] == 0).collect();
        let mut order = Vec::with_capacity(names.len());

        while let Some(node) = ready.pop_front() {
            order.push(names[node].to_string());
            for &dependent in &dependents[node] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.push_back(dependent);
                }
            }
        }

        if order.len() != names.len() {
            let cycle = self.find_cycle().unwrap_or_else(|| {
                (0..names.len())
                    .filter(|&i| remaining[i] > 0)
                    .map(|i| names[i].to_string())
                    .collect()
            });
            return Err(CycleError { cycle });
        }

        trace!("Build order: {:?}", order);
        Ok(order)
    }
}

impl<K, D, S> FromIterator<(K, D)> for BuildGraph
where
    K: Into<String>,
    D: IntoIterator<Item = S>,
    S: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, D)>>(iter: T) -> Self {
        Self::from_edges(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::DependencySource;

    fn graph(edges: &[(&str, &[&str])]) -> BuildGraph {
        BuildGraph::from_edges(edges.iter().map(|(n, d)| (*n, d.iter().copied())))
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn simple_chain() {
        let g = graph(&[("a", &["b"]), ("b", &[])]);
        assert!(!g.has_cycle());
        assert_eq!(g.topological_order().unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn two_node_cycle() {
        let g = graph(&[("a", &["b"]), ("b", &["a"])]);
        assert!(g.has_cycle());
        let err = g.topological_order().unwrap_err();
        assert_eq!(err.cycle, vec!["a", "b", "a"]);
        assert_eq!(err.to_string(), "circular dependency detected: a -> b -> a");
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let g = graph(&[("a", &["a"])]);
        assert!(g.has_cycle());
        assert_eq!(g.topological_order().unwrap_err().cycle, vec!["a", "a"]);
    }

    #[test]
    fn cycle_behind_acyclic_prefix() {
        let g = graph(&[("app", &["x"]), ("x", &["y"]), ("y", &["z"]), ("z", &["x"])]);
        assert_eq!(g.find_cycle().unwrap(), vec!["x", "y", "z", "x"]);
        assert!(g.topological_order().is_err());
    }

    #[test]
    fn diamond_orders_dependencies_first() {
        let g = graph(&[
            ("app", &["left", "right"]),
            ("left", &["core"]),
            ("right", &["core"]),
            ("core", &[]),
        ]);
        let order = g.topological_order().unwrap();
        assert_eq!(order, vec!["core", "left", "right", "app"]);
    }

    #[test]
    fn ties_follow_insertion_order() {
        let g = graph(&[("c", &[]), ("a", &[]), ("b", &[])]);
        assert_eq!(g.topological_order().unwrap(), vec!["c", "a", "b"]);
        let g = graph(&[("b", &[]), ("c", &[]), ("a", &[])]);
        assert_eq!(g.topological_order().unwrap(), vec!["b", "c", "a"]);
    }

    #[test]
    fn duplicate_dependencies_count_once() {
        let g = graph(&[("a", &["b", "b", "b"]), ("b", &[])]);
        assert_eq!(g.topological_order().unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn undeclared_targets_are_leaves() {
        let g = graph(&[("app", &["lib", "util"]), ("lib", &["util"])]);
        assert!(!g.has_cycle());
        let order = g.topological_order().unwrap();
        assert_eq!(order, vec!["util", "lib", "app"]);
        assert!(!g.contains("util"));
    }

    #[test]
    fn every_node_follows_its_dependencies() {
        let edges: &[(&str, &[&str])] = &[
            ("web", &["http", "json", "log"]),
            ("http", &["net", "log"]),
            ("json", &["alloc"]),
            ("net", &["alloc", "log"]),
            ("log", &[]),
            ("cli", &["web", "json"]),
        ];
        let order = graph(edges).topological_order().unwrap();
        for (node, deps) in edges {
            for dep in *deps {
                assert!(position(&order, dep) < position(&order, node), "{dep} before {node}");
            }
        }
    }

    #[test]
    fn order_is_reproducible() {
        let edges: &[(&str, &[&str])] = &[("a", &["c"]), ("b", &["c"]), ("c", &[]), ("d", &[])];
        let first = graph(edges).topological_order().unwrap();
        for _ in 0..5 {
            assert_eq!(graph(edges).topological_order().unwrap(), first);
        }
    }

    #[test]
    fn re_adding_node_keeps_position() {
        let mut g = BuildGraph::new();
        g.add_node("a", ["b"]);
        g.add_node("b", Vec::<String>::new());
        g.add_node("a", Vec::<String>::new());
        assert_eq!(g.len(), 2);
        assert_eq!(g.dependencies("a"), Some(&[][..]));
        assert_eq!(g.topological_order().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn empty_graph_orders_to_nothing() {
        let g = BuildGraph::new();
        assert!(g.is_empty());
        assert!(!g.has_cycle());
        assert!(g.topological_order().unwrap().is_empty());
    }

    #[test]
    fn package_graph_builds_root_last() {
        let mut set = DependencySet::new();
        set.insert("json", DependencySource::registry("1.0.0"));
        set.insert("http", DependencySource::registry("2.0.0"));
        let g = BuildGraph::for_package("main", &set);
        assert_eq!(g.topological_order().unwrap(), vec!["http", "json", "main"]);
    }
}
