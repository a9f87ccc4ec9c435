//! Static structural validation of workflow graphs.
//!
//! Validation is idempotent and collects **every** detected problem rather
//! than bailing on the first one. Runners validate on demand and cache the
//! verdict per graph id; a validated graph never produces a
//! [`GraphValidationError`] at runtime.

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use super::Graph;
use super::edge::WILDCARD;

/// A single structural problem found in a graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphIssue {
    /// The node set is empty.
    EmptyGraph,
    /// The entry point is not a member of the node set.
    UnknownEntryPoint { entry: String },
    /// An edge leaves a node that does not exist.
    UnknownEdgeSource { from: String, to: String },
    /// An edge targets a node that does not exist.
    UnknownEdgeTarget { from: String, to: String },
    /// A wildcard was used as an edge target; only sources may be wildcard.
    WildcardTarget { from: String },
    /// The graph contains at least one cycle and `allow_cycles` is off.
    /// Lists every node involved in a detected cycle.
    CycleDetected { nodes: Vec<String> },
    /// Nodes that cannot be reached from the entry point.
    Unreachable { nodes: Vec<String> },
}

impl std::fmt::Display for GraphIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyGraph => write!(f, "graph has no nodes"),
            Self::UnknownEntryPoint { entry } => {
                write!(f, "entry point `{entry}` is not a node in the graph")
            }
            Self::UnknownEdgeSource { from, to } => {
                write!(f, "edge {from} -> {to} leaves an unknown node")
            }
            Self::UnknownEdgeTarget { from, to } => {
                write!(f, "edge {from} -> {to} targets an unknown node")
            }
            Self::WildcardTarget { from } => {
                write!(f, "edge {from} -> * uses a wildcard target; only sources may be wildcard")
            }
            Self::CycleDetected { nodes } => {
                write!(f, "graph contains cycles involving {}", nodes.join(", "))
            }
            Self::Unreachable { nodes } => {
                write!(
                    f,
                    "nodes unreachable from the entry point: {}",
                    nodes.join(", ")
                )
            }
        }
    }
}

/// Validation failure carrying every detected [`GraphIssue`].
#[derive(Debug, Error, Diagnostic)]
#[error("graph validation failed: {}", self.render())]
#[diagnostic(
    code(spiceflow::graph::validation),
    help("Fix every listed issue; validation re-runs are idempotent and report the same set.")
)]
pub struct GraphValidationError {
    pub issues: Vec<GraphIssue>,
}

impl GraphValidationError {
    fn render(&self) -> String {
        self.issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Whether any issue of the cycle kind was reported.
    #[must_use]
    pub fn has_cycle(&self) -> bool {
        self.issues
            .iter()
            .any(|i| matches!(i, GraphIssue::CycleDetected { .. }))
    }
}

/// Static structural checks over a [`Graph`].
pub struct GraphValidator;

impl GraphValidator {
    /// Run every structural rule and return the full issue set on failure.
    pub fn validate(graph: &Graph) -> Result<(), GraphValidationError> {
        let mut issues = Vec::new();

        if graph.node_count() == 0 {
            issues.push(GraphIssue::EmptyGraph);
        }

        if graph.node_count() > 0 && !graph.has_node(graph.entry_point()) {
            issues.push(GraphIssue::UnknownEntryPoint {
                entry: graph.entry_point().to_string(),
            });
        }

        for edge in graph.edges() {
            if edge.to == WILDCARD {
                issues.push(GraphIssue::WildcardTarget {
                    from: edge.from.clone(),
                });
                continue;
            }
            if !edge.is_wildcard() && !graph.has_node(&edge.from) {
                issues.push(GraphIssue::UnknownEdgeSource {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                });
            }
            if !graph.has_node(&edge.to) {
                issues.push(GraphIssue::UnknownEdgeTarget {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                });
            }
        }

        if !graph.allow_cycles() {
            let cycle_nodes = Self::cycle_participants(graph);
            if !cycle_nodes.is_empty() {
                issues.push(GraphIssue::CycleDetected { nodes: cycle_nodes });
            }
        }

        if graph.node_count() > 0 && graph.has_node(graph.entry_point()) {
            let unreachable = Self::unreachable_nodes(graph);
            if !unreachable.is_empty() {
                issues.push(GraphIssue::Unreachable { nodes: unreachable });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(GraphValidationError { issues })
        }
    }

    /// Nodes with zero concrete out-edges, sorted.
    ///
    /// Wildcard edges are dynamic routing and do not count toward
    /// out-degree.
    #[must_use]
    pub fn find_terminal_nodes(graph: &Graph) -> Vec<String> {
        let mut terminal: Vec<String> = graph
            .node_ids()
            .into_iter()
            .filter(|id| graph.out_degree(id) == 0)
            .map(str::to_string)
            .collect();
        terminal.sort();
        terminal
    }

    /// Whether the concrete edge set is acyclic.
    #[must_use]
    pub fn is_dag(graph: &Graph) -> bool {
        Self::cycle_participants(graph).is_empty()
    }

    /// DFS with a recursion stack over the concrete edges; every node on
    /// the stack when a back-edge closes is reported. Wildcard edges are
    /// dynamic routing and are excluded from cycle analysis.
    fn cycle_participants(graph: &Graph) -> Vec<String> {
        let adjacency = Self::concrete_adjacency(graph);
        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut in_cycle: FxHashSet<&str> = FxHashSet::default();
        let mut stack: Vec<&str> = Vec::new();
        let mut on_stack: FxHashSet<&str> = FxHashSet::default();

        // Iterative DFS per root for deterministic reporting.
        for root in graph.node_ids() {
            if visited.contains(root) {
                continue;
            }
            Self::dfs_collect_cycles(
                root,
                &adjacency,
                &mut visited,
                &mut stack,
                &mut on_stack,
                &mut in_cycle,
            );
        }

        let mut nodes: Vec<String> = in_cycle.into_iter().map(str::to_string).collect();
        nodes.sort();
        nodes
    }

    fn dfs_collect_cycles<'g>(
        node: &'g str,
        adjacency: &FxHashMap<&'g str, Vec<&'g str>>,
        visited: &mut FxHashSet<&'g str>,
        stack: &mut Vec<&'g str>,
        on_stack: &mut FxHashSet<&'g str>,
        in_cycle: &mut FxHashSet<&'g str>,
    ) {
        visited.insert(node);
        stack.push(node);
        on_stack.insert(node);

        if let Some(successors) = adjacency.get(node) {
            for &next in successors {
                if !visited.contains(next) {
                    Self::dfs_collect_cycles(next, adjacency, visited, stack, on_stack, in_cycle);
                } else if on_stack.contains(next) {
                    // Back-edge: everything from `next` to the stack top is
                    // part of the cycle.
                    if let Some(pos) = stack.iter().position(|&n| n == next) {
                        for &member in &stack[pos..] {
                            in_cycle.insert(member);
                        }
                    }
                }
            }
        }

        stack.pop();
        on_stack.remove(node);
    }

    /// Nodes not reachable from the entry point, sorted. Wildcard edges
    /// contribute their target set as reachable from every node already
    /// reachable.
    fn unreachable_nodes(graph: &Graph) -> Vec<String> {
        let adjacency = Self::concrete_adjacency(graph);
        let wildcard_targets: Vec<&str> = graph
            .edges()
            .iter()
            .filter(|e| e.is_wildcard() && graph.has_node(&e.to))
            .map(|e| e.to.as_str())
            .collect();

        let mut reachable: FxHashSet<&str> = FxHashSet::default();
        let mut queue: Vec<&str> = vec![graph.entry_point()];
        while let Some(node) = queue.pop() {
            if !reachable.insert(node) {
                continue;
            }
            if let Some(successors) = adjacency.get(node) {
                for &next in successors {
                    if !reachable.contains(next) {
                        queue.push(next);
                    }
                }
            }
            // Anything reachable can take a wildcard edge.
            for &target in &wildcard_targets {
                if !reachable.contains(target) {
                    queue.push(target);
                }
            }
        }

        let mut unreachable: Vec<String> = graph
            .node_ids()
            .into_iter()
            .filter(|id| !reachable.contains(id))
            .map(str::to_string)
            .collect();
        unreachable.sort();
        unreachable
    }

    fn concrete_adjacency<'g>(graph: &'g Graph) -> FxHashMap<&'g str, Vec<&'g str>> {
        let mut adjacency: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
        for edge in graph.edges() {
            if edge.is_wildcard() || !graph.has_node(&edge.from) || !graph.has_node(&edge.to) {
                continue;
            }
            adjacency
                .entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
        }
        adjacency
    }
}
