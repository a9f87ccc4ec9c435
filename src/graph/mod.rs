//! Workflow graph model: immutable graphs, guarded edges, builder, and
//! structural validation.
//!
//! A [`Graph`] is constructed once through [`GraphBuilder`], validated once
//! (runners call [`GraphValidator`](validator::GraphValidator) on demand and
//! cache the verdict per graph id), and reused across many runs. There is no
//! runtime mutation.

pub mod edge;
pub mod validator;

pub use edge::{Edge, EdgeGuard, WILDCARD, guards};
pub use validator::{GraphIssue, GraphValidationError, GraphValidator};

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::middleware::Middleware;
use crate::node::Node;
use crate::runtimes::config::RetryPolicy;

/// Immutable workflow graph.
///
/// Equality is structural over the topology: graph id, node ids, edges
/// (endpoints + guard presence), entry point, and the cycles flag.
/// Node implementations and middleware are deliberately excluded.
#[derive(Clone)]
pub struct Graph {
    id: String,
    nodes: FxHashMap<String, Arc<dyn Node>>,
    edges: Vec<Edge>,
    entry_point: String,
    allow_cycles: bool,
    middleware: Vec<Arc<dyn Middleware>>,
    retry_policies: FxHashMap<String, RetryPolicy>,
}

impl Graph {
    #[must_use]
    pub fn builder(id: impl Into<String>) -> GraphBuilder {
        GraphBuilder::new(id)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    #[must_use]
    pub fn allow_cycles(&self) -> bool {
        self.allow_cycles
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Node ids, sorted for deterministic iteration.
    #[must_use]
    pub fn node_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// All edges in declaration order.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edges leaving `node_id` (including wildcard edges), in declaration
    /// order.
    pub fn edges_from<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.applies_to(node_id))
    }

    /// Concrete (non-wildcard) out-degree of a node.
    #[must_use]
    pub fn out_degree(&self, node_id: &str) -> usize {
        self.edges
            .iter()
            .filter(|e| e.from == node_id && !e.is_wildcard())
            .count()
    }

    /// Ordered middleware chain applied around every node invocation.
    #[must_use]
    pub fn middleware(&self) -> &[Arc<dyn Middleware>] {
        &self.middleware
    }

    /// Retry policy a node declared at registration, if any.
    #[must_use]
    pub fn retry_policy(&self, node_id: &str) -> Option<&RetryPolicy> {
        self.retry_policies.get(node_id)
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("nodes", &self.node_ids())
            .field("edges", &self.edges)
            .field("entry_point", &self.entry_point)
            .field("allow_cycles", &self.allow_cycles)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

impl PartialEq for Graph {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.entry_point == other.entry_point
            && self.allow_cycles == other.allow_cycles
            && self.node_ids() == other.node_ids()
            && self.edges == other.edges
    }
}

/// Fluent builder for [`Graph`].
///
/// # Examples
///
/// ```
/// use spiceflow::graph::Graph;
/// use spiceflow::nodes::OutputNode;
///
/// let graph = Graph::builder("pipeline")
///     .add_node("out", OutputNode::all_state())
///     .entry_point("out")
///     .build();
/// assert_eq!(graph.id(), "pipeline");
/// ```
pub struct GraphBuilder {
    id: String,
    nodes: FxHashMap<String, Arc<dyn Node>>,
    edges: Vec<Edge>,
    entry_point: Option<String>,
    allow_cycles: bool,
    middleware: Vec<Arc<dyn Middleware>>,
    retry_policies: FxHashMap<String, RetryPolicy>,
}

impl GraphBuilder {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: FxHashMap::default(),
            edges: Vec::new(),
            entry_point: None,
            allow_cycles: false,
            middleware: Vec::new(),
            retry_policies: FxHashMap::default(),
        }
    }

    /// Register a node under an id; replaces any previous registration.
    #[must_use]
    pub fn add_node(mut self, id: impl Into<String>, node: impl Node + 'static) -> Self {
        self.nodes.insert(id.into(), Arc::new(node));
        self
    }

    /// Register an already-shared node.
    #[must_use]
    pub fn add_shared_node(mut self, id: impl Into<String>, node: Arc<dyn Node>) -> Self {
        self.nodes.insert(id.into(), node);
        self
    }

    /// Append an unguarded edge. Declaration order is routing order.
    #[must_use]
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge::new(from, to));
        self
    }

    /// Append a guarded edge.
    #[must_use]
    pub fn add_guarded_edge(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        guard: EdgeGuard,
    ) -> Self {
        self.edges.push(Edge::new(from, to).with_guard(guard));
        self
    }

    #[must_use]
    pub fn entry_point(mut self, id: impl Into<String>) -> Self {
        self.entry_point = Some(id.into());
        self
    }

    /// Permit cycles; without this the validator rejects any back-edge.
    #[must_use]
    pub fn allow_cycles(mut self, allow: bool) -> Self {
        self.allow_cycles = allow;
        self
    }

    /// Append middleware; supplied order is execution order (outermost
    /// first).
    #[must_use]
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Declare a retry policy for a node; without one, a failing node
    /// transitions the run to `Failed` on its first failure.
    #[must_use]
    pub fn with_node_retry(mut self, node_id: impl Into<String>, policy: RetryPolicy) -> Self {
        self.retry_policies.insert(node_id.into(), policy);
        self
    }

    /// Finalize the immutable graph value.
    ///
    /// No validation happens here; call
    /// [`GraphValidator::validate`](validator::GraphValidator::validate)
    /// before first execution (runners do this on demand).
    #[must_use]
    pub fn build(self) -> Graph {
        let entry_point = self.entry_point.unwrap_or_default();
        Graph {
            id: self.id,
            nodes: self.nodes,
            edges: self.edges,
            entry_point,
            allow_cycles: self.allow_cycles,
            middleware: self.middleware,
            retry_policies: self.retry_policies,
        }
    }
}
