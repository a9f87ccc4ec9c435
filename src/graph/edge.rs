//! Edges and routing guards.
//!
//! An edge connects two nodes and carries an optional guard predicate over
//! the producing node's result. Guards are evaluated in edge declaration
//! order; the first edge whose guard returns `true` is taken.

use std::sync::Arc;

use serde_json::Value;

use crate::node::NodeResult;

/// Wildcard source: the edge applies to every node in the graph.
///
/// Legal for `from` only; the validator rejects a wildcard target.
pub const WILDCARD: &str = "*";

/// Guard predicate over the result of the node an edge leaves.
pub type EdgeGuard = Arc<dyn Fn(&NodeResult) -> bool + Send + Sync>;

/// Directed connection with an optional guard.
#[derive(Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub guard: Option<EdgeGuard>,
}

impl Edge {
    /// Unguarded edge; always matches.
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            guard: None,
        }
    }

    #[must_use]
    pub fn with_guard(mut self, guard: EdgeGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Whether this edge leaves the given node (directly or via wildcard).
    #[must_use]
    pub fn applies_to(&self, node_id: &str) -> bool {
        self.from == node_id || self.from == WILDCARD
    }

    /// Evaluate the guard against a node result. Unguarded edges match.
    #[must_use]
    pub fn matches(&self, result: &NodeResult) -> bool {
        match &self.guard {
            Some(guard) => guard(result),
            None => true,
        }
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.from == WILDCARD
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Edge")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

/// Topological equality: endpoints plus guard presence. Guard closures
/// themselves cannot be compared.
impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.from == other.from
            && self.to == other.to
            && self.guard.is_some() == other.guard.is_some()
    }
}

/// Common guard constructors.
pub mod guards {
    use super::*;

    /// Always matches; identical to omitting the guard but useful when an
    /// API requires one.
    #[must_use]
    pub fn always() -> EdgeGuard {
        Arc::new(|_| true)
    }

    /// Matches when the result's `decision` data field equals `expected`.
    /// This is the routing convention of
    /// [`DecisionNode`](crate::nodes::DecisionNode).
    #[must_use]
    pub fn decision_is(expected: bool) -> EdgeGuard {
        Arc::new(move |result: &NodeResult| {
            result
                .data
                .get("decision")
                .and_then(Value::as_bool)
                .is_some_and(|d| d == expected)
        })
    }

    /// Matches when `result.data[key] == expected`.
    #[must_use]
    pub fn data_equals(key: impl Into<String>, expected: Value) -> EdgeGuard {
        let key = key.into();
        Arc::new(move |result: &NodeResult| result.data.get(&key) == Some(&expected))
    }

    /// Matches when the result carries the given metadata value.
    #[must_use]
    pub fn metadata_equals(key: impl Into<String>, expected: Value) -> EdgeGuard {
        let key = key.into();
        Arc::new(move |result: &NodeResult| result.metadata.get(&key) == Some(&expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unguarded_edge_always_matches() {
        let edge = Edge::new("a", "b");
        assert!(edge.matches(&NodeResult::new()));
    }

    #[test]
    fn wildcard_applies_to_any_node() {
        let edge = Edge::new(WILDCARD, "sink");
        assert!(edge.applies_to("anything"));
        assert!(edge.is_wildcard());
    }

    #[test]
    fn decision_guard_routes_on_data() {
        let yes = guards::decision_is(true);
        let result = NodeResult::new().with_data(json!({"decision": true}));
        assert!(yes(&result));
        assert!(!guards::decision_is(false)(&result));
        // Absent field matches neither branch.
        assert!(!yes(&NodeResult::new()));
    }
}
