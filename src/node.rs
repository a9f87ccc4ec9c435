//! Node execution contract.
//!
//! A node is a single unit of work inside a graph: it receives a
//! [`NodeContext`] and produces a [`NodeResult`] or a well-defined failure.
//! The built-in variants live in [`crate::nodes`]; anything implementing
//! [`Node`] can be registered on a graph.
//!
//! A "waiting for human" outcome is a **value** on the result
//! ([`NodeResult::pause`]), never a panic or control-flow escape; the runner
//! turns it into a checkpoint and a parked message.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::message::{HitlKind, Message};
use crate::runtimes::execution::ExecutionContext;

/// Core trait for executable workflow nodes.
///
/// Nodes should be stateless and deterministic: given the same context and
/// the same collaborator responses they produce the same result. Variants
/// are distinguished by interface methods alone; the runner never inspects
/// concrete types.
#[async_trait]
pub trait Node: Send + Sync {
    /// Execute this node against the given context.
    async fn run(&self, ctx: NodeContext) -> Result<NodeResult, NodeError>;

    /// Whether the node terminates a run when it has no applicable
    /// outgoing edge. Output nodes override this to `true`.
    fn is_terminal(&self) -> bool {
        false
    }
}

/// Execution context passed to a node for one invocation.
///
/// The state map is an immutable view; nodes return updates on their
/// [`NodeResult`] and the runner threads the merged map into successors.
#[derive(Clone, Debug)]
pub struct NodeContext {
    pub graph_id: String,
    pub node_id: String,
    /// 1-based position of this invocation within the run.
    pub step: u64,
    /// The message currently flowing through the graph.
    pub message: Message,
    /// Accumulated node state for this run.
    pub state: FxHashMap<String, Value>,
    /// Run-scoped execution context (identity, tracing, cancellation).
    pub exec: ExecutionContext,
}

impl NodeContext {
    /// Functional update: returns a context with `updates` merged over the
    /// current state map. Existing keys are overwritten.
    #[must_use]
    pub fn with_state(mut self, updates: FxHashMap<String, Value>) -> Self {
        self.state.extend(updates);
        self
    }

    /// Convenience lookup into the state map.
    #[must_use]
    pub fn state_value(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }
}

/// Declaration of a human-in-the-loop pause emitted by a node.
///
/// The runner assigns the stable tool-call id; nodes only describe the
/// interaction.
#[derive(Clone, Debug, PartialEq)]
pub struct HitlPause {
    pub prompt: String,
    pub kind: HitlKind,
    /// Canonical options for `Selection` kind; empty otherwise.
    pub options: Vec<String>,
    pub metadata: FxHashMap<String, Value>,
}

impl HitlPause {
    #[must_use]
    pub fn selection(prompt: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            prompt: prompt.into(),
            kind: HitlKind::Selection,
            options,
            metadata: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn confirmation(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            kind: HitlKind::Confirmation,
            options: vec!["approve".to_string(), "reject".to_string()],
            metadata: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn free_text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            kind: HitlKind::FreeText,
            options: Vec::new(),
            metadata: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Outcome of one node invocation.
///
/// All fields are optional in spirit: a bare `NodeResult::new()` is a valid
/// "did nothing" outcome. Edge guards are evaluated against this value.
#[derive(Clone, Debug, Default)]
pub struct NodeResult {
    /// Primary payload produced by the node.
    pub data: Value,
    /// Result metadata; subject to the size policy.
    pub metadata: FxHashMap<String, Value>,
    /// State updates to merge into the run context.
    pub state: FxHashMap<String, Value>,
    /// Explicit successor override; ids are taken literally, in order.
    pub next_nodes: Option<Vec<String>>,
    /// Replacement message (agents may return one; its state transitions
    /// must remain legal).
    pub message: Option<Message>,
    /// Present when the node requests a human-in-the-loop pause.
    pub pause: Option<HitlPause>,
}

impl NodeResult {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.state.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_state_map(mut self, updates: FxHashMap<String, Value>) -> Self {
        self.state.extend(updates);
        self
    }

    #[must_use]
    pub fn with_next_nodes<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.next_nodes = Some(targets.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }

    #[must_use]
    pub fn waiting_hitl(mut self, pause: HitlPause) -> Self {
        self.pause = Some(pause);
        self
    }

    /// Returns `true` when this result parks the run.
    #[must_use]
    pub fn is_waiting_hitl(&self) -> bool {
        self.pause.is_some()
    }
}

/// Soft budget for result metadata, in bytes of serialized JSON.
pub const METADATA_SOFT_LIMIT: usize = 5 * 1024;

/// What to do when a node result's metadata exceeds the budget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MetadataSizePolicy {
    /// Log a warning and continue (default).
    #[default]
    Warn,
    /// Fail the node invocation.
    Fail,
    /// Do nothing.
    Ignore,
}

/// Apply the metadata size policy to a freshly produced result.
///
/// Metadata at exactly the soft limit passes silently; one byte over
/// triggers the policy. A `hard_limit`, when set, always fails regardless
/// of policy.
pub fn enforce_metadata_budget(
    node_id: &str,
    result: &NodeResult,
    policy: MetadataSizePolicy,
    hard_limit: Option<usize>,
) -> Result<(), NodeError> {
    let size = serde_json::to_vec(&result.metadata).map(|b| b.len()).unwrap_or(0);
    if let Some(hard) = hard_limit {
        if size > hard {
            return Err(NodeError::MetadataOverflow {
                node_id: node_id.to_string(),
                size,
                limit: hard,
            });
        }
    }
    if size > METADATA_SOFT_LIMIT {
        match policy {
            MetadataSizePolicy::Warn => {
                tracing::warn!(
                    target: "spiceflow::node",
                    node_id,
                    size,
                    limit = METADATA_SOFT_LIMIT,
                    "node result metadata exceeds soft budget"
                );
            }
            MetadataSizePolicy::Fail => {
                return Err(NodeError::MetadataOverflow {
                    node_id: node_id.to_string(),
                    size,
                    limit: METADATA_SOFT_LIMIT,
                });
            }
            MetadataSizePolicy::Ignore => {}
        }
    }
    Ok(())
}

/// Errors that can occur during node execution.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// Expected input data is missing from the node state.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(spiceflow::node::missing_input),
        help("Check that an upstream node produced the required state key: {what}.")
    )]
    MissingInput { what: &'static str },

    /// The agent collaborator failed.
    #[error("agent error ({agent}): {message}")]
    #[diagnostic(code(spiceflow::node::agent))]
    Agent { agent: String, message: String },

    /// The tool collaborator failed.
    #[error("tool error ({tool}, {code}): {message}")]
    #[diagnostic(code(spiceflow::node::tool))]
    Tool {
        tool: String,
        code: String,
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    #[diagnostic(code(spiceflow::node::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Input validation failed.
    #[error("validation failed: {0}")]
    #[diagnostic(
        code(spiceflow::node::validation),
        help("Check input data format and required fields.")
    )]
    ValidationFailed(String),

    /// Result metadata exceeded the configured budget.
    #[error("node {node_id} result metadata is {size} bytes (limit {limit})")]
    #[diagnostic(
        code(spiceflow::node::metadata_overflow),
        help("Trim result metadata or relax the metadata size policy.")
    )]
    MetadataOverflow {
        node_id: String,
        size: usize,
        limit: usize,
    },

    /// A nested graph parked on HITL; pauses belong to the top-level graph.
    #[error("nested graph {graph_id} parked on a HITL pause")]
    #[diagnostic(
        code(spiceflow::node::subgraph_paused),
        help("Move human nodes to the outermost graph; nested runs must complete.")
    )]
    SubgraphPaused { graph_id: String },

    /// Failure bubbled up from a nested graph run.
    #[error("nested graph {graph_id} failed: {message}")]
    #[diagnostic(code(spiceflow::node::subgraph))]
    Subgraph { graph_id: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_at_soft_limit_is_silent() {
        // Build metadata that serializes to exactly the soft limit.
        let mut result = NodeResult::new();
        // {"k":"<filler>"} -> 8 bytes of framing + filler length.
        let filler = "x".repeat(METADATA_SOFT_LIMIT - 8);
        result.metadata.insert("k".into(), json!(filler));
        let size = serde_json::to_vec(&result.metadata).unwrap().len();
        assert_eq!(size, METADATA_SOFT_LIMIT);
        assert!(
            enforce_metadata_budget("n", &result, MetadataSizePolicy::Fail, None).is_ok()
        );
    }

    #[test]
    fn metadata_one_over_soft_limit_triggers_policy() {
        let mut result = NodeResult::new();
        let filler = "x".repeat(METADATA_SOFT_LIMIT - 7);
        result.metadata.insert("k".into(), json!(filler));
        let size = serde_json::to_vec(&result.metadata).unwrap().len();
        assert_eq!(size, METADATA_SOFT_LIMIT + 1);
        assert!(
            enforce_metadata_budget("n", &result, MetadataSizePolicy::Ignore, None).is_ok()
        );
        assert!(matches!(
            enforce_metadata_budget("n", &result, MetadataSizePolicy::Fail, None),
            Err(NodeError::MetadataOverflow { .. })
        ));
    }

    #[test]
    fn hard_limit_overrides_policy() {
        let mut result = NodeResult::new();
        result.metadata.insert("k".into(), json!("0123456789"));
        assert!(matches!(
            enforce_metadata_budget("n", &result, MetadataSizePolicy::Ignore, Some(4)),
            Err(NodeError::MetadataOverflow { limit: 4, .. })
        ));
    }
}
