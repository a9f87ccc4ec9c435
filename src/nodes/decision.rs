//! Boolean routing node.

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};

use crate::node::{Node, NodeContext, NodeError, NodeResult};

/// Predicate evaluated against the current node state.
pub type DecisionPredicate = Arc<dyn Fn(&FxHashMap<String, Value>) -> bool + Send + Sync>;

/// Evaluates a predicate over the node state and records the verdict in
/// the result, where edge guards (see
/// [`guards::decision_is`](crate::graph::guards::decision_is)) pick it up.
/// The runner additionally records the chosen branch in the completion
/// event's metadata.
pub struct DecisionNode {
    predicate: DecisionPredicate,
}

impl DecisionNode {
    #[must_use]
    pub fn new(predicate: DecisionPredicate) -> Self {
        Self { predicate }
    }

    /// Decision on a numeric state field exceeding a threshold.
    #[must_use]
    pub fn threshold(key: impl Into<String>, threshold: f64) -> Self {
        let key = key.into();
        Self::new(Arc::new(move |state| {
            state
                .get(&key)
                .and_then(Value::as_f64)
                .is_some_and(|v| v > threshold)
        }))
    }
}

#[async_trait]
impl Node for DecisionNode {
    async fn run(&self, ctx: NodeContext) -> Result<NodeResult, NodeError> {
        let decision = (self.predicate)(&ctx.state);
        Ok(NodeResult::new()
            .with_data(json!({ "decision": decision }))
            .with_metadata("decision", json!(decision)))
    }
}
