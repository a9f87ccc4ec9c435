//! Terminal node that packages final state into the run's output.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::node::{Node, NodeContext, NodeError, NodeResult};

/// Packages selected state keys into the final message.
///
/// Output nodes are terminal: their `next_nodes` override is always empty
/// and the runner completes the run when one finishes with no applicable
/// edge.
pub struct OutputNode {
    keys: Option<Vec<String>>,
}

impl OutputNode {
    /// Package every state key.
    #[must_use]
    pub fn all_state() -> Self {
        Self { keys: None }
    }

    /// Package only the listed keys; missing keys are skipped.
    #[must_use]
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: Some(keys.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl Node for OutputNode {
    async fn run(&self, ctx: NodeContext) -> Result<NodeResult, NodeError> {
        let mut packaged = Map::new();
        match &self.keys {
            Some(keys) => {
                for key in keys {
                    if let Some(value) = ctx.state.get(key) {
                        packaged.insert(key.clone(), value.clone());
                    }
                }
            }
            None => {
                // Deterministic ordering for the packaged object.
                let mut all: Vec<(&String, &Value)> = ctx.state.iter().collect();
                all.sort_by(|a, b| a.0.cmp(b.0));
                for (key, value) in all {
                    packaged.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(NodeResult::new()
            .with_data(Value::Object(packaged))
            .with_metadata("output", json!(true)))
    }

    fn is_terminal(&self) -> bool {
        true
    }
}
