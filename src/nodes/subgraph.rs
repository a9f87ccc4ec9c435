//! Nested graph execution node.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::graph::Graph;
use crate::node::{Node, NodeContext, NodeError, NodeResult};
use crate::runtimes::runner::{GraphRunner, RunOutcome, RunnerError};

/// Runs a nested graph on the same collaborator set and returns a
/// summarized result.
///
/// The nested run executes with `subgraph_depth + 1`; the runner enforces
/// the depth limit. A nested run that parks on HITL is a node failure —
/// human nodes belong to the top-level graph.
pub struct SubGraphNode {
    graph: Arc<Graph>,
    runner: Arc<GraphRunner>,
}

impl SubGraphNode {
    #[must_use]
    pub fn new(graph: Arc<Graph>, runner: Arc<GraphRunner>) -> Self {
        Self { graph, runner }
    }
}

#[async_trait]
impl Node for SubGraphNode {
    async fn run(&self, ctx: NodeContext) -> Result<NodeResult, NodeError> {
        let child_exec = ctx.exec.child(self.graph.id());
        let inner_input = crate::message::Message::new(ctx.message.content.clone())
            .with_sender(ctx.node_id.clone())
            .with_correlation_id(ctx.exec.run_id.clone());

        let outcome = self
            .runner
            .execute_with_context(&self.graph, inner_input, child_exec)
            .await
            .map_err(|e| match e {
                RunnerError::SubgraphDepthExceeded { depth, limit } => NodeError::Subgraph {
                    graph_id: self.graph.id().to_string(),
                    message: format!("subgraph depth {depth} exceeds the limit of {limit}"),
                },
                other => NodeError::Subgraph {
                    graph_id: self.graph.id().to_string(),
                    message: other.to_string(),
                },
            })?;

        match outcome {
            RunOutcome::Completed(final_message) => Ok(NodeResult::new()
                .with_data(json!({
                    "graph_id": self.graph.id(),
                    "state": final_message.state.to_string(),
                    "output": final_message.metadata.get("output").cloned(),
                }))
                .with_metadata("subgraph", json!(self.graph.id()))
                .with_state(
                    format!("subgraph::{}", self.graph.id()),
                    final_message.metadata.get("output").cloned().unwrap_or(json!(null)),
                )),
            RunOutcome::Paused(_) => Err(NodeError::SubgraphPaused {
                graph_id: self.graph.id().to_string(),
            }),
        }
    }
}
