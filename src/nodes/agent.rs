//! Node that delegates to an [`Agent`] collaborator.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::Agent;
use crate::node::{Node, NodeContext, NodeError, NodeResult};

/// Delegates the current message to an external agent.
///
/// The agent may return a message whose state the runner will propagate;
/// the runner rejects illegal transitions on the returned message. Agent
/// failures surface as node failures.
pub struct AgentNode {
    name: String,
    agent: Arc<dyn Agent>,
}

impl AgentNode {
    #[must_use]
    pub fn new(name: impl Into<String>, agent: Arc<dyn Agent>) -> Self {
        Self {
            name: name.into(),
            agent,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Node for AgentNode {
    async fn run(&self, ctx: NodeContext) -> Result<NodeResult, NodeError> {
        if !self.agent.is_ready() {
            return Err(NodeError::Agent {
                agent: self.name.clone(),
                message: "agent is not ready".to_string(),
            });
        }
        let reply = self
            .agent
            .process_message(ctx.message.clone())
            .await
            .map_err(|e| NodeError::Agent {
                agent: self.name.clone(),
                message: e.to_string(),
            })?;
        Ok(NodeResult::new()
            .with_data(json!({ "content": reply.content }))
            .with_metadata("agent", json!(self.name))
            .with_message(reply))
    }
}
