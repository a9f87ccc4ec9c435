//! Node that invokes a registered [`Tool`](crate::tool::Tool).

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};

use crate::node::{HitlPause, Node, NodeContext, NodeError, NodeResult};
use crate::tool::{ToolContext, ToolOutcome, ToolRegistry};

/// Maps the node state into the parameter object handed to the tool.
pub type ParamMapper = Arc<dyn Fn(&FxHashMap<String, Value>) -> Value + Send + Sync>;

/// Invokes a tool resolved by name from an explicit registry.
///
/// The tool's outcome maps onto the node result: success payloads land in
/// the result data and under `result_key` in the run state; failures become
/// node failures; a `WaitingHitl` outcome carries the pause marker through
/// unchanged.
pub struct ToolNode {
    tool_name: String,
    registry: Arc<ToolRegistry>,
    params: ParamMapper,
    result_key: String,
}

impl ToolNode {
    #[must_use]
    pub fn new(tool_name: impl Into<String>, registry: Arc<ToolRegistry>) -> Self {
        let tool_name = tool_name.into();
        Self {
            result_key: format!("{tool_name}_result"),
            tool_name,
            registry,
            params: Arc::new(|state| json!(state)),
        }
    }

    /// Override the default whole-state parameter mapping.
    #[must_use]
    pub fn with_param_mapper(mut self, mapper: ParamMapper) -> Self {
        self.params = mapper;
        self
    }

    /// State key the tool's success payload is stored under.
    #[must_use]
    pub fn with_result_key(mut self, key: impl Into<String>) -> Self {
        self.result_key = key.into();
        self
    }
}

#[async_trait]
impl Node for ToolNode {
    async fn run(&self, ctx: NodeContext) -> Result<NodeResult, NodeError> {
        let tool = self
            .registry
            .resolve(&self.tool_name)
            .map_err(|e| NodeError::Tool {
                tool: self.tool_name.clone(),
                code: "not_found".to_string(),
                message: e.to_string(),
            })?;
        let params = (self.params)(&ctx.state);
        let tool_ctx = ToolContext {
            node_id: ctx.node_id.clone(),
            exec: ctx.exec.clone(),
        };
        let outcome = tool
            .execute(params, &tool_ctx)
            .await
            .map_err(|e| NodeError::Tool {
                tool: self.tool_name.clone(),
                code: "execution".to_string(),
                message: e.to_string(),
            })?;

        match outcome {
            ToolOutcome::Success(payload) => Ok(NodeResult::new()
                .with_data(payload.clone())
                .with_metadata("tool", json!(self.tool_name))
                .with_state(self.result_key.clone(), payload)),
            ToolOutcome::Failure { code, message } => Err(NodeError::Tool {
                tool: self.tool_name.clone(),
                code,
                message,
            }),
            ToolOutcome::WaitingHitl {
                prompt,
                kind,
                options,
                metadata,
            } => Ok(NodeResult::new()
                .with_metadata("tool", json!(self.tool_name))
                .waiting_hitl(HitlPause {
                    prompt,
                    kind,
                    options,
                    metadata,
                })),
        }
    }
}
