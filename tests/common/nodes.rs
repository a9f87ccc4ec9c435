#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use spiceflow::agent::{Agent, AgentError};
use spiceflow::message::Message;
use spiceflow::node::{Node, NodeContext, NodeError, NodeResult};
use spiceflow::tool::{Tool, ToolContext, ToolError, ToolOutcome};

/// Writes a single key into the run state.
pub struct StateWriterNode {
    pub key: &'static str,
    pub value: Value,
}

impl StateWriterNode {
    pub fn new(key: &'static str, value: Value) -> Self {
        Self { key, value }
    }
}

#[async_trait]
impl Node for StateWriterNode {
    async fn run(&self, _ctx: NodeContext) -> Result<NodeResult, NodeError> {
        Ok(NodeResult::new().with_state(self.key, self.value.clone()))
    }
}

/// Does nothing.
pub struct NoopNode;

#[async_trait]
impl Node for NoopNode {
    async fn run(&self, _ctx: NodeContext) -> Result<NodeResult, NodeError> {
        Ok(NodeResult::new())
    }
}

/// Returns an explicit `next_nodes` override.
pub struct OverrideNode {
    pub targets: Vec<&'static str>,
}

#[async_trait]
impl Node for OverrideNode {
    async fn run(&self, _ctx: NodeContext) -> Result<NodeResult, NodeError> {
        Ok(NodeResult::new().with_next_nodes(self.targets.clone()))
    }
}

/// Fails the first `failures` invocations, then succeeds.
pub struct FlakyNode {
    pub failures: u32,
    attempts: AtomicU32,
}

impl FlakyNode {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            attempts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Node for FlakyNode {
    async fn run(&self, _ctx: NodeContext) -> Result<NodeResult, NodeError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(NodeError::ValidationFailed(format!(
                "transient failure {attempt}"
            )));
        }
        Ok(NodeResult::new().with_state("flaky_done", json!(true)))
    }
}

/// Always fails.
pub struct FailingNode;

#[async_trait]
impl Node for FailingNode {
    async fn run(&self, _ctx: NodeContext) -> Result<NodeResult, NodeError> {
        Err(NodeError::ValidationFailed("always fails".into()))
    }
}

/// Sleeps before succeeding; for timeout and cancellation tests.
pub struct SlowNode {
    pub delay: Duration,
}

#[async_trait]
impl Node for SlowNode {
    async fn run(&self, _ctx: NodeContext) -> Result<NodeResult, NodeError> {
        tokio::time::sleep(self.delay).await;
        Ok(NodeResult::new())
    }
}

/// Requests cooperative cancellation of its own run, then succeeds.
pub struct SelfCancellingNode;

#[async_trait]
impl Node for SelfCancellingNode {
    async fn run(&self, ctx: NodeContext) -> Result<NodeResult, NodeError> {
        ctx.exec.cancel.cancel();
        Ok(NodeResult::new())
    }
}

/// Copies the canonical HITL answer for `gate_node` into `published`.
pub struct PublishNode {
    pub gate_node: &'static str,
}

#[async_trait]
impl Node for PublishNode {
    async fn run(&self, ctx: NodeContext) -> Result<NodeResult, NodeError> {
        let canonical = ctx
            .state_value(&format!("hitl::{}", self.gate_node))
            .and_then(|v| v.get("canonical"))
            .cloned()
            .ok_or(NodeError::MissingInput {
                what: "hitl response",
            })?;
        Ok(NodeResult::new().with_state("published", canonical))
    }
}

/// Agent that echoes the message content back with a prefix.
pub struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    async fn process_message(&self, message: Message) -> Result<Message, AgentError> {
        let content = format!("echo: {}", message.content);
        let mut reply = message;
        reply.content = content;
        reply.sender = "echo-agent".to_string();
        Ok(reply)
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["echo".to_string()]
    }
}

/// Tool returning a fixed payload.
pub struct ConstTool {
    pub payload: Value,
}

#[async_trait]
impl Tool for ConstTool {
    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
        Ok(ToolOutcome::Success(self.payload.clone()))
    }
}

/// Tool that always asks for human confirmation.
pub struct ConfirmTool;

#[async_trait]
impl Tool for ConfirmTool {
    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
        Ok(ToolOutcome::WaitingHitl {
            prompt: "confirm the side effect".to_string(),
            kind: spiceflow::message::HitlKind::Confirmation,
            options: vec!["approve".into(), "reject".into()],
            metadata: Default::default(),
        })
    }
}

/// Middleware that records the node ids it saw, in order.
pub struct RecordingMiddleware {
    pub seen: Arc<parking_lot::Mutex<Vec<String>>>,
}

#[async_trait]
impl spiceflow::middleware::Middleware for RecordingMiddleware {
    async fn handle(
        &self,
        ctx: NodeContext,
        next: spiceflow::middleware::Next<'_>,
    ) -> Result<NodeResult, NodeError> {
        self.seen.lock().push(ctx.node_id.clone());
        next.run(ctx).await
    }
}
