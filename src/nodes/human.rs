//! Human-in-the-loop pause node.

use async_trait::async_trait;
use serde_json::Value;

use crate::message::HitlKind;
use crate::node::{HitlPause, Node, NodeContext, NodeError, NodeResult};

/// Unconditionally emits a HITL tool call, parking the run.
///
/// The runner generates the stable tool-call id, checkpoints the run, and
/// returns the paused message; a later resume treats the human response as
/// this node's result.
pub struct HumanNode {
    pause: HitlPause,
}

impl HumanNode {
    #[must_use]
    pub fn selection(prompt: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            pause: HitlPause::selection(prompt, options),
        }
    }

    #[must_use]
    pub fn confirmation(prompt: impl Into<String>) -> Self {
        Self {
            pause: HitlPause::confirmation(prompt),
        }
    }

    #[must_use]
    pub fn free_text(prompt: impl Into<String>) -> Self {
        Self {
            pause: HitlPause::free_text(prompt),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.pause = self.pause.with_metadata(key, value);
        self
    }

    #[must_use]
    pub fn kind(&self) -> HitlKind {
        self.pause.kind
    }
}

#[async_trait]
impl Node for HumanNode {
    async fn run(&self, _ctx: NodeContext) -> Result<NodeResult, NodeError> {
        Ok(NodeResult::new().waiting_hitl(self.pause.clone()))
    }
}
