//! Typed lifecycle events published on the bus.
//!
//! Every event crossing the bus is one of these variants, wrapped in an
//! [`EventEnvelope`](crate::bus::EventEnvelope). Each variant knows its
//! fully-qualified type, its schema version, and the standard channel it
//! defaults to.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::channel;
use crate::bus::envelope::SchemaVersion;
use crate::message::{ExecutionState, HitlKind, ToolCall};

/// All lifecycle events the runtime emits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    GraphStarted {
        run_id: String,
        graph_id: String,
    },
    GraphCompleted {
        run_id: String,
        graph_id: String,
        final_state: ExecutionState,
    },
    GraphFailed {
        run_id: String,
        graph_id: String,
        error: String,
    },
    RunCancelled {
        run_id: String,
        graph_id: String,
        node_id: Option<String>,
    },
    NodeStarted {
        run_id: String,
        node_id: String,
        step: u64,
    },
    NodeCompleted {
        run_id: String,
        node_id: String,
        step: u64,
        #[serde(default)]
        metadata: FxHashMap<String, Value>,
    },
    NodeFailed {
        run_id: String,
        node_id: String,
        step: u64,
        error: String,
        /// 1-based attempt number under the node's retry policy.
        attempt: u32,
    },
    ToolCallEmitted {
        run_id: String,
        node_id: String,
        tool_call: ToolCall,
    },
    ToolCallCompleted {
        run_id: String,
        node_id: String,
        tool_call_id: String,
    },
    HitlRequested {
        run_id: String,
        node_id: String,
        tool_call_id: String,
        prompt: String,
        kind: HitlKind,
        #[serde(default)]
        options: Vec<String>,
    },
    /// An envelope that could not be decoded, rerouted with diagnostics.
    DeadLetter {
        original_channel: String,
        error_code: String,
        reason: String,
        raw: Value,
    },
    /// Application-defined event; the name doubles as the event type.
    Custom {
        name: String,
        payload: Value,
    },
}

impl WorkflowEvent {
    /// Fully-qualified event type carried on the envelope.
    #[must_use]
    pub fn event_type(&self) -> String {
        match self {
            Self::GraphStarted { .. } => "spice.graph.started".to_string(),
            Self::GraphCompleted { .. } => "spice.graph.completed".to_string(),
            Self::GraphFailed { .. } => "spice.graph.failed".to_string(),
            Self::RunCancelled { .. } => "spice.graph.cancelled".to_string(),
            Self::NodeStarted { .. } => "spice.node.started".to_string(),
            Self::NodeCompleted { .. } => "spice.node.completed".to_string(),
            Self::NodeFailed { .. } => "spice.node.failed".to_string(),
            Self::ToolCallEmitted { .. } => "spice.toolcall.emitted".to_string(),
            Self::ToolCallCompleted { .. } => "spice.toolcall.completed".to_string(),
            Self::HitlRequested { .. } => "spice.hitl.requested".to_string(),
            Self::DeadLetter { .. } => "spice.deadletter.entry".to_string(),
            Self::Custom { name, .. } => name.clone(),
        }
    }

    /// Current schema version for this event type.
    #[must_use]
    pub fn schema_version(&self) -> SchemaVersion {
        SchemaVersion::new(1, 0, 0)
    }

    /// The standard channel this event is published on by default.
    /// Custom events pick their channel at publish time.
    #[must_use]
    pub fn default_channel(&self) -> Option<&'static str> {
        match self {
            Self::GraphStarted { .. }
            | Self::GraphCompleted { .. }
            | Self::GraphFailed { .. }
            | Self::RunCancelled { .. } => Some(channel::GRAPH_LIFECYCLE),
            Self::NodeStarted { .. } | Self::NodeCompleted { .. } | Self::NodeFailed { .. } => {
                Some(channel::NODE_LIFECYCLE)
            }
            Self::ToolCallEmitted { .. } | Self::ToolCallCompleted { .. } => {
                Some(channel::TOOL_CALLS)
            }
            Self::HitlRequested { .. } => Some(channel::HITL_REQUESTS),
            Self::DeadLetter { .. } => Some(channel::DEAD_LETTER),
            Self::Custom { .. } => None,
        }
    }

    /// Tool-call identity, when the event belongs to one. Used as the
    /// partition key on Kafka so one tool call's events stay ordered.
    #[must_use]
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Self::ToolCallEmitted { tool_call, .. } => Some(tool_call.id.as_str()),
            Self::ToolCallCompleted { tool_call_id, .. }
            | Self::HitlRequested { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        }
    }

    /// Run identity, when the event is run-scoped.
    #[must_use]
    pub fn run_id(&self) -> Option<&str> {
        match self {
            Self::GraphStarted { run_id, .. }
            | Self::GraphCompleted { run_id, .. }
            | Self::GraphFailed { run_id, .. }
            | Self::RunCancelled { run_id, .. }
            | Self::NodeStarted { run_id, .. }
            | Self::NodeCompleted { run_id, .. }
            | Self::NodeFailed { run_id, .. }
            | Self::ToolCallEmitted { run_id, .. }
            | Self::ToolCallCompleted { run_id, .. }
            | Self::HitlRequested { run_id, .. } => Some(run_id.as_str()),
            Self::DeadLetter { .. } | Self::Custom { .. } => None,
        }
    }
}
