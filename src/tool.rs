//! Tool collaborator interface.
//!
//! Tools perform side-effecting work on behalf of a node. A tool may
//! complete synchronously, fail, or hand back a `WaitingHitl` outcome that
//! the runner turns into a pause point (§ tool-call handling in the runner).

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::message::HitlKind;
use crate::runtimes::execution::ExecutionContext;

/// Declarative description of a tool's parameters.
///
/// The core never validates payloads against this schema; it exists so
/// outer layers (UIs, planners) can introspect registered tools.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolSchema {
    pub description: String,
    /// JSON-schema-shaped parameter description.
    pub parameters: Value,
}

impl ToolSchema {
    #[must_use]
    pub fn new(description: impl Into<String>, parameters: Value) -> Self {
        Self {
            description: description.into(),
            parameters,
        }
    }
}

/// Context handed to a tool invocation.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub node_id: String,
    pub exec: ExecutionContext,
}

/// Outcome of a tool invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutcome {
    /// The tool finished; payload goes into the node result.
    Success(Value),
    /// The tool failed in a way the node should surface.
    Failure { code: String, message: String },
    /// The tool needs a human answer before it can finish.
    WaitingHitl {
        prompt: String,
        kind: HitlKind,
        options: Vec<String>,
        metadata: FxHashMap<String, Value>,
    },
}

/// Errors raised by the tool plumbing itself (not tool-level failures,
/// which travel as [`ToolOutcome::Failure`]).
#[derive(Debug, Error, Diagnostic)]
pub enum ToolError {
    #[error("tool not found: {name}")]
    #[diagnostic(
        code(spiceflow::tool::not_found),
        help("Register the tool `{name}` on the registry passed to the graph.")
    )]
    NotFound { name: String },

    #[error("tool {name} rejected parameters: {message}")]
    #[diagnostic(code(spiceflow::tool::invalid_params))]
    InvalidParams { name: String, message: String },

    #[error("tool {name} execution error: {message}")]
    #[diagnostic(code(spiceflow::tool::execution))]
    Execution { name: String, message: String },
}

/// External side-effecting collaborator.
#[async_trait]
pub trait Tool: Send + Sync {
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutcome, ToolError>;

    fn schema(&self) -> ToolSchema {
        ToolSchema::default()
    }
}

/// Explicit, process-scoped tool registry with `init`/`shutdown` lifecycle.
///
/// Replaces what the source expressed as a global mutable singleton: the
/// registry is a constructed value, tests build scoped instances, and
/// nothing reaches into process-wide state.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: FxHashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, tool: Arc<dyn Tool>) {
        self.tools.insert(name.into(), tool);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound {
                name: name.to_string(),
            })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted for deterministic listings.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop all registered tools.
    pub fn shutdown(&mut self) {
        self.tools.clear();
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
