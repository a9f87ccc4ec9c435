//! Agent collaborator interface.
//!
//! Agents are external reasoning components (LLM clients, rule engines,
//! remote services) that the core calls through this trait. The runner
//! assumes agents may block and may mutate run state only through the
//! returned message.

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::message::Message;

/// Errors surfaced by agent collaborators.
#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    #[error("agent {agent} is not ready")]
    #[diagnostic(
        code(spiceflow::agent::not_ready),
        help("Check the agent's readiness probe before dispatching work to it.")
    )]
    NotReady { agent: String },

    #[error("agent {agent} failed: {message}")]
    #[diagnostic(code(spiceflow::agent::processing))]
    Processing { agent: String, message: String },
}

/// External reasoning collaborator.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Process the current message and return the (possibly transitioned)
    /// replacement. Any state transition on the returned message must be
    /// legal with respect to the input message's state.
    async fn process_message(&self, message: Message) -> Result<Message, AgentError>;

    /// Capability labels advertised by this agent.
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether the agent can currently accept work.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Explicit, process-scoped agent registry.
///
/// Built once at startup and handed to whoever constructs graphs; there is
/// no global instance, so tests construct their own scoped registries.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: FxHashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under a name; replaces any previous entry.
    pub fn register(&mut self, name: impl Into<String>, agent: Arc<dyn Agent>) {
        self.agents.insert(name.into(), agent);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .finish()
    }
}
