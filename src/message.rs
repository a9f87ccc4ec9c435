//! Message envelope and execution state machine.
//!
//! A [`Message`] is the single unit of information flowing through a graph.
//! Messages are value-immutable: every mutation returns a new message, and
//! state changes go through [`Message::transition`], which enforces the
//! fixed transition table of [`ExecutionState`].

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle state of a run, carried on every [`Message`].
///
/// The set is closed and the legal transitions are fixed; an attempt to
/// perform a transition outside the table is a programming error surfaced
/// as [`TransitionError::Illegal`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionState {
    /// Created but not yet picked up by a runner.
    Pending,
    /// A runner is actively walking the graph.
    Running,
    /// Parked on a human-in-the-loop tool call; a checkpoint exists.
    WaitingHitl,
    /// Administratively paused; resumable.
    Suspended,
    /// Terminal: the graph reached an output node.
    Completed,
    /// Terminal: a node or the runner failed.
    Failed,
    /// Terminal: cooperative cancellation observed.
    Cancelled,
}

impl ExecutionState {
    /// Returns `true` for states that admit no further transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// The successors this state admits.
    #[must_use]
    pub fn allowed_successors(&self) -> &'static [ExecutionState] {
        use ExecutionState::*;
        match self {
            Pending => &[Running, Cancelled],
            Running => &[WaitingHitl, Suspended, Completed, Failed, Cancelled],
            WaitingHitl => &[Running, Cancelled, Failed],
            Suspended => &[Running, Cancelled],
            Completed | Failed | Cancelled => &[],
        }
    }

    /// Whether `self -> target` is in the transition table.
    #[must_use]
    pub fn can_transition_to(&self, target: ExecutionState) -> bool {
        self.allowed_successors().contains(&target)
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::WaitingHitl => "waiting_hitl",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{label}")
    }
}

/// One entry in a message's append-only state history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: ExecutionState,
    pub to: ExecutionState,
    pub at: DateTime<Utc>,
    /// Human-readable reason; carries the error kind for `Failed`.
    pub reason: Option<String>,
    /// Node at which the transition happened, when node-scoped.
    pub node_id: Option<String>,
}

/// Raised when a transition outside the table is requested.
#[derive(Debug, Error, Diagnostic)]
pub enum TransitionError {
    #[error("illegal state transition: {from} -> {to}")]
    #[diagnostic(
        code(spiceflow::message::illegal_transition),
        help("Consult ExecutionState::allowed_successors; this transition is a programming error.")
    )]
    Illegal {
        from: ExecutionState,
        to: ExecutionState,
    },
}

/// The flavor of human interaction a HITL tool call asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlKind {
    /// Pick one canonical option from a declared list.
    Selection,
    /// Yes/no style approval.
    Confirmation,
    /// Free-form text answer.
    FreeText,
}

impl std::fmt::Display for HitlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Selection => write!(f, "selection"),
            Self::Confirmation => write!(f, "confirmation"),
            Self::FreeText => write!(f, "free_text"),
        }
    }
}

/// A request emitted by a node asking for external fulfillment.
///
/// The identifier is stable across retries within one node invocation; for
/// HITL calls it is a pure function of `(run_id, node_id, invocation_index)`
/// (see [`crate::hitl::tool_call_id`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    /// Present when the call is a human-in-the-loop pause point.
    pub kind: Option<HitlKind>,
}

impl ToolCall {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            kind: None,
        }
    }

    /// Mark this tool call as a HITL pause of the given kind.
    #[must_use]
    pub fn with_kind(mut self, kind: HitlKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Returns `true` when the runner must treat this call as a pause point.
    #[must_use]
    pub fn is_hitl(&self) -> bool {
        self.kind.is_some()
    }
}

/// The single unit of information flowing through a graph.
///
/// Value-immutable: builder-style `with_*` methods and [`transition`](Self::transition)
/// consume `self` and return a new message. Invariants maintained by
/// construction:
///
/// - `state` equals the `to` field of the last history entry (when any);
/// - adjacent history entries chain (`entry.to == next.from`);
/// - every recorded `(from, to)` pair is in the transition table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Free-form payload content.
    pub content: String,
    /// Typed metadata mapping; opaque to the runner.
    pub metadata: FxHashMap<String, Value>,
    /// Identifier of whoever produced this message.
    pub sender: String,
    /// Pending tool calls awaiting external fulfillment.
    pub tool_calls: Vec<ToolCall>,
    pub state: ExecutionState,
    /// Append-only record of every state transition.
    pub state_history: Vec<StateTransition>,
    pub correlation_id: Option<String>,
    pub run_id: Option<String>,
    pub graph_id: Option<String>,
    pub node_id: Option<String>,
}

impl Message {
    /// Create a pending message with the given content.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            metadata: FxHashMap::default(),
            sender: "caller".to_string(),
            tool_calls: Vec::new(),
            state: ExecutionState::Pending,
            state_history: Vec::new(),
            correlation_id: None,
            run_id: None,
            graph_id: None,
            node_id: None,
        }
    }

    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_run_id(mut self, id: impl Into<String>) -> Self {
        self.run_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_graph_id(mut self, id: impl Into<String>) -> Self {
        self.graph_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    /// Append a pending tool call.
    #[must_use]
    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        self.tool_calls.push(call);
        self
    }

    /// Replace the pending tool call list.
    #[must_use]
    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    /// Drop the pending tool call with the given id, if present.
    #[must_use]
    pub fn without_tool_call(mut self, call_id: &str) -> Self {
        self.tool_calls.retain(|c| c.id != call_id);
        self
    }

    /// Returns `true` when any pending tool call is of a HITL kind.
    #[must_use]
    pub fn has_pending_hitl(&self) -> bool {
        self.tool_calls.iter().any(ToolCall::is_hitl)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to `target`, appending a history entry.
    ///
    /// Fails with [`TransitionError::Illegal`] when the transition table does
    /// not admit `state -> target`.
    pub fn transition(
        self,
        target: ExecutionState,
        reason: Option<String>,
        node_id: Option<String>,
    ) -> Result<Message, TransitionError> {
        if !self.state.can_transition_to(target) {
            return Err(TransitionError::Illegal {
                from: self.state,
                to: target,
            });
        }
        let mut next = self;
        next.state_history.push(StateTransition {
            from: next.state,
            to: target,
            at: Utc::now(),
            reason,
            node_id,
        });
        next.state = target;
        Ok(next)
    }

    /// The last transition recorded, if any.
    #[must_use]
    pub fn last_transition(&self) -> Option<&StateTransition> {
        self.state_history.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_admits_running_and_cancelled_only() {
        let allowed = ExecutionState::Pending.allowed_successors();
        assert_eq!(
            allowed,
            &[ExecutionState::Running, ExecutionState::Cancelled]
        );
        assert!(!ExecutionState::Pending.can_transition_to(ExecutionState::Completed));
    }

    #[test]
    fn terminal_states_admit_nothing() {
        for state in [
            ExecutionState::Completed,
            ExecutionState::Failed,
            ExecutionState::Cancelled,
        ] {
            assert!(state.is_terminal());
            assert!(state.allowed_successors().is_empty());
        }
    }

    #[test]
    fn transition_appends_chained_history() {
        let msg = Message::new("hello")
            .transition(ExecutionState::Running, None, None)
            .unwrap()
            .transition(
                ExecutionState::WaitingHitl,
                Some("awaiting approval".into()),
                Some("review".into()),
            )
            .unwrap();
        assert_eq!(msg.state, ExecutionState::WaitingHitl);
        assert_eq!(msg.state_history.len(), 2);
        assert_eq!(msg.state_history[0].to, msg.state_history[1].from);
        assert_eq!(msg.last_transition().unwrap().to, msg.state);
    }

    #[test]
    fn illegal_transition_is_an_error() {
        let msg = Message::new("hello");
        let err = msg.transition(ExecutionState::Completed, None, None);
        assert!(matches!(
            err,
            Err(TransitionError::Illegal {
                from: ExecutionState::Pending,
                to: ExecutionState::Completed,
            })
        ));
    }

    #[test]
    fn hitl_tool_call_is_detected() {
        let msg = Message::new("x").with_tool_call(
            ToolCall::new("hitl_r_n_0", "__hitl__", serde_json::json!({}))
                .with_kind(HitlKind::Selection),
        );
        assert!(msg.has_pending_hitl());
        let msg = msg.without_tool_call("hitl_r_n_0");
        assert!(!msg.has_pending_hitl());
    }

    #[test]
    fn serde_round_trip() {
        let msg = Message::new("payload")
            .with_run_id("r1")
            .with_metadata("k", serde_json::json!(1))
            .transition(ExecutionState::Running, None, None)
            .unwrap();
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, parsed);
    }
}
