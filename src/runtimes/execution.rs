//! Run-scoped execution context: identity, tracing, cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Cooperative cancellation handle.
///
/// Cloning shares the underlying flag; the runner observes it between nodes
/// and at every middleware boundary. Cancellation is never preemptive.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tracing identifiers propagated across process boundaries via event
/// metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
}

impl TraceContext {
    #[must_use]
    pub fn new_root() -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            span_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Execution context for one graph run.
///
/// Lives for a single run and is recreated on resume from a checkpoint
/// (the cancel flag is never persisted).
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pub run_id: String,
    pub graph_id: String,
    /// Authentication/authorization claims, opaque to the core.
    pub auth: FxHashMap<String, Value>,
    pub trace: TraceContext,
    pub cancel: CancelFlag,
    /// Nesting depth; incremented by sub-graph nodes.
    pub subgraph_depth: u32,
}

impl ExecutionContext {
    /// Fresh context for a new top-level run.
    #[must_use]
    pub fn new_run(graph_id: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            graph_id: graph_id.into(),
            auth: FxHashMap::default(),
            trace: TraceContext::new_root(),
            cancel: CancelFlag::new(),
            subgraph_depth: 0,
        }
    }

    /// Context for a run with a caller-supplied run id (resume, tests).
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    #[must_use]
    pub fn with_auth(mut self, key: impl Into<String>, value: Value) -> Self {
        self.auth.insert(key.into(), value);
        self
    }

    /// Derive the context for a nested graph run: same identity and cancel
    /// flag, depth incremented.
    #[must_use]
    pub fn child(&self, graph_id: impl Into<String>) -> Self {
        Self {
            run_id: format!("{}::{}", self.run_id, self.subgraph_depth + 1),
            graph_id: graph_id.into(),
            auth: self.auth.clone(),
            trace: self.trace.clone(),
            cancel: self.cancel.clone(),
            subgraph_depth: self.subgraph_depth + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_is_shared_across_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn child_context_increments_depth_and_shares_cancel() {
        let ctx = ExecutionContext::new_run("outer");
        let child = ctx.child("inner");
        assert_eq!(child.subgraph_depth, 1);
        assert_eq!(child.trace, ctx.trace);
        ctx.cancel.cancel();
        assert!(child.cancel.is_cancelled());
    }
}
