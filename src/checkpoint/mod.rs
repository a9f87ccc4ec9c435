//! Durable snapshots of in-flight executions.
//!
//! A [`Checkpoint`] freezes a paused run — message, context state, and the
//! node it parked on — keyed by `checkpoint_id`, with `latest_for_run`
//! lookup by run identity. Stores implement [`CheckpointStore`]; all
//! operations are retry-safe on transient errors and the runner wraps
//! `save` with at-least-once retry.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryCheckpointStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCheckpointStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::bus::envelope::SchemaVersion;
use crate::message::Message;
use crate::runtimes::execution::{ExecutionContext, TraceContext};

/// Serializable portion of the execution context.
///
/// The cooperative cancel flag is deliberately absent: a resumed run gets a
/// fresh one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedContext {
    pub state: FxHashMap<String, Value>,
    pub auth: FxHashMap<String, Value>,
    pub trace: TraceContext,
    pub subgraph_depth: u32,
    /// Successor queue still pending when the run parked (explicit
    /// `next_nodes` overrides can fan out past the pause point).
    #[serde(default)]
    pub pending: Vec<String>,
    /// Step counter at the pause, so resumed runs keep monotonic steps.
    #[serde(default)]
    pub step: u64,
}

impl PersistedContext {
    /// Capture the persistable parts of a live context plus the run state.
    #[must_use]
    pub fn capture(
        exec: &ExecutionContext,
        state: FxHashMap<String, Value>,
        pending: Vec<String>,
        step: u64,
    ) -> Self {
        Self {
            state,
            auth: exec.auth.clone(),
            trace: exec.trace.clone(),
            subgraph_depth: exec.subgraph_depth,
            pending,
            step,
        }
    }

    /// Rebuild a live context for resumption.
    #[must_use]
    pub fn restore(&self, run_id: &str, graph_id: &str) -> ExecutionContext {
        ExecutionContext {
            run_id: run_id.to_string(),
            graph_id: graph_id.to_string(),
            auth: self.auth.clone(),
            trace: self.trace.clone(),
            cancel: crate::runtimes::execution::CancelFlag::new(),
            subgraph_depth: self.subgraph_depth,
        }
    }
}

/// Durable snapshot of a paused run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub run_id: String,
    pub graph_id: String,
    /// Node the run is parked on.
    pub node_id: String,
    /// Frozen message, including state and pending tool calls.
    pub message: Message,
    pub context: PersistedContext,
    /// Envelope schema version in force when the snapshot was taken.
    pub envelope_version: SchemaVersion,
    /// Monotonic version for optimistic concurrency.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Set once a resume of this checkpoint ran to a terminal state or a
    /// successor pause; guards against duplicate resumes.
    pub consumed_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        graph_id: impl Into<String>,
        node_id: impl Into<String>,
        message: Message,
        context: PersistedContext,
    ) -> Self {
        Self {
            checkpoint_id: Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            graph_id: graph_id.into(),
            node_id: node_id.into(),
            message,
            context,
            envelope_version: SchemaVersion::new(1, 0, 0),
            version: 1,
            created_at: Utc::now(),
            expires_at: None,
            consumed_at: None,
        }
    }

    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    #[must_use]
    pub fn is_expired(&self, as_of: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= as_of)
    }

    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    /// Copy with the consumed marker set and the version bumped.
    #[must_use]
    pub fn consumed(mut self) -> Self {
        self.consumed_at = Some(Utc::now());
        self.version += 1;
        self
    }
}

/// Checkpoint store failures.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("checkpoint not found: {checkpoint_id}")]
    #[diagnostic(
        code(spiceflow::checkpoint::not_found),
        help("The checkpoint id may be wrong, expired, or already garbage-collected.")
    )]
    NotFound { checkpoint_id: String },

    #[error(
        "concurrent update on checkpoint {checkpoint_id}: expected version {expected}, found {actual}"
    )]
    #[diagnostic(
        code(spiceflow::checkpoint::concurrency_conflict),
        help("Another worker advanced this run; reload the checkpoint before retrying.")
    )]
    ConcurrencyConflict {
        checkpoint_id: String,
        expected: u64,
        actual: u64,
    },

    /// Terminal write failure after retries; the run cannot safely proceed.
    #[error("checkpoint write failed: {message}")]
    #[diagnostic(code(spiceflow::checkpoint::write_failed))]
    WriteFailed { message: String },

    #[error("backend error: {message}")]
    #[diagnostic(code(spiceflow::checkpoint::backend))]
    Backend { message: String },

    #[error(transparent)]
    #[diagnostic(code(spiceflow::checkpoint::serde))]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Persistence contract for checkpoints.
///
/// - `save` overwrites by `checkpoint_id`; a supplied `expected_version`
///   implements optimistic concurrency and fails with
///   [`CheckpointError::ConcurrencyConflict`] on mismatch.
/// - `load` fails with [`CheckpointError::NotFound`] for unknown ids.
/// - `latest_for_run` returns the most recently saved checkpoint for a run.
/// - `delete` is idempotent.
/// - `list_expired` feeds garbage collection.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: Checkpoint, expected_version: Option<u64>) -> Result<()>;

    async fn load(&self, checkpoint_id: &str) -> Result<Checkpoint>;

    async fn latest_for_run(&self, run_id: &str) -> Result<Option<Checkpoint>>;

    async fn delete(&self, checkpoint_id: &str) -> Result<()>;

    async fn list_expired(&self, as_of: DateTime<Utc>) -> Result<Vec<String>>;
}
