//! Graph traversal engine.
//!
//! [`GraphRunner`] walks a validated graph one node at a time: each step
//! runs the ordered middleware chain around the node, emits lifecycle
//! events, selects successors deterministically (guards in edge
//! declaration order, first match wins; explicit `next_nodes` overrides
//! taken literally), and merges produced state into the run context. A
//! `WaitingHitl` result parks the run behind a durable checkpoint;
//! [`GraphRunner::resume`] picks it back up with the human response
//! standing in as the paused node's result.
//!
//! The runner depends on the bus and store *traits* only, and neither
//! holds a back-reference: resume is a caller-driven external call.

use std::collections::VecDeque;

use std::sync::Arc;

use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::instrument;

use crate::bus::channel::{HITL_REQUESTS, TOOL_CALLS};
use crate::bus::{BusError, EventBus, EventMetadata, publish_default};
use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointStore, PersistedContext};
use crate::events::WorkflowEvent;
use crate::graph::{Graph, GraphValidationError, GraphValidator};
use crate::hitl::{HumanResponse, tool_call_id};
use crate::message::{ExecutionState, Message, ToolCall, TransitionError};
use crate::middleware::Next;
use crate::node::{HitlPause, Node, NodeError, NodeResult, enforce_metadata_budget};
use crate::runtimes::config::RunnerConfig;
use crate::runtimes::execution::ExecutionContext;

/// A run parked on a human-in-the-loop tool call.
#[derive(Clone, Debug)]
pub struct PausedRun {
    /// The message in `WaitingHitl` state, carrying the pending tool call.
    pub message: Message,
    pub checkpoint_id: String,
    pub tool_call: ToolCall,
}

/// Outcome of `execute`/`resume`.
///
/// Cancelled runs complete with the message in `Cancelled` state; failures
/// are `Err(RunnerError)`.
#[derive(Clone, Debug)]
pub enum RunOutcome {
    Completed(Message),
    Paused(PausedRun),
}

impl RunOutcome {
    /// The final message of a completed (or cancelled) run.
    #[must_use]
    pub fn into_completed(self) -> Option<Message> {
        match self {
            Self::Completed(message) => Some(message),
            Self::Paused(_) => None,
        }
    }

    #[must_use]
    pub fn as_paused(&self) -> Option<&PausedRun> {
        match self {
            Self::Paused(paused) => Some(paused),
            Self::Completed(_) => None,
        }
    }
}

/// Runner failures.
#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] GraphValidationError),

    #[error(transparent)]
    #[diagnostic(code(spiceflow::runner::illegal_transition))]
    IllegalTransition(#[from] TransitionError),

    #[error("node {node_id} failed: {cause}")]
    #[diagnostic(code(spiceflow::runner::node_failure))]
    NodeFailure {
        node_id: String,
        #[source]
        cause: NodeError,
    },

    #[error("node {node_id} timed out after {timeout_ms} ms")]
    #[diagnostic(
        code(spiceflow::runner::node_timeout),
        help("Raise the per-node timeout or make the node cooperative.")
    )]
    NodeTimeout { node_id: String, timeout_ms: u64 },

    #[error("no applicable edge out of node {node_id}")]
    #[diagnostic(
        code(spiceflow::runner::no_applicable_edge),
        help("Every non-terminal node needs at least one edge whose guard matches.")
    )]
    NoApplicableEdge { node_id: String },

    #[error("next_nodes override from {node_id} names unknown node {target}")]
    #[diagnostic(code(spiceflow::runner::unknown_override_target))]
    UnknownOverrideTarget { node_id: String, target: String },

    #[error("subgraph depth {depth} reached the limit of {limit}")]
    #[diagnostic(
        code(spiceflow::runner::subgraph_depth_exceeded),
        help("Check for unbounded sub-graph recursion or raise the configured limit.")
    )]
    SubgraphDepthExceeded { depth: u32, limit: u32 },

    #[error("checkpoint not found: {checkpoint_id}")]
    #[diagnostic(code(spiceflow::runner::checkpoint_not_found))]
    CheckpointNotFound { checkpoint_id: String },

    #[error("checkpoint write failed after retries: {cause}")]
    #[diagnostic(
        code(spiceflow::runner::checkpoint_write_failed),
        help("The run cannot safely proceed without a durable snapshot.")
    )]
    CheckpointWriteFailed {
        #[source]
        cause: CheckpointError,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("checkpoint {checkpoint_id} was already resumed")]
    #[diagnostic(
        code(spiceflow::runner::already_resumed),
        help("Each checkpoint resumes at most once; load the latest checkpoint for the run.")
    )]
    AlreadyResumed { checkpoint_id: String },

    #[error("checkpoint belongs to graph {expected}, not {actual}")]
    #[diagnostic(code(spiceflow::runner::graph_mismatch))]
    GraphMismatch { expected: String, actual: String },

    #[error("node {node_id} paused without a pending HITL tool call")]
    #[diagnostic(
        code(spiceflow::runner::missing_hitl_tool_call),
        help("A pause needs either a WaitingHitl result marker or a HITL tool call on the message.")
    )]
    MissingHitlToolCall { node_id: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Bus(#[from] BusError),
}

/// Traversal engine over validated graphs.
///
/// Holds the collaborator set (event bus + checkpoint store) plus
/// configuration; graphs are passed per call so one runner serves many
/// graphs. Validation verdicts are cached per graph id.
pub struct GraphRunner {
    bus: Arc<dyn EventBus>,
    store: Arc<dyn CheckpointStore>,
    config: RunnerConfig,
    validated: RwLock<FxHashSet<String>>,
}

/// Internal per-step traversal state threaded through the loop.
struct RunState {
    message: Message,
    state: FxHashMap<String, Value>,
    queue: VecDeque<String>,
    step: u64,
}

impl GraphRunner {
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, store: Arc<dyn CheckpointStore>) -> Self {
        Self::with_config(bus, store, RunnerConfig::default())
    }

    #[must_use]
    pub fn with_config(
        bus: Arc<dyn EventBus>,
        store: Arc<dyn CheckpointStore>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            bus,
            store,
            config,
            validated: RwLock::new(FxHashSet::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Execute a graph against an input message until it completes, parks
    /// on HITL, is cancelled, or fails.
    #[instrument(skip(self, graph, input), fields(graph_id = %graph.id()), err)]
    pub async fn execute(&self, graph: &Graph, input: Message) -> Result<RunOutcome, RunnerError> {
        let mut exec = ExecutionContext::new_run(graph.id());
        if let Some(run_id) = &input.run_id {
            exec = exec.with_run_id(run_id.clone());
        }
        self.execute_with_context(graph, input, exec).await
    }

    /// Execute with a caller-supplied context (sub-graphs, tests).
    pub async fn execute_with_context(
        &self,
        graph: &Graph,
        input: Message,
        exec: ExecutionContext,
    ) -> Result<RunOutcome, RunnerError> {
        if exec.subgraph_depth >= self.config.subgraph_depth_limit {
            return Err(RunnerError::SubgraphDepthExceeded {
                depth: exec.subgraph_depth,
                limit: self.config.subgraph_depth_limit,
            });
        }
        self.ensure_validated(graph)?;

        let mut message = input
            .with_run_id(exec.run_id.clone())
            .with_graph_id(graph.id());
        if message.state == ExecutionState::Pending {
            message = message.transition(ExecutionState::Running, Some("started".into()), None)?;
        }

        self.emit(
            &exec,
            WorkflowEvent::GraphStarted {
                run_id: exec.run_id.clone(),
                graph_id: graph.id().to_string(),
            },
        )
        .await?;

        let run = RunState {
            message,
            state: FxHashMap::default(),
            queue: VecDeque::from([graph.entry_point().to_string()]),
            step: 0,
        };
        self.drive(graph, exec, run).await
    }

    /// Resume a parked run from its checkpoint, treating the human
    /// response as the paused node's result.
    ///
    /// Duplicate resumes of a consumed checkpoint fail with
    /// [`RunnerError::AlreadyResumed`]; resuming with the same checkpoint
    /// and response before consumption replays the same trajectory.
    #[instrument(skip(self, graph, response), err)]
    pub async fn resume(
        &self,
        graph: &Graph,
        checkpoint_id: &str,
        response: HumanResponse,
    ) -> Result<RunOutcome, RunnerError> {
        let checkpoint = match self.store.load(checkpoint_id).await {
            Ok(cp) => cp,
            Err(CheckpointError::NotFound { checkpoint_id }) => {
                return Err(RunnerError::CheckpointNotFound { checkpoint_id });
            }
            Err(e) => return Err(e.into()),
        };
        if checkpoint.is_consumed() {
            return Err(RunnerError::AlreadyResumed {
                checkpoint_id: checkpoint_id.to_string(),
            });
        }
        if checkpoint.graph_id != graph.id() {
            return Err(RunnerError::GraphMismatch {
                expected: checkpoint.graph_id.clone(),
                actual: graph.id().to_string(),
            });
        }
        self.ensure_validated(graph)?;

        let exec = checkpoint
            .context
            .restore(&checkpoint.run_id, &checkpoint.graph_id);
        let node_id = checkpoint.node_id.clone();

        let mut state = checkpoint.context.state.clone();
        state.extend(response.metadata.clone());

        // Loop re-entry at this node allocates a fresh invocation index.
        let index_key = hitl_index_key(&node_id);
        let index = state
            .get(&index_key)
            .and_then(Value::as_u64)
            .unwrap_or(0);
        state.insert(index_key, json!(index + 1));

        // Synthesize the paused node's result from the response so
        // downstream guards and agents see the answer.
        let payload = response.payload();
        let mut result = NodeResult::new()
            .with_data(payload.clone())
            .with_state(format!("hitl::{node_id}"), payload);
        for (key, value) in &response.metadata {
            result = result.with_metadata(key.clone(), value.clone());
        }

        let message = checkpoint
            .message
            .clone()
            .without_tool_call(&response.tool_call_id)
            .transition(
                ExecutionState::Running,
                Some("resumed".into()),
                Some(node_id.clone()),
            )?;

        self.emit(
            &exec,
            WorkflowEvent::ToolCallCompleted {
                run_id: exec.run_id.clone(),
                node_id: node_id.clone(),
                tool_call_id: response.tool_call_id.clone(),
            },
        )
        .await?;

        let mut run = RunState {
            message,
            state,
            queue: VecDeque::from(checkpoint.context.pending.clone()),
            step: checkpoint.context.step,
        };

        // Successor selection for the resumed node, then the normal loop.
        let outcome = match self.select_successors(graph, &node_id, &result, &mut run) {
            Ok(StepFlow::Continue) => self.drive(graph, exec, run).await,
            Ok(StepFlow::Complete) => self.complete(graph, &exec, run.message, &result).await,
            Err(e) => Err(self.fail_run(graph, &exec, run.message, e).await),
        };

        if outcome.is_ok() {
            let consumed = checkpoint.clone().consumed();
            if self.config.delete_consumed_checkpoints {
                self.store.delete(&consumed.checkpoint_id).await?;
            } else {
                self.save_with_retry(consumed).await?;
            }
        }
        outcome
    }

    // ------------------------------------------------------------------
    // Core loop
    // ------------------------------------------------------------------

    async fn drive(
        &self,
        graph: &Graph,
        exec: ExecutionContext,
        mut run: RunState,
    ) -> Result<RunOutcome, RunnerError> {
        let mut last_result = NodeResult::new();

        while let Some(node_id) = run.queue.pop_front() {
            // The runner yields between nodes so cancellation can observe.
            tokio::task::yield_now().await;
            if exec.cancel.is_cancelled() {
                return self.finish_cancelled(graph, &exec, run, Some(node_id)).await;
            }

            let Some(node) = graph.node(&node_id) else {
                let err = RunnerError::UnknownOverrideTarget {
                    node_id: run
                        .message
                        .node_id
                        .clone()
                        .unwrap_or_else(|| graph.entry_point().to_string()),
                    target: node_id.clone(),
                };
                return Err(self.fail_run(graph, &exec, run.message, err).await);
            };
            let node = Arc::clone(node);
            run.step += 1;

            self.emit(
                &exec,
                WorkflowEvent::NodeStarted {
                    run_id: exec.run_id.clone(),
                    node_id: node_id.clone(),
                    step: run.step,
                },
            )
            .await?;

            let ctx = crate::node::NodeContext {
                graph_id: graph.id().to_string(),
                node_id: node_id.clone(),
                step: run.step,
                message: run.message.clone(),
                state: run.state.clone(),
                exec: exec.clone(),
            };

            let mut result = match self
                .invoke_node(graph, node.as_ref(), &node_id, ctx, &exec, run.step)
                .await
            {
                Ok(result) => result,
                Err(e) => return Err(self.fail_run(graph, &exec, run.message, e).await),
            };

            // Middleware boundary: observe cancellation before routing.
            if exec.cancel.is_cancelled() {
                return self.finish_cancelled(graph, &exec, run, Some(node_id)).await;
            }

            if let Err(e) = enforce_metadata_budget(
                &node_id,
                &result,
                self.config.metadata_policy,
                self.config.metadata_hard_limit,
            ) {
                let err = RunnerError::NodeFailure {
                    node_id: node_id.clone(),
                    cause: e,
                };
                return Err(self.fail_run(graph, &exec, run.message, err).await);
            }

            // Agents may hand back a replacement message; its state must
            // still respect the transition table.
            if let Some(replacement) = result.message.take() {
                if replacement.state != run.message.state
                    && !run.message.state.can_transition_to(replacement.state)
                {
                    let err = RunnerError::IllegalTransition(TransitionError::Illegal {
                        from: run.message.state,
                        to: replacement.state,
                    });
                    return Err(self.fail_run(graph, &exec, run.message, err).await);
                }
                run.message = replacement;
            }

            if result.pause.is_some() || run.message.has_pending_hitl() {
                return self
                    .pause_run(graph, &exec, node_id, run, result)
                    .await;
            }

            self.emit(
                &exec,
                WorkflowEvent::NodeCompleted {
                    run_id: exec.run_id.clone(),
                    node_id: node_id.clone(),
                    step: run.step,
                    metadata: result.metadata.clone(),
                },
            )
            .await?;

            if exec.cancel.is_cancelled() {
                return self.finish_cancelled(graph, &exec, run, Some(node_id)).await;
            }

            match self.select_successors(graph, &node_id, &result, &mut run) {
                Ok(StepFlow::Continue) => {}
                Ok(StepFlow::Complete) => {
                    return self.complete(graph, &exec, run.message, &result).await;
                }
                Err(e) => return Err(self.fail_run(graph, &exec, run.message, e).await),
            }
            last_result = result;
        }

        // Queue drained without a terminal signal (e.g. an empty override
        // list); complete with the last produced result.
        self.complete(graph, &exec, run.message, &last_result).await
    }

    /// Run the middleware chain + node under the configured timeout and
    /// the node's declared retry policy.
    async fn invoke_node(
        &self,
        graph: &Graph,
        node: &dyn Node,
        node_id: &str,
        ctx: crate::node::NodeContext,
        exec: &ExecutionContext,
        step: u64,
    ) -> Result<NodeResult, RunnerError> {
        let retry = graph.retry_policy(node_id).cloned();
        let max_attempts = retry.as_ref().map_or(1, |p| p.max_attempts);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let invocation = Next::chain(node, graph.middleware()).run(ctx.clone());
            let outcome = match self.config.node_timeout {
                Some(budget) => match tokio::time::timeout(budget, invocation).await {
                    Ok(result) => result,
                    Err(_) => {
                        return Err(RunnerError::NodeTimeout {
                            node_id: node_id.to_string(),
                            timeout_ms: budget.as_millis() as u64,
                        });
                    }
                },
                None => invocation.await,
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err(cause) => {
                    self.emit(
                        exec,
                        WorkflowEvent::NodeFailed {
                            run_id: exec.run_id.clone(),
                            node_id: node_id.to_string(),
                            step,
                            error: cause.to_string(),
                            attempt,
                        },
                    )
                    .await?;
                    if attempt >= max_attempts {
                        return Err(RunnerError::NodeFailure {
                            node_id: node_id.to_string(),
                            cause,
                        });
                    }
                    if let Some(policy) = &retry {
                        tokio::time::sleep(policy.delay_for(attempt)).await;
                    }
                }
            }
        }
    }

    /// Deterministic successor selection (§ step 6): an explicit override
    /// is taken literally in order; otherwise guards are evaluated in edge
    /// declaration order and the first match is taken.
    fn select_successors(
        &self,
        graph: &Graph,
        node_id: &str,
        result: &NodeResult,
        run: &mut RunState,
    ) -> Result<StepFlow, RunnerError> {
        run.state.extend(result.state.clone());

        if let Some(overrides) = &result.next_nodes {
            for target in overrides {
                if !graph.has_node(target) {
                    return Err(RunnerError::UnknownOverrideTarget {
                        node_id: node_id.to_string(),
                        target: target.clone(),
                    });
                }
            }
            run.queue.extend(overrides.iter().cloned());
            if run.queue.is_empty() {
                return Ok(StepFlow::Complete);
            }
            return Ok(StepFlow::Continue);
        }

        let chosen = graph
            .edges_from(node_id)
            .find(|edge| edge.matches(result))
            .map(|edge| edge.to.clone());

        match chosen {
            Some(next) => {
                run.queue.push_back(next);
                Ok(StepFlow::Continue)
            }
            None if !run.queue.is_empty() => Ok(StepFlow::Continue),
            None => {
                let node_is_terminal = graph
                    .node(node_id)
                    .is_some_and(|n| n.is_terminal())
                    || graph.edges_from(node_id).next().is_none();
                if node_is_terminal {
                    Ok(StepFlow::Complete)
                } else {
                    Err(RunnerError::NoApplicableEdge {
                        node_id: node_id.to_string(),
                    })
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Terminal paths
    // ------------------------------------------------------------------

    async fn complete(
        &self,
        graph: &Graph,
        exec: &ExecutionContext,
        message: Message,
        last_result: &NodeResult,
    ) -> Result<RunOutcome, RunnerError> {
        let mut message = message;
        if last_result.data.is_object() {
            message.content = last_result.data.to_string();
            message = message.with_metadata("output", last_result.data.clone());
        }
        // Collaborators may already have moved the message to a terminal
        // state; only transition when it is still in flight.
        let message = if message.state.is_terminal() {
            message
        } else {
            message.transition(ExecutionState::Completed, Some("completed".into()), None)?
        };

        self.emit(
            exec,
            WorkflowEvent::GraphCompleted {
                run_id: exec.run_id.clone(),
                graph_id: graph.id().to_string(),
                final_state: ExecutionState::Completed,
            },
        )
        .await?;
        Ok(RunOutcome::Completed(message))
    }

    async fn finish_cancelled(
        &self,
        graph: &Graph,
        exec: &ExecutionContext,
        run: RunState,
        node_id: Option<String>,
    ) -> Result<RunOutcome, RunnerError> {
        let message = run.message.transition(
            ExecutionState::Cancelled,
            Some("cancelled".into()),
            node_id.clone(),
        )?;

        // The final checkpoint reflects where cancellation was observed.
        let context = PersistedContext::capture(
            exec,
            run.state,
            run.queue.into_iter().collect(),
            run.step,
        );
        let checkpoint = Checkpoint::new(
            exec.run_id.clone(),
            graph.id(),
            node_id.clone().unwrap_or_else(|| graph.entry_point().to_string()),
            message.clone(),
            context,
        );
        self.save_with_retry(checkpoint).await?;

        self.emit(
            exec,
            WorkflowEvent::RunCancelled {
                run_id: exec.run_id.clone(),
                graph_id: graph.id().to_string(),
                node_id,
            },
        )
        .await?;
        Ok(RunOutcome::Completed(message))
    }

    /// Transition the run to `Failed` (preserving the error kind as the
    /// transition reason), emit the graph failure event, and hand the
    /// error back for propagation.
    async fn fail_run(
        &self,
        graph: &Graph,
        exec: &ExecutionContext,
        message: Message,
        error: RunnerError,
    ) -> RunnerError {
        let reason = error.to_string();
        if message.state.can_transition_to(ExecutionState::Failed) {
            // The failed message is observable through the event stream.
            let _ = message.transition(ExecutionState::Failed, Some(reason.clone()), None);
        }
        if let Err(emit_err) = self
            .emit(
                exec,
                WorkflowEvent::GraphFailed {
                    run_id: exec.run_id.clone(),
                    graph_id: graph.id().to_string(),
                    error: reason,
                },
            )
            .await
        {
            tracing::error!(
                target: "spiceflow::runner",
                run_id = %exec.run_id,
                error = %emit_err,
                "failed to publish graph failure event"
            );
        }
        error
    }

    // ------------------------------------------------------------------
    // Pause path
    // ------------------------------------------------------------------

    async fn pause_run(
        &self,
        graph: &Graph,
        exec: &ExecutionContext,
        node_id: String,
        mut run: RunState,
        result: NodeResult,
    ) -> Result<RunOutcome, RunnerError> {
        run.state.extend(result.state.clone());

        // Either the node declared a pause, or a collaborator already
        // attached a HITL tool call to the message.
        let tool_call = match &result.pause {
            Some(pause) => {
                let index_key = hitl_index_key(&node_id);
                let index = run
                    .state
                    .get(&index_key)
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                run.state.insert(index_key, json!(index));
                let call = build_hitl_call(&exec.run_id, &node_id, index, pause);
                run.message = run.message.clone().with_tool_call(call.clone());
                call
            }
            None => match run.message.tool_calls.iter().find(|c| c.is_hitl()) {
                Some(call) => call.clone(),
                None => {
                    let err = RunnerError::MissingHitlToolCall {
                        node_id: node_id.clone(),
                    };
                    return Err(self.fail_run(graph, exec, run.message, err).await);
                }
            },
        };

        let mut message = run.message.clone().with_node_id(node_id.clone());
        if message.state != ExecutionState::WaitingHitl {
            message = message.transition(
                ExecutionState::WaitingHitl,
                Some(format!("waiting for {} response", tool_call.kind.map(|k| k.to_string()).unwrap_or_else(|| "human".into()))),
                Some(node_id.clone()),
            )?;
        }

        let context = PersistedContext::capture(
            exec,
            run.state.clone(),
            run.queue.iter().cloned().collect(),
            run.step,
        );
        let checkpoint = Checkpoint::new(
            exec.run_id.clone(),
            graph.id(),
            node_id.clone(),
            message.clone(),
            context,
        );
        let checkpoint_id = checkpoint.checkpoint_id.clone();
        self.save_with_retry(checkpoint).await?;

        // The runner only publishes; delivering the prompt to a human is
        // an external concern.
        self.bus
            .publish(
                TOOL_CALLS,
                WorkflowEvent::ToolCallEmitted {
                    run_id: exec.run_id.clone(),
                    node_id: node_id.clone(),
                    tool_call: tool_call.clone(),
                },
                Some(self.event_metadata(exec)),
            )
            .await?;
        if let Some(kind) = tool_call.kind {
            let (prompt, options) = prompt_and_options(&tool_call);
            self.bus
                .publish(
                    HITL_REQUESTS,
                    WorkflowEvent::HitlRequested {
                        run_id: exec.run_id.clone(),
                        node_id: node_id.clone(),
                        tool_call_id: tool_call.id.clone(),
                        prompt,
                        kind,
                        options,
                    },
                    Some(self.event_metadata(exec)),
                )
                .await?;
        }

        Ok(RunOutcome::Paused(PausedRun {
            message,
            checkpoint_id,
            tool_call,
        }))
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    fn ensure_validated(&self, graph: &Graph) -> Result<(), GraphValidationError> {
        if self.validated.read().contains(graph.id()) {
            return Ok(());
        }
        GraphValidator::validate(graph)?;
        self.validated.write().insert(graph.id().to_string());
        Ok(())
    }

    /// At-least-once checkpoint write; exhaustion is fatal for the run.
    async fn save_with_retry(&self, checkpoint: Checkpoint) -> Result<(), RunnerError> {
        let policy = &self.config.checkpoint_retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.save(checkpoint.clone(), None).await {
                Ok(()) => return Ok(()),
                Err(e @ CheckpointError::ConcurrencyConflict { .. }) => {
                    return Err(RunnerError::Checkpoint(e));
                }
                Err(cause) => {
                    if attempt >= policy.max_attempts {
                        return Err(RunnerError::CheckpointWriteFailed { cause });
                    }
                    tracing::warn!(
                        target: "spiceflow::runner",
                        attempt,
                        error = %cause,
                        "checkpoint save failed; retrying"
                    );
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
            }
        }
    }

    fn event_metadata(&self, exec: &ExecutionContext) -> EventMetadata {
        EventMetadata::new()
            .with_source("spiceflow.runner")
            .with_trace(exec.trace.trace_id.clone(), exec.trace.span_id.clone())
    }

    async fn emit(&self, exec: &ExecutionContext, event: WorkflowEvent) -> Result<(), BusError> {
        publish_default(self.bus.as_ref(), event, Some(self.event_metadata(exec))).await?;
        Ok(())
    }
}

enum StepFlow {
    Continue,
    Complete,
}

fn hitl_index_key(node_id: &str) -> String {
    format!("__hitl_index::{node_id}")
}

fn build_hitl_call(run_id: &str, node_id: &str, index: u64, pause: &HitlPause) -> ToolCall {
    ToolCall::new(
        tool_call_id(run_id, node_id, index),
        "__hitl__",
        json!({
            "prompt": pause.prompt,
            "kind": pause.kind,
            "options": pause.options,
            "metadata": pause.metadata,
        }),
    )
    .with_kind(pause.kind)
}

fn prompt_and_options(call: &ToolCall) -> (String, Vec<String>) {
    let prompt = call
        .arguments
        .get("prompt")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let options = call
        .arguments
        .get("options")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    (prompt, options)
}
