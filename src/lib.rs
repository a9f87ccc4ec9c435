//! # Spiceflow: Agent Workflow Graph Execution Engine
//!
//! Spiceflow executes agent-oriented workflows expressed as directed
//! graphs. A workflow interleaves automated nodes (agents, tools,
//! decisions, sub-graphs) with synchronous human-in-the-loop pauses; the
//! runner drives the graph forward, persists a checkpoint at every pause
//! so execution can resume hours or days later on a different process, and
//! publishes lifecycle events onto a typed event bus with in-memory and
//! distributed back-ends (Redis Streams, Kafka).
//!
//! ## Core Concepts
//!
//! - **Messages**: Immutable envelopes with a fixed execution-state machine
//! - **Graphs**: Immutable node/edge values with guarded, deterministic routing
//! - **Nodes**: Async units of work; six built-in variants plus your own
//! - **Runner**: Single-path traversal with middleware, pause/resume, cancellation
//! - **Checkpoints**: Durable snapshots keyed by run identity
//! - **Event bus**: Versioned envelopes, schema registry, filter algebra, dead-letter routing
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use spiceflow::bus::{InMemoryEventBus, SchemaRegistry};
//! use spiceflow::checkpoint::InMemoryCheckpointStore;
//! use spiceflow::graph::Graph;
//! use spiceflow::message::Message;
//! use spiceflow::node::{Node, NodeContext, NodeError, NodeResult};
//! use spiceflow::nodes::OutputNode;
//! use spiceflow::runtimes::GraphRunner;
//! use async_trait::async_trait;
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl Node for Greeter {
//!     async fn run(&self, _ctx: NodeContext) -> Result<NodeResult, NodeError> {
//!         Ok(NodeResult::new().with_state("greeting", serde_json::json!("hello")))
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let graph = Graph::builder("greet")
//!     .add_node("greeter", Greeter)
//!     .add_node("out", OutputNode::all_state())
//!     .add_edge("greeter", "out")
//!     .entry_point("greeter")
//!     .build();
//!
//! let bus = Arc::new(InMemoryEventBus::new(Arc::new(SchemaRegistry::standard())));
//! let store = Arc::new(InMemoryCheckpointStore::new());
//! let runner = GraphRunner::new(bus, store);
//!
//! let outcome = runner.execute(&graph, Message::new("start")).await?;
//! let final_message = outcome.into_completed().expect("no HITL nodes in this graph");
//! # Ok(())
//! # }
//! ```
//!
//! ## Human-in-the-Loop
//!
//! A node returning a `WaitingHitl` result (or a collaborator attaching a
//! HITL tool call to the message) parks the run: the runner writes a
//! checkpoint, publishes `ToolCallEmitted`/`HitlRequested`, and returns
//! the paused message. The pause is a **value**, never a control-flow
//! escape. A later [`GraphRunner::resume`](runtimes::GraphRunner::resume)
//! — usually via [`HitlCoordinator`](hitl::HitlCoordinator) — reloads the
//! checkpoint and continues with the human response standing in as the
//! paused node's result. Tool-call ids are a pure function of
//! `(run_id, node_id, invocation_index)`, so retries stay idempotent.
//!
//! ## Module Guide
//!
//! - [`message`] - Message envelope, execution states, tool calls
//! - [`node`] - Node contract, contexts, results, metadata policy
//! - [`nodes`] - The six built-in node variants
//! - [`graph`] - Graph model, builder, guarded edges, validator
//! - [`middleware`] - Ordered per-node middleware chain
//! - [`runtimes`] - Runner, execution contexts, configuration
//! - [`checkpoint`] - Durable pause snapshots and stores
//! - [`bus`] - Typed event bus, envelope, registry, back-ends
//! - [`events`] - The lifecycle event vocabulary
//! - [`hitl`] - Human-in-the-loop coordination
//! - [`agent`] / [`tool`] - External collaborator interfaces

pub mod agent;
pub mod bus;
pub mod checkpoint;
pub mod events;
pub mod graph;
pub mod hitl;
pub mod message;
pub mod middleware;
pub mod node;
pub mod nodes;
pub mod runtimes;
pub mod telemetry;
pub mod tool;
