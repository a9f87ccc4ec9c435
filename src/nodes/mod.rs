//! Built-in node variants.
//!
//! Six variants cover the common shapes of agent workflows: delegation to
//! an agent, tool invocation, boolean routing, terminal output packaging,
//! human-in-the-loop pauses, and nested graphs. Anything else implements
//! [`Node`](crate::node::Node) directly.

mod agent;
mod decision;
mod human;
mod output;
mod subgraph;
mod tool;

pub use agent::AgentNode;
pub use decision::{DecisionNode, DecisionPredicate};
pub use human::HumanNode;
pub use output::OutputNode;
pub use subgraph::SubGraphNode;
pub use tool::{ParamMapper, ToolNode};
