//! Per-node middleware: wrap node invocation with external async logic.
//!
//! Middleware runs in the order supplied at graph construction and may
//! observe or transform both the inbound context and the outbound result.
//! A middleware that fails short-circuits the step as a node failure.

use std::sync::Arc;

use async_trait::async_trait;

use crate::node::{Node, NodeContext, NodeError, NodeResult};

/// Async middleware wrapped around node invocation (around pattern).
///
/// Implementations must call `next.run(ctx)` to continue down the chain;
/// skipping the call replaces the node's result entirely.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use spiceflow::middleware::{Middleware, Next};
/// use spiceflow::node::{NodeContext, NodeError, NodeResult};
///
/// struct Timing;
///
/// #[async_trait]
/// impl Middleware for Timing {
///     async fn handle(
///         &self,
///         ctx: NodeContext,
///         next: Next<'_>,
///     ) -> Result<NodeResult, NodeError> {
///         let started = std::time::Instant::now();
///         let result = next.run(ctx).await?;
///         tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "node done");
///         Ok(result)
///     }
/// }
/// ```
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: NodeContext, next: Next<'_>) -> Result<NodeResult, NodeError>;
}

/// Continuation handle for the remaining chain plus the node itself.
pub struct Next<'a> {
    node: &'a dyn Node,
    chain: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    /// Entry point used by the runner: the full chain in front of `node`.
    #[must_use]
    pub fn chain(node: &'a dyn Node, chain: &'a [Arc<dyn Middleware>]) -> Self {
        Self { node, chain }
    }

    /// Run the rest of the chain, ending at the node.
    pub async fn run(self, ctx: NodeContext) -> Result<NodeResult, NodeError> {
        match self.chain.split_first() {
            Some((head, tail)) => {
                head.handle(
                    ctx,
                    Next {
                        node: self.node,
                        chain: tail,
                    },
                )
                .await
            }
            None => self.node.run(ctx).await,
        }
    }
}
