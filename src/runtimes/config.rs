//! Runner configuration.

use std::time::Duration;

use crate::node::MetadataSizePolicy;

/// Bounded retry schedule with jittered exponential backoff.
///
/// Used for at-least-once checkpoint writes and for nodes that declare a
/// retry policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Minimum 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Backoff before retry number `attempt` (1-based count of failures so
    /// far), with up to 25% random jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);
        let jitter_budget = exp.as_millis() as u64 / 4;
        if jitter_budget == 0 {
            return exp;
        }
        let jitter = rand::random_range(0..=jitter_budget);
        exp + Duration::from_millis(jitter)
    }
}

/// Configuration for a [`GraphRunner`](crate::runtimes::runner::GraphRunner).
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Maximum sub-graph nesting before a run fails. Default 8.
    pub subgraph_depth_limit: u32,
    /// Optional wall-clock budget per node invocation.
    pub node_timeout: Option<Duration>,
    /// What to do when a result's metadata exceeds the soft budget.
    pub metadata_policy: MetadataSizePolicy,
    /// Optional hard metadata cap; always fails when exceeded.
    pub metadata_hard_limit: Option<usize>,
    /// Retry schedule wrapped around checkpoint writes.
    pub checkpoint_retry: RetryPolicy,
    /// Delete a checkpoint once its resume completed. Default keeps it,
    /// marked consumed, for audit.
    pub delete_consumed_checkpoints: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            subgraph_depth_limit: 8,
            node_timeout: None,
            metadata_policy: MetadataSizePolicy::default(),
            metadata_hard_limit: None,
            checkpoint_retry: RetryPolicy::default(),
            delete_consumed_checkpoints: false,
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn with_subgraph_depth_limit(mut self, limit: u32) -> Self {
        self.subgraph_depth_limit = limit;
        self
    }

    #[must_use]
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_metadata_policy(mut self, policy: MetadataSizePolicy) -> Self {
        self.metadata_policy = policy;
        self
    }

    #[must_use]
    pub fn with_checkpoint_retry(mut self, retry: RetryPolicy) -> Self {
        self.checkpoint_retry = retry;
        self
    }
}
