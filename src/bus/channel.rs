//! Channel names and per-channel configuration.

/// Graph lifecycle events (started/completed/failed/cancelled).
pub const GRAPH_LIFECYCLE: &str = "spice.graph.lifecycle";
/// Node lifecycle events (started/completed/failed).
pub const NODE_LIFECYCLE: &str = "spice.node.lifecycle";
/// Tool-call lifecycle events (emitted/completed).
pub const TOOL_CALLS: &str = "spice.toolcall.events";
/// Human-in-the-loop request events.
pub const HITL_REQUESTS: &str = "spice.hitl.requests";
/// Undecodable or policy-rejected envelopes.
pub const DEAD_LETTER: &str = "spice.deadletter";

/// Default bounded publish buffer for the in-memory backend.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;
/// Default ring-buffer capacity for history-enabled channels.
pub const DEFAULT_HISTORY_CAPACITY: usize = 256;

/// Configuration block for a named, typed stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    /// Keep a bounded in-memory history of recent envelopes.
    pub history: bool,
    pub history_capacity: usize,
    /// Maintain publish/drop/dead-letter counters.
    pub metrics: bool,
}

impl ChannelSpec {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            history: true,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            metrics: true,
        }
    }

    #[must_use]
    pub fn without_history(mut self) -> Self {
        self.history = false;
        self
    }

    #[must_use]
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history = true;
        self.history_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn without_metrics(mut self) -> Self {
        self.metrics = false;
        self
    }
}

/// The predeclared standard channels.
#[must_use]
pub fn standard_channels() -> Vec<ChannelSpec> {
    vec![
        ChannelSpec::new(GRAPH_LIFECYCLE),
        ChannelSpec::new(NODE_LIFECYCLE),
        ChannelSpec::new(TOOL_CALLS),
        ChannelSpec::new(HITL_REQUESTS),
        ChannelSpec::new(DEAD_LETTER),
    ]
}

/// Redis stream key for a channel: dots become colons, so
/// `spice.toolcall.events` maps to `spice:toolcall:events`.
#[must_use]
pub fn stream_key(channel: &str) -> String {
    channel.replace('.', ":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_channels_are_predeclared() {
        let names: Vec<String> = standard_channels().into_iter().map(|c| c.name).collect();
        assert!(names.contains(&TOOL_CALLS.to_string()));
        assert!(names.contains(&DEAD_LETTER.to_string()));
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn stream_key_mapping() {
        assert_eq!(stream_key(TOOL_CALLS), "spice:toolcall:events");
    }
}
