#![allow(dead_code)]

use std::sync::Arc;

use spiceflow::bus::{EventEnvelope, InMemoryEventBus, SchemaRegistry, channel};
use spiceflow::checkpoint::InMemoryCheckpointStore;
use spiceflow::events::WorkflowEvent;
use spiceflow::message::Message;
use spiceflow::runtimes::{GraphRunner, RunnerConfig};

pub struct TestHarness {
    pub bus: Arc<InMemoryEventBus>,
    pub store: Arc<InMemoryCheckpointStore>,
    pub runner: Arc<GraphRunner>,
}

pub fn harness() -> TestHarness {
    harness_with_config(RunnerConfig::default())
}

pub fn harness_with_config(config: RunnerConfig) -> TestHarness {
    let bus = Arc::new(InMemoryEventBus::new(Arc::new(SchemaRegistry::standard())));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let runner = Arc::new(GraphRunner::with_config(
        bus.clone(),
        store.clone(),
        config,
    ));
    TestHarness { bus, store, runner }
}

pub fn input(content: &str) -> Message {
    Message::new(content)
}

/// Decode a history page (newest first) back into chronological events.
pub fn decode_events(envelopes: Vec<EventEnvelope>) -> Vec<WorkflowEvent> {
    envelopes
        .into_iter()
        .rev()
        .map(|env| serde_json::from_value(env.payload).expect("history payload decodes"))
        .collect()
}

/// Node ids of `NodeCompleted` events, in emission order.
pub async fn completed_sequence(bus: &InMemoryEventBus) -> Vec<String> {
    use spiceflow::bus::EventBus;
    let history = bus
        .history(channel::NODE_LIFECYCLE, usize::MAX)
        .await
        .expect("node lifecycle history");
    decode_events(history)
        .into_iter()
        .filter_map(|event| match event {
            WorkflowEvent::NodeCompleted { node_id, .. } => Some(node_id),
            _ => None,
        })
        .collect()
}

/// Count of `NodeFailed` events for one node.
pub async fn failed_attempts(bus: &InMemoryEventBus, node: &str) -> usize {
    use spiceflow::bus::EventBus;
    let history = bus
        .history(channel::NODE_LIFECYCLE, usize::MAX)
        .await
        .expect("node lifecycle history");
    decode_events(history)
        .into_iter()
        .filter(|event| {
            matches!(event, WorkflowEvent::NodeFailed { node_id, .. } if node_id == node)
        })
        .count()
}
