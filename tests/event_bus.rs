use std::sync::Arc;

use serde_json::json;

use spiceflow::bus::{
    ChannelSpec, EventBus, EventEnvelope, EventFilter, EventMetadata, InMemoryEventBus,
    SchemaRegistry, SchemaVersion, channel,
};
use spiceflow::events::WorkflowEvent;

fn bus() -> InMemoryEventBus {
    InMemoryEventBus::new(Arc::new(SchemaRegistry::standard()))
}

fn node_started(run: &str, node: &str) -> WorkflowEvent {
    WorkflowEvent::NodeStarted {
        run_id: run.to_string(),
        node_id: node.to_string(),
        step: 1,
    }
}

/// Invariant 5: successful publishes land in history; history is
/// newest-first and bounded by the channel capacity.
#[tokio::test]
async fn publish_appends_to_history_newest_first() {
    let bus = bus();
    for node in ["a", "b", "c"] {
        bus.publish(channel::NODE_LIFECYCLE, node_started("r", node), None)
            .await
            .unwrap();
    }
    let history = bus.history(channel::NODE_LIFECYCLE, 2).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].payload["node_id"], json!("c"));
    assert_eq!(history[1].payload["node_id"], json!("b"));

    bus.clear_history(channel::NODE_LIFECYCLE).await.unwrap();
    assert!(bus.history(channel::NODE_LIFECYCLE, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn history_capacity_is_a_ring() {
    let bus = bus();
    bus.declare_channel(ChannelSpec::new("app.small").with_history_capacity(2));
    for node in ["a", "b", "c"] {
        bus.publish("app.small", node_started("r", node), None)
            .await
            .unwrap();
    }
    let history = bus.history("app.small", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    // Oldest entry was evicted.
    assert_eq!(history[1].payload["node_id"], json!("b"));
}

#[tokio::test]
async fn unregistered_event_type_fails_publish_and_leaves_history_alone() {
    let bus = bus();
    let err = bus
        .publish(
            "app.custom",
            WorkflowEvent::Custom {
                name: "app.unregistered".into(),
                payload: json!({}),
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("app.unregistered"));
    assert!(bus.history("app.custom", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn subscription_sees_published_events() {
    let bus = bus();
    let mut sub = bus
        .subscribe(channel::NODE_LIFECYCLE, EventFilter::All)
        .await
        .unwrap();
    bus.publish(channel::NODE_LIFECYCLE, node_started("r", "a"), None)
        .await
        .unwrap();

    let typed = sub.recv().await.unwrap();
    assert!(matches!(
        typed.event,
        WorkflowEvent::NodeStarted { ref node_id, .. } if node_id == "a"
    ));
    assert_eq!(typed.envelope.event_type, "spice.node.started");
    assert_eq!(typed.envelope.correlation_id.as_deref(), Some("r"));
}

#[tokio::test]
async fn filters_select_on_the_consumer_side() {
    let bus = bus();
    let mut acme_only = bus
        .subscribe(
            channel::NODE_LIFECYCLE,
            EventFilter::TenantId("acme".into())
                .and(EventFilter::metadata_equals("env", json!("prod"))),
        )
        .await
        .unwrap();

    bus.publish(
        channel::NODE_LIFECYCLE,
        node_started("r1", "skipped"),
        Some(EventMetadata::new().with_tenant_id("globex")),
    )
    .await
    .unwrap();
    bus.publish(
        channel::NODE_LIFECYCLE,
        node_started("r2", "matched"),
        Some(
            EventMetadata::new()
                .with_tenant_id("acme")
                .with_custom("env", json!("prod")),
        ),
    )
    .await
    .unwrap();

    let typed = acme_only.recv().await.unwrap();
    assert!(matches!(
        typed.event,
        WorkflowEvent::NodeStarted { ref node_id, .. } if node_id == "matched"
    ));
    // Nothing else queued for this subscriber.
    assert!(acme_only.try_recv().is_none());
}

#[tokio::test]
async fn correlation_filter_follows_one_run() {
    let bus = bus();
    let mut run_one = bus
        .subscribe(
            channel::NODE_LIFECYCLE,
            EventFilter::CorrelationId("r1".into()),
        )
        .await
        .unwrap();
    bus.publish(channel::NODE_LIFECYCLE, node_started("r2", "other"), None)
        .await
        .unwrap();
    bus.publish(channel::NODE_LIFECYCLE, node_started("r1", "mine"), None)
        .await
        .unwrap();
    let typed = run_one.recv().await.unwrap();
    assert_eq!(typed.envelope.correlation_id.as_deref(), Some("r1"));
}

/// Scenario: dead letter. An envelope with an unknown schema produces
/// exactly one dead-letter event and nothing on the source channel.
#[tokio::test]
async fn undecodable_envelope_routes_to_dead_letter() {
    let bus = bus();
    let mut source = bus.subscribe("app.c", EventFilter::All).await.unwrap();
    let mut dlq = bus
        .subscribe(channel::DEAD_LETTER, EventFilter::All)
        .await
        .unwrap();

    let mut envelope = EventEnvelope::new(
        "app.c",
        "spice.graph.started",
        SchemaVersion::new(99, 0, 0),
        json!({"run_id": "r", "graph_id": "g", "type": "graph_started"}),
        EventMetadata::default(),
    )
    .unwrap();
    envelope.schema_version = SchemaVersion::new(99, 0, 0);

    bus.ingest(envelope).await.unwrap();

    let dead = dlq.recv().await.unwrap();
    match dead.event {
        WorkflowEvent::DeadLetter {
            original_channel,
            error_code,
            raw,
            ..
        } => {
            assert_eq!(original_channel, "app.c");
            assert_eq!(error_code, "schema_major_mismatch");
            assert_eq!(raw["schema_version"], json!("99.0.0"));
        }
        other => panic!("expected DeadLetter, got {other:?}"),
    }
    // Exactly one dead letter, zero deliveries on the source channel.
    assert!(dlq.try_recv().is_none());
    assert!(source.try_recv().is_none());
    assert_eq!(bus.history(channel::DEAD_LETTER, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn decodable_ingest_is_delivered_on_its_channel() {
    let registry = Arc::new(SchemaRegistry::standard());
    let bus = InMemoryEventBus::new(registry.clone());
    let mut sub = bus
        .subscribe(channel::GRAPH_LIFECYCLE, EventFilter::All)
        .await
        .unwrap();

    let event = WorkflowEvent::GraphStarted {
        run_id: "r".into(),
        graph_id: "g".into(),
    };
    let envelope = EventEnvelope::new(
        channel::GRAPH_LIFECYCLE,
        event.event_type(),
        event.schema_version(),
        registry.encode(&event).unwrap(),
        EventMetadata::default(),
    )
    .unwrap();

    bus.ingest(envelope).await.unwrap();
    let typed = sub.recv().await.unwrap();
    assert_eq!(typed.event, event);
}

#[tokio::test]
async fn metrics_count_publishes_and_dead_letters() {
    let bus = bus();
    bus.publish(channel::NODE_LIFECYCLE, node_started("r", "a"), None)
        .await
        .unwrap();
    bus.publish(channel::NODE_LIFECYCLE, node_started("r", "b"), None)
        .await
        .unwrap();

    let metrics = bus.metrics(channel::NODE_LIFECYCLE).unwrap();
    assert_eq!(metrics.published, 2);
    assert_eq!(metrics.dead_lettered, 0);

    let mut bad = EventEnvelope::new(
        channel::NODE_LIFECYCLE,
        "spice.node.started",
        SchemaVersion::new(7, 0, 0),
        json!({}),
        EventMetadata::default(),
    )
    .unwrap();
    bad.schema_version = SchemaVersion::new(7, 0, 0);
    bus.ingest(bad).await.unwrap();

    let metrics = bus.metrics(channel::NODE_LIFECYCLE).unwrap();
    assert_eq!(metrics.dead_lettered, 1);
}

#[tokio::test]
async fn stream_consumption_composes_with_combinators() {
    use futures_util::StreamExt;

    let bus = bus();
    let sub = bus
        .subscribe(channel::NODE_LIFECYCLE, EventFilter::All)
        .await
        .unwrap();
    for node in ["a", "b", "c"] {
        bus.publish(channel::NODE_LIFECYCLE, node_started("r", node), None)
            .await
            .unwrap();
    }
    let nodes: Vec<String> = sub
        .into_stream()
        .take(3)
        .filter_map(|typed| async move {
            match typed.event {
                WorkflowEvent::NodeStarted { node_id, .. } => Some(node_id),
                _ => None,
            }
        })
        .collect()
        .await;
    assert_eq!(nodes, vec!["a", "b", "c"]);
}
