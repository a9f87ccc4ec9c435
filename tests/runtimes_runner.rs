mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use serde_json::json;

use spiceflow::bus::channel;
use spiceflow::events::WorkflowEvent;
use spiceflow::graph::{Graph, guards};
use spiceflow::message::ExecutionState;
use spiceflow::nodes::{DecisionNode, OutputNode, SubGraphNode};
use spiceflow::runtimes::{GraphRunner, RetryPolicy, RunnerConfig, RunnerError};

/// Scenario: straight line. A writes x=1, B writes y=2, Output packages
/// both; NodeCompleted events arrive in order A, B, Output.
#[tokio::test]
async fn straight_line_completes_with_packaged_state() {
    let h = harness();
    let graph = Graph::builder("straight")
        .add_node("a", StateWriterNode::new("x", json!(1)))
        .add_node("b", StateWriterNode::new("y", json!(2)))
        .add_node("out", OutputNode::with_keys(["x", "y"]))
        .add_edge("a", "b")
        .add_edge("b", "out")
        .entry_point("a")
        .build();

    let outcome = h.runner.execute(&graph, input("go")).await.unwrap();
    let message = outcome.into_completed().unwrap();

    assert_eq!(message.state, ExecutionState::Completed);
    assert_eq!(message.metadata["output"], json!({"x": 1, "y": 2}));
    assert_eq!(completed_sequence(&h.bus).await, vec!["a", "b", "out"]);
}

/// Scenario: decision routing. score=0.8 routes to B, score=0.2 to C,
/// and the decision node's completion metadata names the branch.
#[tokio::test]
async fn decision_routes_on_score() {
    for (score, expected) in [(0.8, "b"), (0.2, "c")] {
        let h = harness();
        let graph = Graph::builder("routed")
            .add_node("a", StateWriterNode::new("score", json!(score)))
            .add_node("d", DecisionNode::threshold("score", 0.5))
            .add_node("b", StateWriterNode::new("took", json!("b")))
            .add_node("c", StateWriterNode::new("took", json!("c")))
            .add_edge("a", "d")
            .add_guarded_edge("d", "b", guards::decision_is(true))
            .add_guarded_edge("d", "c", guards::decision_is(false))
            .entry_point("a")
            .build();

        let outcome = h.runner.execute(&graph, input("go")).await.unwrap();
        assert!(outcome.into_completed().is_some());

        let visited = completed_sequence(&h.bus).await;
        assert_eq!(visited, vec!["a", "d", expected]);

        // The chosen branch is recorded on the decision node's event.
        let history = {
            use spiceflow::bus::EventBus;
            h.bus
                .history(channel::NODE_LIFECYCLE, usize::MAX)
                .await
                .unwrap()
        };
        let decision_meta = decode_events(history)
            .into_iter()
            .find_map(|e| match e {
                WorkflowEvent::NodeCompleted {
                    node_id, metadata, ..
                } if node_id == "d" => Some(metadata),
                _ => None,
            })
            .unwrap();
        assert_eq!(decision_meta["decision"], json!(score > 0.5));
    }
}

#[tokio::test]
async fn explicit_override_targets_run_in_order() {
    let h = harness();
    let graph = Graph::builder("override")
        .add_node(
            "fan",
            OverrideNode {
                targets: vec!["second", "first"],
            },
        )
        .add_node("first", StateWriterNode::new("first", json!(true)))
        .add_node("second", StateWriterNode::new("second", json!(true)))
        // Declared edges satisfy reachability but are skipped at runtime
        // when an override is present.
        .add_edge("fan", "first")
        .add_edge("fan", "second")
        .entry_point("fan")
        .build();

    let outcome = h.runner.execute(&graph, input("go")).await.unwrap();
    assert!(outcome.into_completed().is_some());
    assert_eq!(
        completed_sequence(&h.bus).await,
        vec!["fan", "second", "first"]
    );
}

#[tokio::test]
async fn override_naming_unknown_node_fails() {
    let h = harness();
    let graph = Graph::builder("badoverride")
        .add_node(
            "fan",
            OverrideNode {
                targets: vec!["ghost"],
            },
        )
        .add_node("sink", NoopNode)
        .add_edge("fan", "sink")
        .entry_point("fan")
        .build();

    let err = h.runner.execute(&graph, input("go")).await.unwrap_err();
    assert!(matches!(
        err,
        RunnerError::UnknownOverrideTarget { target, .. } if target == "ghost"
    ));
}

#[tokio::test]
async fn unmatched_guards_on_non_terminal_node_fail() {
    let h = harness();
    let graph = Graph::builder("stuck")
        .add_node("a", NoopNode)
        .add_node("b", NoopNode)
        .add_guarded_edge("a", "b", guards::decision_is(true))
        .entry_point("a")
        .build();

    let err = h.runner.execute(&graph, input("go")).await.unwrap_err();
    assert!(matches!(
        err,
        RunnerError::NoApplicableEdge { node_id } if node_id == "a"
    ));
}

#[tokio::test]
async fn middleware_runs_for_every_node_in_order() {
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let h = harness();
    let graph = Graph::builder("observed")
        .add_node("a", NoopNode)
        .add_node("b", NoopNode)
        .add_edge("a", "b")
        .entry_point("a")
        .with_middleware(Arc::new(RecordingMiddleware { seen: seen.clone() }))
        .build();

    h.runner.execute(&graph, input("go")).await.unwrap();
    assert_eq!(*seen.lock(), vec!["a", "b"]);
}

#[tokio::test]
async fn failing_node_without_retry_fails_the_run() {
    let h = harness();
    let graph = Graph::builder("fails")
        .add_node("boom", FailingNode)
        .entry_point("boom")
        .build();

    let err = h.runner.execute(&graph, input("go")).await.unwrap_err();
    assert!(matches!(err, RunnerError::NodeFailure { node_id, .. } if node_id == "boom"));
    assert_eq!(failed_attempts(&h.bus, "boom").await, 1);
}

#[tokio::test]
async fn declared_retry_policy_retries_until_success() {
    let h = harness();
    let graph = Graph::builder("flaky")
        .add_node("flaky", FlakyNode::new(2))
        .with_node_retry(
            "flaky",
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        )
        .entry_point("flaky")
        .build();

    let outcome = h.runner.execute(&graph, input("go")).await.unwrap();
    let message = outcome.into_completed().unwrap();
    assert_eq!(message.state, ExecutionState::Completed);
    // Two failed attempts, each recorded, then success.
    assert_eq!(failed_attempts(&h.bus, "flaky").await, 2);
}

#[tokio::test]
async fn node_timeout_raises_node_timeout() {
    let h = harness_with_config(
        RunnerConfig::default().with_node_timeout(Duration::from_millis(25)),
    );
    let graph = Graph::builder("slow")
        .add_node(
            "slow",
            SlowNode {
                delay: Duration::from_secs(10),
            },
        )
        .entry_point("slow")
        .build();

    let err = h.runner.execute(&graph, input("go")).await.unwrap_err();
    assert!(matches!(err, RunnerError::NodeTimeout { node_id, .. } if node_id == "slow"));
}

#[tokio::test]
async fn cooperative_cancellation_parks_a_final_checkpoint() {
    let h = harness();
    let graph = Graph::builder("cancellable")
        .add_node("first", SelfCancellingNode)
        .add_node("never", StateWriterNode::new("ran", json!(true)))
        .add_edge("first", "never")
        .entry_point("first")
        .build();

    let outcome = h.runner.execute(&graph, input("go")).await.unwrap();
    let message = outcome.into_completed().unwrap();
    assert_eq!(message.state, ExecutionState::Cancelled);
    // The second node never ran.
    assert!(completed_sequence(&h.bus).await.is_empty());
    // A final checkpoint reflects the cancelled run.
    let run_id = message.run_id.clone().unwrap();
    use spiceflow::checkpoint::CheckpointStore;
    let cp = h.store.latest_for_run(&run_id).await.unwrap().unwrap();
    assert_eq!(cp.message.state, ExecutionState::Cancelled);
}

#[tokio::test]
async fn subgraph_runs_nested_graph_and_summarizes() {
    let h = harness();
    let inner = Arc::new(
        Graph::builder("inner")
            .add_node("w", StateWriterNode::new("inner_key", json!("inner_value")))
            .add_node("out", OutputNode::all_state())
            .add_edge("w", "out")
            .entry_point("w")
            .build(),
    );
    let graph = Graph::builder("outer")
        .add_node("sub", SubGraphNode::new(inner, h.runner.clone()))
        .add_node("out", OutputNode::all_state())
        .add_edge("sub", "out")
        .entry_point("sub")
        .build();

    let outcome = h.runner.execute(&graph, input("go")).await.unwrap();
    let message = outcome.into_completed().unwrap();
    assert_eq!(
        message.metadata["output"]["subgraph::inner"]["inner_key"],
        json!("inner_value")
    );
}

#[tokio::test]
async fn subgraph_depth_limit_is_fatal() {
    let h = harness_with_config(RunnerConfig::default().with_subgraph_depth_limit(1));
    let inner = Arc::new(
        Graph::builder("inner")
            .add_node("noop", NoopNode)
            .entry_point("noop")
            .build(),
    );
    let graph = Graph::builder("outer")
        .add_node("sub", SubGraphNode::new(inner, h.runner.clone()))
        .entry_point("sub")
        .build();

    let err = h.runner.execute(&graph, input("go")).await.unwrap_err();
    match err {
        RunnerError::NodeFailure { node_id, cause } => {
            assert_eq!(node_id, "sub");
            assert!(cause.to_string().contains("depth"));
        }
        other => panic!("expected node failure, got {other:?}"),
    }
}

/// Invariant 3: identical inputs and deterministic collaborators produce
/// identical node sequences and identical packaged outputs.
#[tokio::test]
async fn two_independent_runs_are_identical() {
    let build = || {
        Graph::builder("deterministic")
            .add_node("a", StateWriterNode::new("score", json!(0.9)))
            .add_node("d", DecisionNode::threshold("score", 0.5))
            .add_node("hi", StateWriterNode::new("branch", json!("high")))
            .add_node("lo", StateWriterNode::new("branch", json!("low")))
            .add_node("out", OutputNode::all_state())
            .add_edge("a", "d")
            .add_guarded_edge("d", "hi", guards::decision_is(true))
            .add_guarded_edge("d", "lo", guards::decision_is(false))
            .add_edge("hi", "out")
            .add_edge("lo", "out")
            .entry_point("a")
            .build()
    };

    let mut sequences = Vec::new();
    let mut outputs = Vec::new();
    for _ in 0..2 {
        let h = harness();
        let outcome = h.runner.execute(&build(), input("same")).await.unwrap();
        let message = outcome.into_completed().unwrap();
        sequences.push(completed_sequence(&h.bus).await);
        outputs.push(message.metadata["output"].clone());
    }
    assert_eq!(sequences[0], sequences[1]);
    assert_eq!(outputs[0], outputs[1]);
}

#[tokio::test]
async fn graph_lifecycle_events_bracket_the_run() {
    let h = harness();
    let graph = Graph::builder("bracketed")
        .add_node("only", NoopNode)
        .entry_point("only")
        .build();
    h.runner.execute(&graph, input("go")).await.unwrap();

    use spiceflow::bus::EventBus;
    let events = decode_events(
        h.bus
            .history(channel::GRAPH_LIFECYCLE, usize::MAX)
            .await
            .unwrap(),
    );
    assert!(matches!(events.first(), Some(WorkflowEvent::GraphStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(WorkflowEvent::GraphCompleted {
            final_state: ExecutionState::Completed,
            ..
        })
    ));
}

#[tokio::test]
async fn one_runner_serves_many_graphs() {
    let h = harness();
    let g1 = Graph::builder("g1")
        .add_node("n", NoopNode)
        .entry_point("n")
        .build();
    let g2 = Graph::builder("g2")
        .add_node("n", NoopNode)
        .entry_point("n")
        .build();
    let runner: &GraphRunner = &h.runner;
    assert!(runner.execute(&g1, input("x")).await.is_ok());
    assert!(runner.execute(&g2, input("y")).await.is_ok());
    // Cached validation still rejects a different, broken graph.
    let broken = Graph::builder("g3").build();
    assert!(matches!(
        runner.execute(&broken, input("z")).await,
        Err(RunnerError::Validation(_))
    ));
}
