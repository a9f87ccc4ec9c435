use spiceflow::message::{ExecutionState, HitlKind, Message, ToolCall, TransitionError};

fn running(content: &str) -> Message {
    Message::new(content)
        .transition(ExecutionState::Running, None, None)
        .unwrap()
}

#[test]
fn full_lifecycle_history_chains() {
    let message = running("work")
        .transition(
            ExecutionState::WaitingHitl,
            Some("waiting for approval".into()),
            Some("gate".into()),
        )
        .unwrap()
        .transition(ExecutionState::Running, Some("resumed".into()), Some("gate".into()))
        .unwrap()
        .transition(ExecutionState::Completed, Some("completed".into()), None)
        .unwrap();

    assert_eq!(message.state, ExecutionState::Completed);
    assert!(message.is_terminal());
    assert_eq!(message.state_history.len(), 4);

    // Invariant 1: state equals the last entry's `to`, adjacent entries
    // chain, and every pair is in the table.
    assert_eq!(message.last_transition().unwrap().to, message.state);
    for window in message.state_history.windows(2) {
        assert_eq!(window[0].to, window[1].from);
    }
    for entry in &message.state_history {
        assert!(entry.from.can_transition_to(entry.to));
    }
}

#[test]
fn every_illegal_pair_is_rejected() {
    use ExecutionState::*;
    let all = [
        Pending,
        Running,
        WaitingHitl,
        Suspended,
        Completed,
        Failed,
        Cancelled,
    ];
    for from in all {
        for to in all {
            let expected = from.allowed_successors().contains(&to);
            assert_eq!(
                from.can_transition_to(to),
                expected,
                "table disagreement for {from:?} -> {to:?}"
            );
        }
    }
    // Spot checks against the fixed table.
    assert!(Pending.can_transition_to(Running));
    assert!(Pending.can_transition_to(Cancelled));
    assert!(!Pending.can_transition_to(WaitingHitl));
    assert!(WaitingHitl.can_transition_to(Failed));
    assert!(!WaitingHitl.can_transition_to(Suspended));
    assert!(Suspended.can_transition_to(Running));
    assert!(!Completed.can_transition_to(Running));
}

#[test]
fn transition_failure_preserves_nothing() {
    let message = running("x");
    let err = message
        .clone()
        .transition(ExecutionState::Pending, None, None);
    assert!(matches!(
        err,
        Err(TransitionError::Illegal {
            from: ExecutionState::Running,
            to: ExecutionState::Pending
        })
    ));
}

#[test]
fn reason_records_error_kind_on_failure() {
    let message = running("x")
        .transition(
            ExecutionState::Failed,
            Some("node parse failed: bad input".into()),
            Some("parse".into()),
        )
        .unwrap();
    let last = message.last_transition().unwrap();
    assert_eq!(last.reason.as_deref(), Some("node parse failed: bad input"));
    assert_eq!(last.node_id.as_deref(), Some("parse"));
}

#[test]
fn tool_calls_are_value_immutable() {
    let base = Message::new("payload");
    let with_call = base.clone().with_tool_call(
        ToolCall::new("hitl_r_gate_0", "__hitl__", serde_json::json!({}))
            .with_kind(HitlKind::Confirmation),
    );
    assert!(base.tool_calls.is_empty());
    assert!(with_call.has_pending_hitl());

    let cleared = with_call.clone().without_tool_call("hitl_r_gate_0");
    assert!(with_call.has_pending_hitl());
    assert!(!cleared.has_pending_hitl());
}

#[test]
fn ids_propagate_through_builders() {
    let message = Message::new("x")
        .with_run_id("r1")
        .with_graph_id("g1")
        .with_node_id("n1")
        .with_correlation_id("c1")
        .with_sender("svc");
    assert_eq!(message.run_id.as_deref(), Some("r1"));
    assert_eq!(message.graph_id.as_deref(), Some("g1"));
    assert_eq!(message.node_id.as_deref(), Some("n1"));
    assert_eq!(message.correlation_id.as_deref(), Some("c1"));
    assert_eq!(message.sender, "svc");
}
