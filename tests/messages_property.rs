//! Property coverage for the execution state machine.

use proptest::prelude::*;
use spiceflow::message::{ExecutionState, Message};

fn any_state() -> impl Strategy<Value = ExecutionState> {
    prop_oneof![
        Just(ExecutionState::Pending),
        Just(ExecutionState::Running),
        Just(ExecutionState::WaitingHitl),
        Just(ExecutionState::Suspended),
        Just(ExecutionState::Completed),
        Just(ExecutionState::Failed),
        Just(ExecutionState::Cancelled),
    ]
}

proptest! {
    /// Applying an arbitrary sequence of requested transitions never
    /// produces a message violating the history invariants: rejected
    /// transitions leave the message untouched, accepted ones chain.
    #[test]
    fn history_invariants_hold_under_arbitrary_sequences(
        targets in proptest::collection::vec(any_state(), 0..24)
    ) {
        let mut message = Message::new("prop");
        for target in targets {
            match message.clone().transition(target, None, None) {
                Ok(next) => {
                    prop_assert_eq!(next.state, target);
                    prop_assert_eq!(
                        next.state_history.len(),
                        message.state_history.len() + 1
                    );
                    message = next;
                }
                Err(_) => {
                    prop_assert!(!message.state.can_transition_to(target));
                }
            }
        }

        prop_assert!(
            message
                .last_transition()
                .map(|t| t.to == message.state)
                .unwrap_or(message.state == ExecutionState::Pending)
        );
        for window in message.state_history.windows(2) {
            prop_assert_eq!(window[0].to, window[1].from);
        }
        for entry in &message.state_history {
            prop_assert!(entry.from.can_transition_to(entry.to));
        }
    }

    /// Terminal states admit no successors, ever.
    #[test]
    fn terminal_states_are_absorbing(target in any_state()) {
        for terminal in [
            ExecutionState::Completed,
            ExecutionState::Failed,
            ExecutionState::Cancelled,
        ] {
            prop_assert!(!terminal.can_transition_to(target));
        }
    }
}
