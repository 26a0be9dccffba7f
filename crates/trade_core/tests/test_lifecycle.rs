//! Tests for the trade lifecycle transition table.

use trade_core::lifecycle::{TradeState, TransitionResult, evaluate_transition};

#[test]
fn test_allowed_transitions() {
    let allowed = [
        (TradeState::Pending, TradeState::Active),
        (TradeState::Active, TradeState::Completed),
        (TradeState::Pending, TradeState::Cancelled),
        (TradeState::Active, TradeState::Cancelled),
    ];
    for (from, to) in allowed {
        assert_eq!(
            evaluate_transition(from, to),
            TransitionResult::Transitioned { from, to },
            "{from} -> {to}"
        );
    }
}

#[test]
fn test_pending_cannot_skip_to_completed() {
    let r = evaluate_transition(TradeState::Pending, TradeState::Completed);
    assert!(matches!(
        r,
        TransitionResult::Ignored {
            current: TradeState::Pending,
            requested: TradeState::Completed,
            reason: "transition not allowed"
        }
    ));
}

#[test]
fn test_active_cannot_return_to_pending() {
    assert!(!evaluate_transition(TradeState::Active, TradeState::Pending).is_applied());
}

#[test]
fn test_terminal_states_accept_nothing() {
    for from in [TradeState::Completed, TradeState::Cancelled] {
        for to in TradeState::ALL {
            let r = evaluate_transition(from, to);
            assert!(
                matches!(
                    r,
                    TransitionResult::Ignored {
                        reason: "already in terminal state",
                        ..
                    }
                ),
                "{from} -> {to} should be ignored"
            );
        }
    }
}

#[test]
fn test_self_transition_is_a_noop() {
    for state in [TradeState::Pending, TradeState::Active] {
        assert!(matches!(
            evaluate_transition(state, state),
            TransitionResult::Ignored {
                reason: "already in requested state",
                ..
            }
        ));
    }
}

#[test]
fn test_allowed_from_matches_evaluation() {
    for to in TradeState::ALL {
        for from in TradeState::ALL {
            let expected = to.allowed_from().contains(&from);
            assert_eq!(
                evaluate_transition(from, to).is_applied(),
                expected,
                "{from} -> {to}"
            );
        }
    }
}

#[test]
fn test_only_completed_and_cancelled_are_terminal() {
    assert!(!TradeState::Pending.is_terminal());
    assert!(!TradeState::Active.is_terminal());
    assert!(TradeState::Completed.is_terminal());
    assert!(TradeState::Cancelled.is_terminal());
}
