//! Trade lifecycle states and the transition table.
//!
//! **States:** `Pending -> Active -> Completed`, with `Cancelled` reachable
//! from either non-terminal state.
//!
//! `Completed` and `Cancelled` are terminal. Requests that the table does not
//! allow are never applied; they come back as `TransitionResult::Ignored`.

use std::fmt;
use std::str::FromStr;

// ─── States ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TradeState {
    /// Created, not all items confirmed yet.
    Pending,
    /// Both sides staged their items; the trade is live.
    Active,
    /// Both sides accepted; items changed custody.
    Completed,
    /// Withdrawn by a participant or failed validation.
    Cancelled,
}

impl TradeState {
    pub const ALL: [TradeState; 4] = [
        TradeState::Pending,
        TradeState::Active,
        TradeState::Completed,
        TradeState::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, TradeState::Completed | TradeState::Cancelled)
    }

    /// States from which `self` may be entered.
    pub fn allowed_from(self) -> &'static [TradeState] {
        match self {
            // Initial state only.
            TradeState::Pending => &[],
            TradeState::Active => &[TradeState::Pending],
            TradeState::Completed => &[TradeState::Active],
            TradeState::Cancelled => &[TradeState::Pending, TradeState::Active],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TradeState::Pending => "PENDING",
            TradeState::Active => "ACTIVE",
            TradeState::Completed => "COMPLETED",
            TradeState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a persisted state string is not one of the four states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTradeState(pub String);

impl fmt::Display for UnknownTradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown trade state '{}'", self.0)
    }
}

impl std::error::Error for UnknownTradeState {}

impl FromStr for TradeState {
    type Err = UnknownTradeState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TradeState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownTradeState(s.to_string()))
    }
}

// ─── Transition result ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    Transitioned { from: TradeState, to: TradeState },
    /// Not applied; the current state is unchanged.
    Ignored {
        current: TradeState,
        requested: TradeState,
        reason: &'static str,
    },
}

impl TransitionResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionResult::Transitioned { .. })
    }
}

/// Check a requested transition against the table without applying it.
pub fn evaluate_transition(from: TradeState, to: TradeState) -> TransitionResult {
    let reason = if from.is_terminal() {
        "already in terminal state"
    } else if from == to {
        "already in requested state"
    } else if !to.allowed_from().contains(&from) {
        "transition not allowed"
    } else {
        return TransitionResult::Transitioned { from, to };
    };

    TransitionResult::Ignored {
        current: from,
        requested: to,
        reason,
    }
}
