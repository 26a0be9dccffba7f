//! In-memory trade registry: identity allocation, pre-trade staging and
//! lightweight state tracking.
//!
//! Nothing here is persisted. A restart loses staged items and metadata;
//! `resume_after` and `track_trade` let the owner rebuild from the store.
//!
//! Invariants:
//! - Allocated identifiers are strictly increasing and never reused.
//! - `take_staged_items` is destructive: a staged set is handed out once.
//! - State changes go through the lifecycle table; illegal ones are no-ops.
//! - Items are copied on the way in and on the way out.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::item::{ItemStack, PlayerId};
use crate::lifecycle::{TradeState, TransitionResult, evaluate_transition};

/// State reported for identifiers the registry does not know.
pub const UNKNOWN_TRADE_STATE: TradeState = TradeState::Cancelled;

/// Lightweight metadata kept per live trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeMeta {
    pub player1: PlayerId,
    pub player2: PlayerId,
    pub state: TradeState,
}

impl TradeMeta {
    fn pairs(&self, a: &PlayerId, b: &PlayerId) -> bool {
        (self.player1 == *a && self.player2 == *b) || (self.player1 == *b && self.player2 == *a)
    }
}

// --- Metrics ------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RegistryMetrics {
    allocations_total: AtomicU64,
    staged_takes_total: AtomicU64,
    rejected_transitions_total: AtomicU64,
}

impl RegistryMetrics {
    pub fn allocations_total(&self) -> u64 {
        self.allocations_total.load(Ordering::Relaxed)
    }

    /// Non-empty staged sets handed out by `take_staged_items`.
    pub fn staged_takes_total(&self) -> u64 {
        self.staged_takes_total.load(Ordering::Relaxed)
    }

    pub fn rejected_transitions_total(&self) -> u64 {
        self.rejected_transitions_total.load(Ordering::Relaxed)
    }
}

// --- Registry -----------------------------------------------------------

/// Thread-safe registry. Share it behind an `Arc`; no external locking needed.
#[derive(Debug)]
pub struct TradeRegistry {
    next_id: AtomicU64,
    trades: Mutex<HashMap<u64, TradeMeta>>,
    staged: Mutex<HashMap<PlayerId, Vec<ItemStack>>>,
    metrics: RegistryMetrics,
}

impl Default for TradeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TradeRegistry {
    /// Empty registry; the first allocated identifier is 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            trades: Mutex::new(HashMap::new()),
            staged: Mutex::new(HashMap::new()),
            metrics: RegistryMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &RegistryMetrics {
        &self.metrics
    }

    /// Make sure future identifiers are greater than `last_id`.
    ///
    /// Never moves the counter backwards.
    pub fn resume_after(&self, last_id: u64) {
        self.next_id
            .fetch_max(last_id.saturating_add(1), Ordering::SeqCst);
    }

    /// Issue the next identifier and start tracking the trade as `Pending`.
    pub fn allocate_trade(&self, player1: &PlayerId, player2: &PlayerId) -> u64 {
        let trade_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.metrics.allocations_total.fetch_add(1, Ordering::Relaxed);
        self.lock_trades().insert(
            trade_id,
            TradeMeta {
                player1: player1.clone(),
                player2: player2.clone(),
                state: TradeState::Pending,
            },
        );
        tracing::debug!("allocated trade {trade_id} for {player1} and {player2}");
        trade_id
    }

    /// Re-register a trade known from storage, e.g. after a restart.
    ///
    /// Terminal trades are not tracked. Returns whether metadata was added.
    pub fn track_trade(
        &self,
        trade_id: u64,
        player1: &PlayerId,
        player2: &PlayerId,
        state: TradeState,
    ) -> bool {
        if state.is_terminal() {
            return false;
        }
        self.resume_after(trade_id);
        let mut trades = self.lock_trades();
        if trades.contains_key(&trade_id) {
            return false;
        }
        trades.insert(
            trade_id,
            TradeMeta {
                player1: player1.clone(),
                player2: player2.clone(),
                state,
            },
        );
        true
    }

    // --- Staging ----------------------------------------------------------

    /// Replace whatever `player` had staged with a copy of `items`.
    pub fn stage_items(&self, player: &PlayerId, items: &[ItemStack]) {
        self.lock_staged().insert(player.clone(), items.to_vec());
    }

    pub fn peek_staged_items(&self, player: &PlayerId) -> Vec<ItemStack> {
        self.lock_staged().get(player).cloned().unwrap_or_default()
    }

    /// Hand out and clear the staged set. A second call returns nothing.
    pub fn take_staged_items(&self, player: &PlayerId) -> Vec<ItemStack> {
        let taken = self.lock_staged().remove(player).unwrap_or_default();
        if !taken.is_empty() {
            self.metrics.staged_takes_total.fetch_add(1, Ordering::Relaxed);
        }
        taken
    }

    /// Put previously taken items back in front of anything staged since.
    pub fn restore_staged_items(&self, player: &PlayerId, items: &[ItemStack]) {
        if items.is_empty() {
            return;
        }
        let mut staged = self.lock_staged();
        let slot = staged.entry(player.clone()).or_default();
        slot.splice(0..0, items.iter().cloned());
    }

    pub fn has_staged_items(&self, player: &PlayerId) -> bool {
        self.lock_staged()
            .get(player)
            .is_some_and(|items| !items.is_empty())
    }

    pub fn clear_staged_items(&self, player: &PlayerId) {
        self.lock_staged().remove(player);
    }

    // --- State ------------------------------------------------------------

    /// Apply a transition if the lifecycle table allows it.
    ///
    /// Returns `None` for unknown trades.
    pub fn set_state(&self, trade_id: u64, to: TradeState) -> Option<TransitionResult> {
        let mut trades = self.lock_trades();
        let meta = trades.get_mut(&trade_id)?;
        let result = evaluate_transition(meta.state, to);
        match &result {
            TransitionResult::Transitioned { .. } => meta.state = to,
            TransitionResult::Ignored {
                current, reason, ..
            } => {
                self.metrics
                    .rejected_transitions_total
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "trade {trade_id}: rejected transition {current} -> {to} ({reason})"
                );
            }
        }
        Some(result)
    }

    /// Current state, or `UNKNOWN_TRADE_STATE` if the trade is not tracked.
    pub fn state(&self, trade_id: u64) -> TradeState {
        self.try_state(trade_id).unwrap_or(UNKNOWN_TRADE_STATE)
    }

    pub fn try_state(&self, trade_id: u64) -> Option<TradeState> {
        self.lock_trades().get(&trade_id).map(|meta| meta.state)
    }

    pub fn meta(&self, trade_id: u64) -> Option<TradeMeta> {
        self.lock_trades().get(&trade_id).cloned()
    }

    /// Tracked and not terminal.
    pub fn is_valid(&self, trade_id: u64) -> bool {
        self.try_state(trade_id)
            .is_some_and(|state| !state.is_terminal())
    }

    /// Whether a non-terminal trade exists between exactly these two players,
    /// in either order.
    pub fn are_players_paired(&self, a: &PlayerId, b: &PlayerId) -> bool {
        self.lock_trades()
            .values()
            .any(|meta| meta.pairs(a, b) && !meta.state.is_terminal())
    }

    /// Identifiers of tracked, non-terminal trades `player` takes part in,
    /// ascending.
    pub fn trades_involving(&self, player: &PlayerId) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .lock_trades()
            .iter()
            .filter(|(_, meta)| {
                !meta.state.is_terminal() && (meta.player1 == *player || meta.player2 == *player)
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Drop the trade's metadata and both participants' staged items.
    pub fn release_trade(&self, trade_id: u64) -> bool {
        let Some(meta) = self.lock_trades().remove(&trade_id) else {
            return false;
        };
        let mut staged = self.lock_staged();
        staged.remove(&meta.player1);
        staged.remove(&meta.player2);
        tracing::debug!("released trade {trade_id}");
        true
    }

    /// Drop the trade's metadata only; staged items stay where they are.
    pub fn forget_trade(&self, trade_id: u64) -> bool {
        self.lock_trades().remove(&trade_id).is_some()
    }

    /// Number of tracked trades.
    pub fn len(&self) -> usize {
        self.lock_trades().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget all metadata and staged items. The identifier counter is kept.
    pub fn clear(&self) {
        self.lock_trades().clear();
        self.lock_staged().clear();
    }

    fn lock_trades(&self) -> std::sync::MutexGuard<'_, HashMap<u64, TradeMeta>> {
        self.trades.lock().expect("trade registry mutex poisoned")
    }

    fn lock_staged(&self) -> std::sync::MutexGuard<'_, HashMap<PlayerId, Vec<ItemStack>>> {
        self.staged.lock().expect("staging mutex poisoned")
    }
}
