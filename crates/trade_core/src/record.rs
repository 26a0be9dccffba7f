//! Durable trade record and its persisted document shape.
//!
//! `TradeRecord` is the authoritative in-process view of one trade.
//! `TradeDocument` is the storage shape, one document per trade, with item
//! lists carried as codec payloads.
//!
//! Invariants:
//! - `trade_id`, participants and `timestamp_ms` never change after creation.
//! - Item accessors return copies; setters store filtered copies.
//! - Once terminal, the state and both item lists are frozen. Delivery flags
//!   are still set after settlement, each exactly once.

use std::fmt;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

use crate::codec::{self, CodecError};
use crate::item::{ItemStack, PlayerId, retain_real_items};
use crate::lifecycle::{TradeState, TransitionResult, evaluate_transition};

// --- Persisted document -------------------------------------------------

/// One trade as stored by the persistence gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeDocument {
    pub trade_id: u64,
    pub player1: String,
    pub player2: String,
    /// `PENDING`, `ACTIVE`, `COMPLETED` or `CANCELLED`.
    pub state: String,
    /// Creation time, epoch milliseconds.
    pub timestamp: u64,
    #[serde(default)]
    pub player1_items: String,
    #[serde(default)]
    pub player2_items: String,
    #[serde(default)]
    pub items_sent_to_player1: bool,
    #[serde(default)]
    pub items_sent_to_player2: bool,
}

impl TradeDocument {
    pub fn involves(&self, player: &PlayerId) -> bool {
        self.player1 == player.as_str() || self.player2 == player.as_str()
    }
}

/// Content fingerprint of a document, stable across processes.
pub fn document_fingerprint(doc: &TradeDocument) -> u64 {
    // 0xFF never appears in UTF-8, so field boundaries stay unambiguous.
    let mut buf = Vec::with_capacity(
        64 + doc.player1.len()
            + doc.player2.len()
            + doc.player1_items.len()
            + doc.player2_items.len(),
    );
    buf.extend_from_slice(&doc.trade_id.to_le_bytes());
    buf.push(0xFF);
    buf.extend_from_slice(doc.player1.as_bytes());
    buf.push(0xFF);
    buf.extend_from_slice(doc.player2.as_bytes());
    buf.push(0xFF);
    buf.extend_from_slice(doc.state.as_bytes());
    buf.push(0xFF);
    buf.extend_from_slice(&doc.timestamp.to_le_bytes());
    buf.push(0xFF);
    buf.extend_from_slice(doc.player1_items.as_bytes());
    buf.push(0xFF);
    buf.extend_from_slice(doc.player2_items.as_bytes());
    buf.push(0xFF);
    buf.push(u8::from(doc.items_sent_to_player1));
    buf.push(u8::from(doc.items_sent_to_player2));

    xxh64(&buf, 0)
}

// --- Record error -------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Item lists and state are frozen once terminal.
    Frozen { trade_id: u64, state: TradeState },
    NotParticipant { trade_id: u64, player: PlayerId },
    /// Delivery flags may only be set once the trade is settled.
    NotSettled { trade_id: u64, state: TradeState },
    AlreadySent { trade_id: u64, player: PlayerId },
    UnknownState { trade_id: u64, state: String },
    Codec(CodecError),
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frozen { trade_id, state } => {
                write!(f, "trade {trade_id} is {state} and can no longer change")
            }
            Self::NotParticipant { trade_id, player } => {
                write!(f, "player {player} is not part of trade {trade_id}")
            }
            Self::NotSettled { trade_id, state } => {
                write!(f, "trade {trade_id} is {state}; nothing to deliver yet")
            }
            Self::AlreadySent { trade_id, player } => {
                write!(f, "items of trade {trade_id} already sent to {player}")
            }
            Self::UnknownState { trade_id, state } => {
                write!(f, "trade {trade_id} has unknown state '{state}'")
            }
            Self::Codec(err) => write!(f, "item payload: {err}"),
        }
    }
}

impl std::error::Error for RecordError {}

impl From<CodecError> for RecordError {
    fn from(err: CodecError) -> Self {
        Self::Codec(err)
    }
}

// --- Trade record -------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeRecord {
    trade_id: u64,
    player1: PlayerId,
    player2: PlayerId,
    state: TradeState,
    player1_items: Vec<ItemStack>,
    player2_items: Vec<ItemStack>,
    items_sent_to_player1: bool,
    items_sent_to_player2: bool,
    timestamp_ms: u64,
}

impl TradeRecord {
    /// A fresh `Pending` trade with no items.
    pub fn new(trade_id: u64, player1: PlayerId, player2: PlayerId, timestamp_ms: u64) -> Self {
        Self {
            trade_id,
            player1,
            player2,
            state: TradeState::Pending,
            player1_items: Vec::new(),
            player2_items: Vec::new(),
            items_sent_to_player1: false,
            items_sent_to_player2: false,
            timestamp_ms,
        }
    }

    pub fn trade_id(&self) -> u64 {
        self.trade_id
    }

    pub fn player1(&self) -> &PlayerId {
        &self.player1
    }

    pub fn player2(&self) -> &PlayerId {
        &self.player2
    }

    pub fn state(&self) -> TradeState {
        self.state
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn player1_items(&self) -> Vec<ItemStack> {
        self.player1_items.clone()
    }

    pub fn player2_items(&self) -> Vec<ItemStack> {
        self.player2_items.clone()
    }

    pub fn items_sent_to_player1(&self) -> bool {
        self.items_sent_to_player1
    }

    pub fn items_sent_to_player2(&self) -> bool {
        self.items_sent_to_player2
    }

    pub fn involves(&self, player: &PlayerId) -> bool {
        self.player1 == *player || self.player2 == *player
    }

    pub fn counterparty_of(&self, player: &PlayerId) -> Option<&PlayerId> {
        if self.player1 == *player {
            Some(&self.player2)
        } else if self.player2 == *player {
            Some(&self.player1)
        } else {
            None
        }
    }

    /// Items `player` contributed, or `None` if they are not a participant.
    pub fn items_of(&self, player: &PlayerId) -> Option<Vec<ItemStack>> {
        if self.player1 == *player {
            Some(self.player1_items())
        } else if self.player2 == *player {
            Some(self.player2_items())
        } else {
            None
        }
    }

    pub fn items_sent_to(&self, player: &PlayerId) -> Option<bool> {
        if self.player1 == *player {
            Some(self.items_sent_to_player1)
        } else if self.player2 == *player {
            Some(self.items_sent_to_player2)
        } else {
            None
        }
    }

    /// Items `player` is entitled to receive now.
    ///
    /// Completed: the counterparty's items. Cancelled: the player's own items
    /// back. Otherwise, or for non-participants: nothing.
    pub fn items_owed_to(&self, player: &PlayerId) -> Vec<ItemStack> {
        match self.state {
            TradeState::Completed => self
                .counterparty_of(player)
                .and_then(|other| self.items_of(other))
                .unwrap_or_default(),
            TradeState::Cancelled => self.items_of(player).unwrap_or_default(),
            TradeState::Pending | TradeState::Active => Vec::new(),
        }
    }

    pub fn set_player1_items(&mut self, items: &[ItemStack]) -> Result<(), RecordError> {
        self.ensure_mutable()?;
        self.player1_items = retain_real_items(items);
        Ok(())
    }

    pub fn set_player2_items(&mut self, items: &[ItemStack]) -> Result<(), RecordError> {
        self.ensure_mutable()?;
        self.player2_items = retain_real_items(items);
        Ok(())
    }

    /// Replace the item list contributed by `player`.
    pub fn set_items_of(
        &mut self,
        player: &PlayerId,
        items: &[ItemStack],
    ) -> Result<(), RecordError> {
        if self.player1 == *player {
            self.set_player1_items(items)
        } else if self.player2 == *player {
            self.set_player2_items(items)
        } else {
            Err(self.not_participant(player))
        }
    }

    /// Move to `to` if the lifecycle table allows it.
    pub fn apply_state(&mut self, to: TradeState) -> TransitionResult {
        let result = evaluate_transition(self.state, to);
        match &result {
            TransitionResult::Transitioned { .. } => self.state = to,
            TransitionResult::Ignored { reason, .. } => {
                tracing::debug!(
                    "trade {} ignored transition {} -> {}: {}",
                    self.trade_id,
                    self.state,
                    to,
                    reason
                );
            }
        }
        result
    }

    /// Record that `player` received what they are owed. Set-once.
    pub fn mark_items_sent_to(&mut self, player: &PlayerId) -> Result<(), RecordError> {
        if !self.state.is_terminal() {
            return Err(RecordError::NotSettled {
                trade_id: self.trade_id,
                state: self.state,
            });
        }
        let flag = if self.player1 == *player {
            &mut self.items_sent_to_player1
        } else if self.player2 == *player {
            &mut self.items_sent_to_player2
        } else {
            return Err(self.not_participant(player));
        };
        if *flag {
            return Err(RecordError::AlreadySent {
                trade_id: self.trade_id,
                player: player.clone(),
            });
        }
        *flag = true;
        Ok(())
    }

    pub fn to_document(&self) -> Result<TradeDocument, RecordError> {
        Ok(TradeDocument {
            trade_id: self.trade_id,
            player1: self.player1.as_str().to_string(),
            player2: self.player2.as_str().to_string(),
            state: self.state.as_str().to_string(),
            timestamp: self.timestamp_ms,
            player1_items: codec::encode_items(&self.player1_items)?,
            player2_items: codec::encode_items(&self.player2_items)?,
            items_sent_to_player1: self.items_sent_to_player1,
            items_sent_to_player2: self.items_sent_to_player2,
        })
    }

    /// Rebuild a record exactly as stored.
    ///
    /// Item payloads decode fail-open: a corrupt payload yields an empty list.
    pub fn from_document(doc: &TradeDocument) -> Result<Self, RecordError> {
        let state = doc
            .state
            .parse::<TradeState>()
            .map_err(|e| RecordError::UnknownState {
                trade_id: doc.trade_id,
                state: e.0,
            })?;

        Ok(Self {
            trade_id: doc.trade_id,
            player1: PlayerId::new(doc.player1.as_str()),
            player2: PlayerId::new(doc.player2.as_str()),
            state,
            player1_items: codec::decode_items(&doc.player1_items),
            player2_items: codec::decode_items(&doc.player2_items),
            items_sent_to_player1: doc.items_sent_to_player1,
            items_sent_to_player2: doc.items_sent_to_player2,
            timestamp_ms: doc.timestamp,
        })
    }

    fn ensure_mutable(&self) -> Result<(), RecordError> {
        if self.state.is_terminal() {
            return Err(RecordError::Frozen {
                trade_id: self.trade_id,
                state: self.state,
            });
        }
        Ok(())
    }

    fn not_participant(&self, player: &PlayerId) -> RecordError {
        RecordError::NotParticipant {
            trade_id: self.trade_id,
            player: player.clone(),
        }
    }
}
