//! Durable trade storage: the persistence gateway contract and its JSONL
//! implementation.

use std::fmt;

use trade_core::item::PlayerId;
use trade_core::record::TradeDocument;

pub mod jsonl;

pub use jsonl::{JsonlTradeStore, StoreMetrics};

// --- Gateway error ------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Durable write failed; the document is not stored.
    WriteFailed { trade_id: u64, reason: String },
    /// Store cannot serve requests.
    Unavailable { reason: String },
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteFailed { trade_id, reason } => {
                write!(f, "failed to persist trade {trade_id}: {reason}")
            }
            Self::Unavailable { reason } => write!(f, "trade store unavailable: {reason}"),
        }
    }
}

impl std::error::Error for GatewayError {}

// --- Gateway ------------------------------------------------------------

/// Asynchronous document store, keyed by trade id.
///
/// `upsert` fully replaces the stored document and must be durable once it
/// returns `Ok`.
#[async_trait::async_trait]
pub trait TradeGateway: Send + Sync {
    async fn find_by_id(&self, trade_id: u64) -> Result<Option<TradeDocument>, GatewayError>;

    /// Every stored document where `player` is either participant, ascending
    /// by trade id.
    async fn find_by_player(&self, player: &PlayerId) -> Result<Vec<TradeDocument>, GatewayError>;

    async fn upsert(&self, doc: &TradeDocument) -> Result<(), GatewayError>;

    /// Highest stored trade id, if any.
    async fn max_trade_id(&self) -> Result<Option<u64>, GatewayError>;
}
