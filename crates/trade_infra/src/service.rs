//! Trade service: the context object that owns the registry, cache, gateway
//! and sweeper and runs the trade workflow against them.
//!
//! Custody rules:
//! - Staged items are taken exactly once. If the write that records them
//!   fails, they are staged again for their owner.
//! - Items owed after settlement are handed out only after the delivery flag
//!   is durably stored. A failed write hands out nothing.
//! - The store is written first; the cache and registry follow a successful
//!   write, so a cached record never runs ahead of the store.
//!
//! Mutating operations are serialized by one async lock. Reads that miss the
//! cache take the same lock before touching the store, so a stale stored
//! document can never replace a newer cached record or re-track a settled
//! trade.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use trade_core::cache::TradeCache;
use trade_core::item::{ItemStack, PlayerId};
use trade_core::lifecycle::TradeState;
use trade_core::record::{RecordError, TradeRecord};
use trade_core::registry::TradeRegistry;

use crate::config::TradeConfig;
use crate::store::{GatewayError, JsonlTradeStore, TradeGateway};
use crate::sweeper::{CacheSweeper, SweeperStop};

// --- Service error ------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    SelfTrade { player: PlayerId },
    /// A live trade between these two players already exists.
    AlreadyPaired { player1: PlayerId, player2: PlayerId },
    UnknownTrade { trade_id: u64 },
    NotParticipant { trade_id: u64, player: PlayerId },
    /// Only the invited player may accept.
    NotInvitee { trade_id: u64, player: PlayerId },
    IllegalTransition {
        trade_id: u64,
        from: TradeState,
        to: TradeState,
    },
    Record(RecordError),
    Gateway(GatewayError),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfTrade { player } => write!(f, "player {player} cannot trade with themselves"),
            Self::AlreadyPaired { player1, player2 } => {
                write!(f, "{player1} and {player2} already have an open trade")
            }
            Self::UnknownTrade { trade_id } => write!(f, "trade {trade_id} not found"),
            Self::NotParticipant { trade_id, player } => {
                write!(f, "player {player} is not part of trade {trade_id}")
            }
            Self::NotInvitee { trade_id, player } => {
                write!(f, "player {player} was not invited to trade {trade_id}")
            }
            Self::IllegalTransition { trade_id, from, to } => {
                write!(f, "trade {trade_id}: {from} -> {to} is not allowed")
            }
            Self::Record(err) => write!(f, "{err}"),
            Self::Gateway(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<RecordError> for ServiceError {
    fn from(err: RecordError) -> Self {
        Self::Record(err)
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        Self::Gateway(err)
    }
}

/// Open the store named by the config, or an in-memory one.
pub fn open_store(config: &TradeConfig) -> io::Result<Arc<dyn TradeGateway>> {
    let store = match &config.store_path {
        Some(path) => JsonlTradeStore::with_storage_path(path)?,
        None => JsonlTradeStore::new(),
    };
    Ok(Arc::new(store))
}

// --- Service ------------------------------------------------------------

pub struct TradeService {
    registry: Arc<TradeRegistry>,
    cache: Arc<TradeCache>,
    gateway: Arc<dyn TradeGateway>,
    sweeper: Mutex<Option<CacheSweeper>>,
    mutations: tokio::sync::Mutex<()>,
    config: TradeConfig,
    custody_rollbacks_total: AtomicU64,
}

impl TradeService {
    /// Seed identifier allocation from the store and start the cache sweeper.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn start(
        config: TradeConfig,
        gateway: Arc<dyn TradeGateway>,
    ) -> Result<Self, ServiceError> {
        let registry = Arc::new(TradeRegistry::new());
        if let Some(last_id) = gateway.max_trade_id().await? {
            registry.resume_after(last_id);
            tracing::info!("trade service: resuming after trade {last_id}");
        }

        let cache = Arc::new(TradeCache::new(config.cache_expiry));
        let sweeper = CacheSweeper::spawn(Arc::clone(&cache), config.sweep_interval);

        Ok(Self {
            registry,
            cache,
            gateway,
            sweeper: Mutex::new(Some(sweeper)),
            mutations: tokio::sync::Mutex::new(()),
            config,
            custody_rollbacks_total: AtomicU64::new(0),
        })
    }

    pub fn registry(&self) -> &TradeRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &TradeCache {
        &self.cache
    }

    pub fn config(&self) -> &TradeConfig {
        &self.config
    }

    /// Staged items put back after a failed write.
    pub fn custody_rollbacks_total(&self) -> u64 {
        self.custody_rollbacks_total.load(Ordering::Relaxed)
    }

    // --- Staging ----------------------------------------------------------

    /// Offer `items` for `player`'s next create or accept.
    pub fn stage_items(&self, player: &PlayerId, items: &[ItemStack]) {
        self.registry.stage_items(player, items);
    }

    /// Give back whatever `player` staged and no trade consumed.
    pub fn withdraw_staged_items(&self, player: &PlayerId) -> Vec<ItemStack> {
        self.registry.take_staged_items(player)
    }

    // --- Workflow ---------------------------------------------------------

    /// Open a trade from `initiator` to `invitee`, carrying the initiator's
    /// staged items.
    pub async fn create_trade(
        &self,
        initiator: &PlayerId,
        invitee: &PlayerId,
    ) -> Result<TradeRecord, ServiceError> {
        if initiator == invitee {
            return Err(ServiceError::SelfTrade {
                player: initiator.clone(),
            });
        }
        let _guard = self.mutations.lock().await;

        // Trades stored before a restart are not tracked until loaded.
        self.trades_for_locked(initiator).await?;
        if self.registry.are_players_paired(initiator, invitee) {
            return Err(ServiceError::AlreadyPaired {
                player1: initiator.clone(),
                player2: invitee.clone(),
            });
        }

        let trade_id = self.registry.allocate_trade(initiator, invitee);
        let items = self.registry.take_staged_items(initiator);

        let mut record = TradeRecord::new(trade_id, initiator.clone(), invitee.clone(), now_ms());
        let result = match record.set_player1_items(&items) {
            Ok(()) => self.persist(&record).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = result {
            self.registry.forget_trade(trade_id);
            self.restage(initiator, &items, trade_id);
            return Err(err);
        }

        self.cache.put(record.clone());
        tracing::info!("trade {trade_id}: created by {initiator} for {invitee}");
        Ok(record)
    }

    /// The invitee joins with their staged items and the trade goes active.
    pub async fn accept_trade(
        &self,
        trade_id: u64,
        player: &PlayerId,
    ) -> Result<TradeRecord, ServiceError> {
        let _guard = self.mutations.lock().await;
        let mut record = self.require_trade(trade_id).await?;
        if record.player2() != player {
            return Err(if record.involves(player) {
                ServiceError::NotInvitee {
                    trade_id,
                    player: player.clone(),
                }
            } else {
                ServiceError::NotParticipant {
                    trade_id,
                    player: player.clone(),
                }
            });
        }
        ensure_transition(&record, TradeState::Active)?;

        let items = self.registry.take_staged_items(player);
        let result = match record.set_player2_items(&items) {
            Ok(()) => {
                record.apply_state(TradeState::Active);
                self.persist(&record).await
            }
            Err(err) => Err(err.into()),
        };
        if let Err(err) = result {
            self.restage(player, &items, trade_id);
            return Err(err);
        }

        self.registry.set_state(trade_id, TradeState::Active);
        self.cache.put(record.clone());
        tracing::info!("trade {trade_id}: accepted by {player}");
        Ok(record)
    }

    /// Settle an active trade; each side is now owed the other's items.
    pub async fn complete_trade(&self, trade_id: u64) -> Result<TradeRecord, ServiceError> {
        self.settle(trade_id, TradeState::Completed).await
    }

    /// Abort a pending or active trade; each side is owed their own items.
    pub async fn cancel_trade(&self, trade_id: u64) -> Result<TradeRecord, ServiceError> {
        self.settle(trade_id, TradeState::Cancelled).await
    }

    /// Hand `player` what a settled trade owes them. Works once per player.
    pub async fn claim_items(
        &self,
        trade_id: u64,
        player: &PlayerId,
    ) -> Result<Vec<ItemStack>, ServiceError> {
        let _guard = self.mutations.lock().await;
        let mut record = self.require_trade(trade_id).await?;
        if !record.involves(player) {
            return Err(ServiceError::NotParticipant {
                trade_id,
                player: player.clone(),
            });
        }

        record.mark_items_sent_to(player)?;
        let owed = record.items_owed_to(player);
        self.persist(&record).await?;

        self.cache.put(record);
        tracing::info!(
            "trade {trade_id}: delivered {} item stacks to {player}",
            owed.len()
        );
        Ok(owed)
    }

    // --- Reads ------------------------------------------------------------

    /// Cached record, else the stored one (which is then cached).
    pub async fn load_trade(&self, trade_id: u64) -> Result<Option<TradeRecord>, ServiceError> {
        if let Some(record) = self.cache.get(trade_id) {
            return Ok(Some(record));
        }
        let _guard = self.mutations.lock().await;
        self.load_locked(trade_id).await
    }

    /// Every stored trade `player` takes part in, ascending by id.
    ///
    /// Documents with an unreadable state are skipped.
    pub async fn trades_for(&self, player: &PlayerId) -> Result<Vec<TradeRecord>, ServiceError> {
        let _guard = self.mutations.lock().await;
        self.trades_for_locked(player).await
    }

    /// Stop the sweeper and drop all in-memory state.
    ///
    /// Returns `None` if already shut down.
    pub async fn shutdown(&self) -> Option<SweeperStop> {
        let sweeper = self
            .sweeper
            .lock()
            .expect("sweeper slot mutex poisoned")
            .take()?;
        let stop = sweeper.shutdown(self.config.shutdown_timeout).await;
        self.registry.clear();
        self.cache.clear();
        tracing::info!("trade service: shut down (sweeper {stop:?})");
        Some(stop)
    }

    // --- Internals --------------------------------------------------------

    async fn settle(&self, trade_id: u64, to: TradeState) -> Result<TradeRecord, ServiceError> {
        let _guard = self.mutations.lock().await;
        let mut record = self.require_trade(trade_id).await?;
        ensure_transition(&record, to)?;
        record.apply_state(to);
        self.persist(&record).await?;

        self.cache.put(record.clone());
        // Staged sets belong to players, not trades, so they survive settlement.
        self.registry.forget_trade(trade_id);
        tracing::info!("trade {trade_id}: settled as {to}");
        Ok(record)
    }

    /// Callers hold `mutations`.
    async fn require_trade(&self, trade_id: u64) -> Result<TradeRecord, ServiceError> {
        self.load_locked(trade_id)
            .await?
            .ok_or(ServiceError::UnknownTrade { trade_id })
    }

    /// Callers hold `mutations`.
    async fn load_locked(&self, trade_id: u64) -> Result<Option<TradeRecord>, ServiceError> {
        // A writer may have cached a newer record while we waited for the lock.
        if let Some(record) = self.cache.get(trade_id) {
            return Ok(Some(record));
        }
        let Some(doc) = self.gateway.find_by_id(trade_id).await? else {
            return Ok(None);
        };
        let record = TradeRecord::from_document(&doc)?;
        self.adopt(&record);
        Ok(Some(record))
    }

    /// Callers hold `mutations`.
    async fn trades_for_locked(
        &self,
        player: &PlayerId,
    ) -> Result<Vec<TradeRecord>, ServiceError> {
        let docs = self.gateway.find_by_player(player).await?;
        let mut records = Vec::with_capacity(docs.len());
        for doc in &docs {
            match TradeRecord::from_document(doc) {
                Ok(record) => {
                    self.adopt(&record);
                    records.push(record);
                }
                Err(err) => tracing::warn!("skipping stored trade {}: {err}", doc.trade_id),
            }
        }
        Ok(records)
    }

    async fn persist(&self, record: &TradeRecord) -> Result<(), ServiceError> {
        let doc = record.to_document()?;
        self.gateway.upsert(&doc).await?;
        Ok(())
    }

    /// Cache a record read from the store and track it if still live.
    ///
    /// Only sound under `mutations`: the stored document is then the newest
    /// version, and a settled trade is stored as terminal and never tracked.
    fn adopt(&self, record: &TradeRecord) {
        self.cache.put(record.clone());
        self.registry.track_trade(
            record.trade_id(),
            record.player1(),
            record.player2(),
            record.state(),
        );
    }

    fn restage(&self, player: &PlayerId, items: &[ItemStack], trade_id: u64) {
        if items.is_empty() {
            return;
        }
        self.registry.restore_staged_items(player, items);
        self.custody_rollbacks_total.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            "trade {trade_id}: write failed, returned {} staged item stacks to {player}",
            items.len()
        );
    }
}

fn ensure_transition(record: &TradeRecord, to: TradeState) -> Result<(), ServiceError> {
    let from = record.state();
    if to.allowed_from().contains(&from) {
        Ok(())
    } else {
        Err(ServiceError::IllegalTransition {
            trade_id: record.trade_id(),
            from,
            to,
        })
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
