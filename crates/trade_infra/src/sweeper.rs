//! Background eviction of stale trade cache entries.
//!
//! One tokio task per cache ticks at a fixed period and calls
//! `TradeCache::sweep`. Missed ticks are skipped, not burst. Shutdown signals
//! the task, waits up to a grace period, then aborts it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use trade_core::cache::TradeCache;

/// How the sweeper task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperStop {
    /// Exited on its own within the grace period.
    Stopped,
    /// Did not exit in time and was aborted.
    Aborted,
    /// The task panicked before shutdown was requested or while handling it.
    Panicked,
}

/// Shortest period the sweeper ticks at.
const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub struct CacheSweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    sweeps_total: Arc<AtomicU64>,
}

impl CacheSweeper {
    /// Start sweeping `cache` every `period`. Must be called inside a tokio
    /// runtime.
    ///
    /// The first sweep runs one full period after spawning. Periods below
    /// one millisecond are raised to it.
    pub fn spawn(cache: Arc<TradeCache>, period: Duration) -> Self {
        let period = period.max(MIN_PERIOD);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let sweeps_total = Arc::new(AtomicU64::new(0));
        let sweeps = Arc::clone(&sweeps_total);

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let evicted = cache.sweep();
                        sweeps.fetch_add(1, Ordering::Relaxed);
                        if evicted > 0 {
                            tracing::info!("cache sweeper: evicted {evicted} stale trades");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("cache sweeper: stopped");
        });

        tracing::debug!("cache sweeper: started with period {period:?}");
        Self {
            shutdown_tx,
            handle,
            sweeps_total,
        }
    }

    /// Completed sweep passes.
    pub fn sweeps_total(&self) -> u64 {
        self.sweeps_total.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task and wait up to `grace` for it to exit, then abort it.
    pub async fn shutdown(self, grace: Duration) -> SweeperStop {
        let Self {
            shutdown_tx,
            mut handle,
            ..
        } = self;
        let _ = shutdown_tx.send(true);

        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => SweeperStop::Stopped,
            Ok(Err(err)) if err.is_panic() => {
                tracing::error!("cache sweeper: task panicked: {err}");
                SweeperStop::Panicked
            }
            Ok(Err(err)) => {
                tracing::warn!("cache sweeper: task ended early: {err}");
                SweeperStop::Aborted
            }
            Err(_) => {
                tracing::warn!("cache sweeper: no exit within {grace:?}, aborting");
                handle.abort();
                SweeperStop::Aborted
            }
        }
    }
}
