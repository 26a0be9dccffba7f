//! Marshaling onto the execution boundary.
//!
//! Inventory state may only be mutated on one designated context. Core and
//! gateway calls can complete anywhere, so callers hand the mutation to an
//! `ExecutionBoundary` instead of running it where the result arrived.
//!
//! `queued_boundary()` is the usual setup: any thread submits through the
//! `QueuedBoundary` handle, and the designated thread drains the queue with
//! `BoundaryPump::run_pending` once per tick.

use std::fmt;

use tokio::sync::{mpsc, oneshot};

/// Work to run on the boundary.
pub type BoundaryTask = Box<dyn FnOnce() + Send + 'static>;

/// The boundary is gone; the task was not and will not be run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryClosed;

impl fmt::Display for BoundaryClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "execution boundary is closed")
    }
}

impl std::error::Error for BoundaryClosed {}

pub trait ExecutionBoundary: Send + Sync {
    /// Schedule `task` to run on the boundary.
    fn submit(&self, task: BoundaryTask) -> Result<(), BoundaryClosed>;
}

// --- Queued boundary ----------------------------------------------------

/// Create a connected submit handle and pump.
pub fn queued_boundary() -> (QueuedBoundary, BoundaryPump) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        QueuedBoundary { tx },
        BoundaryPump {
            rx,
            ran_total: 0,
        },
    )
}

/// Cloneable submit side of a queued boundary.
#[derive(Debug, Clone)]
pub struct QueuedBoundary {
    tx: mpsc::UnboundedSender<BoundaryTask>,
}

impl ExecutionBoundary for QueuedBoundary {
    fn submit(&self, task: BoundaryTask) -> Result<(), BoundaryClosed> {
        self.tx.send(task).map_err(|_| BoundaryClosed)
    }
}

/// Receive side, owned by the designated thread. Dropping it closes the
/// boundary and discards queued tasks.
#[derive(Debug)]
pub struct BoundaryPump {
    rx: mpsc::UnboundedReceiver<BoundaryTask>,
    ran_total: u64,
}

impl BoundaryPump {
    /// Run every task queued so far, in submission order, without waiting.
    ///
    /// Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        self.ran_total += ran as u64;
        ran
    }

    /// Run tasks as they arrive until every submit handle is dropped.
    pub async fn run_until_closed(&mut self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.rx.recv().await {
            task();
            ran += 1;
        }
        self.ran_total += ran as u64;
        ran
    }

    pub fn ran_total(&self) -> u64 {
        self.ran_total
    }
}

// --- Inline boundary ----------------------------------------------------

/// Runs tasks immediately on the submitting thread.
///
/// Only correct when every caller already runs on the designated context,
/// e.g. single-threaded tools and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineBoundary;

impl ExecutionBoundary for InlineBoundary {
    fn submit(&self, task: BoundaryTask) -> Result<(), BoundaryClosed> {
        task();
        Ok(())
    }
}

// --- Helper -------------------------------------------------------------

/// Run `f` on the boundary and await its result.
///
/// Fails with `BoundaryClosed` if the boundary refuses the task or drops it
/// without running it.
pub async fn apply_on_boundary<B, F, T>(boundary: &B, f: F) -> Result<T, BoundaryClosed>
where
    B: ExecutionBoundary + ?Sized,
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    boundary.submit(Box::new(move || {
        let _ = tx.send(f());
    }))?;
    rx.await.map_err(|_| BoundaryClosed)
}
