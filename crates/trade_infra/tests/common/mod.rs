#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Notify;
use trade_core::item::{ItemStack, PlayerId};
use trade_core::record::TradeDocument;
use trade_infra::store::{GatewayError, JsonlTradeStore, TradeGateway};

pub fn player(name: &str) -> PlayerId {
    PlayerId::new(name)
}

pub fn diamonds(n: u32) -> ItemStack {
    ItemStack::new("diamond", n)
}

pub fn emeralds(n: u32) -> ItemStack {
    ItemStack::new("emerald", n)
}

pub fn temp_store_path(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "trade_store_{tag}_{}_{}.jsonl",
        std::process::id(),
        nanos
    ))
}

pub fn remove_if_exists(path: &Path) {
    let _ = std::fs::remove_file(path);
}

/// In-memory store whose writes can be switched to fail.
#[derive(Debug, Default)]
pub struct FlakyGateway {
    pub inner: JsonlTradeStore,
    fail_upserts: AtomicBool,
    upserts_attempted: AtomicU64,
}

impl FlakyGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn upserts_attempted(&self) -> u64 {
        self.upserts_attempted.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TradeGateway for FlakyGateway {
    async fn find_by_id(&self, trade_id: u64) -> Result<Option<TradeDocument>, GatewayError> {
        self.inner.find_by_id(trade_id).await
    }

    async fn find_by_player(&self, player: &PlayerId) -> Result<Vec<TradeDocument>, GatewayError> {
        self.inner.find_by_player(player).await
    }

    async fn upsert(&self, doc: &TradeDocument) -> Result<(), GatewayError> {
        self.upserts_attempted.fetch_add(1, Ordering::SeqCst);
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(GatewayError::WriteFailed {
                trade_id: doc.trade_id,
                reason: "injected failure".to_string(),
            });
        }
        self.inner.upsert(doc).await
    }

    async fn max_trade_id(&self) -> Result<Option<u64>, GatewayError> {
        self.inner.max_trade_id().await
    }
}

/// In-memory store that can hold one `find_by_id` after it has read the
/// document, until the test lets it go.
#[derive(Debug, Default)]
pub struct SlowGateway {
    pub inner: JsonlTradeStore,
    armed: AtomicBool,
    reached: Notify,
    release: Notify,
}

impl SlowGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hold the next `find_by_id`.
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Wait until the armed read has the document in hand.
    pub async fn wait_until_held(&self) {
        self.reached.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait::async_trait]
impl TradeGateway for SlowGateway {
    async fn find_by_id(&self, trade_id: u64) -> Result<Option<TradeDocument>, GatewayError> {
        let doc = self.inner.find_by_id(trade_id).await;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.reached.notify_one();
            self.release.notified().await;
        }
        doc
    }

    async fn find_by_player(&self, player: &PlayerId) -> Result<Vec<TradeDocument>, GatewayError> {
        self.inner.find_by_player(player).await
    }

    async fn upsert(&self, doc: &TradeDocument) -> Result<(), GatewayError> {
        self.inner.upsert(doc).await
    }

    async fn max_trade_id(&self) -> Result<Option<u64>, GatewayError> {
        self.inner.max_trade_id().await
    }
}
