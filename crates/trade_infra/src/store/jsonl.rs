//! JSONL-backed trade document store.
//!
//! Every upsert appends the full document as one JSON line and syncs the
//! file. On load the last line for a trade id wins. A line that does not
//! parse fails the load: a store that cannot be read completely is not
//! served partially. The one exception is a final line with no newline,
//! which is what a write torn by a crash leaves behind. It is logged and cut
//! off, since its upsert never reported success.
//!
//! File writes and syncs run on the blocking pool, not on an async worker.
//! An upsert whose future is dropped still finishes its write.
//!
//! Without a storage path the store is purely in-memory.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};

use trade_core::item::PlayerId;
use trade_core::record::{TradeDocument, document_fingerprint};

use super::{GatewayError, TradeGateway};

// --- Metrics ------------------------------------------------------------

#[derive(Debug, Default)]
pub struct StoreMetrics {
    writes_total: AtomicU64,
    /// Upserts of a document identical to the stored one.
    unchanged_skips_total: AtomicU64,
    write_failures_total: AtomicU64,
}

impl StoreMetrics {
    pub fn writes_total(&self) -> u64 {
        self.writes_total.load(Ordering::Relaxed)
    }

    pub fn unchanged_skips_total(&self) -> u64 {
        self.unchanged_skips_total.load(Ordering::Relaxed)
    }

    pub fn write_failures_total(&self) -> u64 {
        self.write_failures_total.load(Ordering::Relaxed)
    }
}

// --- Store --------------------------------------------------------------

#[derive(Debug)]
struct StoredDoc {
    doc: TradeDocument,
    fingerprint: u64,
}

#[derive(Debug)]
struct StoreState {
    docs: BTreeMap<u64, StoredDoc>,
    storage_file: Option<File>,
}

#[derive(Debug)]
struct StoreInner {
    state: Mutex<StoreState>,
    metrics: StoreMetrics,
}

/// Cheap to clone; clones share the same documents and file.
#[derive(Debug, Clone)]
pub struct JsonlTradeStore {
    inner: Arc<StoreInner>,
}

impl Default for JsonlTradeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonlTradeStore {
    /// In-memory store; nothing survives the process.
    pub fn new() -> Self {
        Self::from_state(StoreState {
            docs: BTreeMap::new(),
            storage_file: None,
        })
    }

    fn from_state(state: StoreState) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(state),
                metrics: StoreMetrics::default(),
            }),
        }
    }

    /// Create or load a store backed by a JSONL file.
    pub fn with_storage_path(storage_path: impl AsRef<Path>) -> io::Result<Self> {
        let path = storage_path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let docs = load_documents(path)?;
        tracing::info!(
            "trade store: loaded {} trades from {}",
            docs.len(),
            path.display()
        );

        let storage_file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_state(StoreState {
            docs,
            storage_file: Some(storage_file),
        }))
    }

    pub fn metrics(&self) -> &StoreMetrics {
        &self.inner.metrics
    }

    pub fn len(&self) -> usize {
        self.inner.lock().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Synchronous lookup, for inspection outside async contexts.
    pub fn get(&self, trade_id: u64) -> Option<TradeDocument> {
        self.inner.lock().docs.get(&trade_id).map(|s| s.doc.clone())
    }
}

impl StoreInner {
    fn put(&self, doc: &TradeDocument) -> Result<(), GatewayError> {
        let fingerprint = document_fingerprint(doc);
        let mut state = self.lock();

        if state
            .docs
            .get(&doc.trade_id)
            .is_some_and(|s| s.fingerprint == fingerprint)
        {
            self.metrics
                .unchanged_skips_total
                .fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        if let Some(file) = state.storage_file.as_mut() {
            persist_document(file, doc).map_err(|e| {
                self.metrics
                    .write_failures_total
                    .fetch_add(1, Ordering::Relaxed);
                tracing::error!("trade store: write of trade {} failed: {e}", doc.trade_id);
                GatewayError::WriteFailed {
                    trade_id: doc.trade_id,
                    reason: e.to_string(),
                }
            })?;
        }

        state.docs.insert(
            doc.trade_id,
            StoredDoc {
                doc: doc.clone(),
                fingerprint,
            },
        );
        self.metrics.writes_total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().expect("trade store mutex poisoned")
    }
}

#[async_trait::async_trait]
impl TradeGateway for JsonlTradeStore {
    async fn find_by_id(&self, trade_id: u64) -> Result<Option<TradeDocument>, GatewayError> {
        Ok(self.get(trade_id))
    }

    async fn find_by_player(&self, player: &PlayerId) -> Result<Vec<TradeDocument>, GatewayError> {
        Ok(self
            .inner
            .lock()
            .docs
            .values()
            .filter(|s| s.doc.involves(player))
            .map(|s| s.doc.clone())
            .collect())
    }

    async fn upsert(&self, doc: &TradeDocument) -> Result<(), GatewayError> {
        let inner = Arc::clone(&self.inner);
        let doc = doc.clone();
        let trade_id = doc.trade_id;
        tokio::task::spawn_blocking(move || inner.put(&doc))
            .await
            .map_err(|e| GatewayError::Unavailable {
                reason: format!("write of trade {trade_id} did not finish: {e}"),
            })?
    }

    async fn max_trade_id(&self) -> Result<Option<u64>, GatewayError> {
        Ok(self.inner.lock().docs.keys().next_back().copied())
    }
}

fn load_documents(path: &Path) -> io::Result<BTreeMap<u64, StoredDoc>> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    let mut docs = BTreeMap::new();
    let mut offset = 0usize;
    for (index, line) in bytes.split_inclusive(|b| *b == b'\n').enumerate() {
        let line_start = offset;
        offset += line.len();
        let complete = line.ends_with(b"\n");
        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            continue;
        }
        let doc: TradeDocument = match serde_json::from_slice(trimmed) {
            Ok(doc) => doc,
            // Only the final segment can lack a newline.
            Err(e) if !complete => {
                tracing::warn!(
                    "trade store: dropping torn final line {} in {}: {e}",
                    index + 1,
                    path.display()
                );
                file.set_len(line_start as u64)?;
                file.sync_all()?;
                break;
            }
            Err(e) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "invalid trade document at line {} in {}: {e}",
                        index + 1,
                        path.display()
                    ),
                ));
            }
        };
        if !complete {
            // Complete document missing only its newline; the next append
            // must start on a fresh line.
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        let fingerprint = document_fingerprint(&doc);
        docs.insert(doc.trade_id, StoredDoc { doc, fingerprint });
    }
    Ok(docs)
}

/// Append one line and sync. On failure the file is cut back to its prior
/// length so no partial line is left for the next load.
fn persist_document(file: &mut File, doc: &TradeDocument) -> io::Result<()> {
    let mut line = serde_json::to_vec(doc).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("failed to encode trade document: {e}"),
        )
    })?;
    line.push(b'\n');

    let prior_len = file.metadata()?.len();
    let written = file.write_all(&line).and_then(|()| file.sync_all());
    if let Err(err) = written {
        if let Err(truncate_err) = file.set_len(prior_len) {
            tracing::error!("trade store: could not cut back partial write: {truncate_err}");
        }
        return Err(err);
    }
    Ok(())
}
