//! Record sink
//!
//! Request tasks hand finished records to a bounded queue; a single worker
//! drains it into a [`RecordStore`]. Submitting waits a short bounded time
//! for queue space and then drops the record with a warning, so the request
//! path is never held up by the disk.

use crate::models::UsageRecord;
use crate::utils::error::{ProxyError, ProxyResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// Records written between two flushes at most
const WRITE_BATCH: usize = 64;

/// Persistence collaborator for usage records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Store name for logs
    fn name(&self) -> &str;

    async fn append(&self, record: &UsageRecord) -> Result<()>;

    async fn flush(&self) -> Result<()>;
}

/// Append-only JSON Lines file, one record per line
pub struct JsonlStore {
    path: PathBuf,
    writer: Mutex<BufWriter<tokio::fs::File>>,
}

impl JsonlStore {
    /// Open (or create) the store file, creating parent directories
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create record store directory: {:?}", parent))?;
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open record store: {:?}", path))?;

        debug!("Opened record file {:?} in append mode", path);

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordStore for JsonlStore {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn append(&self, record: &UsageRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record).context("Failed to serialize usage record")?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .with_context(|| format!("Failed to write to {:?}", self.path))
    }

    async fn flush(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .flush()
            .await
            .with_context(|| format!("Failed to flush {:?}", self.path))
    }
}

/// In-process store, mostly for tests and embedding
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<UsageRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything stored so far, in arrival order
    pub async fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, record: &UsageRecord) -> Result<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Producer handle, cloned into every request task
#[derive(Clone)]
pub struct RecordSink {
    tx: mpsc::Sender<UsageRecord>,
    enqueue_timeout: Duration,
    dropped: Arc<AtomicU64>,
}

/// Consumer task writing queued records to the store
pub struct SinkWorker {
    handle: JoinHandle<u64>,
}

impl RecordSink {
    /// Create the queue and start its worker on the current runtime
    pub fn spawn(store: Arc<dyn RecordStore>, capacity: usize, enqueue_timeout: Duration) -> (Self, SinkWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_worker(store, rx));

        let sink = Self {
            tx,
            enqueue_timeout,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sink, SinkWorker { handle })
    }

    /// Enqueue a finished record
    ///
    /// Waits at most the enqueue timeout for space, then tries once more and
    /// gives up. A refused record is counted and reported as
    /// `PersistenceUnavailable`; callers only log it.
    pub async fn submit(&self, record: UsageRecord) -> ProxyResult<()> {
        match tokio::time::timeout(self.enqueue_timeout, self.tx.reserve()).await {
            Ok(Ok(permit)) => {
                permit.send(record);
                Ok(())
            }
            Ok(Err(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Record queue closed; dropped record {}", record.request_id);
                Err(ProxyError::PersistenceUnavailable("record queue closed".to_string()))
            }
            Err(_) => {
                let request_id = record.request_id.clone();
                if self.tx.try_send(record).is_ok() {
                    debug!(
                        "Record enqueue waited over {}ms; try_send succeeded for {}",
                        self.enqueue_timeout.as_millis(),
                        request_id
                    );
                    return Ok(());
                }

                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Record queue full after {}ms; dropped record {}",
                    self.enqueue_timeout.as_millis(),
                    request_id
                );
                Err(ProxyError::PersistenceUnavailable(format!(
                    "record queue full after {}ms",
                    self.enqueue_timeout.as_millis()
                )))
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Records waiting in the queue
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Records refused since startup
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn run_worker(store: Arc<dyn RecordStore>, rx: mpsc::Receiver<UsageRecord>) -> u64 {
    let mut batches = ReceiverStream::new(rx).ready_chunks(WRITE_BATCH);
    let mut persisted = 0u64;

    debug!("Record sink worker started ({} store)", store.name());

    while let Some(batch) = batches.next().await {
        for record in &batch {
            match store.append(record).await {
                Ok(()) => persisted += 1,
                Err(e) => error!("Failed to persist record {}: {:#}", record.request_id, e),
            }
        }
        if let Err(e) = store.flush().await {
            error!("Failed to flush {} store: {:#}", store.name(), e);
        }
    }

    debug!("Record sink worker stopped after {} records", persisted);
    persisted
}

impl SinkWorker {
    /// Wait for the worker to finish once every `RecordSink` clone is dropped
    ///
    /// Returns the number of records persisted.
    pub async fn drain(self, timeout: Duration) -> Result<u64> {
        let persisted = tokio::time::timeout(timeout, self.handle)
            .await
            .context("Timed out draining the record queue")?
            .context("Record sink worker panicked")?;

        info!("Record sink drained, {} records persisted", persisted);
        Ok(persisted)
    }
}
