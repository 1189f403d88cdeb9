use std::{
    sync::{
        Arc, Once,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use ethereum_types::H256;
use statesnap_archive::BlockHeader;
use statesnap_trie::{Nibbles, NodeKind};
use tracing::info;

use crate::error::PublishError;

const LOG_INTERVAL: Duration = Duration::from_secs(60);

/// A trie node ready for publication.
#[derive(Debug)]
pub struct TrieNodeRecord<'a> {
    pub path: &'a Nibbles,
    pub kind: NodeKind,
    /// Full key of the leaf; `None` for branch and extension nodes.
    pub leaf_key: Option<H256>,
    /// Raw RLP of the node, exactly the bytes stored under its hash.
    pub value: &'a [u8],
}

/// The block header being snapshotted, with its raw RLP for the blob table.
#[derive(Debug)]
pub struct HeaderRecord<'a> {
    pub header: &'a BlockHeader,
    pub raw: &'a [u8],
    pub node_id: &'a str,
}

/// Destination of the snapshot records. Stateless apart from the shared
/// counters; all per-worker state lives in the [`BatchTx`] handles.
pub trait Publisher: Send + Sync {
    /// Publishes the header in its own transaction, independent of worker
    /// batches, and returns the catalog id state nodes link against.
    fn publish_header(&self, record: &HeaderRecord<'_>) -> Result<i64, PublishError>;

    /// Opens a worker-local transaction.
    fn begin_tx(&self) -> Result<Box<dyn BatchTx>, PublishError>;

    fn counters(&self) -> &Counters;
}

/// A worker-owned catalog transaction with batch rotation. Rotation happens
/// in place: the handle the walker holds never changes.
pub trait BatchTx {
    /// Blob write plus catalog upsert on `(header_id, state_path)`; returns
    /// the state row id.
    fn publish_state_node(
        &mut self,
        header_id: i64,
        node: &TrieNodeRecord<'_>,
    ) -> Result<i64, PublishError>;

    /// Blob write plus catalog upsert on
    /// `(header_id, state_path, storage_path)`.
    fn publish_storage_node(
        &mut self,
        header_id: i64,
        state_path: &Nibbles,
        node: &TrieNodeRecord<'_>,
    ) -> Result<(), PublishError>;

    /// Blob write keyed by the multihash of `code_hash`.
    fn publish_code(&mut self, code_hash: H256, code: &[u8]) -> Result<(), PublishError>;

    /// Commits and reopens the transaction once the running batch reaches
    /// `max_batch` records.
    fn prepare_batch(&mut self, max_batch: u32) -> Result<(), PublishError>;

    fn commit(self: Box<Self>) -> Result<(), PublishError>;

    fn rollback(self: Box<Self>) -> Result<(), PublishError>;
}

/// Process-wide publication counters, read by the log ticker thread.
pub struct Counters {
    state_nodes: AtomicU64,
    storage_nodes: AtomicU64,
    code_blobs: AtomicU64,
    started: Instant,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            state_nodes: AtomicU64::new(0),
            storage_nodes: AtomicU64::new(0),
            code_blobs: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

impl Counters {
    pub fn count_state_node(&self) {
        self.state_nodes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_storage_node(&self) {
        self.storage_nodes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_code_blob(&self) {
        self.code_blobs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn state_nodes(&self) -> u64 {
        self.state_nodes.load(Ordering::Relaxed)
    }

    pub fn storage_nodes(&self) -> u64 {
        self.storage_nodes.load(Ordering::Relaxed)
    }

    pub fn code_blobs(&self) -> u64 {
        self.code_blobs.load(Ordering::Relaxed)
    }

    pub fn log(&self, message: &str) {
        info!(
            runtime = ?self.started.elapsed(),
            state_nodes = self.state_nodes(),
            storage_nodes = self.storage_nodes(),
            code_blobs = self.code_blobs(),
            "{message}",
        );
    }
}

/// Starts the minute ticker that logs the running counters. Idempotent per
/// publisher; the thread is detached and dies with the process.
pub(crate) fn start_log_ticker(once: &Once, counters: &Arc<Counters>) {
    let counters = Arc::clone(counters);
    once.call_once(move || {
        thread::spawn(move || {
            loop {
                thread::sleep(LOG_INTERVAL);
                counters.log("snapshot progress");
            }
        });
    });
}
