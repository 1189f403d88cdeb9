use std::{path::PathBuf, thread};

use ethereum_types::Address;
use statesnap_archive::{AccountState, ArchiveError, BlockHeader};
use statesnap_trie::{
    EMPTY_TRIE_ROOT, Nibbles, Node, NodeKind, TrieIterator, VisitedNode, leaf_key,
    subtrie_iterators,
};
use tracing::{debug, error, info};

use crate::{
    config::{DEFAULT_BATCH_SIZE, SnapshotParams},
    error::SnapshotError,
    filter,
    publisher::{BatchTx, HeaderRecord, Publisher, TrieNodeRecord},
    source::ChainSource,
    tracker::{HaltSignal, TrackedIter, Tracker},
};

/// Drives a snapshot run: reads the target header from the archive,
/// publishes it, fans the state trie out over worker iterators and walks
/// each one into the publisher.
pub struct Service<'a> {
    source: &'a dyn ChainSource,
    publisher: &'a dyn Publisher,
    recovery_file: PathBuf,
    max_batch: u32,
    node_id: String,
}

impl<'a> Service<'a> {
    pub fn new(
        source: &'a dyn ChainSource,
        publisher: &'a dyn Publisher,
        recovery_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            publisher,
            recovery_file: recovery_file.into(),
            max_batch: DEFAULT_BATCH_SIZE,
            node_id: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    pub fn with_batch_size(mut self, max_batch: u32) -> Self {
        self.max_batch = max_batch;
        self
    }

    /// Snapshot at the chain head instead of a fixed height.
    pub fn create_latest_snapshot(
        &self,
        workers: usize,
        watched_addresses: Vec<Address>,
    ) -> Result<(), SnapshotError> {
        info!("creating snapshot at head");
        self.create_snapshot(&SnapshotParams {
            height: None,
            workers,
            watched_addresses,
        })
    }

    pub fn create_snapshot(&self, params: &SnapshotParams) -> Result<(), SnapshotError> {
        if params.workers == 0 {
            return Err(SnapshotError::Config("worker count must be positive".into()));
        }
        let height = match params.height {
            Some(height) => height,
            None => {
                let head = self.source.head_header_hash()?;
                self.source.header_number(head)?
            }
        };
        let hash = self.source.canonical_hash(height)?;
        let raw = self.source.header_rlp(hash, height)?;
        let header = BlockHeader::decode(&raw).map_err(ArchiveError::RlpDecode)?;
        info!("creating snapshot of block {hash:#x} at height {height}");

        let header_id = self.publisher.publish_header(&HeaderRecord {
            header: &header,
            raw: &raw,
            node_id: &self.node_id,
        })?;

        let watched = filter::watched_paths(&params.watched_addresses);
        let tracker = Tracker::new(&self.recovery_file, params.workers);
        tracker.install_signal_handler()?;

        let db = self.source.trie_db();
        let iters = match tracker.restore(db, header.state_root)? {
            Some(iters) => {
                info!(count = iters.len(), "restored unfinished iterators from recovery file");
                iters
            }
            None => {
                let iters = if params.workers > 1 {
                    subtrie_iterators(db, header.state_root, params.workers)?
                } else {
                    vec![TrieIterator::new(db, header.state_root)]
                };
                iters
                    .into_iter()
                    .enumerate()
                    .map(|(worker, iter)| tracker.wrap(worker, partition_start(worker, params.workers), iter))
                    .collect()
            }
        };

        let result = self.run_walkers(iters, header_id, &watched, tracker.halt_signal());
        if let Err(err) = tracker.halt_and_dump() {
            error!(%err, "failed to write recovery file");
        }
        if result.is_ok() {
            if tracker.halted() {
                info!("snapshot interrupted; rerun with the recovery file to resume");
            }
            self.publisher.counters().log("final counts");
        }
        result
    }

    fn run_walkers(
        &self,
        mut iters: Vec<TrackedIter<'_>>,
        header_id: i64,
        watched: &[Nibbles],
        halt: HaltSignal,
    ) -> Result<(), SnapshotError> {
        let walker = Walker {
            source: self.source,
            publisher: self.publisher,
            header_id,
            watched,
            max_batch: self.max_batch,
        };
        if iters.len() <= 1 {
            return match iters.pop() {
                Some(iter) => walker.run(iter),
                None => Ok(()),
            };
        }

        thread::scope(|scope| {
            let walker = &walker;
            let handles: Vec<_> = iters
                .into_iter()
                .map(|iter| {
                    let halt = halt.clone();
                    scope.spawn(move || {
                        let worker = iter.worker();
                        debug!(worker, "walker started");
                        let result = walker.run(iter);
                        if let Err(ref err) = result {
                            error!(worker, %err, "snapshot worker failed");
                            // stop peers at their next node boundary
                            halt.halt();
                        }
                        result
                    })
                })
                .collect();

            let mut first = Ok(());
            for handle in handles {
                match handle.join() {
                    Ok(result) => {
                        if first.is_ok() {
                            if let Err(err) = result {
                                first = Err(err);
                            }
                        }
                    }
                    Err(_) => {
                        if first.is_ok() {
                            first = Err(SnapshotError::WorkerPanic);
                        }
                    }
                }
            }
            first
        })
    }
}

fn partition_start(worker: usize, workers: usize) -> Nibbles {
    statesnap_trie::partition_bounds(workers)
        .into_iter()
        .nth(worker)
        .map(|(start, _)| start)
        .unwrap_or_default()
}

/// Walks one iterator's range of the state trie, publishing every node and
/// diving into account storage tries and code along the way.
struct Walker<'a> {
    source: &'a dyn ChainSource,
    publisher: &'a dyn Publisher,
    header_id: i64,
    watched: &'a [Nibbles],
    max_batch: u32,
}

impl Walker<'_> {
    fn run(&self, mut iter: TrackedIter<'_>) -> Result<(), SnapshotError> {
        let mut tx = self.publisher.begin_tx()?;
        match self.walk(&mut iter, tx.as_mut()) {
            Ok(()) => {
                tx.commit()?;
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    error!(%rollback_err, "failed to roll back snapshot batch");
                }
                Err(err)
            }
        }
    }

    /// Frontier loop over the iterator's range. A node whose subtree lies
    /// entirely inside the range gets that subtree covered by a recursive
    /// sub-walk; a node whose subtree straddles the range's end bound (or
    /// the trie root) instead feeds its children back through this
    /// iterator, where the bound applies.
    fn walk(&self, iter: &mut TrackedIter<'_>, tx: &mut dyn BatchTx) -> Result<(), SnapshotError> {
        let mut descend = false;
        while let Some(visit) = iter.next(descend) {
            descend = false;
            if !self.watched.is_empty() && !filter::valid_path(&visit.path, self.watched) {
                continue;
            }
            self.node_snapshot(tx, &visit.path, &visit)?;
            if iter.straddles_range(&visit.path) {
                descend = true;
            } else {
                self.subtrie_snapshot(tx, &visit.path, &visit)?;
            }
        }
        iter.finish()?;
        Ok(())
    }

    /// Publishes one state-trie node. Leaves additionally pull in the
    /// account's code blob and its whole storage trie.
    fn node_snapshot(
        &self,
        tx: &mut dyn BatchTx,
        path: &Nibbles,
        visit: &VisitedNode,
    ) -> Result<(), SnapshotError> {
        tx.prepare_batch(self.max_batch)?;
        match &visit.node {
            Node::Leaf { partial, value } => {
                let account =
                    AccountState::decode(value).map_err(|source| SnapshotError::AccountDecode {
                        path: path.clone(),
                        source,
                    })?;
                tx.publish_state_node(
                    self.header_id,
                    &TrieNodeRecord {
                        path,
                        kind: NodeKind::Leaf,
                        leaf_key: Some(leaf_key(path, partial)),
                        value: &visit.raw,
                    },
                )?;
                if account.has_code() {
                    let code = self
                        .source
                        .code(account.code_hash)?
                        .ok_or(ArchiveError::MissingCode(account.code_hash))?;
                    tx.publish_code(account.code_hash, &code)?;
                }
                self.storage_snapshot(tx, account.storage_root, path)?;
            }
            Node::Branch { .. } | Node::Extension { .. } => {
                tx.publish_state_node(
                    self.header_id,
                    &TrieNodeRecord {
                        path,
                        kind: visit.node.kind(),
                        leaf_key: None,
                        value: &visit.raw,
                    },
                )?;
            }
        }
        Ok(())
    }

    /// Walks the subtrie below an already-published node, one level per
    /// iterator with a recursive sub-walk per child. Trie depth bounds the
    /// recursion at 64 nibbles.
    fn subtrie_snapshot(
        &self,
        tx: &mut dyn BatchTx,
        path: &Nibbles,
        visit: &VisitedNode,
    ) -> Result<(), SnapshotError> {
        if matches!(visit.node, Node::Leaf { .. }) {
            return Ok(());
        }
        let mut sub = TrieIterator::new(self.source.trie_db(), visit.hash);
        // skip the subtrie root, indexed by the caller
        let mut descend = sub.next(true).is_some();
        while let Some(child) = sub.next(descend) {
            descend = false;
            let child_path = path.concat(&child.path);
            if !self.watched.is_empty() && !filter::valid_path(&child_path, self.watched) {
                continue;
            }
            self.node_snapshot(tx, &child_path, &child)?;
            self.subtrie_snapshot(tx, &child_path, &child)?;
        }
        sub.finish()?;
        Ok(())
    }

    /// Publishes every node of an account's storage trie. The account was
    /// already confirmed in range, so no path filtering applies here.
    fn storage_snapshot(
        &self,
        tx: &mut dyn BatchTx,
        storage_root: ethereum_types::H256,
        state_path: &Nibbles,
    ) -> Result<(), SnapshotError> {
        if storage_root == *EMPTY_TRIE_ROOT {
            return Ok(());
        }
        let mut iter = TrieIterator::new(self.source.trie_db(), storage_root);
        while let Some(visit) = iter.next(true) {
            tx.prepare_batch(self.max_batch)?;
            let leaf_key = match &visit.node {
                Node::Leaf { partial, .. } => Some(leaf_key(&visit.path, partial)),
                _ => None,
            };
            tx.publish_storage_node(
                self.header_id,
                state_path,
                &TrieNodeRecord {
                    path: &visit.path,
                    kind: visit.node.kind(),
                    leaf_key,
                    value: &visit.raw,
                },
            )?;
        }
        iter.finish()?;
        Ok(())
    }
}
