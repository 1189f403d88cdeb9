use std::{
    fs,
    io::{self, BufRead, BufReader, ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use ethereum_types::H256;
use statesnap_trie::{Nibbles, TrieDB, TrieError, TrieIterator, VisitedNode, partition_bounds};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::error::{RecoveryError, SnapshotError};

/// Shared halt flag: flipped by the signal handler or by the first failing
/// worker, observed by every tracked iterator at its next() boundary.
#[derive(Clone, Default)]
pub struct HaltSignal(Arc<AtomicBool>);

impl HaltSignal {
    pub fn halt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct IterState {
    worker: usize,
    start: Nibbles,
    current: Mutex<Option<Nibbles>>,
    done: AtomicBool,
}

/// Observes iterator positions so an interrupted run can resume.
///
/// Each wrapped iterator registers an `Arc` position cell here; walkers own
/// the iterators and update their cells on every read, and `halt_and_dump`
/// snapshots all cells under a short lock on termination.
pub struct Tracker {
    recovery_file: PathBuf,
    workers: usize,
    halt: HaltSignal,
    states: Mutex<Vec<Arc<IterState>>>,
}

impl Tracker {
    pub fn new(recovery_file: impl Into<PathBuf>, workers: usize) -> Self {
        Self {
            recovery_file: recovery_file.into(),
            workers,
            halt: HaltSignal::default(),
            states: Mutex::new(Vec::new()),
        }
    }

    pub fn halt_signal(&self) -> HaltSignal {
        self.halt.clone()
    }

    pub fn halted(&self) -> bool {
        self.halt.is_halted()
    }

    /// Routes SIGINT/SIGTERM into the halt flag. A handler left over from an
    /// earlier run in the same process is tolerated, though it keeps its own
    /// flag.
    pub fn install_signal_handler(&self) -> Result<(), ctrlc::Error> {
        let halt = self.halt.clone();
        match ctrlc::set_handler(move || {
            info!("halt requested, stopping at the next trie-node boundary");
            halt.halt();
        }) {
            Err(ctrlc::Error::MultipleHandlers) => {
                warn!("signal handler already installed");
                Ok(())
            }
            other => other,
        }
    }

    /// Wraps a partition iterator so its position is observed.
    pub fn wrap<'db>(
        &self,
        worker: usize,
        start: Nibbles,
        iter: TrieIterator<'db>,
    ) -> TrackedIter<'db> {
        self.track(worker, start, None, iter)
    }

    fn track<'db>(
        &self,
        worker: usize,
        start: Nibbles,
        current: Option<Nibbles>,
        iter: TrieIterator<'db>,
    ) -> TrackedIter<'db> {
        let state = Arc::new(IterState {
            worker,
            start,
            current: Mutex::new(current),
            done: AtomicBool::new(false),
        });
        if let Ok(mut states) = self.states.lock() {
            states.push(Arc::clone(&state));
        }
        TrackedIter {
            inner: iter,
            state,
            halt: self.halt.clone(),
        }
    }

    /// Rebuilds iterators from the recovery file, positioned at each
    /// recorded path. `None` when no recovery file exists. Records that do
    /// not fit the configured worker count are a configuration error and
    /// leave the file untouched.
    pub fn restore<'db>(
        &self,
        db: &'db dyn TrieDB,
        root: H256,
    ) -> Result<Option<Vec<TrackedIter<'db>>>, SnapshotError> {
        let file = match fs::File::open(&self.recovery_file) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(RecoveryError::Io(err).into()),
        };
        let mut records = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(RecoveryError::Io)?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            records.push(parse_record(line).ok_or(RecoveryError::Parse(lineno + 1))?);
        }
        if records.is_empty() {
            return Ok(None);
        }
        if records.len() > self.workers {
            return Err(SnapshotError::Config(format!(
                "number of recovered workers ({}) exceeds number configured ({})",
                records.len(),
                self.workers,
            )));
        }

        let bounds = partition_bounds(self.workers);
        records
            .into_iter()
            .map(|(worker, start, current)| {
                let (expected_start, end) = bounds.get(worker).ok_or_else(|| {
                    SnapshotError::Config(format!(
                        "recovered worker index {worker} out of range for {} workers",
                        self.workers,
                    ))
                })?;
                if *expected_start != start {
                    return Err(SnapshotError::Config(format!(
                        "recovered start path '{start}' does not match partition {worker}",
                    )));
                }
                let mut iter = TrieIterator::bounded(db, root, end.clone());
                iter.advance(&current).map_err(SnapshotError::Trie)?;
                Ok(self.track(worker, start, Some(current), iter))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    /// Serializes the positions of all unfinished iterators to the recovery
    /// file, atomically via temp file and rename. When nothing is open the
    /// file is removed instead. Called exactly once per run, on termination.
    pub fn halt_and_dump(&self) -> Result<(), RecoveryError> {
        let states = self
            .states
            .lock()
            .map_err(|_| io::Error::other("tracker lock poisoned"))?;
        let open: Vec<_> = states
            .iter()
            .filter(|state| !state.done.load(Ordering::SeqCst))
            .collect();
        if open.is_empty() {
            if let Err(err) = fs::remove_file(&self.recovery_file) {
                if err.kind() != ErrorKind::NotFound {
                    return Err(err.into());
                }
            }
            return Ok(());
        }

        let dir = match self.recovery_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        for state in &open {
            let current = state
                .current
                .lock()
                .map_err(|_| io::Error::other("tracker lock poisoned"))?
                .clone()
                .unwrap_or_else(|| state.start.clone());
            writeln!(tmp, "{},{},{}", state.worker, state.start, current)?;
        }
        tmp.persist(&self.recovery_file)?;
        info!(
            file = %self.recovery_file.display(),
            open = open.len(),
            "wrote snapshot recovery file",
        );
        Ok(())
    }
}

fn parse_record(line: &str) -> Option<(usize, Nibbles, Nibbles)> {
    let mut parts = line.splitn(3, ',');
    let worker = parts.next()?.parse().ok()?;
    let start = Nibbles::from_hex_str(parts.next()?)?;
    let current = Nibbles::from_hex_str(parts.next()?)?;
    Some((worker, start, current))
}

/// An iterator whose position is observed by the [`Tracker`]. Returns
/// `None` once the halt flag is raised, so walkers exit their loops at the
/// next node boundary.
pub struct TrackedIter<'db> {
    inner: TrieIterator<'db>,
    state: Arc<IterState>,
    halt: HaltSignal,
}

impl TrackedIter<'_> {
    pub fn worker(&self) -> usize {
        self.state.worker
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self, descend: bool) -> Option<VisitedNode> {
        if self.halt.is_halted() {
            return None;
        }
        match self.inner.next(descend) {
            Some(visit) => {
                if let Ok(mut current) = self.state.current.lock() {
                    *current = Some(visit.path.clone());
                }
                Some(visit)
            }
            None => {
                // A latched error keeps the iterator open so its range is
                // dumped for recovery; clean exhaustion marks it done.
                if !self.inner.has_error() {
                    self.state.done.store(true, Ordering::SeqCst);
                }
                None
            }
        }
    }

    pub fn straddles_range(&self, path: &Nibbles) -> bool {
        self.inner.straddles_range(path)
    }

    pub fn finish(&mut self) -> Result<(), TrieError> {
        self.inner.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use keccak_hash::keccak;
    use statesnap_trie::{InMemoryTrieDB, subtrie_iterators, test_utils::build_trie};
    use std::collections::BTreeSet;

    fn fixture() -> (H256, InMemoryTrieDB) {
        let pairs: Vec<_> = (0u8..12)
            .map(|i| (keccak([i]).0.to_vec(), b"fixture-value".to_vec()))
            .collect();
        build_trie(&pairs)
    }

    fn drain(iter: &mut TrackedIter<'_>) -> BTreeSet<(Nibbles, H256)> {
        let mut seen = BTreeSet::new();
        while let Some(visit) = iter.next(true) {
            seen.insert((visit.path, visit.hash));
        }
        seen
    }

    #[test]
    fn dump_restore_round_trip() {
        let (root, db) = fixture();
        let dir = tempfile::tempdir().unwrap();
        let recovery = dir.path().join("recovery");

        let mut full = TrieIterator::new(&db, root);
        let mut expected = BTreeSet::new();
        while let Some(visit) = full.next(true) {
            expected.insert((visit.path, visit.hash));
        }

        let tracker = Tracker::new(&recovery, 2);
        let bounds = partition_bounds(2);
        let mut iters: Vec<_> = subtrie_iterators(&db, root, 2)
            .unwrap()
            .into_iter()
            .zip(bounds)
            .enumerate()
            .map(|(worker, (iter, (start, _)))| tracker.wrap(worker, start, iter))
            .collect();

        // Worker 0 finishes, worker 1 reads a couple of nodes and stops.
        let mut seen = drain(&mut iters[0]);
        for _ in 0..2 {
            if let Some(visit) = iters[1].next(true) {
                seen.insert((visit.path, visit.hash));
            }
        }
        tracker.halt_and_dump().unwrap();
        assert!(recovery.exists());

        let tracker2 = Tracker::new(&recovery, 2);
        let restored = tracker2.restore(&db, root).unwrap().unwrap();
        assert_eq!(restored.len(), 1);
        for mut iter in restored {
            assert_eq!(iter.worker(), 1);
            seen.extend(drain(&mut iter));
        }
        assert_eq!(seen, expected);
    }

    #[test]
    fn completed_run_removes_recovery_file() {
        let (root, db) = fixture();
        let dir = tempfile::tempdir().unwrap();
        let recovery = dir.path().join("recovery");
        fs::write(&recovery, "0,,\n").unwrap();

        let tracker = Tracker::new(&recovery, 1);
        let mut iter = tracker.wrap(0, Nibbles::default(), TrieIterator::new(&db, root));
        drain(&mut iter);
        iter.finish().unwrap();
        tracker.halt_and_dump().unwrap();
        assert!(!recovery.exists());
    }

    #[test]
    fn too_many_records_is_a_config_error() {
        let (root, db) = fixture();
        let dir = tempfile::tempdir().unwrap();
        let recovery = dir.path().join("recovery");
        fs::write(&recovery, "0,,\n1,5,52\n2,a,ab\n").unwrap();

        let tracker = Tracker::new(&recovery, 2);
        let result = tracker.restore(&db, root);
        assert!(matches!(result, Err(SnapshotError::Config(_))));
        // the file must survive a failed restore
        assert!(recovery.exists());
    }

    #[test]
    fn missing_file_restores_nothing() {
        let (root, db) = fixture();
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::new(dir.path().join("recovery"), 2);
        assert!(tracker.restore(&db, root).unwrap().is_none());
    }

    #[test]
    fn malformed_record_is_a_recovery_error() {
        let (root, db) = fixture();
        let dir = tempfile::tempdir().unwrap();
        let recovery = dir.path().join("recovery");
        fs::write(&recovery, "not-a-record\n").unwrap();

        let tracker = Tracker::new(&recovery, 2);
        assert!(matches!(
            tracker.restore(&db, root),
            Err(SnapshotError::Recovery(RecoveryError::Parse(1)))
        ));
    }

    #[test]
    fn halt_flag_stops_iteration_and_keeps_range_open() {
        let (root, db) = fixture();
        let dir = tempfile::tempdir().unwrap();
        let recovery = dir.path().join("recovery");
        let tracker = Tracker::new(&recovery, 1);
        let mut iter = tracker.wrap(0, Nibbles::default(), TrieIterator::new(&db, root));
        assert!(iter.next(true).is_some());
        tracker.halt_signal().halt();
        assert!(iter.next(true).is_none());
        tracker.halt_and_dump().unwrap();
        assert!(recovery.exists());
    }
}
