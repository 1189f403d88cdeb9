use std::path::PathBuf;

use ethereum_types::Address;

/// Records per catalog transaction before the publisher rotates it.
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// Where the snapshot records end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotMode {
    /// Relational catalog plus content-addressed blob table in sqlite.
    Sqlite,
    /// The same records as CSV streams under an output directory.
    File,
}

/// Parameters of one snapshot run.
#[derive(Debug, Clone, Default)]
pub struct SnapshotParams {
    /// Target block height; `None` selects the chain head.
    pub height: Option<u64>,
    pub workers: usize,
    pub watched_addresses: Vec<Address>,
}

pub fn default_recovery_file(height: i64) -> PathBuf {
    PathBuf::from(format!("./{height}_snapshot_recovery"))
}
