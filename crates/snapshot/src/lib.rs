pub mod config;
pub mod error;
pub mod file;
pub mod filter;
pub mod ipld;
pub mod publisher;
pub mod service;
pub mod source;
pub mod sqlite;
pub mod tracker;

pub use self::config::{DEFAULT_BATCH_SIZE, SnapshotMode, SnapshotParams, default_recovery_file};
pub use self::error::{PublishError, RecoveryError, SnapshotError};
pub use self::file::FilePublisher;
pub use self::publisher::{BatchTx, Counters, HeaderRecord, Publisher, TrieNodeRecord};
pub use self::service::Service;
pub use self::source::ChainSource;
pub use self::sqlite::SqlitePublisher;
pub use self::tracker::{HaltSignal, TrackedIter, Tracker};
