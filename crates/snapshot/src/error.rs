use statesnap_archive::ArchiveError;
use statesnap_trie::{Nibbles, TrieError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("catalog error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed recovery record at line {0}")]
    Parse(usize),
    #[error("failed to persist recovery file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Trie(#[from] TrieError),
    #[error("failed to decode account at path {path}: {source}")]
    AccountDecode {
        path: Nibbles,
        source: rlp::DecoderError,
    },
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("worker thread panicked")]
    WorkerPanic,
}
