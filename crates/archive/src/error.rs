use ethereum_types::H256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),
    #[error("freezer table error: {0}")]
    Freezer(#[from] std::io::Error),
    #[error("snappy decompression failed: {0}")]
    Snappy(#[from] snap::Error),
    #[error(transparent)]
    RlpDecode(#[from] rlp::DecoderError),
    #[error("freezer index corrupted for table {0}")]
    CorruptIndex(String),
    #[error("unexpected value length for {0}")]
    Corrupt(&'static str),
    #[error("no canonical hash at height {0}")]
    MissingCanonicalHash(u64),
    #[error("no header for block {number} ({hash:?})")]
    MissingHeader { hash: H256, number: u64 },
    #[error("no header number for hash {0:?}")]
    MissingHeaderNumber(H256),
    #[error("missing head header hash")]
    MissingHeadHash,
    #[error("missing code for hash {0:?}")]
    MissingCode(H256),
}
