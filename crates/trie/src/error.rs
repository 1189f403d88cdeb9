use ethereum_types::H256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrieError {
    #[error(transparent)]
    Rlp(#[from] rlp::DecoderError),
    #[error("unknown hex prefix {0:#x}")]
    UnknownHexPrefix(u8),
    #[error("trie node cannot have {0} elements")]
    InvalidNodeArity(usize),
    #[error("missing trie node {0:?}")]
    MissingNode(H256),
    #[error("database error: {0}")]
    Db(#[from] anyhow::Error),
}
