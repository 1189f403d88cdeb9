use ethereum_types::H256;
use statesnap_archive::{ArchiveDb, ArchiveError};
use statesnap_trie::TrieDB;

/// The archive-node facts the snapshot service consumes. Implemented by the
/// on-disk [`ArchiveDb`]; tests substitute in-memory fixtures.
pub trait ChainSource: Send + Sync {
    fn canonical_hash(&self, number: u64) -> Result<H256, ArchiveError>;
    fn head_header_hash(&self) -> Result<H256, ArchiveError>;
    fn header_number(&self, hash: H256) -> Result<u64, ArchiveError>;
    fn header_rlp(&self, hash: H256, number: u64) -> Result<Vec<u8>, ArchiveError>;
    fn code(&self, code_hash: H256) -> Result<Option<Vec<u8>>, ArchiveError>;
    fn trie_db(&self) -> &dyn TrieDB;
}

impl ChainSource for ArchiveDb {
    fn canonical_hash(&self, number: u64) -> Result<H256, ArchiveError> {
        self.read_canonical_hash(number)
    }

    fn head_header_hash(&self) -> Result<H256, ArchiveError> {
        self.read_head_header_hash()
    }

    fn header_number(&self, hash: H256) -> Result<u64, ArchiveError> {
        self.read_header_number(hash)
    }

    fn header_rlp(&self, hash: H256, number: u64) -> Result<Vec<u8>, ArchiveError> {
        self.read_header_rlp(hash, number)
    }

    fn code(&self, code_hash: H256) -> Result<Option<Vec<u8>>, ArchiveError> {
        self.read_code(code_hash)
    }

    fn trie_db(&self) -> &dyn TrieDB {
        self
    }
}
