use std::path::Path;

use ethereum_types::H256;
use keccak_hash::keccak;
use rocksdb::{DB, Options};
use statesnap_trie::{TrieDB, TrieError};
use tracing::debug;

use crate::{ArchiveError, BlockHeader, Freezer};

// geth's chaindata key schema.
const HEADER_PREFIX: u8 = b'h';
const HEADER_HASH_SUFFIX: u8 = b'n';
const HEADER_NUMBER_PREFIX: u8 = b'H';
const CODE_PREFIX: u8 = b'c';
const HEAD_HEADER_KEY: &[u8] = b"LastHeader";

/// Read-only view over a geth archive datadir: the chaindata key/value
/// store (a LevelDB, opened through rocksdb) plus the ancient freezer.
/// Frozen blocks live in the freezer, so it is consulted first and the
/// key/value store is the fallback.
pub struct ArchiveDb {
    db: DB,
    freezer: Freezer,
}

impl ArchiveDb {
    pub fn open(chaindata: &Path, ancient: &Path) -> Result<Self, ArchiveError> {
        let db = DB::open_for_read_only(&Options::default(), chaindata, false)?;
        Ok(Self {
            db,
            freezer: Freezer::new(ancient),
        })
    }

    pub fn read_canonical_hash(&self, number: u64) -> Result<H256, ArchiveError> {
        if let Some(bytes) = self.freezer.read("hashes", false, number)? {
            return h256("canonical hash", &bytes);
        }
        debug!(number, "canonical hash not frozen, reading chaindata");
        let key = [&[HEADER_PREFIX][..], &number.to_be_bytes(), &[HEADER_HASH_SUFFIX]].concat();
        match self.db.get(&key)? {
            Some(bytes) => h256("canonical hash", &bytes),
            None => Err(ArchiveError::MissingCanonicalHash(number)),
        }
    }

    pub fn read_head_header_hash(&self) -> Result<H256, ArchiveError> {
        match self.db.get(HEAD_HEADER_KEY)? {
            Some(bytes) => h256("head header hash", &bytes),
            None => Err(ArchiveError::MissingHeadHash),
        }
    }

    pub fn read_header_number(&self, hash: H256) -> Result<u64, ArchiveError> {
        let key = [&[HEADER_NUMBER_PREFIX][..], hash.as_bytes()].concat();
        let bytes = self
            .db
            .get(&key)?
            .ok_or(ArchiveError::MissingHeaderNumber(hash))?;
        let bytes: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ArchiveError::Corrupt("header number"))?;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Raw RLP of the header `hash` at `number`. The freezer copy is only
    /// trusted when it hashes to the requested block hash.
    pub fn read_header_rlp(&self, hash: H256, number: u64) -> Result<Vec<u8>, ArchiveError> {
        if let Some(raw) = self.freezer.read("headers", true, number)? {
            if keccak(&raw) == hash {
                return Ok(raw);
            }
        }
        debug!(number, "header not frozen, reading chaindata");
        let key = [&[HEADER_PREFIX][..], &number.to_be_bytes(), hash.as_bytes()].concat();
        self.db
            .get(&key)?
            .ok_or(ArchiveError::MissingHeader { hash, number })
    }

    pub fn read_header(&self, hash: H256, number: u64) -> Result<(BlockHeader, Vec<u8>), ArchiveError> {
        let raw = self.read_header_rlp(hash, number)?;
        let header = BlockHeader::decode(&raw)?;
        Ok((header, raw))
    }

    /// Contract code, keyed `'c' || hash` with the legacy bare-hash layout
    /// as fallback.
    pub fn read_code(&self, code_hash: H256) -> Result<Option<Vec<u8>>, ArchiveError> {
        let key = [&[CODE_PREFIX][..], code_hash.as_bytes()].concat();
        if let Some(code) = self.db.get(&key)? {
            return Ok(Some(code));
        }
        Ok(self.db.get(code_hash.as_bytes())?)
    }
}

impl TrieDB for ArchiveDb {
    fn node(&self, hash: H256) -> Result<Option<Vec<u8>>, TrieError> {
        self.db
            .get(hash.as_bytes())
            .map_err(|err| TrieError::Db(anyhow::Error::new(err)))
    }
}

fn h256(what: &'static str, bytes: &[u8]) -> Result<H256, ArchiveError> {
    if bytes.len() != 32 {
        return Err(ArchiveError::Corrupt(what));
    }
    Ok(H256::from_slice(bytes))
}
