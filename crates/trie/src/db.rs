use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use ethereum_types::H256;

use crate::TrieError;

/// Read access to the node store backing a trie. Nodes are keyed by the
/// keccak hash of their RLP encoding.
pub trait TrieDB: Send + Sync {
    fn node(&self, hash: H256) -> Result<Option<Vec<u8>>, TrieError>;
}

/// In-memory implementation of [`TrieDB`], mainly useful for tests.
pub struct InMemoryTrieDB {
    inner: Arc<Mutex<HashMap<H256, Vec<u8>>>>,
}

impl InMemoryTrieDB {
    pub fn new(map: Arc<Mutex<HashMap<H256, Vec<u8>>>>) -> Self {
        Self { inner: map }
    }
}

impl TrieDB for InMemoryTrieDB {
    fn node(&self, hash: H256) -> Result<Option<Vec<u8>>, TrieError> {
        Ok(self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("poisoned trie db lock"))?
            .get(&hash)
            .cloned())
    }
}
