pub mod db;
pub mod error;
mod iter;
mod nibbles;
mod node;
mod partition;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use std::sync::LazyLock;

use ethereum_types::H256;
use keccak_hash::keccak;

pub use self::db::{InMemoryTrieDB, TrieDB};
pub use self::error::TrieError;
pub use self::iter::{TrieIterator, VisitedNode};
pub use self::nibbles::Nibbles;
pub use self::node::{Node, NodeKind, NodeRef, leaf_key};
pub use self::partition::{partition_bounds, subtrie_iterators};

/// Root hash of an empty trie, `keccak(rlp([]))`.
pub static EMPTY_TRIE_ROOT: LazyLock<H256> = LazyLock::new(|| keccak([0x80u8]));
