use std::sync::LazyLock;

use ethereum_types::{Address, H64, H256, U256};
use keccak_hash::keccak;
use rlp::{DecoderError, Rlp};

/// keccak of empty input: the code hash of accounts without contract code.
pub static EMPTY_CODE_HASH: LazyLock<H256> = LazyLock::new(|| keccak([0u8; 0]));

/// The fields of a geth block header this tool consumes, decoded from the
/// canonical header RLP. Trailing post-merge fields are ignored.
#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub parent_hash: H256,
    pub uncle_hash: H256,
    pub coinbase: Address,
    pub state_root: H256,
    pub tx_root: H256,
    pub receipt_root: H256,
    pub bloom: Vec<u8>,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
    pub mix_hash: H256,
    pub nonce: H64,
    /// keccak of the header RLP, i.e. the block hash.
    pub hash: H256,
}

impl BlockHeader {
    pub fn decode(raw: &[u8]) -> Result<Self, DecoderError> {
        let rlp = Rlp::new(raw);
        if rlp.item_count()? < 15 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            parent_hash: rlp.val_at(0)?,
            uncle_hash: rlp.val_at(1)?,
            coinbase: rlp.val_at(2)?,
            state_root: rlp.val_at(3)?,
            tx_root: rlp.val_at(4)?,
            receipt_root: rlp.val_at(5)?,
            bloom: rlp.val_at(6)?,
            difficulty: rlp.val_at(7)?,
            number: rlp.val_at(8)?,
            gas_limit: rlp.val_at(9)?,
            gas_used: rlp.val_at(10)?,
            timestamp: rlp.val_at(11)?,
            extra_data: rlp.val_at(12)?,
            mix_hash: rlp.val_at(13)?,
            nonce: rlp.val_at(14)?,
            hash: keccak(raw),
        })
    }
}

/// An account leaf value: `[nonce, balance, storage_root, code_hash]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountState {
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: H256,
    pub code_hash: H256,
}

impl AccountState {
    pub fn decode(raw: &[u8]) -> Result<Self, DecoderError> {
        let rlp = Rlp::new(raw);
        Ok(Self {
            nonce: rlp.val_at(0)?,
            balance: rlp.val_at(1)?,
            storage_root: rlp.val_at(2)?,
            code_hash: rlp.val_at(3)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut s = rlp::RlpStream::new_list(4);
        s.append(&self.nonce);
        s.append(&self.balance);
        s.append(&self.storage_root);
        s.append(&self.code_hash);
        s.out().to_vec()
    }

    pub fn has_storage(&self) -> bool {
        self.storage_root != *statesnap_trie::EMPTY_TRIE_ROOT
    }

    pub fn has_code(&self) -> bool {
        self.code_hash != *EMPTY_CODE_HASH
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn account_round_trip() {
        let account = AccountState {
            nonce: 7,
            balance: U256::from(1_000_000u64),
            storage_root: *statesnap_trie::EMPTY_TRIE_ROOT,
            code_hash: keccak(b"code"),
        };
        let decoded = AccountState::decode(&account.encode()).unwrap();
        assert_eq!(decoded, account);
        assert!(!decoded.has_storage());
        assert!(decoded.has_code());
    }

    #[test]
    fn empty_account_has_nothing() {
        let account = AccountState {
            nonce: 0,
            balance: U256::zero(),
            storage_root: *statesnap_trie::EMPTY_TRIE_ROOT,
            code_hash: *EMPTY_CODE_HASH,
        };
        let decoded = AccountState::decode(&account.encode()).unwrap();
        assert!(!decoded.has_storage());
        assert!(!decoded.has_code());
    }
}
