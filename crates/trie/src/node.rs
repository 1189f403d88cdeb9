use ethereum_types::H256;
use rlp::{DecoderError, Rlp};

use crate::{TrieError, nibbles::Nibbles};

/// Classification of a trie node, using the catalog's discriminant values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Branch = 0,
    Extension = 1,
    Leaf = 2,
    Removed = 3,
    Unknown = 4,
}

/// A reference to a child node: either stored separately under its hash, or
/// embedded in the parent when its encoding is shorter than 32 bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeRef {
    Hash(H256),
    Inline(Vec<u8>),
}

impl NodeRef {
    pub fn hash(&self) -> Option<H256> {
        match self {
            NodeRef::Hash(hash) => Some(*hash),
            NodeRef::Inline(_) => None,
        }
    }
}

/// A decoded Merkle-Patricia trie node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Branch {
        children: Box<[Option<NodeRef>; 16]>,
        value: Vec<u8>,
    },
    Extension {
        prefix: Nibbles,
        child: NodeRef,
    },
    Leaf {
        partial: Nibbles,
        value: Vec<u8>,
    },
}

impl Node {
    /// Decodes a node from its raw RLP encoding, classifying it by list
    /// arity and hex-prefix flags: 17 elements is a branch; 2 elements is an
    /// extension (prefix high nibble 0 or 1) or a leaf (2 or 3).
    pub fn decode(raw: &[u8]) -> Result<Self, TrieError> {
        let rlp = Rlp::new(raw);
        match rlp.item_count()? {
            2 => {
                let compact = rlp.at(0)?.data()?;
                let first = *compact
                    .first()
                    .ok_or(DecoderError::Custom("empty compact key"))?;
                match first >> 4 {
                    0 | 1 => Ok(Node::Extension {
                        prefix: Nibbles::decode_compact(compact),
                        child: decode_ref(&rlp.at(1)?)?
                            .ok_or(DecoderError::Custom("empty extension child"))?,
                    }),
                    2 | 3 => Ok(Node::Leaf {
                        partial: Nibbles::decode_compact(compact),
                        value: rlp.at(1)?.data()?.to_vec(),
                    }),
                    _ => Err(TrieError::UnknownHexPrefix(first)),
                }
            }
            17 => {
                let mut children: Box<[Option<NodeRef>; 16]> = Default::default();
                for (i, slot) in children.iter_mut().enumerate() {
                    *slot = decode_ref(&rlp.at(i)?)?;
                }
                Ok(Node::Branch {
                    children,
                    value: rlp.at(16)?.data()?.to_vec(),
                })
            }
            n => Err(TrieError::InvalidNodeArity(n)),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Branch { .. } => NodeKind::Branch,
            Node::Extension { .. } => NodeKind::Extension,
            Node::Leaf { .. } => NodeKind::Leaf,
        }
    }
}

fn decode_ref(item: &Rlp<'_>) -> Result<Option<NodeRef>, TrieError> {
    if item.is_data() {
        let data = item.data()?;
        match data.len() {
            0 => Ok(None),
            32 => Ok(Some(NodeRef::Hash(H256::from_slice(data)))),
            _ => Err(DecoderError::Custom("invalid child reference").into()),
        }
    } else {
        Ok(Some(NodeRef::Inline(item.as_raw().to_vec())))
    }
}

/// Full 32-byte key of a leaf: the node's path extended by the leaf's
/// partial path, compact-encoded with the prefix byte dropped and
/// right-aligned into a hash.
pub fn leaf_key(node_path: &Nibbles, partial: &Nibbles) -> H256 {
    let compact = node_path.concat(partial).encode_compact();
    let key = &compact[1..];
    let mut out = H256::zero();
    if key.len() >= 32 {
        out.assign_from_slice(&key[key.len() - 32..]);
    } else {
        out.0[32 - key.len()..].copy_from_slice(key);
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use keccak_hash::keccak;
    use rlp::RlpStream;

    fn branch_rlp(children: &[(usize, H256)]) -> Vec<u8> {
        let mut s = RlpStream::new_list(17);
        for i in 0..16 {
            match children.iter().find(|(slot, _)| *slot == i) {
                Some((_, hash)) => s.append(hash),
                None => s.append_empty_data(),
            };
        }
        s.append_empty_data();
        s.out().to_vec()
    }

    fn two_item_rlp(compact: &[u8], second: &[u8]) -> Vec<u8> {
        let mut s = RlpStream::new_list(2);
        s.append(&compact.to_vec());
        s.append(&second.to_vec());
        s.out().to_vec()
    }

    #[test]
    fn decodes_branch() {
        let child = keccak(b"child");
        let raw = branch_rlp(&[(3, child)]);
        let node = Node::decode(&raw).unwrap();
        assert_eq!(node.kind(), NodeKind::Branch);
        let Node::Branch { children, value } = node else {
            panic!("expected branch");
        };
        assert_eq!(children[3], Some(NodeRef::Hash(child)));
        assert!(children[4].is_none());
        assert!(value.is_empty());
    }

    #[test]
    fn decodes_extension() {
        let child = keccak(b"child");
        let raw = two_item_rlp(&[0x00, 0x12], child.as_bytes());
        let Node::Extension { prefix, child: c } = Node::decode(&raw).unwrap() else {
            panic!("expected extension");
        };
        assert_eq!(prefix, Nibbles::from_hex(vec![1, 2]));
        assert_eq!(c, NodeRef::Hash(child));
    }

    #[test]
    fn decodes_leaf() {
        let raw = two_item_rlp(&[0x3a], b"value");
        let Node::Leaf { partial, value } = Node::decode(&raw).unwrap() else {
            panic!("expected leaf");
        };
        assert_eq!(partial, Nibbles::from_hex(vec![0xa, 16]));
        assert_eq!(value, b"value");
    }

    #[test]
    fn rejects_unknown_hex_prefix() {
        let raw = two_item_rlp(&[0x45], b"value");
        assert!(matches!(
            Node::decode(&raw),
            Err(TrieError::UnknownHexPrefix(0x45))
        ));
    }

    #[test]
    fn rejects_bad_arity() {
        let mut s = RlpStream::new_list(1);
        s.append(&b"x".to_vec());
        assert!(matches!(
            Node::decode(&s.out()),
            Err(TrieError::InvalidNodeArity(1))
        ));
    }

    #[test]
    fn leaf_key_reassembles_full_key() {
        let key = keccak(b"account");
        let hex = Nibbles::from_bytes(key.as_bytes());
        // Split the 65-nibble hex key at an arbitrary node position.
        let path = Nibbles::from_hex(hex.as_slice()[..7].to_vec());
        let partial = Nibbles::from_hex(hex.as_slice()[7..].to_vec());
        assert_eq!(leaf_key(&path, &partial), key);
    }

    #[test]
    fn leaf_key_pads_short_keys() {
        // 3 nibbles + terminator: compact [0x31, 0x23] -> key byte 0x23.
        let path = Nibbles::from_hex(vec![1]);
        let partial = Nibbles::from_hex(vec![2, 3, 16]);
        let mut expected = H256::zero();
        expected.0[31] = 0x23;
        assert_eq!(leaf_key(&path, &partial), expected);
    }
}
