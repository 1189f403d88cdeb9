//! Construction of hash-addressed fixture tries for tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use ethereum_types::H256;
use keccak_hash::keccak;
use rlp::RlpStream;

use crate::{InMemoryTrieDB, Nibbles};

/// Assembles a trie from key/value pairs, returning the root hash and the
/// backing node store. Keys must be distinct and share a common length.
pub fn build_trie(pairs: &[(Vec<u8>, Vec<u8>)]) -> (H256, InMemoryTrieDB) {
    let (root, nodes) = build_trie_nodes(pairs);
    (root, InMemoryTrieDB::new(Arc::new(Mutex::new(nodes))))
}

/// Like [`build_trie`], but hands back the raw node map so several tries
/// (say, a state trie and its storage tries) can share one store.
pub fn build_trie_nodes(pairs: &[(Vec<u8>, Vec<u8>)]) -> (H256, HashMap<H256, Vec<u8>>) {
    let mut entries: Vec<(Vec<u8>, Vec<u8>)> = pairs
        .iter()
        .map(|(key, value)| {
            let mut nibbles = Vec::with_capacity(key.len() * 2);
            for b in key {
                nibbles.push(b >> 4);
                nibbles.push(b & 0x0f);
            }
            (nibbles, value.clone())
        })
        .collect();
    entries.sort();
    entries.windows(2).for_each(|w| assert_ne!(w[0].0, w[1].0, "duplicate key"));

    let mut nodes = HashMap::new();
    let root_rlp = build_node(entries, &mut nodes);
    let root_hash = keccak(&root_rlp);
    nodes.insert(root_hash, root_rlp);
    (root_hash, nodes)
}

fn build_node(entries: Vec<(Vec<u8>, Vec<u8>)>, nodes: &mut HashMap<H256, Vec<u8>>) -> Vec<u8> {
    assert!(!entries.is_empty());
    if entries.len() == 1 {
        let (mut key, value) = entries.into_iter().next().unwrap();
        key.push(16);
        let mut s = RlpStream::new_list(2);
        s.append(&Nibbles::from_hex(key).encode_compact());
        s.append(&value);
        return s.out().to_vec();
    }

    let first = &entries[0].0;
    let last = &entries[entries.len() - 1].0;
    let prefix_len = first
        .iter()
        .zip(last.iter())
        .take_while(|(a, b)| a == b)
        .count();
    if prefix_len > 0 {
        let prefix = first[..prefix_len].to_vec();
        let stripped = entries
            .into_iter()
            .map(|(key, value)| (key[prefix_len..].to_vec(), value))
            .collect();
        let child = build_node(stripped, nodes);
        let mut s = RlpStream::new_list(2);
        s.append(&Nibbles::from_hex(prefix).encode_compact());
        append_child(&mut s, child, nodes);
        return s.out().to_vec();
    }

    let mut groups: [Vec<(Vec<u8>, Vec<u8>)>; 16] = Default::default();
    for (key, value) in entries {
        groups[key[0] as usize].push((key[1..].to_vec(), value));
    }
    let mut s = RlpStream::new_list(17);
    for group in groups {
        if group.is_empty() {
            s.append_empty_data();
        } else {
            let child = build_node(group, nodes);
            append_child(&mut s, child, nodes);
        }
    }
    s.append_empty_data();
    s.out().to_vec()
}

fn append_child(s: &mut RlpStream, child: Vec<u8>, nodes: &mut HashMap<H256, Vec<u8>>) {
    if child.len() >= 32 {
        let hash = keccak(&child);
        nodes.insert(hash, child);
        s.append(&hash);
    } else {
        s.append_raw(&child, 1);
    }
}
