//! CID and datastore-key derivation for the content-addressed sink.
//!
//! Every published blob is keyed by its keccak-256 multihash; trie nodes and
//! headers additionally get a CIDv1 with the matching Ethereum codec. CIDs
//! are rendered in multibase base16 (leading `f`), which keeps the encoding
//! self-describing and deterministic.

use ethereum_types::H256;

pub const MULTICODEC_ETH_HEADER: u64 = 0x90;
pub const MULTICODEC_ETH_STATE_TRIE: u64 = 0x96;
pub const MULTICODEC_ETH_STORAGE_TRIE: u64 = 0x98;
const MULTIHASH_KECCAK_256: u64 = 0x1b;

/// keccak-256 multihash of a 32-byte digest: code, length, digest.
pub fn keccak_multihash(digest: H256) -> Vec<u8> {
    let mut out = Vec::with_capacity(34);
    put_uvarint(&mut out, MULTIHASH_KECCAK_256);
    put_uvarint(&mut out, 32);
    out.extend_from_slice(digest.as_bytes());
    out
}

/// CIDv1 string for a multihash under the given codec.
pub fn cid_string(codec: u64, multihash: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(multihash.len() + 4);
    put_uvarint(&mut bytes, 1);
    put_uvarint(&mut bytes, codec);
    bytes.extend_from_slice(multihash);
    format!("f{}", hex::encode(bytes))
}

/// Datastore key of a blob in the content-addressed table.
pub fn multihash_key(multihash: &[u8]) -> String {
    format!("/blocks/f{}", hex::encode(multihash))
}

fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push(value as u8 | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

#[cfg(test)]
mod test {
    use super::*;
    use keccak_hash::keccak;

    #[test]
    fn multihash_layout() {
        let digest = keccak([0u8; 0]);
        let mh = keccak_multihash(digest);
        assert_eq!(mh.len(), 34);
        assert_eq!(&mh[..2], &[0x1b, 0x20]);
        assert_eq!(&mh[2..], digest.as_bytes());
    }

    #[test]
    fn cid_carries_version_and_codec() {
        let mh = keccak_multihash(keccak(b"node"));
        let cid = cid_string(MULTICODEC_ETH_STATE_TRIE, &mh);
        // version 1, codec 0x96 as varint [0x96, 0x01], then the multihash
        assert!(cid.starts_with("f0196011b20"));

        let key = multihash_key(&mh);
        assert!(key.starts_with("/blocks/f1b20"));
        assert!(key.ends_with(&hex::encode(keccak(b"node"))));
    }
}
