use ethereum_types::Address;
use keccak_hash::keccak;
use statesnap_trie::Nibbles;

/// Hex paths of the watched accounts, computed once per run as the nibble
/// expansion of each hashed address.
pub fn watched_paths(addresses: &[Address]) -> Vec<Nibbles> {
    addresses
        .iter()
        .map(|address| Nibbles::from_bytes(keccak(address.as_bytes()).as_bytes()))
        .collect()
}

/// True when descending through `current` can still reach a watched
/// account, i.e. some watched path has `current` as a prefix. Callers skip
/// the check entirely when the watched set is empty.
pub fn valid_path(current: &Nibbles, watched: &[Nibbles]) -> bool {
    watched.iter().any(|path| path.starts_with(current))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn prefixes_of_watched_paths_are_valid() {
        let address = Address::repeat_byte(0xaa);
        let watched = watched_paths(&[address]);
        let full = &watched[0];

        assert!(valid_path(&Nibbles::default(), &watched));
        let prefix = Nibbles::from_hex(full.as_slice()[..7].to_vec());
        assert!(valid_path(&prefix, &watched));

        let mut sibling = full.as_slice()[..7].to_vec();
        sibling[6] ^= 0x1;
        assert!(!valid_path(&Nibbles::from_hex(sibling), &watched));
    }
}
