use ethereum_types::H256;

use crate::{TrieError, db::TrieDB, iter::TrieIterator, nibbles::Nibbles};

/// Contiguous nibble-prefix ranges covering the whole key space, assigned
/// lowest-prefix-first so worker 0 owns the lowest keys (and the trie root,
/// whose empty path sorts before everything else). The prefix depth is the
/// smallest that gives at least one prefix value per range, so no range is
/// ever empty by construction. The last range is unbounded.
pub fn partition_bounds(workers: usize) -> Vec<(Nibbles, Option<Nibbles>)> {
    if workers <= 1 {
        return vec![(Nibbles::default(), None)];
    }
    let mut depth = 1u32;
    while 16usize.pow(depth) < workers {
        depth += 1;
    }
    let total = 16usize.pow(depth);
    (0..workers)
        .map(|i| {
            let start = if i == 0 {
                Nibbles::default()
            } else {
                prefix_path(i * total / workers, depth as usize)
            };
            let end = if i == workers - 1 {
                None
            } else {
                Some(prefix_path((i + 1) * total / workers, depth as usize))
            };
            (start, end)
        })
        .collect()
}

fn prefix_path(mut value: usize, depth: usize) -> Nibbles {
    let mut nibbles = vec![0u8; depth];
    for slot in nibbles.iter_mut().rev() {
        *slot = (value & 0x0f) as u8;
        value >>= 4;
    }
    Nibbles::from_hex(nibbles)
}

/// Splits the trie rooted at `root` into `workers` iterators over disjoint
/// contiguous key ranges. Their union visits every reachable node exactly
/// once; a range holding no nodes simply yields an empty iterator,
/// preserving positional identity for recovery.
pub fn subtrie_iterators<'db>(
    db: &'db dyn TrieDB,
    root: H256,
    workers: usize,
) -> Result<Vec<TrieIterator<'db>>, TrieError> {
    partition_bounds(workers)
        .into_iter()
        .map(|(start, end)| {
            let mut iter = TrieIterator::bounded(db, root, end);
            if !start.is_empty() {
                iter.advance(&start)?;
            }
            Ok(iter)
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::build_trie;
    use keccak_hash::keccak;
    use proptest::{collection::vec, prelude::*};
    use std::collections::BTreeSet;

    fn hex(nibbles: &[u8]) -> Nibbles {
        Nibbles::from_hex(nibbles.to_vec())
    }

    #[test]
    fn bounds_for_small_counts() {
        assert_eq!(partition_bounds(1), vec![(hex(&[]), None)]);
        assert_eq!(
            partition_bounds(2),
            vec![(hex(&[]), Some(hex(&[8]))), (hex(&[8]), None)]
        );
        assert_eq!(
            partition_bounds(3),
            vec![
                (hex(&[]), Some(hex(&[5]))),
                (hex(&[5]), Some(hex(&[10]))),
                (hex(&[10]), None),
            ]
        );
    }

    #[test]
    fn bounds_go_deeper_when_needed() {
        let bounds = partition_bounds(17);
        assert_eq!(bounds.len(), 17);
        assert_eq!(bounds[0], (hex(&[]), Some(hex(&[0, 15]))));
        assert_eq!(bounds[16].1, None);
        // Each end is the next start, so the ranges tile the key space.
        for pair in bounds.windows(2) {
            assert_eq!(pair[0].1.as_ref(), Some(&pair[1].0));
        }
    }

    fn visited(iter: &mut TrieIterator<'_>) -> Vec<(Nibbles, H256)> {
        let mut out = Vec::new();
        while let Some(v) = iter.next(true) {
            out.push((v.path, v.hash));
        }
        out
    }

    fn coverage_equals_single_walk(keys: Vec<[u8; 32]>, workers: usize) {
        let pairs: Vec<_> = keys
            .into_iter()
            .map(|k| (k.to_vec(), b"some-value-padding".to_vec()))
            .collect();
        let (root, db) = build_trie(&pairs);

        let mut whole = TrieIterator::new(&db, root);
        let expected: BTreeSet<_> = visited(&mut whole).into_iter().collect();

        let mut union = BTreeSet::new();
        for mut iter in subtrie_iterators(&db, root, workers).unwrap() {
            for entry in visited(&mut iter) {
                assert!(union.insert(entry), "node visited twice");
            }
            iter.finish().unwrap();
        }
        assert_eq!(union, expected);
    }

    #[test]
    fn partitions_cover_each_node_once() {
        let keys: Vec<[u8; 32]> = (0u8..40).map(|i| keccak([i]).0).collect();
        for workers in [2, 3, 5, 16, 17] {
            coverage_equals_single_walk(keys.clone(), workers);
        }
    }

    proptest! {
        #[test]
        fn proptest_partition_coverage(
            keys in vec(any::<[u8; 32]>(), 1..40),
            workers in 2usize..20,
        ) {
            let unique: BTreeSet<[u8; 32]> = keys.into_iter().collect();
            coverage_equals_single_walk(unique.into_iter().collect(), workers);
        }
    }
}
