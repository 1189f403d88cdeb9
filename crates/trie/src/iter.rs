use std::cmp::Ordering;

use ethereum_types::H256;

use crate::{
    TrieError,
    db::TrieDB,
    nibbles::Nibbles,
    node::{Node, NodeRef},
};

/// A node yielded by [`TrieIterator`]: its absolute path within the iterated
/// trie, its hash, and its decoded and raw forms.
#[derive(Debug)]
pub struct VisitedNode {
    pub path: Nibbles,
    pub hash: H256,
    pub node: Node,
    pub raw: Vec<u8>,
}

/// Pre-order iterator over the hash-addressed nodes of a trie.
///
/// The stack holds positions still to visit; the children of the most
/// recently yielded node are held back and only admitted when the next call
/// asks to descend, mirroring the `Next(descend)` contract of the upstream
/// node iterators. Embedded (<32-byte) children are not traversed: they
/// cannot reference hashed descendants and are never published.
pub struct TrieIterator<'db> {
    db: &'db dyn TrieDB,
    stack: Vec<(Nibbles, H256)>,
    pending: Vec<(Nibbles, H256)>,
    end: Option<Nibbles>,
    error: Option<TrieError>,
}

impl<'db> TrieIterator<'db> {
    pub fn new(db: &'db dyn TrieDB, root: H256) -> Self {
        Self::bounded(db, root, None)
    }

    /// An iterator that stops at the first node whose path reaches `end`
    /// (exclusive). Pre-order visits paths in lexicographic order, so the
    /// bound is a simple cut-off. An empty trie yields nothing.
    pub fn bounded(db: &'db dyn TrieDB, root: H256, end: Option<Nibbles>) -> Self {
        let stack = if root == *crate::EMPTY_TRIE_ROOT {
            Vec::new()
        } else {
            vec![(Nibbles::default(), root)]
        };
        Self {
            db,
            stack,
            pending: Vec::new(),
            end,
            error: None,
        }
    }

    /// Advances the next yielded node. With `descend` the children of the
    /// previously yielded node enter the traversal; without it they are
    /// dropped (the caller covers that subtree some other way).
    ///
    /// Failures are latched: the iterator ends and [`TrieIterator::finish`]
    /// surfaces the error.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self, descend: bool) -> Option<VisitedNode> {
        if self.error.is_some() {
            return None;
        }
        if descend {
            let pending = std::mem::take(&mut self.pending);
            self.stack.extend(pending.into_iter().rev());
        } else {
            self.pending.clear();
        }

        let (path, hash) = self.stack.pop()?;
        if self.past_end(&path) {
            self.stack.clear();
            return None;
        }
        match self.resolve(hash) {
            Ok((raw, node)) => {
                self.pending = children_of(&path, &node);
                Some(VisitedNode { path, hash, node, raw })
            }
            Err(err) => {
                self.error = Some(err);
                self.stack.clear();
                None
            }
        }
    }

    /// Whether a latched error ended iteration early.
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Surfaces the error that ended iteration, if any. Must be checked
    /// after the iteration loop.
    pub fn finish(&mut self) -> Result<(), TrieError> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Whether the subtree rooted at `path` crosses this iterator's end
    /// bound (or is the whole-trie root). Such a subtree must be drained
    /// through this iterator, where the bound applies, rather than handed to
    /// an unbounded sub-walk.
    pub fn straddles_range(&self, path: &Nibbles) -> bool {
        path.is_empty()
            || self
                .end
                .as_ref()
                .is_some_and(|end| end.len() > path.len() && end.starts_with(path))
    }

    /// Positions the iterator so the next yielded node is the first with
    /// path >= `target`, pushing the greater siblings met while seeking so
    /// iteration continues across the rest of the range. The node exactly at
    /// `target` is yielded again.
    pub fn advance(&mut self, target: &Nibbles) -> Result<(), TrieError> {
        if target.is_empty() {
            return Ok(());
        }
        let Some((mut path, mut hash)) = self.stack.pop() else {
            return Ok(());
        };
        let mut depth = path.len();
        loop {
            if depth >= target.len() {
                self.stack.push((path, hash));
                return Ok(());
            }
            let (_, node) = self.resolve(hash)?;
            match node {
                Node::Branch { children, .. } => {
                    let choice = target.at(depth) as usize;
                    if choice >= 16 {
                        self.stack.push((path, hash));
                        return Ok(());
                    }
                    for i in ((choice + 1)..16).rev() {
                        if let Some(NodeRef::Hash(h)) = &children[i] {
                            self.stack.push((path.append_new(i as u8), *h));
                        }
                    }
                    match &children[choice] {
                        Some(NodeRef::Hash(h)) => {
                            path.append(choice as u8);
                            hash = *h;
                            depth += 1;
                        }
                        // Nothing stored at or under the target itself; the
                        // greater siblings are already queued.
                        _ => return Ok(()),
                    }
                }
                Node::Extension { prefix, child } => {
                    let overlap = prefix.len().min(target.len() - depth);
                    let target_part = &target.as_slice()[depth..depth + overlap];
                    match prefix.as_slice()[..overlap].cmp(target_part) {
                        Ordering::Less => return Ok(()),
                        Ordering::Greater => {
                            // The whole subtree sorts after the target.
                            if let NodeRef::Hash(h) = child {
                                self.stack.push((path.concat(&prefix), h));
                            }
                            return Ok(());
                        }
                        Ordering::Equal if prefix.len() >= target.len() - depth => {
                            if let NodeRef::Hash(h) = child {
                                self.stack.push((path.concat(&prefix), h));
                            }
                            return Ok(());
                        }
                        Ordering::Equal => match child {
                            NodeRef::Hash(h) => {
                                path.extend(&prefix);
                                hash = h;
                                depth += prefix.len();
                            }
                            NodeRef::Inline(_) => return Ok(()),
                        },
                    }
                }
                // A leaf on the seek path sorts before the deeper target and
                // was already visited.
                Node::Leaf { .. } => return Ok(()),
            }
        }
    }

    fn past_end(&self, path: &Nibbles) -> bool {
        self.end.as_ref().is_some_and(|end| path >= end)
    }

    fn resolve(&self, hash: H256) -> Result<(Vec<u8>, Node), TrieError> {
        let raw = self.db.node(hash)?.ok_or(TrieError::MissingNode(hash))?;
        let node = Node::decode(&raw)?;
        Ok((raw, node))
    }
}

fn children_of(path: &Nibbles, node: &Node) -> Vec<(Nibbles, H256)> {
    match node {
        Node::Branch { children, .. } => children
            .iter()
            .enumerate()
            .filter_map(|(i, child)| match child {
                Some(NodeRef::Hash(hash)) => Some((path.append_new(i as u8), *hash)),
                _ => None,
            })
            .collect(),
        Node::Extension { prefix, child } => match child {
            NodeRef::Hash(hash) => vec![(path.concat(prefix), *hash)],
            NodeRef::Inline(_) => Vec::new(),
        },
        Node::Leaf { .. } => Vec::new(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::build_trie;

    fn fixture() -> (H256, crate::InMemoryTrieDB) {
        // First nibbles 1, 2, 2: a root branch with a leaf under slot 1 and
        // a branch of two leaves under slot 2.
        build_trie(&[
            (vec![0x11; 32], b"value-a".to_vec()),
            (vec![0x22; 32], b"value-b".to_vec()),
            (
                {
                    let mut k = vec![0x22; 32];
                    k[0] = 0x23;
                    k
                },
                b"value-c".to_vec(),
            ),
        ])
    }

    fn all_paths(iter: &mut TrieIterator<'_>) -> Vec<Nibbles> {
        let mut paths = Vec::new();
        while let Some(visit) = iter.next(true) {
            paths.push(visit.path);
        }
        paths
    }

    fn hex(nibbles: &[u8]) -> Nibbles {
        Nibbles::from_hex(nibbles.to_vec())
    }

    #[test]
    fn full_walk_is_preorder() {
        let (root, db) = fixture();
        let mut iter = TrieIterator::new(&db, root);
        let paths = all_paths(&mut iter);
        assert_eq!(
            paths,
            vec![hex(&[]), hex(&[1]), hex(&[2]), hex(&[2, 2]), hex(&[2, 3])]
        );
        assert!(iter.finish().is_ok());
    }

    #[test]
    fn no_descend_skips_children() {
        let (root, db) = fixture();
        let mut iter = TrieIterator::new(&db, root);
        assert!(iter.next(true).is_some()); // root
        assert!(iter.next(false).is_none()); // children dropped
        assert!(iter.finish().is_ok());
    }

    #[test]
    fn end_bound_cuts_iteration() {
        let (root, db) = fixture();
        let mut iter = TrieIterator::bounded(&db, root, Some(hex(&[2])));
        assert_eq!(all_paths(&mut iter), vec![hex(&[]), hex(&[1])]);

        let mut iter = TrieIterator::bounded(&db, root, Some(hex(&[2, 3])));
        assert_eq!(
            all_paths(&mut iter),
            vec![hex(&[]), hex(&[1]), hex(&[2]), hex(&[2, 2])]
        );
    }

    #[test]
    fn advance_seeks_to_target() {
        let (root, db) = fixture();
        let mut iter = TrieIterator::new(&db, root);
        iter.advance(&hex(&[2])).unwrap();
        assert_eq!(
            all_paths(&mut iter),
            vec![hex(&[2]), hex(&[2, 2]), hex(&[2, 3])]
        );

        let mut iter = TrieIterator::new(&db, root);
        iter.advance(&hex(&[2, 2])).unwrap();
        assert_eq!(all_paths(&mut iter), vec![hex(&[2, 2]), hex(&[2, 3])]);

        // A target between nodes resumes at the next stored position.
        let mut iter = TrieIterator::new(&db, root);
        iter.advance(&hex(&[1, 5])).unwrap();
        assert_eq!(
            all_paths(&mut iter),
            vec![hex(&[2]), hex(&[2, 2]), hex(&[2, 3])]
        );
    }

    #[test]
    fn missing_node_is_latched() {
        let (_, db) = fixture();
        let mut iter = TrieIterator::new(&db, H256::repeat_byte(0x55));
        assert!(iter.next(true).is_none());
        assert!(matches!(iter.finish(), Err(TrieError::MissingNode(_))));
    }
}
