//! Sparse Merkle Tree over a 256-bit key space
//!
//! Nodes are immutable and shared through `Arc`, so cloning a tree is O(1)
//! and every clone is an independent snapshot. Updates copy the 256 nodes on
//! the path from the root to the leaf and reuse everything else.
//!
//! Hashing:
//! - leaf: `H(0x00 || key || value)`
//! - internal: `H(0x01 || left || right)`
//! - empty subtree of height h: `Z[h]`, with `Z[0] = H(0x00 || 0^32)`

use borsh::{BorshDeserialize, BorshSerialize};
use l1_integration::Hash256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Number of levels below the root
pub const TREE_DEPTH: usize = 256;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Hash of a populated leaf
pub fn hash_leaf(key: &Hash256, value: &[u8]) -> Hash256 {
    Hash256::digest_parts(&[&[LEAF_PREFIX], key.as_ref(), value])
}

/// Hash of an internal node
pub fn hash_node(left: &Hash256, right: &Hash256) -> Hash256 {
    Hash256::digest_parts(&[&[NODE_PREFIX], left.as_ref(), right.as_ref()])
}

/// Hash of an empty subtree whose root sits `height` levels above the leaves
pub fn default_hash(height: usize) -> Hash256 {
    static DEFAULTS: OnceLock<Vec<Hash256>> = OnceLock::new();
    DEFAULTS.get_or_init(|| {
        let mut table = Vec::with_capacity(TREE_DEPTH + 1);
        table.push(hash_leaf(&Hash256::ZERO, &[]));
        for height in 1..=TREE_DEPTH {
            let below = table[height - 1];
            table.push(hash_node(&below, &below));
        }
        table
    })[height]
}

/// Root of a tree with no entries
pub fn empty_root() -> Hash256 {
    default_hash(TREE_DEPTH)
}

enum Node {
    Leaf {
        key: Hash256,
        value: Vec<u8>,
        hash: Hash256,
    },
    Branch {
        left: Option<Arc<Node>>,
        right: Option<Arc<Node>>,
        hash: Hash256,
    },
}

impl Node {
    fn hash(&self) -> Hash256 {
        match self {
            Node::Leaf { hash, .. } | Node::Branch { hash, .. } => *hash,
        }
    }

    fn branch(left: Option<Arc<Node>>, right: Option<Arc<Node>>, height: usize) -> Node {
        let hash = hash_node(
            &child_hash(&left, height - 1),
            &child_hash(&right, height - 1),
        );
        Node::Branch { left, right, hash }
    }
}

fn child_hash(child: &Option<Arc<Node>>, height: usize) -> Hash256 {
    child
        .as_ref()
        .map(|n| n.hash())
        .unwrap_or_else(|| default_hash(height))
}

/// Bit used to branch at a node `height` levels above the leaves
fn goes_right(key: &Hash256, height: usize) -> bool {
    key.bit(TREE_DEPTH - height)
}

fn insert(node: Option<&Arc<Node>>, height: usize, key: &Hash256, value: &[u8]) -> Arc<Node> {
    if height == 0 {
        return Arc::new(Node::Leaf {
            key: *key,
            value: value.to_vec(),
            hash: hash_leaf(key, value),
        });
    }

    let (left, right) = match node.map(|n| n.as_ref()) {
        Some(Node::Branch { left, right, .. }) => (left.clone(), right.clone()),
        _ => (None, None),
    };

    let (left, right) = if goes_right(key, height) {
        let right = insert(right.as_ref(), height - 1, key, value);
        (left, Some(right))
    } else {
        let left = insert(left.as_ref(), height - 1, key, value);
        (Some(left), right)
    };

    Arc::new(Node::branch(left, right, height))
}

/// Returns the replacement subtree and whether anything was removed
fn remove(node: Option<&Arc<Node>>, height: usize, key: &Hash256) -> (Option<Arc<Node>>, bool) {
    let Some(node) = node else {
        return (None, false);
    };

    match node.as_ref() {
        Node::Leaf { .. } => (None, true),
        Node::Branch { left, right, .. } => {
            let (left, right, removed) = if goes_right(key, height) {
                let (right, removed) = remove(right.as_ref(), height - 1, key);
                (left.clone(), right, removed)
            } else {
                let (left, removed) = remove(left.as_ref(), height - 1, key);
                (left, right.clone(), removed)
            };

            if !removed {
                return (Some(node.clone()), false);
            }
            if left.is_none() && right.is_none() {
                (None, true)
            } else {
                (Some(Arc::new(Node::branch(left, right, height))), true)
            }
        }
    }
}

fn collect(node: &Arc<Node>, out: &mut Vec<(Hash256, Vec<u8>)>) {
    match node.as_ref() {
        Node::Leaf { key, value, .. } => out.push((*key, value.clone())),
        Node::Branch { left, right, .. } => {
            if let Some(left) = left {
                collect(left, out);
            }
            if let Some(right) = right {
                collect(right, out);
            }
        }
    }
}

/// Merkle proof for a single key
///
/// `siblings` holds only the non-default sibling hashes, ordered root-to-leaf.
/// Bit `d` of `bitmap` is set when the sibling at depth `d` is present.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct SmtProof {
    pub bitmap: [u8; 32],
    pub siblings: Vec<Hash256>,
}

impl SmtProof {
    fn has_sibling(&self, depth: usize) -> bool {
        (self.bitmap[depth / 8] >> (7 - (depth % 8))) & 1 == 1
    }

    fn present_count(&self) -> usize {
        self.bitmap.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Serialize for embedding in fraud proofs and archives
    pub fn to_bytes(&self) -> Result<Vec<u8>, borsh::io::Error> {
        borsh::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// Authenticated key/value map with fixed-depth proofs
#[derive(Clone, Default)]
pub struct SparseMerkleTree {
    root: Option<Arc<Node>>,
    len: usize,
}

impl SparseMerkleTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from key/value pairs
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Hash256, Vec<u8>)>,
    {
        let mut tree = Self::new();
        for (key, value) in entries {
            tree.put(&key, &value);
        }
        tree
    }

    /// Current root hash
    pub fn root(&self) -> Hash256 {
        child_hash(&self.root, TREE_DEPTH)
    }

    /// Number of populated leaves
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Look up the value stored under `key`
    pub fn get(&self, key: &Hash256) -> Option<&[u8]> {
        let mut node = self.root.as_ref()?;
        let mut height = TREE_DEPTH;
        loop {
            match node.as_ref() {
                Node::Leaf { value, .. } => return Some(value),
                Node::Branch { left, right, .. } => {
                    let next = if goes_right(key, height) { right } else { left };
                    node = next.as_ref()?;
                    height -= 1;
                }
            }
        }
    }

    pub fn contains(&self, key: &Hash256) -> bool {
        self.get(key).is_some()
    }

    /// Insert or update. An empty value deletes the key.
    pub fn put(&mut self, key: &Hash256, value: &[u8]) -> Hash256 {
        if value.is_empty() {
            return self.delete(key);
        }
        if !self.contains(key) {
            self.len += 1;
        }
        self.root = Some(insert(self.root.as_ref(), TREE_DEPTH, key, value));
        self.root()
    }

    /// Remove `key` if present
    pub fn delete(&mut self, key: &Hash256) -> Hash256 {
        let (root, removed) = remove(self.root.as_ref(), TREE_DEPTH, key);
        if removed {
            self.root = root;
            self.len -= 1;
        }
        self.root()
    }

    /// Remove everything
    pub fn clear(&mut self) {
        self.root = None;
        self.len = 0;
    }

    /// All entries in ascending key order
    pub fn entries(&self) -> Vec<(Hash256, Vec<u8>)> {
        let mut out = Vec::with_capacity(self.len);
        if let Some(root) = &self.root {
            collect(root, &mut out);
        }
        out
    }

    /// Inclusion proof for a present key, exclusion proof for an absent one
    pub fn generate_proof(&self, key: &Hash256) -> SmtProof {
        let mut proof = SmtProof {
            bitmap: [0u8; 32],
            siblings: Vec::new(),
        };

        let mut node = self.root.as_ref();
        for depth in 0..TREE_DEPTH {
            let height = TREE_DEPTH - depth;
            let Some(Node::Branch { left, right, .. }) = node.map(|n| n.as_ref()) else {
                break;
            };
            let (next, sibling) = if goes_right(key, height) {
                (right, left)
            } else {
                (left, right)
            };
            let sibling_hash = child_hash(sibling, height - 1);
            if sibling_hash != default_hash(height - 1) {
                proof.bitmap[depth / 8] |= 1 << (7 - (depth % 8));
                proof.siblings.push(sibling_hash);
            }
            node = next.as_ref();
        }

        proof
    }

    /// Check that `key` holds `value` (or is absent when `value` is `None`)
    /// in the tree committed to by `root`
    pub fn verify_proof(root: &Hash256, key: &Hash256, value: Option<&[u8]>, proof: &SmtProof) -> bool {
        if proof.present_count() != proof.siblings.len() {
            return false;
        }

        let mut current = match value {
            Some(v) if !v.is_empty() => hash_leaf(key, v),
            _ => default_hash(0),
        };

        let mut remaining = proof.siblings.len();
        for depth in (0..TREE_DEPTH).rev() {
            let sibling = if proof.has_sibling(depth) {
                remaining -= 1;
                proof.siblings[remaining]
            } else {
                default_hash(TREE_DEPTH - depth - 1)
            };
            current = if key.bit(depth) {
                hash_node(&sibling, &current)
            } else {
                hash_node(&current, &sibling)
            };
        }

        current == *root
    }
}

impl fmt::Debug for SparseMerkleTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseMerkleTree")
            .field("root", &self.root())
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> Hash256 {
        Hash256::digest(&[n])
    }

    #[test]
    fn test_empty_tree() {
        let tree = SparseMerkleTree::new();
        assert_eq!(tree.root(), empty_root());
        assert!(tree.is_empty());
        assert_eq!(tree.get(&key(1)), None);
        assert_eq!(default_hash(1), hash_node(&default_hash(0), &default_hash(0)));
    }

    #[test]
    fn test_put_get_delete() {
        let mut tree = SparseMerkleTree::new();
        let root1 = tree.put(&key(1), b"one");
        tree.put(&key(2), b"two");
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.get(&key(1)), Some(&b"one"[..]));
        assert_eq!(tree.get(&key(2)), Some(&b"two"[..]));

        tree.put(&key(2), b"deux");
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.get(&key(2)), Some(&b"deux"[..]));

        let root = tree.delete(&key(2));
        assert_eq!(root, root1);
        assert_eq!(tree.len(), 1);

        tree.delete(&key(1));
        assert_eq!(tree.root(), empty_root());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let mut tree = SparseMerkleTree::new();
        tree.put(&key(1), b"one");
        let root = tree.root();
        assert_eq!(tree.delete(&key(9)), root);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_empty_value_deletes() {
        let mut tree = SparseMerkleTree::new();
        tree.put(&key(1), b"one");
        tree.put(&key(1), b"");
        assert!(tree.is_empty());
        assert_eq!(tree.root(), empty_root());
    }

    #[test]
    fn test_root_independent_of_insert_order() {
        let mut a = SparseMerkleTree::new();
        let mut b = SparseMerkleTree::new();
        for i in 0..20u8 {
            a.put(&key(i), &[i; 4]);
        }
        for i in (0..20u8).rev() {
            b.put(&key(i), &[i; 4]);
        }
        assert_eq!(a.root(), b.root());
    }

    #[test]
    fn test_clone_is_snapshot() {
        let mut tree = SparseMerkleTree::new();
        tree.put(&key(1), b"one");
        let snapshot = tree.clone();
        let before = snapshot.root();

        tree.put(&key(1), b"changed");
        tree.put(&key(2), b"two");

        assert_eq!(snapshot.root(), before);
        assert_eq!(snapshot.get(&key(1)), Some(&b"one"[..]));
        assert_ne!(tree.root(), before);
    }

    #[test]
    fn test_inclusion_proof() {
        let mut tree = SparseMerkleTree::new();
        for i in 0..10u8 {
            tree.put(&key(i), &[i, i]);
        }
        let root = tree.root();
        for i in 0..10u8 {
            let proof = tree.generate_proof(&key(i));
            assert!(SparseMerkleTree::verify_proof(&root, &key(i), Some(&[i, i]), &proof));
        }
    }

    #[test]
    fn test_exclusion_proof() {
        let mut tree = SparseMerkleTree::new();
        tree.put(&key(1), b"one");
        tree.put(&key(2), b"two");
        let root = tree.root();

        let proof = tree.generate_proof(&key(3));
        assert!(SparseMerkleTree::verify_proof(&root, &key(3), None, &proof));
        // the absent key cannot be claimed to hold a value
        assert!(!SparseMerkleTree::verify_proof(&root, &key(3), Some(b"x"), &proof));
    }

    #[test]
    fn test_forged_proofs_fail() {
        let mut tree = SparseMerkleTree::new();
        tree.put(&key(1), b"one");
        tree.put(&key(2), b"two");
        let root = tree.root();
        let proof = tree.generate_proof(&key(1));

        assert!(!SparseMerkleTree::verify_proof(&root, &key(1), Some(b"uno"), &proof));
        assert!(!SparseMerkleTree::verify_proof(&root, &key(1), None, &proof));
        assert!(!SparseMerkleTree::verify_proof(&root, &key(2), Some(b"one"), &proof));

        let mut tampered = proof.clone();
        tampered.siblings[0] = Hash256([0xaa; 32]);
        assert!(!SparseMerkleTree::verify_proof(&root, &key(1), Some(b"one"), &tampered));

        let mut truncated = proof;
        truncated.siblings.pop();
        assert!(!SparseMerkleTree::verify_proof(&root, &key(1), Some(b"one"), &truncated));
    }

    #[test]
    fn test_proof_against_old_root_fails_after_update() {
        let mut tree = SparseMerkleTree::new();
        tree.put(&key(1), b"one");
        let old_root = tree.root();
        tree.put(&key(1), b"two");
        let proof = tree.generate_proof(&key(1));
        assert!(!SparseMerkleTree::verify_proof(&old_root, &key(1), Some(b"two"), &proof));
        assert!(SparseMerkleTree::verify_proof(&tree.root(), &key(1), Some(b"two"), &proof));
    }

    #[test]
    fn test_proofs_are_compressed() {
        let mut tree = SparseMerkleTree::new();
        tree.put(&key(1), b"one");
        let proof = tree.generate_proof(&key(1));
        assert!(proof.siblings.is_empty());

        tree.put(&key(2), b"two");
        let proof = tree.generate_proof(&key(1));
        assert_eq!(proof.siblings.len(), 1);

        let decoded = SmtProof::from_bytes(&proof.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, proof);
    }

    #[test]
    fn test_entries_sorted() {
        let mut tree = SparseMerkleTree::new();
        for i in 0..8u8 {
            tree.put(&key(i), &[i]);
        }
        let entries = tree.entries();
        assert_eq!(entries.len(), 8);
        assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));

        let rebuilt = SparseMerkleTree::from_entries(entries);
        assert_eq!(rebuilt.root(), tree.root());
    }
}
