//! A minimal content-addressed, 16-ary radix trie over rocksdb, used by the
//! persistent trie backend (`trie_backend.rs`) to produce `get_hash`. Not an
//! Ethereum-canonical Merkle Patricia Trie: node encoding and RLP framing are
//! out of scope (spec.md §4.2.2 Non-goals: "producing canonical block state
//! roots"), so this only needs to be a deterministic, content-addressed
//! commitment over whatever key/value pairs it is given.

use replay_common::{keccak, ReplayResult, H256};
use rocksdb::{WriteBatch, DB};

const NIBBLE_COUNT: usize = 64; // keccak(key) expanded to nibbles

#[derive(Debug, Clone)]
enum Node {
    Leaf { path: Vec<u8>, value: Vec<u8> },
    Branch { children: [Option<H256>; 16], value: Option<Vec<u8>> },
}

impl Node {
    fn encode(&self) -> Vec<u8> {
        match self {
            Node::Leaf { path, value } => {
                let mut out = vec![0u8];
                out.extend_from_slice(&(path.len() as u32).to_be_bytes());
                out.extend_from_slice(path);
                out.extend_from_slice(&(value.len() as u32).to_be_bytes());
                out.extend_from_slice(value);
                out
            }
            Node::Branch { children, value } => {
                let mut out = vec![1u8];
                for child in children {
                    match child {
                        Some(h) => {
                            out.push(1);
                            out.extend_from_slice(h.as_bytes());
                        }
                        None => out.push(0),
                    }
                }
                match value {
                    Some(v) => {
                        out.push(1);
                        out.extend_from_slice(&(v.len() as u32).to_be_bytes());
                        out.extend_from_slice(v);
                    }
                    None => out.push(0),
                }
                out
            }
        }
    }

    fn decode(bytes: &[u8]) -> Self {
        match bytes[0] {
            0 => {
                let mut pos = 1;
                let path_len = u32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap_or_default()) as usize;
                pos += 4;
                let path = bytes[pos..pos + path_len].to_vec();
                pos += path_len;
                let value_len = u32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap_or_default()) as usize;
                pos += 4;
                let value = bytes[pos..pos + value_len].to_vec();
                Node::Leaf { path, value }
            }
            1 => {
                let mut pos = 1;
                let mut children: [Option<H256>; 16] = [None; 16];
                for child in children.iter_mut() {
                    if bytes[pos] == 1 {
                        pos += 1;
                        *child = Some(H256::from_slice(&bytes[pos..pos + 32]));
                        pos += 32;
                    } else {
                        pos += 1;
                    }
                }
                let value = if bytes[pos] == 1 {
                    pos += 1;
                    let value_len =
                        u32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap_or_default()) as usize;
                    pos += 4;
                    Some(bytes[pos..pos + value_len].to_vec())
                } else {
                    None
                };
                Node::Branch { children, value }
            }
            tag => panic!("corrupt trie node tag {tag}"),
        }
    }

    fn hash(&self) -> H256 {
        keccak(&self.encode())
    }
}

fn nibbles_of(key: &[u8]) -> Vec<u8> {
    let digest = keccak(key);
    let mut out = Vec::with_capacity(NIBBLE_COUNT);
    for byte in digest.as_bytes() {
        out.push(byte >> 4);
        out.push(byte & 0x0f);
    }
    out
}

fn load(db: &DB, cf: &str, hash: H256) -> ReplayResult<Option<Node>> {
    if hash.is_zero() {
        return Ok(None);
    }
    let handle = db.cf_handle(cf).expect("trie column family exists");
    let raw = db.get_cf(handle, hash.as_bytes())?;
    Ok(raw.map(|bytes| Node::decode(&bytes)))
}

fn store(batch: &mut WriteBatch, db: &DB, cf: &str, node: &Node) -> H256 {
    let handle = db.cf_handle(cf).expect("trie column family exists");
    let hash = node.hash();
    batch.put_cf(handle, hash.as_bytes(), node.encode());
    hash
}

/// Looks up `key`'s value under the trie rooted at `root`.
pub fn get(db: &DB, cf: &str, root: H256, key: &[u8]) -> ReplayResult<Option<Vec<u8>>> {
    let nibbles = nibbles_of(key);
    let mut current = root;
    let mut depth = 0;
    loop {
        match load(db, cf, current)? {
            None => return Ok(None),
            Some(Node::Leaf { path, value }) => {
                return Ok(if path == nibbles[depth..] { Some(value) } else { None });
            }
            Some(Node::Branch { children, value }) => {
                if depth == nibbles.len() {
                    return Ok(value);
                }
                let idx = nibbles[depth] as usize;
                match children[idx] {
                    None => return Ok(None),
                    Some(child) => {
                        current = child;
                        depth += 1;
                    }
                }
            }
        }
    }
}

/// Replaces a leaf whose stored path diverges from the path the new key
/// takes from this point, with a chain of branch nodes down their shared
/// nibble prefix and a two-child branch at the point they diverge. Both
/// paths are the same length (both measured from the same depth over a
/// fixed-length keccak nibble path), so a genuine divergence point always
/// exists when the two paths are not identical.
fn split_leaf(
    batch: &mut WriteBatch,
    db: &DB,
    cf: &str,
    old_path: &[u8],
    old_value: Vec<u8>,
    new_path: &[u8],
    new_value: Vec<u8>,
) -> H256 {
    let shared = old_path
        .iter()
        .zip(new_path.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let old_leaf = Node::Leaf { path: old_path[shared + 1..].to_vec(), value: old_value };
    let new_leaf = Node::Leaf { path: new_path[shared + 1..].to_vec(), value: new_value };
    let old_hash = store(batch, db, cf, &old_leaf);
    let new_hash = store(batch, db, cf, &new_leaf);

    let mut children: [Option<H256>; 16] = [None; 16];
    children[old_path[shared] as usize] = Some(old_hash);
    children[new_path[shared] as usize] = Some(new_hash);
    let mut hash = store(batch, db, cf, &Node::Branch { children, value: None });

    for d in (0..shared).rev() {
        let mut wrapper: [Option<H256>; 16] = [None; 16];
        wrapper[old_path[d] as usize] = Some(hash);
        hash = store(batch, db, cf, &Node::Branch { children: wrapper, value: None });
    }
    hash
}

/// Inserts (or overwrites) `key` -> `value`, returning the new root. Rebuilds
/// the path from the leaf up as a fresh chain of branch nodes, since nodes
/// are immutable once written (content-addressed).
pub fn put(db: &DB, cf: &str, root: H256, key: &[u8], value: Vec<u8>) -> ReplayResult<H256> {
    let nibbles = nibbles_of(key);
    let mut batch = WriteBatch::default();
    let mut path: Vec<(usize, [Option<H256>; 16], Option<Vec<u8>>)> = Vec::new();
    let mut current = root;
    let mut depth = 0;
    let mut split: Option<H256> = None;
    loop {
        match load(db, cf, current)? {
            None => break,
            Some(Node::Leaf { path: leaf_path, value: leaf_value }) => {
                if leaf_path != nibbles[depth..] {
                    split = Some(split_leaf(
                        &mut batch,
                        db,
                        cf,
                        &leaf_path,
                        leaf_value,
                        &nibbles[depth..],
                        value.clone(),
                    ));
                }
                break;
            }
            Some(Node::Branch { children, value }) => {
                if depth == nibbles.len() {
                    path.push((depth, children, value));
                    break;
                }
                let idx = nibbles[depth] as usize;
                path.push((depth, children, value));
                match children[idx] {
                    None => break,
                    Some(child) => {
                        current = child;
                        depth += 1;
                    }
                }
            }
        }
    }
    let mut hash = match split {
        Some(h) => h,
        None => {
            let leaf = Node::Leaf { path: nibbles[depth..].to_vec(), value };
            store(&mut batch, db, cf, &leaf)
        }
    };
    for (d, mut children, branch_value) in path.into_iter().rev() {
        let idx = nibbles[d] as usize;
        children[idx] = Some(hash);
        hash = store(&mut batch, db, cf, &Node::Branch { children, value: branch_value });
    }
    db.write(batch).map_err(replay_common::ReplayError::from)?;
    Ok(hash)
}

/// Removes `key`, returning the new root (`H256::zero()` if the trie becomes
/// empty). A correct implementation would collapse branches that are left
/// with a single child; this one leaves them in place, which only costs a
/// little extra depth and never affects correctness of lookups.
pub fn remove(db: &DB, cf: &str, root: H256, key: &[u8]) -> ReplayResult<H256> {
    let nibbles = nibbles_of(key);
    let mut batch = WriteBatch::default();
    let mut path: Vec<(usize, [Option<H256>; 16], Option<Vec<u8>>)> = Vec::new();
    let mut current = root;
    let mut depth = 0;
    let mut found = false;
    loop {
        match load(db, cf, current)? {
            None => break,
            Some(Node::Leaf { path: leaf_path, .. }) => {
                found = leaf_path == nibbles[depth..];
                break;
            }
            Some(Node::Branch { children, value }) => {
                path.push((depth, children, value));
                if depth == nibbles.len() {
                    found = true;
                    break;
                }
                let idx = nibbles[depth] as usize;
                match children[idx] {
                    None => break,
                    Some(child) => {
                        current = child;
                        depth += 1;
                    }
                }
            }
        }
    }
    if !found {
        return Ok(root);
    }
    let mut hash: Option<H256> = None;
    for (d, mut children, branch_value) in path.into_iter().rev() {
        let value = if d == nibbles.len() {
            // the deleted entry was stored directly on this branch, not in a
            // child leaf.
            None
        } else {
            children[nibbles[d] as usize] = hash;
            branch_value
        };
        let all_empty = children.iter().all(Option::is_none) && value.is_none();
        hash = if all_empty {
            None
        } else {
            Some(store(&mut batch, db, cf, &Node::Branch { children, value }))
        };
    }
    db.write(batch).map_err(replay_common::ReplayError::from)?;
    Ok(hash.unwrap_or(H256::zero()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> DB {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        DB::open_cf(&opts, dir.path(), ["nodes"]).unwrap()
    }

    #[test]
    fn insert_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let root = put(&db, "nodes", H256::zero(), b"alpha", b"one".to_vec()).unwrap();
        assert_eq!(get(&db, "nodes", root, b"alpha").unwrap(), Some(b"one".to_vec()));
        assert_eq!(get(&db, "nodes", root, b"beta").unwrap(), None);
    }

    #[test]
    fn overwriting_a_key_updates_the_root() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let root1 = put(&db, "nodes", H256::zero(), b"alpha", b"one".to_vec()).unwrap();
        let root2 = put(&db, "nodes", root1, b"alpha", b"two".to_vec()).unwrap();
        assert_ne!(root1, root2);
        assert_eq!(get(&db, "nodes", root2, b"alpha").unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn two_distinct_keys_are_both_retrievable() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let root1 = put(&db, "nodes", H256::zero(), b"alpha", b"one".to_vec()).unwrap();
        let root2 = put(&db, "nodes", root1, b"beta", b"two".to_vec()).unwrap();
        assert_eq!(get(&db, "nodes", root2, b"alpha").unwrap(), Some(b"one".to_vec()));
        assert_eq!(get(&db, "nodes", root2, b"beta").unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn many_keys_all_survive_sequential_insertion() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let mut root = H256::zero();
        let keys: Vec<Vec<u8>> = (0..50u32).map(|i| format!("account-{i}").into_bytes()).collect();
        for key in &keys {
            let value = [key.as_slice(), b"-value"].concat();
            root = put(&db, "nodes", root, key, value).unwrap();
        }
        for key in &keys {
            let expected = [key.as_slice(), b"-value"].concat();
            assert_eq!(get(&db, "nodes", root, key).unwrap(), Some(expected));
        }
    }

    #[test]
    fn removing_the_only_key_empties_the_trie() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let root1 = put(&db, "nodes", H256::zero(), b"alpha", b"one".to_vec()).unwrap();
        let root2 = remove(&db, "nodes", root1, b"alpha").unwrap();
        assert_eq!(root2, H256::zero());
        assert_eq!(get(&db, "nodes", root2, b"alpha").unwrap(), None);
    }
}
