//! # Topic Trie
//!
//! Maps `(root key, path segments)` to values, with single-segment wildcard
//! lookup.
//!
//! ```text
//! root "a" ──┬── "a" ── "c" = 1
//!            ├── "b" ── "c" = 3
//!            └── "x" ── "c" = 9
//!
//! lookup("a", ["*", "c"]) → {1, 3, 9}
//! ```
//!
//! ## Concurrency
//!
//! Every node carries its own locks, so inserts and lookups on disjoint
//! branches never contend. Values are write-once: the first insert at a path
//! wins and later inserts get the stored value back.

use crate::error::BusError;
use courier_types::WILDCARD;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

struct TrieNode<V> {
    value: RwLock<Option<V>>,
    children: RwLock<HashMap<String, Arc<TrieNode<V>>>>,
}

impl<V> TrieNode<V> {
    fn new() -> Self {
        Self {
            value: RwLock::new(None),
            children: RwLock::new(HashMap::new()),
        }
    }

    fn child(&self, segment: &str) -> Option<Arc<TrieNode<V>>> {
        self.children.read().get(segment).cloned()
    }

    fn child_or_create(&self, segment: &str) -> Arc<TrieNode<V>> {
        if let Some(child) = self.child(segment) {
            return child;
        }
        self.children
            .write()
            .entry(segment.to_string())
            .or_insert_with(|| Arc::new(TrieNode::new()))
            .clone()
    }
}

/// A concurrent trie keyed by a root key and `.`-style path segments.
pub struct TopicTrie<K, V> {
    roots: RwLock<HashMap<K, Arc<TrieNode<V>>>>,
}

impl<K, V> TopicTrie<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            roots: RwLock::new(HashMap::new()),
        }
    }

    /// Store `value` at the path unless a value is already there.
    ///
    /// Returns the value now stored at the path, which is the existing one if
    /// the path was already occupied.
    pub fn insert<S: AsRef<str>>(&self, root: &K, path: &[S], value: V) -> Result<V, BusError> {
        self.get_or_insert_with(root, path, || value)
    }

    /// Like [`TopicTrie::insert`], but only builds the value if the path is empty.
    pub fn get_or_insert_with<S, F>(&self, root: &K, path: &[S], create: F) -> Result<V, BusError>
    where
        S: AsRef<str>,
        F: FnOnce() -> V,
    {
        if let Some(segment) = path.iter().find(|s| s.as_ref() == WILDCARD) {
            return Err(BusError::InvalidOperation(format!(
                "wildcard segment '{}' cannot be inserted",
                segment.as_ref()
            )));
        }

        let mut node = self.root_or_create(root);
        for segment in path {
            node = node.child_or_create(segment.as_ref());
        }

        if let Some(existing) = node.value.read().as_ref() {
            return Ok(existing.clone());
        }
        let mut slot = node.value.write();
        Ok(slot.get_or_insert_with(create).clone())
    }

    /// Exact-path lookup. `*` is matched literally and therefore never found.
    pub fn get<S: AsRef<str>>(&self, root: &K, path: &[S]) -> Option<V> {
        let mut node = self.roots.read().get(root).cloned()?;
        for segment in path {
            node = node.child(segment.as_ref())?;
        }
        let value = node.value.read().clone();
        value
    }

    /// All values reachable by the path, where a `*` segment matches every
    /// child at that depth. Unmatched prefixes yield an empty result.
    pub fn lookup<S: AsRef<str>>(&self, root: &K, path: &[S]) -> Vec<V> {
        let Some(start) = self.roots.read().get(root).cloned() else {
            return Vec::new();
        };

        let mut frontier = vec![start];
        for segment in path {
            let segment = segment.as_ref();
            let mut next = Vec::new();
            for node in &frontier {
                if segment == WILDCARD {
                    next.extend(node.children.read().values().cloned());
                } else if let Some(child) = node.child(segment) {
                    next.push(child);
                }
            }
            if next.is_empty() {
                return Vec::new();
            }
            frontier = next;
        }

        frontier
            .iter()
            .filter_map(|node| node.value.read().clone())
            .collect()
    }

    /// Drop every root.
    pub fn clear(&self) {
        self.roots.write().clear();
    }

    fn root_or_create(&self, root: &K) -> Arc<TrieNode<V>> {
        if let Some(node) = self.roots.read().get(root) {
            return node.clone();
        }
        self.roots
            .write()
            .entry(root.clone())
            .or_insert_with(|| Arc::new(TrieNode::new()))
            .clone()
    }
}

impl<K, V> Default for TopicTrie<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
