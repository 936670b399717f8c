//! Trie vertices
//!
//! A [`Node`] holds the entries whose locator path ends at it and up to 256
//! child links, one per routing byte. Children are arena ids owned by the
//! [`Hashtable`](crate::hashtable::Hashtable); the 256-slot table is kept
//! sparse because nearly every slot is unset below the first level.
//!
//! [`Subtree`] is the detached, owned form of a node and its descendants.
//! It is what crosses the storage actor boundary for node-level requests.

use std::collections::BTreeMap;

use hashbrown::HashMap;

/// Index of a node in the hashtable arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) const ROOT: NodeId = NodeId(0);

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A key/value pair stored at a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: String,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// A single trie vertex.
#[derive(Debug, Clone, Default)]
pub struct Node {
    children: HashMap<u8, NodeId>,
    entries: Vec<Entry>,
}

impl Node {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value stored for `key` at this node.
    pub fn get_value(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value.as_str())
    }

    /// Replace any entry for `key`, then append the new pair.
    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.remove_value(&key);
        self.entries.push(Entry { key, value: value.into() });
    }

    /// Remove every entry for `key`. Returns the last removed value.
    pub fn remove_value(&mut self, key: &str) -> Option<String> {
        let mut removed = None;
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].key == key {
                removed = Some(self.entries.remove(i).value);
            } else {
                i += 1;
            }
        }
        removed
    }

    /// True iff this node stores at least one entry.
    pub fn is_leaf_with_data(&self) -> bool {
        !self.entries.is_empty()
    }

    /// True iff this node has no entries and no children.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.children.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn child(&self, byte: u8) -> Option<NodeId> {
        self.children.get(&byte).copied()
    }

    /// Set children, sorted by routing byte.
    pub fn children(&self) -> Vec<(u8, NodeId)> {
        let mut children: Vec<(u8, NodeId)> = self.children.iter().map(|(b, id)| (*b, *id)).collect();
        children.sort_unstable_by_key(|(byte, _)| *byte);
        children
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub(crate) fn set_child(&mut self, byte: u8, id: NodeId) -> Option<NodeId> {
        self.children.insert(byte, id)
    }

    pub(crate) fn clear_child(&mut self, byte: u8) -> Option<NodeId> {
        self.children.remove(&byte)
    }

    pub(crate) fn take_entries(&mut self) -> Vec<Entry> {
        std::mem::take(&mut self.entries)
    }

    pub(crate) fn set_entries(&mut self, entries: Vec<Entry>) {
        self.entries = entries;
    }
}

/// An owned copy of a node and everything below it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subtree {
    pub entries: Vec<Entry>,
    pub children: BTreeMap<u8, Subtree>,
}

impl Subtree {
    pub fn new() -> Self {
        Self::default()
    }

    /// A subtree holding one entry and no children.
    pub fn with_entry(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { entries: vec![Entry::new(key, value)], children: BTreeMap::new() }
    }

    /// Total entries in this subtree.
    pub fn len(&self) -> usize {
        self.entries.len() + self.children.values().map(Subtree::len).sum::<usize>()
    }

    /// True iff the subtree holds no entries at any depth.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every descendant that holds no entries at any depth.
    pub(crate) fn pruned(mut self) -> Self {
        self.children = std::mem::take(&mut self.children)
            .into_iter()
            .map(|(byte, child)| (byte, child.pruned()))
            .filter(|(_, child)| !child.is_empty())
            .collect();
        self
    }
}
