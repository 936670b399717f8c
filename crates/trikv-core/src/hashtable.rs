//! Hash-addressed trie
//!
//! Every key is routed by the leading bytes of its hash, one trie level per
//! byte. Nodes live in an arena indexed by [`NodeId`]; slot 0 is the root and
//! is never freed. Walks are explicit loops that record the ancestor stack,
//! and the same stack drives insertion and the upward prune pass.
//!
//! INVARIANT: between operations no reachable node other than the root is
//! empty. Every mutation that can empty a node prunes it before returning.

use crate::error::{TrikvError, TrikvResult};
use crate::locator::{NodeLocator, DEFAULT_PATH_LENGTH, HASH_WIDTH};
use crate::node::{Entry, Node, NodeId, Subtree};

/// Result of walking a locator path from the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// The node at the end of the path, if every level exists
    pub node: Option<NodeId>,
    /// Nodes visited before the terminal one, root first. On a miss this
    /// ends at the last node that exists along the path.
    pub ancestors: Vec<NodeId>,
}

/// Tree-based hash table of string keys and values.
#[derive(Debug, Clone)]
pub struct Hashtable {
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
    path_length: u8,
    len: usize,
}

impl Hashtable {
    /// Empty table routing keys through the full hash width.
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(Node::new())],
            free: Vec::new(),
            path_length: DEFAULT_PATH_LENGTH,
            len: 0,
        }
    }

    /// Empty table routing keys through `path_length` levels (1 to 4).
    pub fn with_path_length(path_length: u8) -> TrikvResult<Self> {
        if path_length == 0 || path_length > HASH_WIDTH {
            return Err(TrikvError::InvalidPathLength { length: path_length });
        }
        Ok(Self { path_length, ..Self::new() })
    }

    pub fn path_length(&self) -> u8 {
        self.path_length
    }

    /// Locator this table uses for `key`.
    pub fn locate(&self, key: &str) -> NodeLocator {
        NodeLocator::for_key(key).prefix(self.path_length)
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Node stored at `id`, if the slot is live.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    /// Number of key/value pairs.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of live nodes, root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Drop every entry and node except the root.
    pub fn clear(&mut self) {
        *self = Self { path_length: self.path_length, ..Self::new() };
    }

    // ------------------------------------------------------------------
    // Key-level API
    // ------------------------------------------------------------------

    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_entry(self.locate(key), key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let locator = self.locate(&key);
        self.set_entry(locator, key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.remove_entry(self.locate(key), key)
    }

    /// Walk `locator`'s path from the root.
    pub fn find_node(&self, locator: NodeLocator) -> Lookup {
        let path = locator.path();
        let mut ancestors = Vec::with_capacity(path.len());
        let mut current = NodeId::ROOT;
        for &byte in path.iter() {
            ancestors.push(current);
            match self.live(current).child(byte) {
                Some(child) => current = child,
                None => return Lookup { node: None, ancestors },
            }
        }
        Lookup { node: Some(current), ancestors }
    }

    pub fn get_entry(&self, locator: NodeLocator, key: &str) -> Option<&str> {
        let id = self.find_node(locator).node?;
        self.live(id).get_value(key)
    }

    /// Store `key` at the node addressed by `locator`, creating missing levels.
    pub fn set_entry(&mut self, locator: NodeLocator, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let id = self.walk_create(&locator.path());
        if self.live(id).get_value(&key).is_none() {
            self.len += 1;
        }
        self.live_mut(id).set_value(key, value);
    }

    /// Remove `key` from the node addressed by `locator` and prune upward.
    pub fn remove_entry(&mut self, locator: NodeLocator, key: &str) -> Option<String> {
        let Lookup { node, ancestors } = self.find_node(locator);
        let id = node?;
        let removed = self.live_mut(id).remove_value(key);
        if removed.is_some() {
            self.len -= 1;
        }
        self.prune(&locator.path(), &ancestors);
        removed
    }

    // ------------------------------------------------------------------
    // Node-level API
    // ------------------------------------------------------------------

    /// Owned copy of the subtree at `locator`.
    pub fn export_node(&self, locator: NodeLocator) -> Option<Subtree> {
        let id = self.find_node(locator).node?;
        Some(self.export(id))
    }

    /// Replace the subtree at `locator` with `subtree`, creating missing
    /// levels above it. Returns the subtree that was there before.
    ///
    /// Branches of `subtree` without entries are dropped before insertion.
    /// The subtree may not reach below this table's path length, and every
    /// entry must sit on the node its key routes to, once per node.
    pub fn set_node(&mut self, locator: NodeLocator, subtree: Subtree) -> TrikvResult<Option<Subtree>> {
        let depth = self.check_node_locator(locator)?;
        let subtree = subtree.pruned();
        let remaining = usize::from(self.path_length) - depth;
        let subtree_depth = depth_of(&subtree);
        if subtree_depth > remaining {
            return Err(TrikvError::SubtreeTooDeep { depth: subtree_depth, remaining });
        }
        self.check_placement(locator, &subtree)?;

        let path = locator.path();
        let Some((last, parents)) = path.split_last() else {
            let previous = self.take_root();
            self.import_into(NodeId::ROOT, subtree);
            return Ok(Some(previous));
        };
        if subtree.is_empty() {
            return Ok(self.remove_node(locator));
        }

        let parent = self.walk_create(parents);
        let existing = self.live(parent).child(*last);
        let previous = existing.map(|old| self.detach(old));
        let id = self.alloc(Node::new());
        self.live_mut(parent).set_child(*last, id);
        self.import_into(id, subtree);
        Ok(previous)
    }

    /// Detach the subtree at `locator` and prune upward. The root is
    /// cleared rather than removed.
    pub fn remove_node(&mut self, locator: NodeLocator) -> Option<Subtree> {
        let path = locator.path();
        let Some((last, parents)) = path.split_last() else {
            return Some(self.take_root());
        };
        let Lookup { node, ancestors } = self.find_node(locator);
        let id = node?;
        let parent = ancestors[ancestors.len() - 1];
        self.live_mut(parent).clear_child(*last);
        let removed = self.detach(id);
        self.prune(parents, &ancestors[..ancestors.len() - 1]);
        Some(removed)
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// All entries, in trie order (parents before children, children by byte).
    pub fn entries(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.preorder()
            .into_iter()
            .flat_map(move |id| self.live(id).entries().iter())
    }

    /// Count of reachable non-root nodes with no entries and no children.
    pub fn empty_nodes(&self) -> usize {
        self.preorder()
            .into_iter()
            .filter(|id| *id != NodeId::ROOT && self.live(*id).is_empty())
            .count()
    }

    fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.node_count());
        let mut stack = vec![NodeId::ROOT];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.live(id).children().into_iter().rev().map(|(_, child)| child));
        }
        order
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn live(&self, id: NodeId) -> &Node {
        self.nodes[id.index()].as_ref().expect("linked node id points at a freed slot")
    }

    fn live_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.index()].as_mut().expect("linked node id points at a freed slot")
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.index()] = Some(node);
                id
            }
            None => {
                let id = NodeId(self.nodes.len() as u32);
                self.nodes.push(Some(node));
                id
            }
        }
    }

    /// Follow `path` from the root, creating any missing level.
    fn walk_create(&mut self, path: &[u8]) -> NodeId {
        let mut current = NodeId::ROOT;
        for &byte in path {
            current = match self.live(current).child(byte) {
                Some(child) => child,
                None => {
                    let child = self.alloc(Node::new());
                    self.live_mut(current).set_child(byte, child);
                    child
                }
            };
        }
        current
    }

    /// Walk back up `ancestors`, unlinking each child that is now empty.
    /// Stops at the first node that still holds something.
    fn prune(&mut self, path: &[u8], ancestors: &[NodeId]) {
        for (&parent, &byte) in ancestors.iter().zip(path.iter()).rev() {
            let Some(child) = self.live(parent).child(byte) else {
                // Already unlinked; the parent is checked on the next level up.
                continue;
            };
            if !self.live(child).is_empty() {
                break;
            }
            self.live_mut(parent).clear_child(byte);
            self.nodes[child.index()] = None;
            self.free.push(child);
        }
    }

    fn check_node_locator(&self, locator: NodeLocator) -> TrikvResult<usize> {
        if locator.path_length() > self.path_length {
            return Err(TrikvError::InvalidPathLength { length: locator.path_length() });
        }
        Ok(usize::from(locator.path_length()))
    }

    /// Every entry of `subtree`, rooted at `locator`, must route to the node
    /// holding it. Keys may not repeat within a node.
    fn check_placement(&self, locator: NodeLocator, subtree: &Subtree) -> TrikvResult<()> {
        let mut stack = vec![(locator.path().to_vec(), subtree)];
        while let Some((path, subtree)) = stack.pop() {
            let mut seen = hashbrown::HashSet::with_capacity(subtree.entries.len());
            for entry in &subtree.entries {
                let home = self.locate(&entry.key);
                if *home.path() != path[..] {
                    return Err(TrikvError::MisplacedEntry {
                        key: entry.key.clone(),
                        reason: format!("routes to {:02x?}, placed at {:02x?}", &*home.path(), path),
                    });
                }
                if !seen.insert(entry.key.as_str()) {
                    return Err(TrikvError::MisplacedEntry {
                        key: entry.key.clone(),
                        reason: "key appears twice in one node".to_string(),
                    });
                }
            }
            for (&byte, child) in &subtree.children {
                let mut child_path = path.clone();
                child_path.push(byte);
                stack.push((child_path, child));
            }
        }
        Ok(())
    }

    fn export(&self, id: NodeId) -> Subtree {
        let node = self.live(id);
        Subtree {
            entries: node.entries().to_vec(),
            children: node
                .children()
                .into_iter()
                .map(|(byte, child)| (byte, self.export(child)))
                .collect(),
        }
    }

    /// Unlinked subtree rooted at `id` as an owned value; frees its slots.
    fn detach(&mut self, id: NodeId) -> Subtree {
        let subtree = self.export(id);
        self.len -= subtree.len();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes[id.index()].take() {
                stack.extend(node.children().into_iter().map(|(_, child)| child));
                self.free.push(id);
            }
        }
        subtree
    }

    /// Empty the root, returning what it held.
    fn take_root(&mut self) -> Subtree {
        let children = self.live(NodeId::ROOT).children();
        let mut previous = Subtree {
            entries: self.live_mut(NodeId::ROOT).take_entries(),
            children: Default::default(),
        };
        self.len -= previous.entries.len();
        for (byte, child) in children {
            self.live_mut(NodeId::ROOT).clear_child(byte);
            previous.children.insert(byte, self.detach(child));
        }
        previous
    }

    /// Populate the empty node `id` from `subtree`.
    fn import_into(&mut self, id: NodeId, subtree: Subtree) {
        let mut stack = vec![(id, subtree)];
        while let Some((id, subtree)) = stack.pop() {
            self.len += subtree.entries.len();
            self.live_mut(id).set_entries(subtree.entries);
            for (byte, child) in subtree.children {
                let child_id = self.alloc(Node::new());
                self.live_mut(id).set_child(byte, child_id);
                stack.push((child_id, child));
            }
        }
    }
}

impl Default for Hashtable {
    fn default() -> Self { Self::new() }
}

fn depth_of(subtree: &Subtree) -> usize {
    subtree.children.values().map(|child| 1 + depth_of(child)).max().unwrap_or(0)
}
