//! Key hashing and trie addressing
//!
//! Keys are hashed with 32-bit FNV-1. The hash is laid out big-endian and its
//! leading `path_length` bytes route the key through the trie, one byte per
//! level. Big-endian order puts the most significant byte first, so the chunk
//! numbers of [`crate::cluster`] name trie prefixes directly.

use std::fmt;

use crate::error::{TrikvError, TrikvResult};

/// Width of the hash in bytes, and therefore the maximum trie depth.
pub const HASH_WIDTH: u8 = 4;

/// Path length used when none is configured.
pub const DEFAULT_PATH_LENGTH: u8 = 4;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1 hash of `key`. Stable across runs and platforms.
pub fn hash(key: &str) -> u32 {
    let mut h = FNV_OFFSET_BASIS;
    for byte in key.as_bytes() {
        h = h.wrapping_mul(FNV_PRIME);
        h ^= u32::from(*byte);
    }
    h
}

/// Address of a node in the trie: a hash plus how many of its bytes to follow.
///
/// Equality and hashing look at the routing path only, so two locators are
/// equal exactly when they address the same node.
#[derive(Debug, Clone, Copy)]
pub struct NodeLocator {
    hash: u32,
    path_length: u8,
}

impl NodeLocator {
    /// Locator for `key` at the default depth.
    pub fn for_key(key: &str) -> Self {
        Self { hash: hash(key), path_length: DEFAULT_PATH_LENGTH }
    }

    /// Locator for `key` at `path_length` levels.
    pub fn for_key_at(key: &str, path_length: u8) -> TrikvResult<Self> {
        Self::new(hash(key), path_length)
    }

    /// Locator from a raw hash. Rejects path lengths wider than the hash.
    pub fn new(hash: u32, path_length: u8) -> TrikvResult<Self> {
        if path_length > HASH_WIDTH {
            return Err(TrikvError::InvalidPathLength { length: path_length });
        }
        Ok(Self { hash, path_length })
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub fn path_length(&self) -> u8 {
        self.path_length
    }

    /// Routing bytes, most significant first, truncated to the path length.
    pub fn path(&self) -> PathBytes {
        PathBytes { bytes: self.hash.to_be_bytes(), len: self.path_length as usize }
    }

    /// The same hash addressed `len` levels deep. `len` is clamped to this
    /// locator's own path length, so a prefix never reaches below it.
    pub fn prefix(&self, len: u8) -> Self {
        Self { hash: self.hash, path_length: len.min(self.path_length) }
    }
}

impl PartialEq for NodeLocator {
    fn eq(&self, other: &Self) -> bool {
        *self.path() == *other.path()
    }
}

impl Eq for NodeLocator {}

impl std::hash::Hash for NodeLocator {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.path().hash(state);
    }
}

impl fmt::Display for NodeLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}/{}", self.hash, self.path_length)
    }
}

/// Fixed-capacity routing path. Derefs to the byte slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathBytes {
    bytes: [u8; HASH_WIDTH as usize],
    len: usize,
}

impl std::ops::Deref for PathBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}
