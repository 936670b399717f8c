//! Cluster addressing
//!
//! A key's chunk is its hash with the low `size` bytes shifted away, so every
//! chunk names the trie prefix formed by the remaining `4 - size` high bytes.
//! Moving a chunk between shards is then a matter of moving one subtree.
//! Nothing in the request path consults this yet.

use uuid::Uuid;

use crate::error::{TrikvError, TrikvResult};
use crate::locator::{hash, NodeLocator, HASH_WIDTH};

/// How many low hash bytes are folded into one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClusterSize {
    Small = 1,
    Medium = 2,
    Large = 3,
    Huge = 4,
}

impl ClusterSize {
    /// Bits shifted off the hash to produce a chunk number.
    pub fn shift(self) -> u32 {
        self as u32 * 8
    }

    /// Trie depth of the prefix a chunk addresses.
    pub fn prefix_length(self) -> u8 {
        HASH_WIDTH - self as u8
    }
}

impl TryFrom<u8> for ClusterSize {
    type Error = TrikvError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ClusterSize::Small),
            2 => Ok(ClusterSize::Medium),
            3 => Ok(ClusterSize::Large),
            4 => Ok(ClusterSize::Huge),
            other => Err(TrikvError::InvalidConfig(format!("cluster size must be in [1, 4], got {}", other))),
        }
    }
}

/// A member of the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub id: Uuid,
    pub address: String,
}

impl Shard {
    /// Shard with a fresh random id.
    pub fn new(address: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), address: address.into() }
    }
}

/// Placeholder for a chunk's assignment record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk;

/// Cluster layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub size: ClusterSize,
    pub shards: Vec<Shard>,
    pub chunks: Vec<Chunk>,
}

impl ClusterConfig {
    pub fn new(size: ClusterSize) -> Self {
        Self { size, shards: Vec::new(), chunks: Vec::new() }
    }

    /// Chunk number owning `key`. Always 0 for [`ClusterSize::Huge`].
    pub fn chunk(&self, key: &str) -> u32 {
        chunk_of(hash(key), self.size)
    }

    /// Locator of the trie prefix that holds every key of `key`'s chunk.
    pub fn chunk_locator(&self, key: &str) -> TrikvResult<NodeLocator> {
        NodeLocator::for_key_at(key, self.size.prefix_length())
    }
}

/// `hash >> (size * 8)`, yielding 0 rather than overflowing at the full width.
pub fn chunk_of(hash: u32, size: ClusterSize) -> u32 {
    hash.checked_shr(size.shift()).unwrap_or(0)
}
