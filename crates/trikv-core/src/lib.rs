//! trikv core: hash-trie key-value engine
//!
//! Keys are hashed to 32 bits and routed through a byte-indexed trie, one
//! hash byte per level. A single worker thread owns the trie and serves every
//! request in turn, which makes all operations linearizable without locking
//! the tree itself.
//!
//! # Architecture
//!
//! - **locator**: FNV-1 hashing and the byte path derived from it
//! - **hashtable**: arena-backed trie with upward pruning of empty nodes
//! - **storage**: the single-worker actor callers talk to
//! - **snapshot**: full-dump persistence, loaded at open and saved on triggers
//! - **cluster**: chunk numbers aligned with trie prefixes
//!
//! No async runtime is required. The actor offers `*_async` variants that
//! await replies without blocking an executor thread.

pub mod cluster;
pub mod config;
pub mod durability;
pub mod error;
pub mod hashtable;
pub mod locator;
pub mod node;
pub mod snapshot;
pub mod storage;

// Re-export key types for convenience
pub use cluster::{ClusterConfig, ClusterSize, Shard};
pub use config::Config;
pub use error::{TrikvError, TrikvResult};
pub use hashtable::{Hashtable, Lookup};
pub use locator::{hash, NodeLocator};
pub use node::{Entry, Node, NodeId, Subtree};
pub use snapshot::{FileSnapshot, NoSnapshot, SnapshotStore};
pub use storage::Storage;
