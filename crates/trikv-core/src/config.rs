//! Configuration management for trikv storage instances
//!
//! Provides presets for in-memory and persistent instances and a
//! `validate()` pass run by `Storage::open` before anything is spawned.

use std::path::PathBuf;
use std::time::Duration;

use crate::locator::{DEFAULT_PATH_LENGTH, HASH_WIDTH};

/// Storage instance configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Label for the worker thread and its log span
    pub name: String,
    /// Number of hash bytes used to route a key through the trie
    pub path_length: u8,
    /// Directory holding `storage.snap`; `None` keeps the store in memory only
    pub data_dir: Option<PathBuf>,
    /// Persist after every mutating request
    pub snapshot_on_write: bool,
    /// Persist a dirty tree this long after the write that first dirtied it
    pub snapshot_cadence: Option<Duration>,
    /// Largest key `set` accepts
    pub max_key_size: usize,
    /// Largest value `set` accepts
    pub max_value_size: usize,
}

impl Config {
    /// In-memory store: nothing is loaded or saved.
    pub fn in_memory() -> Self {
        Self {
            name: "storage".to_string(),
            path_length: DEFAULT_PATH_LENGTH,
            data_dir: None,
            snapshot_on_write: false,
            snapshot_cadence: None,
            max_key_size: 64 * 1024,
            max_value_size: 32 * 1024 * 1024,
        }
    }

    /// Persistent store rooted at `dir`, saved on a 5s cadence and at shutdown.
    pub fn persistent(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(dir.into()),
            snapshot_cadence: Some(Duration::from_secs(5)),
            ..Self::in_memory()
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("name must not be empty".into());
        }
        if self.path_length == 0 || self.path_length > HASH_WIDTH {
            return Err(format!("path_length must be in [1, {}]", HASH_WIDTH));
        }
        if let Some(cadence) = self.snapshot_cadence {
            if cadence.as_millis() == 0 {
                return Err("snapshot_cadence must be > 0".into());
            }
        }
        if self.data_dir.is_none() && (self.snapshot_on_write || self.snapshot_cadence.is_some()) {
            return Err("snapshot_on_write and snapshot_cadence require a data_dir".into());
        }
        if self.max_key_size == 0 || self.max_key_size > 16 * 1024 * 1024 {
            return Err("max_key_size must be in [1, 16MB]".into());
        }
        if self.max_value_size == 0 || self.max_value_size > 1024 * 1024 * 1024 {
            return Err("max_value_size must be in [1, 1GB]".into());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self { Self::in_memory() }
}
