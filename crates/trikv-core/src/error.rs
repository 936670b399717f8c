//! Error types for trikv storage operations
//!
//! Not-found is never an error in this crate: lookups return `Option` at the
//! tree level and an empty string at the storage actor boundary. The variants
//! here cover persistence, configuration and actor lifecycle failures.

use std::path::PathBuf;

use thiserror::Error;

/// trikv error types with detailed context
#[derive(Debug, Clone, Error)]
pub enum TrikvError {
    /// I/O operation failed
    #[error("{}", io_display(.path, .kind, .message))]
    Io {
        /// The file path where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// Snapshot file is structurally invalid and cannot be loaded
    #[error("snapshot corrupted in {} at offset {offset}: {reason}", .path.display())]
    SnapshotCorrupted {
        /// Path to the corrupted snapshot
        path: PathBuf,
        /// Byte offset where corruption was detected
        offset: u64,
        /// Description of the corruption
        reason: String,
    },

    /// Checksum verification failed
    #[error("checksum mismatch in {} at offset {offset}: expected 0x{expected:08x}, got 0x{actual:08x}", .path.display())]
    ChecksumMismatch {
        /// File where checksum failed
        path: PathBuf,
        /// Expected checksum value
        expected: u32,
        /// Actual checksum computed
        actual: u32,
        /// Byte offset of the corrupted data
        offset: u64,
    },

    /// Magic bytes not found at expected location
    #[error("magic bytes not found in {} at offset {offset}: found {}", .path.display(), hex4(.found_bytes))]
    NoMagicFound {
        /// File being read
        path: PathBuf,
        /// Offset where magic was expected
        offset: u64,
        /// Bytes actually found
        found_bytes: [u8; 4],
    },

    /// Snapshot was written by an unknown format version
    #[error("unsupported snapshot version {version} in {}", .path.display())]
    UnsupportedVersion {
        /// Snapshot path
        path: PathBuf,
        /// Version field found in the header
        version: u16,
    },

    /// Entry size exceeds maximum allowed
    #[error("entry {component} too large: {entry_size} bytes exceeds limit of {max_size} bytes")]
    OversizedEntry {
        /// Size of the oversized entry
        entry_size: u64,
        /// Maximum allowed size
        max_size: u64,
        /// Whether it's the key or value that's oversized
        component: String,
    },

    /// Locator path length outside the hash width
    #[error("invalid locator path length {length}: must be at most 4")]
    InvalidPathLength {
        /// Requested path length
        length: u8,
    },

    /// Transplanted subtree reaches below the table's path length
    #[error("subtree of depth {depth} does not fit in the {remaining} remaining trie levels")]
    SubtreeTooDeep {
        /// Depth of the pruned subtree
        depth: usize,
        /// Levels available below the target locator
        remaining: usize,
    },

    /// Transplanted entry does not belong where it would be placed
    #[error("entry {key:?} cannot be placed: {reason}")]
    MisplacedEntry {
        /// Key of the offending entry
        key: String,
        /// Why the placement was rejected
        reason: String,
    },

    /// Configuration failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The storage worker has stopped and no longer accepts requests
    #[error("storage instance is closed")]
    Closed,
}

fn io_display(path: &Option<PathBuf>, kind: &std::io::ErrorKind, message: &str) -> String {
    match path {
        Some(path) => format!("I/O error in {}: {} ({})", path.display(), message, kind),
        None => format!("I/O error: {} ({})", message, kind),
    }
}

fn hex4(bytes: &[u8; 4]) -> String {
    format!("{:02x}{:02x}{:02x}{:02x}", bytes[0], bytes[1], bytes[2], bytes[3])
}

impl TrikvError {
    /// Build an `Io` error with file context.
    pub(crate) fn io_at(path: impl Into<PathBuf>, err: &std::io::Error, what: &str) -> Self {
        TrikvError::Io {
            path: Some(path.into()),
            kind: err.kind(),
            message: format!("{}: {}", what, err),
        }
    }
}

/// Convert std::io::Error to TrikvError::Io
impl From<std::io::Error> for TrikvError {
    fn from(err: std::io::Error) -> Self {
        TrikvError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for trikv operations
pub type TrikvResult<T> = Result<T, TrikvError>;
