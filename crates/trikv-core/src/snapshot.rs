//! Snapshot persistence
//!
//! The storage worker calls into a [`SnapshotStore`] to load the tree once at
//! startup and to save it whenever a persistence trigger fires. A snapshot is
//! a full dump of every key/value pair, so loading rehashes each key with the
//! live hasher and path length.
//!
//! File format (`storage.snap`, all integers little-endian):
//!
//! ```text
//! header   [0..4]   magic        "TKVS"
//!          [4..6]   version      u16 = 1
//!          [6]      path_length  u8  (informational)
//!          [7]      reserved     u8
//!          [8..16]  entry_count  u64
//! entry    key_len u32, value_len u32, crc32c(key ++ value) u32, key, value
//! trailer  crc32c of every preceding byte, u32
//! ```

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::durability::replace_file;
use crate::error::{TrikvError, TrikvResult};
use crate::hashtable::Hashtable;
use crate::node::Entry;

/// Magic bytes identifying a trikv snapshot
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"TKVS";

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u16 = 1;

/// Snapshot file name inside the data directory
pub const SNAPSHOT_FILE: &str = "storage.snap";

const HEADER_SIZE: usize = 16;
const ENTRY_HEADER_SIZE: usize = 12;
const TRAILER_SIZE: usize = 4;

/// Persistence collaborator driven by the storage worker.
pub trait SnapshotStore: Send {
    /// Load the last snapshot into `tree`. `Ok(None)` means no snapshot
    /// exists; any other failure is fatal to startup.
    fn load(&mut self, tree: &mut Hashtable) -> TrikvResult<Option<usize>>;

    /// Persist the whole of `tree`. Returns the number of entries written.
    fn save(&mut self, tree: &Hashtable) -> TrikvResult<usize>;

    /// Where snapshots go, for log lines.
    fn location(&self) -> String;
}

/// In-memory instances: nothing to load, nothing saved.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSnapshot;

impl SnapshotStore for NoSnapshot {
    fn load(&mut self, _tree: &mut Hashtable) -> TrikvResult<Option<usize>> {
        Ok(None)
    }

    fn save(&mut self, tree: &Hashtable) -> TrikvResult<usize> {
        Ok(tree.len())
    }

    fn location(&self) -> String {
        "<memory>".to_string()
    }
}

/// Snapshot kept as a single file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    path: PathBuf,
    max_key_size: usize,
    max_value_size: usize,
}

impl FileSnapshot {
    /// Snapshot at `<dir>/storage.snap` with default size limits.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let defaults = Config::in_memory();
        Self {
            path: dir.as_ref().join(SNAPSHOT_FILE),
            max_key_size: defaults.max_key_size,
            max_value_size: defaults.max_value_size,
        }
    }

    /// Snapshot for `config`, or `None` for an in-memory configuration.
    pub fn from_config(config: &Config) -> Option<Self> {
        let dir = config.data_dir.as_ref()?;
        Some(Self {
            path: dir.join(SNAPSHOT_FILE),
            max_key_size: config.max_key_size,
            max_value_size: config.max_value_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FileSnapshot {
    fn load(&mut self, tree: &mut Hashtable) -> TrikvResult<Option<usize>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TrikvError::io_at(&self.path, &e, "Failed to read snapshot")),
        };
        // Decode fully before touching the tree so a bad file loads nothing.
        let entries = decode_snapshot(&bytes, &self.path)?;
        let count = entries.len();
        for entry in entries {
            tree.set(entry.key, entry.value);
        }
        Ok(Some(count))
    }

    fn save(&mut self, tree: &Hashtable) -> TrikvResult<usize> {
        let bytes = encode_snapshot(tree, self.max_key_size, self.max_value_size)?;
        replace_file(&self.path, &bytes)?;
        Ok(tree.len())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Serialize every entry of `tree`, rejecting keys or values over the limits.
pub fn encode_snapshot(tree: &Hashtable, max_key_size: usize, max_value_size: usize) -> TrikvResult<Vec<u8>> {
    let mut buffer = Vec::with_capacity(HEADER_SIZE + TRAILER_SIZE + tree.len() * ENTRY_HEADER_SIZE);
    buffer.extend_from_slice(&SNAPSHOT_MAGIC);
    buffer.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    buffer.push(tree.path_length());
    buffer.push(0);
    buffer.extend_from_slice(&(tree.len() as u64).to_le_bytes());

    for entry in tree.entries() {
        let key = entry.key.as_bytes();
        let value = entry.value.as_bytes();
        check_size(key.len(), max_key_size, "key")?;
        check_size(value.len(), max_value_size, "value")?;

        let mut digest = crc32c::crc32c(key);
        digest = crc32c::crc32c_append(digest, value);

        buffer.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buffer.extend_from_slice(&(value.len() as u32).to_le_bytes());
        buffer.extend_from_slice(&digest.to_le_bytes());
        buffer.extend_from_slice(key);
        buffer.extend_from_slice(value);
    }

    let trailer = crc32c::crc32c(&buffer);
    buffer.extend_from_slice(&trailer.to_le_bytes());
    Ok(buffer)
}

pub(crate) fn check_size(size: usize, max: usize, component: &str) -> TrikvResult<()> {
    if size > max || size > u32::MAX as usize {
        return Err(TrikvError::OversizedEntry {
            entry_size: size as u64,
            max_size: max as u64,
            component: component.to_string(),
        });
    }
    Ok(())
}

/// Parse a snapshot produced by [`encode_snapshot`]. `path` is used for
/// error context only.
pub fn decode_snapshot(bytes: &[u8], path: &Path) -> TrikvResult<Vec<Entry>> {
    let corrupted = |offset: usize, reason: String| TrikvError::SnapshotCorrupted {
        path: path.to_path_buf(),
        offset: offset as u64,
        reason,
    };

    if bytes.len() < HEADER_SIZE + TRAILER_SIZE {
        return Err(corrupted(0, format!(
            "file too short: {} bytes, need at least {}",
            bytes.len(),
            HEADER_SIZE + TRAILER_SIZE
        )));
    }

    let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if magic != SNAPSHOT_MAGIC {
        return Err(TrikvError::NoMagicFound { path: path.to_path_buf(), offset: 0, found_bytes: magic });
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != SNAPSHOT_VERSION {
        return Err(TrikvError::UnsupportedVersion { path: path.to_path_buf(), version });
    }

    let body_end = bytes.len() - TRAILER_SIZE;
    let stored = read_u32(bytes, body_end);
    let computed = crc32c::crc32c(&bytes[..body_end]);
    if stored != computed {
        return Err(TrikvError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: stored,
            actual: computed,
            offset: body_end as u64,
        });
    }

    let count = read_u64(bytes, 8);
    let max_possible = ((body_end - HEADER_SIZE) / ENTRY_HEADER_SIZE) as u64;
    if count > max_possible {
        return Err(corrupted(8, format!("entry count {} cannot fit in {} bytes", count, body_end - HEADER_SIZE)));
    }

    let mut entries = Vec::with_capacity(count as usize);
    let mut offset = HEADER_SIZE;
    for _ in 0..count {
        if body_end - offset < ENTRY_HEADER_SIZE {
            return Err(corrupted(offset, "truncated entry header".to_string()));
        }
        let key_len = read_u32(bytes, offset) as usize;
        let value_len = read_u32(bytes, offset + 4) as usize;
        let digest = read_u32(bytes, offset + 8);
        let data_start = offset + ENTRY_HEADER_SIZE;

        if body_end - data_start < key_len || body_end - data_start - key_len < value_len {
            return Err(corrupted(offset, format!(
                "entry needs {} bytes for key({}) + value({}), {} available",
                key_len + value_len,
                key_len,
                value_len,
                body_end - data_start
            )));
        }
        let key = &bytes[data_start..data_start + key_len];
        let value = &bytes[data_start + key_len..data_start + key_len + value_len];

        let actual = crc32c::crc32c_append(crc32c::crc32c(key), value);
        if actual != digest {
            return Err(TrikvError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: digest,
                actual,
                offset: offset as u64,
            });
        }

        let key = std::str::from_utf8(key).map_err(|e| corrupted(data_start, format!("key is not UTF-8: {}", e)))?;
        let value = std::str::from_utf8(value)
            .map_err(|e| corrupted(data_start + key_len, format!("value is not UTF-8: {}", e)))?;
        entries.push(Entry::new(key, value));
        offset = data_start + key_len + value_len;
    }

    if offset != body_end {
        return Err(corrupted(offset, format!("{} trailing bytes after last entry", body_end - offset)));
    }
    Ok(entries)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tree() -> Hashtable {
        let mut tree = Hashtable::new();
        tree.set("foo", "bar");
        tree.set("empty", "");
        tree.set("unicode", "värde ✓");
        tree
    }

    fn encoded() -> Vec<u8> {
        encode_snapshot(&sample_tree(), 1024, 1024).unwrap()
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut store = FileSnapshot::new(dir.path());
        assert_eq!(store.save(&sample_tree()).unwrap(), 3);

        let mut loaded = Hashtable::new();
        assert_eq!(store.load(&mut loaded).unwrap(), Some(3));
        assert_eq!(loaded.get("foo"), Some("bar"));
        assert_eq!(loaded.get("empty"), Some(""));
        assert_eq!(loaded.get("unicode"), Some("värde ✓"));
        assert_eq!(loaded.empty_nodes(), 0);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let mut store = FileSnapshot::new(dir.path().join("nonexistent"));
        let mut tree = Hashtable::new();
        assert_eq!(store.load(&mut tree).unwrap(), None);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_load_rehashes_with_live_path_length() {
        let dir = TempDir::new().unwrap();
        let mut store = FileSnapshot::new(dir.path());
        store.save(&sample_tree()).unwrap();

        let mut shallow = Hashtable::with_path_length(1).unwrap();
        store.load(&mut shallow).unwrap();
        assert_eq!(shallow.get("foo"), Some("bar"));
        assert!(shallow.node_count() <= 4);
    }

    #[test]
    fn test_empty_tree_roundtrip() {
        let bytes = encode_snapshot(&Hashtable::new(), 16, 16).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + TRAILER_SIZE);
        assert!(decode_snapshot(&bytes, Path::new("<buffer>")).unwrap().is_empty());
    }

    #[test]
    fn test_bad_magic_detected() {
        let mut bytes = encoded();
        bytes[0] = b'X';
        assert!(matches!(decode_snapshot(&bytes, Path::new("<buffer>")), Err(TrikvError::NoMagicFound { .. })));
    }

    #[test]
    fn test_unknown_version_detected() {
        let mut bytes = encoded();
        bytes[4] = 9;
        assert!(matches!(
            decode_snapshot(&bytes, Path::new("<buffer>")),
            Err(TrikvError::UnsupportedVersion { version: 9, .. })
        ));
    }

    #[test]
    fn test_flipped_bit_detected() {
        let mut bytes = encoded();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;
        assert!(matches!(decode_snapshot(&bytes, Path::new("<buffer>")), Err(TrikvError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_truncated_file_detected() {
        let bytes = encoded();
        let truncated = &bytes[..bytes.len() - 7];
        assert!(decode_snapshot(truncated, Path::new("<buffer>")).is_err());
        assert!(decode_snapshot(&bytes[..10], Path::new("<buffer>")).is_err());
    }

    #[test]
    fn test_inflated_entry_count_detected() {
        let mut bytes = encoded();
        bytes[8..16].copy_from_slice(&4u64.to_le_bytes());
        // Re-seal the trailer so only the structural check can catch it
        let body_end = bytes.len() - TRAILER_SIZE;
        let crc = crc32c::crc32c(&bytes[..body_end]);
        bytes[body_end..].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(decode_snapshot(&bytes, Path::new("<buffer>")), Err(TrikvError::SnapshotCorrupted { .. })));
    }

    #[test]
    fn test_corrupt_file_loads_nothing() {
        let dir = TempDir::new().unwrap();
        let mut store = FileSnapshot::new(dir.path());
        store.save(&sample_tree()).unwrap();
        let mut bytes = std::fs::read(store.path()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(store.path(), bytes).unwrap();

        let mut tree = Hashtable::new();
        assert!(store.load(&mut tree).is_err());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_oversized_value_rejected() {
        let mut tree = Hashtable::new();
        tree.set("k", "x".repeat(17));
        assert!(matches!(
            encode_snapshot(&tree, 16, 16),
            Err(TrikvError::OversizedEntry { component, .. }) if component == "value"
        ));
    }

    #[test]
    fn test_no_snapshot_is_noop() {
        let mut store = NoSnapshot;
        let mut tree = sample_tree();
        assert_eq!(store.load(&mut tree).unwrap(), None);
        assert_eq!(store.save(&tree).unwrap(), 3);
        assert_eq!(tree.len(), 3);
    }
}
