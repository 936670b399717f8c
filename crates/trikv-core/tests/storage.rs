//! Integration tests: the storage actor end to end, including persistence
//! across restarts and many concurrent callers.

use std::sync::Arc;
use std::thread;

use rand::distributions::Alphanumeric;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use trikv_core::snapshot::SNAPSHOT_FILE;
use trikv_core::{ClusterConfig, ClusterSize, Config, NodeLocator, Storage, Subtree, TrikvError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn persistent(dir: &TempDir) -> Config {
    Config { snapshot_cadence: None, ..Config::persistent(dir.path()) }
}

fn random_string(rng: &mut impl Rng, len: usize) -> String {
    rng.sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_fresh_store_returns_empty() -> Result<(), TrikvError> {
    let storage = Storage::open(Config::in_memory())?;
    assert_eq!(storage.get("foo")?, "");
    Ok(())
}

#[test]
fn test_set_get_remove_scenario() -> Result<(), TrikvError> {
    let storage = Storage::open(Config::in_memory())?;
    storage.set("foo", "bar")?;
    assert_eq!(storage.get("foo")?, "bar");
    assert_eq!(storage.remove("foo")?, "bar");
    assert_eq!(storage.get("foo")?, "");
    Ok(())
}

#[test]
fn test_missing_snapshot_directory_starts_empty() {
    let dir = TempDir::new().unwrap();
    let config = persistent(&dir);
    let config = Config { data_dir: Some(dir.path().join("not-created-yet")), ..config };
    let storage = Storage::open(config).unwrap();
    assert_eq!(storage.len().unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn test_restart_preserves_bulk_data() {
    let dir = TempDir::new().unwrap();
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let pairs: Vec<(String, String)> = (0..500)
        .map(|i| (format!("key-{}-{}", i, random_string(&mut rng, 8)), random_string(&mut rng, 32)))
        .collect();

    {
        let storage = Storage::open(persistent(&dir)).unwrap();
        for (k, v) in &pairs {
            storage.set(k.as_str(), v.as_str()).unwrap();
        }
        for (k, _) in pairs.iter().step_by(5) {
            storage.remove(k.as_str()).unwrap();
        }
    }

    let storage = Storage::open(persistent(&dir)).unwrap();
    assert_eq!(storage.len().unwrap(), 400);
    for (i, (k, v)) in pairs.iter().enumerate() {
        let expected = if i % 5 == 0 { "" } else { v.as_str() };
        assert_eq!(storage.get(k.as_str()).unwrap(), expected);
    }
}

#[test]
fn test_snapshot_survives_path_length_change() {
    let dir = TempDir::new().unwrap();
    {
        let storage = Storage::open(persistent(&dir)).unwrap();
        storage.set("alpha", "1").unwrap();
        storage.set("beta", "2").unwrap();
    }

    let config = Config { path_length: 2, ..persistent(&dir) };
    let storage = Storage::open(config).unwrap();
    assert_eq!(storage.get("alpha").unwrap(), "1");
    assert_eq!(storage.get("beta").unwrap(), "2");
}

#[test]
fn test_truncated_snapshot_is_fatal() {
    let dir = TempDir::new().unwrap();
    {
        let storage = Storage::open(persistent(&dir)).unwrap();
        storage.set("k", "v").unwrap();
    }
    let path = dir.path().join(SNAPSHOT_FILE);
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

    assert!(Storage::open(persistent(&dir)).is_err());
}

#[test]
fn test_failed_save_is_not_fatal() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    std::fs::create_dir(&data_dir).unwrap();
    let config = Config { data_dir: Some(data_dir.clone()), ..persistent(&dir) };

    let storage = Storage::open(config).unwrap();
    // Loaded cleanly; every save from here on has nowhere to go.
    std::fs::remove_dir(&data_dir).unwrap();
    storage.set("k", "v").unwrap();
    assert!(storage.flush().is_err());
    assert_eq!(storage.get("k").unwrap(), "v");

    // Once the directory is back the dirty tree is written out.
    std::fs::create_dir(&data_dir).unwrap();
    assert_eq!(storage.flush().unwrap(), 1);
    assert!(data_dir.join(SNAPSHOT_FILE).exists());
}

#[test]
fn test_oversized_value_rejected_and_durability_kept() {
    let dir = TempDir::new().unwrap();
    let config = Config { max_value_size: 16, ..persistent(&dir) };
    {
        let storage = Storage::open(config.clone()).unwrap();
        storage.set("important", "data").unwrap();
        assert!(matches!(
            storage.set("big", "x".repeat(17)),
            Err(TrikvError::OversizedEntry { entry_size: 17, max_size: 16, .. })
        ));
        assert_eq!(storage.get("big").unwrap(), "");
        assert_eq!(storage.flush().unwrap(), 1);
    }

    let reopened = Storage::open(config).unwrap();
    assert_eq!(reopened.get("important").unwrap(), "data");
    assert_eq!(reopened.len().unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn test_disjoint_writers_see_their_own_writes() {
    let storage = Arc::new(Storage::open(Config::in_memory()).unwrap());
    let workers: Vec<_> = (0..16u64)
        .map(|t| {
            let storage = Arc::clone(&storage);
            thread::spawn(move || {
                let mut rng = rand::rngs::StdRng::seed_from_u64(t);
                let mut mine = Vec::new();
                for i in 0..250 {
                    let key = format!("w{}:{}", t, i);
                    let value = random_string(&mut rng, 16);
                    storage.set(key.as_str(), value.as_str()).unwrap();
                    mine.push((key, value));
                    if rng.gen_bool(0.3) {
                        let (key, value) = mine.swap_remove(rng.gen_range(0..mine.len()));
                        assert_eq!(storage.remove(key.as_str()).unwrap(), value);
                        assert_eq!(storage.get(key.as_str()).unwrap(), "");
                    }
                }
                for (key, value) in &mine {
                    assert_eq!(&storage.get(key.as_str()).unwrap(), value);
                }
                mine.len()
            })
        })
        .collect();

    let kept: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();
    assert_eq!(storage.len().unwrap(), kept);
}

#[test]
fn test_shutdown_while_callers_are_active() {
    let storage = Arc::new(Storage::open(Config::in_memory()).unwrap());
    let callers: Vec<_> = (0..4)
        .map(|t| {
            let storage = Arc::clone(&storage);
            thread::spawn(move || {
                let mut served = 0;
                for i in 0.. {
                    match storage.set(format!("{}-{}", t, i), "v") {
                        Ok(_) => served += 1,
                        Err(TrikvError::Closed) => break,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
                served
            })
        })
        .collect();

    thread::sleep(std::time::Duration::from_millis(20));
    storage.shutdown();
    for caller in callers {
        caller.join().unwrap();
    }
    assert!(matches!(storage.get("0-0"), Err(TrikvError::Closed)));
}

// ---------------------------------------------------------------------------
// Subtrees and chunks
// ---------------------------------------------------------------------------

#[test]
fn test_chunk_moves_as_one_subtree() {
    let source = Storage::open(Config::in_memory()).unwrap();
    let target = Storage::open(Config::in_memory()).unwrap();
    let cluster = ClusterConfig::new(ClusterSize::Large);

    for i in 0..200 {
        source.set(format!("user:{}", i), format!("{}", i)).unwrap();
    }
    let locator = cluster.chunk_locator("user:7").unwrap();
    let chunk = cluster.chunk("user:7");

    let moved = source.take_node(locator).unwrap().unwrap();
    let moved_count = moved.len();
    assert!(moved_count >= 1);
    target.set_node(locator, moved).unwrap();

    assert_eq!(target.get("user:7").unwrap(), "7");
    assert_eq!(source.get("user:7").unwrap(), "");
    assert_eq!(source.len().unwrap() + target.len().unwrap(), 200);
    for i in 0..200 {
        let key = format!("user:{}", i);
        let in_target = !target.get(key.as_str()).unwrap().is_empty();
        assert_eq!(in_target, cluster.chunk(&key) == chunk, "{}", key);
    }
    assert_eq!(target.len().unwrap(), moved_count);
}

#[test]
fn test_misplaced_subtree_rejected() {
    let storage = Storage::open(Config::in_memory()).unwrap();
    storage.set("k", "old").unwrap();

    let shallow = NodeLocator::for_key_at("k", 1).unwrap();
    assert!(matches!(
        storage.set_node(shallow, Subtree::with_entry("k", "transplanted")),
        Err(TrikvError::MisplacedEntry { .. })
    ));
    assert_eq!(storage.get("k").unwrap(), "old");

    storage.set("k", "new").unwrap();
    assert_eq!(storage.len().unwrap(), 1);
    assert_eq!(storage.get("k").unwrap(), "new");
}

#[test]
fn test_too_deep_subtree_rejected() {
    let config = Config { path_length: 2, ..Config::in_memory() };
    let storage = Storage::open(config).unwrap();

    let mut subtree = Subtree::new();
    let mut level = Subtree::new();
    level.children.insert(3, Subtree::with_entry("deep", "x"));
    subtree.children.insert(1, level);

    let locator = NodeLocator::new(0xaa00_0000, 1).unwrap();
    assert!(matches!(storage.set_node(locator, subtree), Err(TrikvError::SubtreeTooDeep { .. })));
    assert_eq!(storage.len().unwrap(), 0);
}
