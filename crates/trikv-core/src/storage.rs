//! Storage actor
//!
//! A [`Storage`] owns one [`Hashtable`] on a dedicated worker thread. Every
//! call is turned into a [`Request`] carrying a single-use reply slot and is
//! pushed onto an unbounded `flume` queue; the worker executes requests one at
//! a time, so each operation is linearizable with every other without any lock
//! around the tree.
//!
//! ```text
//!  caller ──Request{reply}──► queue ──► worker ──► Hashtable
//!    ▲                                    │
//!    └────────── value (copy) ◄───────────┘
//! ```
//!
//! Persistence runs inside the worker and blocks the queue while it runs:
//! after each write when `snapshot_on_write` is set, `snapshot_cadence` after
//! the first write that dirtied the tree, on [`Storage::flush`], and at
//! shutdown if dirty. The cadence deadline does not move while writes keep
//! arriving.
//!
//! Keys and values over the configured size limits are rejected at the door,
//! so everything in the tree can be written to a snapshot.
//!
//! Shutdown drops the only request sender. Requests already queued are still
//! served; any call issued afterwards fails with [`TrikvError::Closed`].

use std::thread;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, info_span, trace, warn};

use crate::config::Config;
use crate::error::{TrikvError, TrikvResult};
use crate::hashtable::Hashtable;
use crate::locator::NodeLocator;
use crate::node::Subtree;
use crate::snapshot::{check_size, FileSnapshot, NoSnapshot, SnapshotStore};

/// Work item processed by the storage worker.
enum Request {
    Get { key: String, reply: Sender<String> },
    Set { key: String, value: String, reply: Sender<TrikvResult<String>> },
    Remove { key: String, reply: Sender<String> },
    GetNode { locator: NodeLocator, reply: Sender<Option<Subtree>> },
    TakeNode { locator: NodeLocator, reply: Sender<Option<Subtree>> },
    SetNode { locator: NodeLocator, subtree: Subtree, reply: Sender<TrikvResult<Option<Subtree>>> },
    Len { reply: Sender<usize> },
    Flush { reply: Sender<TrikvResult<usize>> },
}

/// Thread-safe handle to a storage instance. Share it behind an `Arc`.
pub struct Storage {
    /// Instance label, also used for the worker thread and log span
    name: String,
    /// Request queue; `None` once shut down
    requests: RwLock<Option<Sender<Request>>>,
    /// Worker join handle, taken by the first shutdown
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Storage {
    /// Open a storage instance, loading `<data_dir>/storage.snap` when the
    /// config is persistent. A corrupt snapshot fails the open.
    pub fn open(config: Config) -> TrikvResult<Self> {
        config.validate().map_err(TrikvError::InvalidConfig)?;
        let store: Box<dyn SnapshotStore> = match FileSnapshot::from_config(&config) {
            Some(file) => Box::new(file),
            None => Box::new(NoSnapshot),
        };
        Self::start(config, store)
    }

    /// Open a storage instance with a caller-supplied persistence collaborator.
    pub fn with_snapshot_store(config: Config, store: impl SnapshotStore + 'static) -> TrikvResult<Self> {
        config.validate().map_err(TrikvError::InvalidConfig)?;
        Self::start(config, Box::new(store))
    }

    fn start(config: Config, mut store: Box<dyn SnapshotStore>) -> TrikvResult<Self> {
        let span = info_span!("storage", name = %config.name);
        let mut tree = Hashtable::with_path_length(config.path_length)?;

        {
            let _enter = span.enter();
            match store.load(&mut tree)? {
                Some(count) => info!(entries = count, location = %store.location(), "snapshot loaded"),
                None => info!(location = %store.location(), "no snapshot found, starting empty"),
            }
        }

        let (sender, receiver) = flume::unbounded();
        let mut worker = Worker {
            tree,
            store,
            dirty: false,
            snapshot_on_write: config.snapshot_on_write,
            cadence: config.snapshot_cadence,
            save_deadline: None,
            max_key_size: config.max_key_size,
            max_value_size: config.max_value_size,
        };

        let thread = thread::Builder::new()
            .name(format!("trikv-{}", config.name))
            .spawn(move || {
                let _enter = span.enter();
                worker.run(receiver);
            })
            .map_err(|e| TrikvError::Io {
                path: config.data_dir.clone(),
                kind: e.kind(),
                message: format!("Failed to spawn storage worker: {}", e),
            })?;

        Ok(Self {
            name: config.name,
            requests: RwLock::new(Some(sender)),
            worker: Mutex::new(Some(thread)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value for `key`, or `""` if absent.
    pub fn get(&self, key: impl Into<String>) -> TrikvResult<String> {
        let key = key.into();
        self.call(|reply| Request::Get { key, reply })
    }

    /// Store `value` under `key`. Returns the value written.
    ///
    /// Fails with [`TrikvError::OversizedEntry`] if the key or value is over
    /// the configured limit; the tree is left unchanged.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) -> TrikvResult<String> {
        let (key, value) = (key.into(), value.into());
        self.call(|reply| Request::Set { key, value, reply })?
    }

    /// Delete `key`. Returns the removed value, or `""` if absent.
    pub fn remove(&self, key: impl Into<String>) -> TrikvResult<String> {
        let key = key.into();
        self.call(|reply| Request::Remove { key, reply })
    }

    /// Copy of the subtree at `locator`.
    pub fn get_node(&self, locator: NodeLocator) -> TrikvResult<Option<Subtree>> {
        self.call(|reply| Request::GetNode { locator, reply })
    }

    /// Detach the subtree at `locator`, pruning ancestors left empty.
    pub fn take_node(&self, locator: NodeLocator) -> TrikvResult<Option<Subtree>> {
        self.call(|reply| Request::TakeNode { locator, reply })
    }

    /// Transplant `subtree` to `locator`. Returns the subtree it replaced.
    pub fn set_node(&self, locator: NodeLocator, subtree: Subtree) -> TrikvResult<Option<Subtree>> {
        self.call(|reply| Request::SetNode { locator, subtree, reply })?
    }

    /// Number of stored entries.
    pub fn len(&self) -> TrikvResult<usize> {
        self.call(|reply| Request::Len { reply })
    }

    pub fn is_empty(&self) -> TrikvResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Save a snapshot now. Returns the number of entries written.
    pub fn flush(&self) -> TrikvResult<usize> {
        self.call(|reply| Request::Flush { reply })?
    }

    pub async fn get_async(&self, key: impl Into<String>) -> TrikvResult<String> {
        let key = key.into();
        self.call_async(|reply| Request::Get { key, reply }).await
    }

    pub async fn set_async(&self, key: impl Into<String>, value: impl Into<String>) -> TrikvResult<String> {
        let (key, value) = (key.into(), value.into());
        self.call_async(|reply| Request::Set { key, value, reply }).await?
    }

    pub async fn remove_async(&self, key: impl Into<String>) -> TrikvResult<String> {
        let key = key.into();
        self.call_async(|reply| Request::Remove { key, reply }).await
    }

    /// Stop accepting requests, let the worker finish what is queued, save a
    /// dirty tree and join the worker. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.requests.write().take().is_some() {
            info!(name = %self.name, "shutdown requested");
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!(name = %self.name, "storage worker panicked");
            }
        }
    }

    /// True until `shutdown` has been called.
    pub fn is_running(&self) -> bool {
        self.requests.read().is_some()
    }

    fn submit<T>(&self, build: impl FnOnce(Sender<T>) -> Request) -> TrikvResult<Receiver<T>> {
        let (reply, response) = flume::bounded(1);
        let requests = self.requests.read();
        let sender = requests.as_ref().ok_or(TrikvError::Closed)?;
        sender.send(build(reply)).map_err(|_| TrikvError::Closed)?;
        Ok(response)
    }

    fn call<T>(&self, build: impl FnOnce(Sender<T>) -> Request) -> TrikvResult<T> {
        self.submit(build)?.recv().map_err(|_| TrikvError::Closed)
    }

    async fn call_async<T>(&self, build: impl FnOnce(Sender<T>) -> Request) -> TrikvResult<T> {
        let response = self.submit(build)?;
        response.recv_async().await.map_err(|_| TrikvError::Closed)
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

/// State owned by the worker thread.
struct Worker {
    tree: Hashtable,
    store: Box<dyn SnapshotStore>,
    dirty: bool,
    snapshot_on_write: bool,
    cadence: Option<Duration>,
    /// When the dirty tree is next saved, if a cadence is configured
    save_deadline: Option<Instant>,
    max_key_size: usize,
    max_value_size: usize,
}

impl Worker {
    fn run(&mut self, requests: Receiver<Request>) {
        info!(location = %self.store.location(), entries = self.tree.len(), "storage worker started");
        loop {
            // Only wake up on a timer while there is something to persist.
            let request = match self.save_deadline {
                Some(deadline) if deadline <= Instant::now() => {
                    let _ = self.persist("cadence");
                    continue;
                }
                Some(deadline) => match requests.recv_deadline(deadline) {
                    Ok(request) => request,
                    Err(RecvTimeoutError::Timeout) => {
                        let _ = self.persist("cadence");
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match requests.recv() {
                    Ok(request) => request,
                    Err(_) => break,
                },
            };
            self.handle(request);
        }

        if self.dirty {
            let _ = self.persist("shutdown");
        }
        info!(entries = self.tree.len(), "storage worker stopped");
    }

    /// Execute one request. A dropped reply receiver is not an error: the
    /// request has already taken effect.
    fn handle(&mut self, request: Request) {
        match request {
            Request::Get { key, reply } => {
                trace!(%key, "get");
                let value = self.tree.get(&key).map(str::to_string).unwrap_or_default();
                let _ = reply.send(value);
            }
            Request::Set { key, value, reply } => {
                trace!(%key, "set");
                if let Err(e) = self.check_entry(&key, &value) {
                    debug!(%key, error = %e, "set rejected");
                    let _ = reply.send(Err(e));
                    return;
                }
                self.tree.set(key, value.clone());
                let _ = reply.send(Ok(value));
                self.mutated();
            }
            Request::Remove { key, reply } => {
                trace!(%key, "remove");
                let removed = self.tree.remove(&key);
                let changed = removed.is_some();
                let _ = reply.send(removed.unwrap_or_default());
                if changed {
                    self.mutated();
                }
            }
            Request::GetNode { locator, reply } => {
                trace!(%locator, "get node");
                let _ = reply.send(self.tree.export_node(locator));
            }
            Request::TakeNode { locator, reply } => {
                trace!(%locator, "take node");
                let taken = self.tree.remove_node(locator);
                let changed = taken.as_ref().map_or(false, |subtree| !subtree.is_empty());
                let _ = reply.send(taken);
                if changed {
                    self.mutated();
                }
            }
            Request::SetNode { locator, subtree, reply } => {
                trace!(%locator, entries = subtree.len(), "set node");
                let result = self
                    .check_subtree(&subtree)
                    .and_then(|()| self.tree.set_node(locator, subtree));
                let changed = result.is_ok();
                let _ = reply.send(result);
                if changed {
                    self.mutated();
                }
            }
            Request::Len { reply } => {
                let _ = reply.send(self.tree.len());
            }
            Request::Flush { reply } => {
                let _ = reply.send(self.persist("flush"));
            }
        }
    }

    fn mutated(&mut self) {
        self.dirty = true;
        if self.snapshot_on_write {
            let _ = self.persist("write");
        }
        if self.dirty && self.save_deadline.is_none() {
            self.save_deadline = self.cadence.map(|cadence| Instant::now() + cadence);
        }
    }

    fn check_entry(&self, key: &str, value: &str) -> TrikvResult<()> {
        check_size(key.len(), self.max_key_size, "key")?;
        check_size(value.len(), self.max_value_size, "value")
    }

    fn check_subtree(&self, subtree: &Subtree) -> TrikvResult<()> {
        let mut stack = vec![subtree];
        while let Some(subtree) = stack.pop() {
            for entry in &subtree.entries {
                self.check_entry(&entry.key, &entry.value)?;
            }
            stack.extend(subtree.children.values());
        }
        Ok(())
    }

    /// Save the tree. Failures keep the dirty flag so the next trigger retries;
    /// a missed cadence deadline is rescheduled one cadence out.
    fn persist(&mut self, trigger: &'static str) -> TrikvResult<usize> {
        match self.store.save(&self.tree) {
            Ok(count) => {
                self.dirty = false;
                self.save_deadline = None;
                if trigger == "write" {
                    debug!(entries = count, trigger, "snapshot saved");
                } else {
                    info!(entries = count, location = %self.store.location(), trigger, "snapshot saved");
                }
                Ok(count)
            }
            Err(e) => {
                warn!(error = %e, location = %self.store.location(), trigger, "snapshot save failed, continuing in memory");
                if self.save_deadline.map_or(true, |deadline| deadline <= Instant::now()) {
                    self.save_deadline = self.cadence.map(|cadence| Instant::now() + cadence);
                }
                Err(e)
            }
        }
    }
}
