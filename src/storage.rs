//! Key-value storage port and its two backends.
//!
//! The store plays the part of browser local storage: string values under
//! string keys, whole-value writes that are atomic per key, and a change
//! feed that tells *other* handles ("tabs") about writes they did not make.
//!
//! Every write is stamped with a [`Revision`]. Revisions grow in the order the
//! store applied the writes, which is what last-write-wins is decided on.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Local;
use notify::{EventKind, RecursiveMode, Watcher};

pub type Revision = u64;

/// Errors that can occur while reading, writing or watching a store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The write would push the store past its size limit. Nothing was written.
    #[error("storage quota exceeded writing {key:?}: {needed} bytes needed, limit is {limit}")]
    QuotaExceeded {
        key: String,
        needed: usize,
        limit: usize,
    },

    /// Key cannot be mapped to a storage slot.
    #[error("invalid storage key {0:?}")]
    InvalidKey(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("storage watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// A stored value and the revision that wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: String,
    pub revision: Revision,
}

/// A write made through another handle. `new_value` is `None` when the key was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub new_value: Option<String>,
    pub revision: Revision,
}

pub type Listener = Arc<dyn Fn(&StorageEvent) + Send + Sync>;

/// Registration handle for a change listener. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Subscription {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Unsubscribe now.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Durable key-value store with per-key atomic writes and a change feed.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Entry>, StorageError>;

    /// Replace the whole value under `key`.
    fn set(&self, key: &str, value: &str) -> Result<Revision, StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Receive writes made through other handles. Own writes are not reported.
    fn subscribe(&self, listener: Listener) -> Result<Subscription, StorageError>;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

struct Registered {
    id: u64,
    origin: u64,
    listener: Listener,
}

#[derive(Default)]
struct MemoryShared {
    entries: HashMap<String, Entry>,
    last_revision: Revision,
    listeners: Vec<Registered>,
    next_listener: u64,
    next_origin: u64,
    quota: Option<usize>,
}

impl MemoryShared {
    fn used_bytes_without(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, e)| k.len() + e.value.len())
            .sum()
    }

    fn listeners_except(&self, origin: u64) -> Vec<Listener> {
        self.listeners
            .iter()
            .filter(|r| r.origin != origin)
            .map(|r| Arc::clone(&r.listener))
            .collect()
    }
}

/// In-process store. Clones share one handle; [`MemoryStore::tab`] opens a
/// new handle on the same data whose writes are reported to the others.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Mutex<MemoryShared>>,
    origin: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            shared: Arc::new(Mutex::new(MemoryShared {
                next_origin: 1,
                ..MemoryShared::default()
            })),
            origin: 0,
        }
    }

    /// A store that rejects writes taking the total of keys plus values past `limit` bytes.
    pub fn with_quota(limit: usize) -> Self {
        let store = Self::new();
        lock(&store.shared).quota = Some(limit);
        store
    }

    /// Open another handle on the same data, as a second browser tab would.
    pub fn tab(&self) -> MemoryStore {
        let mut shared = lock(&self.shared);
        let origin = shared.next_origin;
        shared.next_origin += 1;
        MemoryStore {
            shared: Arc::clone(&self.shared),
            origin,
        }
    }

    fn dispatch(listeners: Vec<Listener>, event: StorageEvent) {
        for listener in listeners {
            listener(&event);
        }
    }
}

impl Storage for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Entry>, StorageError> {
        Ok(lock(&self.shared).entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<Revision, StorageError> {
        let (revision, listeners) = {
            let mut shared = lock(&self.shared);
            if let Some(limit) = shared.quota {
                let needed = shared.used_bytes_without(key) + key.len() + value.len();
                if needed > limit {
                    return Err(StorageError::QuotaExceeded {
                        key: key.to_string(),
                        needed,
                        limit,
                    });
                }
            }
            shared.last_revision += 1;
            let revision = shared.last_revision;
            shared.entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    revision,
                },
            );
            (revision, shared.listeners_except(self.origin))
        };

        // Listeners run without the lock held so they may read the store.
        Self::dispatch(
            listeners,
            StorageEvent {
                key: key.to_string(),
                new_value: Some(value.to_string()),
                revision,
            },
        );
        Ok(revision)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let (revision, listeners) = {
            let mut shared = lock(&self.shared);
            if shared.entries.remove(key).is_none() {
                return Ok(());
            }
            shared.last_revision += 1;
            (shared.last_revision, shared.listeners_except(self.origin))
        };
        Self::dispatch(
            listeners,
            StorageEvent {
                key: key.to_string(),
                new_value: None,
                revision,
            },
        );
        Ok(())
    }

    fn subscribe(&self, listener: Listener) -> Result<Subscription, StorageError> {
        let id = {
            let mut shared = lock(&self.shared);
            let id = shared.next_listener;
            shared.next_listener += 1;
            shared.listeners.push(Registered {
                id,
                origin: self.origin,
                listener,
            });
            id
        };
        let weak: Weak<Mutex<MemoryShared>> = Arc::downgrade(&self.shared);
        Ok(Subscription::new(move || {
            if let Some(shared) = weak.upgrade() {
                lock(&shared).listeners.retain(|r| r.id != id);
            }
        }))
    }
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FileShared {
    revision: AtomicU64,
    writes: AtomicU64,
    /// Latest write made through this handle per key, with its sequence number.
    last_written: Mutex<HashMap<String, (u64, String)>>,
}

impl FileShared {
    fn next_revision(&self) -> Revision {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn record_write(&self, key: &str, value: &str) {
        let seq = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.last_written).insert(key.to_string(), (seq, value.to_string()));
    }

    fn forget(&self, key: &str) {
        lock(&self.last_written).remove(key);
    }
}

/// What one watcher has already accounted for, per key.
///
/// Each own write is matched at most once: the first change seen for the key
/// after the write consumes it. A later write of the same content by someone
/// else is therefore still reported.
#[derive(Default)]
struct WatchState {
    seen: HashMap<String, String>,
    consumed: HashMap<String, u64>,
}

impl WatchState {
    /// Whether a change leaving `key` at `value` should be reported to listeners.
    fn is_foreign(&mut self, shared: &FileShared, key: &str, value: Option<&str>) -> bool {
        let Some(value) = value else {
            self.seen.remove(key);
            return true;
        };

        let mut own = false;
        if let Some((seq, written)) = lock(&shared.last_written).get(key) {
            if self.consumed.get(key) != Some(seq) {
                self.consumed.insert(key.to_string(), *seq);
                own = written == value;
            }
        }
        let repeat = self.seen.get(key).map(String::as_str) == Some(value);
        self.seen.insert(key.to_string(), value.to_string());
        !own && !repeat
    }
}

/// Directory-backed store: one `<key>.json` file per key.
///
/// Writes go to a temporary file that is renamed over the target, so readers
/// see either the old or the new value. Revisions are local to this handle
/// and count writes in the order this process observed them.
#[derive(Clone)]
pub struct FileStore {
    dir: PathBuf,
    shared: Arc<FileShared>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStore {
            dir: dir.into(),
            shared: Arc::new(FileShared::default()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding `key`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }

    /// Copy the current value of `key` into `backup/` with a timestamped name.
    pub fn backup(&self, key: &str) -> Result<PathBuf, StorageError> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("nothing stored under {key:?} yet"),
            )
            .into());
        }
        let backup_dir = self.dir.join("backup");
        fs::create_dir_all(&backup_dir)?;
        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let backup_path = backup_dir.join(format!("{timestamp}_{key}.json"));
        fs::copy(&path, &backup_path)?;
        Ok(backup_path)
    }
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

fn key_for_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let key = name.strip_suffix(".json")?;
    validate_key(key).ok()?;
    Some(key.to_string())
}

impl Storage for FileStore {
    fn get(&self, key: &str) -> Result<Option<Entry>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(Entry {
                value,
                revision: self.shared.revision.load(Ordering::SeqCst),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<Revision, StorageError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)?;
        let tmp = path.with_extension("json.tmp");
        let mut f = File::create(&tmp)?;
        f.write_all(value.as_bytes())?;
        f.flush()?;
        self.shared.record_write(key, value);
        fs::rename(&tmp, &path)?;
        Ok(self.shared.next_revision())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        self.shared.forget(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn subscribe(&self, listener: Listener) -> Result<Subscription, StorageError> {
        fs::create_dir_all(&self.dir)?;
        let shared = Arc::clone(&self.shared);
        let mut state = WatchState::default();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(error = %e, "file store watch error");
                        return;
                    }
                };
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    return;
                }
                for path in &event.paths {
                    let Some(key) = key_for_path(path) else {
                        continue;
                    };
                    let new_value = match fs::read_to_string(path) {
                        Ok(value) => Some(value),
                        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                        Err(e) => {
                            tracing::warn!(key = %key, error = %e, "could not read changed store file");
                            continue;
                        }
                    };
                    if !state.is_foreign(&shared, &key, new_value.as_deref()) {
                        continue;
                    }
                    let revision = shared.next_revision();
                    tracing::debug!(key = %key, revision, "store file changed externally");
                    listener(&StorageEvent {
                        key,
                        new_value,
                        revision,
                    });
                }
            })?;
        watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;
        Ok(Subscription::new(move || drop(watcher)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn recorder() -> (Listener, mpsc::Receiver<StorageEvent>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let listener: Listener = Arc::new(move |ev: &StorageEvent| {
            let _ = lock(&tx).send(ev.clone());
        });
        (listener, rx)
    }

    #[test]
    fn test_memory_set_get() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        let r1 = store.set("k", "1").unwrap();
        let r2 = store.set("k", "2").unwrap();
        assert!(r2 > r1);
        assert_eq!(
            store.get("k").unwrap(),
            Some(Entry {
                value: "2".into(),
                revision: r2
            })
        );
    }

    #[test]
    fn test_memory_events_go_to_other_tabs_only() {
        let first = MemoryStore::new();
        let second = first.tab();
        let (own, own_rx) = recorder();
        let (other, other_rx) = recorder();
        let _a = first.subscribe(own).unwrap();
        let _b = second.subscribe(other).unwrap();

        first.set("k", "v").unwrap();
        assert!(own_rx.try_recv().is_err());
        let ev = other_rx.try_recv().unwrap();
        assert_eq!(ev.key, "k");
        assert_eq!(ev.new_value.as_deref(), Some("v"));
    }

    #[test]
    fn test_memory_remove_reports_none() {
        let first = MemoryStore::new();
        let second = first.tab();
        let (listener, rx) = recorder();
        let _sub = second.subscribe(listener).unwrap();
        first.set("k", "v").unwrap();
        first.remove("k").unwrap();
        let _ = rx.try_recv().unwrap();
        assert_eq!(rx.try_recv().unwrap().new_value, None);
        assert_eq!(second.get("k").unwrap(), None);
    }

    #[test]
    fn test_memory_unsubscribe_on_drop() {
        let first = MemoryStore::new();
        let second = first.tab();
        let (listener, rx) = recorder();
        let sub = second.subscribe(listener).unwrap();
        drop(sub);
        first.set("k", "v").unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_memory_quota_rejects_whole_write() {
        let store = MemoryStore::with_quota(8);
        store.set("k", "1234").unwrap();
        let err = store.set("k", "123456789").unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { limit: 8, .. }));
        assert_eq!(store.get("k").unwrap().unwrap().value, "1234");
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("data"));
        assert_eq!(store.get("todos").unwrap(), None);
        store.set("todos", "[]").unwrap();
        store.set("todos", "[1]").unwrap();
        assert_eq!(store.get("todos").unwrap().unwrap().value, "[1]");
        assert!(!dir.path().join("data/todos.json.tmp").exists());

        store.remove("todos").unwrap();
        assert_eq!(store.get("todos").unwrap(), None);
    }

    #[test]
    fn test_file_store_rejects_bad_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(matches!(store.set("../x", "1"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(store.get(""), Err(StorageError::InvalidKey(_))));
        assert!(matches!(store.get(".hidden"), Err(StorageError::InvalidKey(_))));
    }

    #[test]
    fn test_file_store_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.backup("todos").is_err());
        store.set("todos", "[]").unwrap();
        let backup = store.backup("todos").unwrap();
        assert!(backup.starts_with(dir.path().join("backup")));
        assert_eq!(fs::read_to_string(backup).unwrap(), "[]");
    }

    #[test]
    fn test_own_write_is_matched_once() {
        let shared = FileShared::default();
        let mut state = WatchState::default();

        shared.record_write("k", "[1]");
        assert!(!state.is_foreign(&shared, "k", Some("[1]")));
        // Same change reported twice by the watcher.
        assert!(!state.is_foreign(&shared, "k", Some("[1]")));

        assert!(state.is_foreign(&shared, "k", Some("[2]")));
        assert!(state.is_foreign(&shared, "k", Some("[1]")));
    }

    #[test]
    fn test_own_write_overtaken_by_foreign_write() {
        let shared = FileShared::default();
        let mut state = WatchState::default();

        shared.record_write("k", "[1]");
        // The watcher only gets to read the file after another writer replaced it.
        assert!(state.is_foreign(&shared, "k", Some("[2]")));
        assert!(!state.is_foreign(&shared, "k", Some("[2]")));
        assert!(state.is_foreign(&shared, "k", Some("[1]")));
    }

    #[test]
    fn test_removed_file_resets_seen_value() {
        let shared = FileShared::default();
        let mut state = WatchState::default();
        assert!(state.is_foreign(&shared, "k", Some("[3]")));
        assert!(state.is_foreign(&shared, "k", None));
        assert!(state.is_foreign(&shared, "k", Some("[3]")));
    }

    #[test]
    fn test_key_for_path() {
        assert_eq!(key_for_path(Path::new("/x/todos.json")), Some("todos".into()));
        assert_eq!(key_for_path(Path::new("/x/todos.json.tmp")), None);
        assert_eq!(key_for_path(Path::new("/x/notes.txt")), None);
    }
}
