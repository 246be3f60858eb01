//! Persistence adapter: a typed, in-memory mirror of one storage key.
//!
//! Values are stored as JSON. Reads never fail from the caller's point of view
//! (a missing or undecodable value yields the default), and a failed write
//! leaves the stored value untouched while the mirror carries on in memory.
//!
//! The mirror and the store are kept in step by revision: local saves and
//! changes reported by other handles are both applied only when their revision
//! is newer than the one the mirror holds, so whichever write the store
//! applied last is the one the mirror ends up with.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::storage::{Listener, Revision, Storage, StorageError, StorageEvent, Subscription};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("could not serialise value for {key:?}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn load_entry<T: DeserializeOwned>(store: &dyn Storage, key: &str) -> Option<(T, Revision)> {
    match store.get(key) {
        Ok(Some(entry)) => match serde_json::from_str(&entry.value) {
            Ok(value) => Some((value, entry.revision)),
            Err(e) => {
                tracing::error!(key, error = %e, "stored value is not valid, using default");
                None
            }
        },
        Ok(None) => {
            tracing::debug!(key, "nothing stored yet, using default");
            None
        }
        Err(e) => {
            tracing::error!(key, error = %e, "could not read store, using default");
            None
        }
    }
}

/// Read and decode the value under `key`, or return `default`.
pub fn load<T: DeserializeOwned>(store: &dyn Storage, key: &str, default: T) -> T {
    load_entry(store, key).map(|(value, _)| value).unwrap_or(default)
}

/// Encode `value` and overwrite whatever is stored under `key`.
pub fn save<T: Serialize + ?Sized>(
    store: &dyn Storage,
    key: &str,
    value: &T,
) -> Result<Revision, PersistError> {
    let encoded = serde_json::to_string(value).map_err(|source| PersistError::Serialize {
        key: key.to_string(),
        source,
    })?;
    Ok(store.set(key, &encoded)?)
}

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Mirror<T> {
    value: T,
    revision: Revision,
    observers: Vec<Observer<T>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A value persisted under one key and kept in sync with changes made by
/// other handles on the same store.
pub struct PersistedState<T> {
    key: String,
    store: Arc<dyn Storage>,
    mirror: Arc<Mutex<Mirror<T>>>,
    subscription: Option<Subscription>,
}

impl<T> PersistedState<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    /// Load the current value (or `default`) and start listening for external changes.
    pub fn open(store: Arc<dyn Storage>, key: impl Into<String>, default: T) -> Self {
        let key = key.into();
        let (value, revision) = load_entry(store.as_ref(), &key).unwrap_or((default, 0));
        let mirror = Arc::new(Mutex::new(Mirror {
            value,
            revision,
            observers: Vec::new(),
        }));

        let listener: Listener = {
            let mirror = Arc::downgrade(&mirror);
            let key = key.clone();
            Arc::new(move |event: &StorageEvent| apply_external(&mirror, &key, event))
        };
        let subscription = match store.subscribe(listener) {
            Ok(sub) => Some(sub),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "change notifications unavailable");
                None
            }
        };

        PersistedState {
            key,
            store,
            mirror,
            subscription,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current in-memory value.
    pub fn get(&self) -> T {
        lock(&self.mirror).value.clone()
    }

    /// Replace the value and write it through.
    pub fn save(&self, value: T) -> Result<Revision, PersistError> {
        self.update(move |_| value)
    }

    /// Compute the next value from the current one and write it through.
    ///
    /// On failure the mirror still takes the new value, the stored value is
    /// left as it was, and the error is logged and returned.
    ///
    /// The mirror lock is released while the store writes, so two concurrent
    /// `update` calls could each build on the same old value. `PersistedState`
    /// is not `Sync` (its `Subscription` is not), which rules that out; keep it so.
    pub fn update<F>(&self, f: F) -> Result<Revision, PersistError>
    where
        F: FnOnce(&T) -> T,
    {
        let next = {
            let mirror = lock(&self.mirror);
            f(&mirror.value)
        };

        // The store may call other handles' listeners; no lock is held across it.
        let result = save(self.store.as_ref(), &self.key, &next);

        let mut mirror = lock(&self.mirror);
        match &result {
            Ok(revision) => {
                if *revision >= mirror.revision {
                    mirror.value = next;
                    mirror.revision = *revision;
                } else {
                    tracing::debug!(key = %self.key, revision, "newer external write already applied");
                }
            }
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "save failed, change kept in memory only");
                mirror.value = next;
            }
        }
        result
    }

    /// Call `observer` with the new value whenever another handle changes it.
    pub fn on_change(&self, observer: impl Fn(&T) + Send + Sync + 'static) {
        lock(&self.mirror).observers.push(Arc::new(observer));
    }

    /// Whether external changes are being tracked.
    pub fn is_watching(&self) -> bool {
        self.subscription.is_some()
    }

    /// Stop listening for external changes and return the last value.
    pub fn close(mut self) -> T {
        if let Some(sub) = self.subscription.take() {
            sub.cancel();
        }
        self.get()
    }
}

fn apply_external<T>(mirror: &Weak<Mutex<Mirror<T>>>, key: &str, event: &StorageEvent)
where
    T: DeserializeOwned + Clone,
{
    if event.key != key {
        return;
    }
    let Some(raw) = event.new_value.as_deref() else {
        tracing::debug!(key, "key removed externally, keeping in-memory value");
        return;
    };
    let value: T = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::error!(key, error = %e, "ignoring undecodable external change");
            return;
        }
    };
    let Some(mirror) = mirror.upgrade() else {
        return;
    };

    let observers = {
        let mut m = lock(&mirror);
        if event.revision <= m.revision {
            tracing::debug!(key, revision = event.revision, "ignoring stale external change");
            return;
        }
        m.value = value.clone();
        m.revision = event.revision;
        m.observers.clone()
    };
    tracing::debug!(key, revision = event.revision, "applied external change");
    for observer in observers {
        observer(&value);
    }
}
