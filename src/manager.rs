use crate::config::StoreConfig;
use crate::error::{BoxError, StoreError};
use crate::key::{KeySerializer, RawKey, Shape, StoreId};
use crate::table::{DataTable, Entry};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use tracing::{debug, error, trace, warn};

/// Result returned by watcher callbacks
pub type WatchResult = Result<(), BoxError>;

type Watcher = Arc<dyn Fn(&StoreManager, Option<&Value>, Option<&str>) -> WatchResult + Send + Sync>;

/// Handle returned by [`StoreManager::watch`], used to unsubscribe
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WatcherId(u64);

struct Registration {
    shape: Shape,
    serializer: Option<KeySerializer>,
    watchers: Vec<(WatcherId, Watcher)>,
}

struct Inner {
    stores: Vec<Registration>,
    table: DataTable,
    setup: bool,
    next_watcher: u64,
    // Active dispatch depth per calling thread and store.
    dispatching: HashMap<(ThreadId, StoreId), usize>,
}

impl Inner {
    fn registration(&self, store: StoreId) -> Result<&Registration, StoreError> {
        (store.get() as usize)
            .checked_sub(1)
            .and_then(|index| self.stores.get(index))
            .ok_or(StoreError::InvalidStore(store.get()))
    }

    fn registration_mut(&mut self, store: StoreId) -> Result<&mut Registration, StoreError> {
        (store.get() as usize)
            .checked_sub(1)
            .and_then(|index| self.stores.get_mut(index))
            .ok_or(StoreError::InvalidStore(store.get()))
    }

    /// Dispatches of `store` active on the calling thread
    fn active_dispatches(&self, store: StoreId) -> usize {
        self.dispatching
            .get(&(thread::current().id(), store))
            .copied()
            .unwrap_or(0)
    }
}

/// Owner of every store's registration, watchers and data
///
/// A manager starts in the setup phase, during which stores are registered.
/// [`finish_setup`](StoreManager::finish_setup) closes registration; from
/// then on only the data and the watcher lists change.
///
/// Every mutating operation validates its input first, then writes the
/// data table, then calls the store's watchers in registration order. No
/// internal lock is held while watchers, updaters or serializers run, so
/// they may freely call back into the manager.
///
/// # Examples
///
/// ```
/// use sovran_store::{RawKey, Shape, StoreError, StoreManager};
/// use serde_json::json;
///
/// let manager = StoreManager::new();
/// let scores = manager.register(Shape::Keyed, None)?;
/// manager.finish_setup()?;
///
/// manager.set(scores, Some(RawKey::Str("alice")), json!(10))?;
/// manager.set(scores, Some(RawKey::Str("bob")), json!(5))?;
/// assert_eq!(manager.get(scores, None)?, Some(json!({"alice": 10, "bob": 5})));
///
/// manager.clear(scores, Some(RawKey::Str("alice")))?;
/// assert_eq!(manager.get(scores, None)?, Some(json!({"bob": 5})));
/// # Ok::<(), StoreError>(())
/// ```
pub struct StoreManager {
    inner: Mutex<Inner>,
    config: StoreConfig,
}

impl StoreManager {
    /// Creates a manager with the default configuration
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                stores: Vec::new(),
                table: DataTable::new(),
                setup: true,
                next_watcher: 0,
                dispatching: HashMap::new(),
            }),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockError)
    }

    /// Registers a new store and returns its id
    ///
    /// Ids start at 1 and increase by one per registration.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::RegistrationTiming` once the setup phase is over.
    pub fn register(
        &self,
        shape: Shape,
        serializer: Option<KeySerializer>,
    ) -> Result<StoreId, StoreError> {
        let mut inner = self.lock()?;
        if !inner.setup {
            return Err(StoreError::RegistrationTiming);
        }
        let serialized = serializer.is_some();
        inner.stores.push(Registration {
            shape,
            serializer,
            watchers: Vec::new(),
        });
        let id = StoreId::new(inner.stores.len() as u32);
        debug!(store = id.get(), %shape, serialized, "registered store");
        Ok(id)
    }

    /// Ends the setup phase; later calls to `register` fail
    pub fn finish_setup(&self) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.setup {
            inner.setup = false;
            debug!(stores = inner.stores.len(), "store setup finished");
        }
        Ok(())
    }

    pub fn is_setup_phase(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.setup)
    }

    /// Returns the number of registered stores, which is also the highest id issued
    pub fn store_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.stores.len())
    }

    pub fn is_registered(&self, store: StoreId) -> Result<bool, StoreError> {
        Ok(self.lock()?.registration(store).is_ok())
    }

    pub fn shape(&self, store: StoreId) -> Result<Shape, StoreError> {
        Ok(self.lock()?.registration(store)?.shape)
    }

    /// Checks a store id and turns a key into its string form
    ///
    /// String keys pass through unchanged. Any other key goes through the
    /// store's serializer.
    ///
    /// # Errors
    ///
    /// - `StoreError::InvalidStore` if the id was not issued by this manager
    /// - `StoreError::InvalidKey` for a non-string key on a store without a serializer
    /// - `StoreError::Serializer` if the serializer fails
    pub fn validate(
        &self,
        store: StoreId,
        key: Option<RawKey<'_>>,
    ) -> Result<Option<String>, StoreError> {
        let serializer = self.lock()?.registration(store)?.serializer.clone();
        Self::resolve_key(store, serializer.as_ref(), key)
    }

    fn resolve_key(
        store: StoreId,
        serializer: Option<&KeySerializer>,
        key: Option<RawKey<'_>>,
    ) -> Result<Option<String>, StoreError> {
        match key {
            None => Ok(None),
            Some(RawKey::Str(key)) => Ok(Some(key.to_string())),
            Some(RawKey::Other(key)) => {
                let serializer = serializer.ok_or_else(|| StoreError::InvalidKey {
                    store,
                    reason: "non-string key and no serializer registered".to_string(),
                })?;
                serializer
                    .serialize(key)
                    .map(Some)
                    .map_err(|cause| StoreError::Serializer {
                        store,
                        cause: cause.to_string(),
                    })
            }
        }
    }

    /// Validates `key` and checks it against the store's shape
    ///
    /// Writes to a keyed store need a key; a scalar store never takes one.
    fn prepare(
        &self,
        store: StoreId,
        key: Option<RawKey<'_>>,
        write: bool,
    ) -> Result<Option<String>, StoreError> {
        let (shape, serializer) = {
            let inner = self.lock()?;
            let registration = inner.registration(store)?;
            (registration.shape, registration.serializer.clone())
        };
        match (shape, key.is_some()) {
            (Shape::Scalar, true) => return Err(StoreError::ShapeMismatch { store, shape }),
            (Shape::Keyed, false) if write => {
                return Err(StoreError::ShapeMismatch { store, shape })
            }
            _ => {}
        }
        Self::resolve_key(store, serializer.as_ref(), key)
    }

    fn check_reentrancy(&self, store: StoreId) -> Result<(), StoreError> {
        let active = self.lock()?.active_dispatches(store);
        if self.config.reentrancy.permits(active) {
            Ok(())
        } else {
            warn!(store = store.get(), active, "rejected re-entrant store mutation");
            Err(StoreError::Reentrant(store))
        }
    }

    /// Reads a value
    ///
    /// Returns the scalar value, the value under `key`, or for a keyed store
    /// read without a key, the whole mapping as a JSON object. Absent data
    /// reads as `None`.
    pub fn get(&self, store: StoreId, key: Option<RawKey<'_>>) -> Result<Option<Value>, StoreError> {
        let key = self.prepare(store, key, false)?;
        Ok(self.lock()?.table.read(store, key.as_deref()))
    }

    /// Returns the keys currently held by a keyed store
    pub fn keys(&self, store: StoreId) -> Result<Vec<String>, StoreError> {
        let inner = self.lock()?;
        let shape = inner.registration(store)?.shape;
        if shape != Shape::Keyed {
            return Err(StoreError::ShapeMismatch { store, shape });
        }
        Ok(inner.table.keys(store))
    }

    /// Writes a value and notifies the store's watchers
    ///
    /// # Errors
    ///
    /// Validation and shape errors are returned before anything is written.
    /// `StoreError::Watcher` is returned after the write if any watcher failed.
    pub fn set(
        &self,
        store: StoreId,
        key: Option<RawKey<'_>>,
        value: Value,
    ) -> Result<(), StoreError> {
        let key = self.prepare(store, key, true)?;
        self.check_reentrancy(store)?;
        self.lock()?.table.write(store, key.as_deref(), value.clone());
        trace!(store = store.get(), key = key.as_deref(), "set");
        self.dispatch(store, key.as_deref(), Some(&value))
    }

    /// Removes the value under `key`, or the whole store when `key` is `None`
    ///
    /// Watchers are notified with an absent value even if nothing was stored.
    pub fn clear(&self, store: StoreId, key: Option<RawKey<'_>>) -> Result<(), StoreError> {
        let key = self.prepare(store, key, false)?;
        self.check_reentrancy(store)?;
        let removed = self.lock()?.table.remove(store, key.as_deref());
        trace!(store = store.get(), key = key.as_deref(), removed, "clear");
        self.dispatch(store, key.as_deref(), None)
    }

    /// Passes the current value to `updater` and stores the outcome
    ///
    /// If `updater` returns a value, it replaces the stored one. Otherwise
    /// whatever `updater` did to the value in place is kept. Watchers see the
    /// resulting value, which is also returned.
    ///
    /// ```
    /// use sovran_store::{Shape, StoreError, StoreManager};
    /// use serde_json::json;
    ///
    /// let manager = StoreManager::new();
    /// let log = manager.register(Shape::Scalar, None)?;
    /// manager.set(log, None, json!([1]))?;
    ///
    /// manager.update(log, None, |value| {
    ///     if let Some(list) = value.and_then(|v| v.as_array_mut()) {
    ///         list.push(json!(2));
    ///     }
    ///     None
    /// })?;
    /// assert_eq!(manager.get(log, None)?, Some(json!([1, 2])));
    /// # Ok::<(), StoreError>(())
    /// ```
    pub fn update<F>(
        &self,
        store: StoreId,
        key: Option<RawKey<'_>>,
        updater: F,
    ) -> Result<Option<Value>, StoreError>
    where
        F: FnOnce(Option<&mut Value>) -> Option<Value>,
    {
        self.update_with(store, key, |mut current| {
            let replaced = updater(current.as_mut());
            Ok(replaced.or(current))
        })
    }

    /// Like `update`, with an updater that maps the current value to the
    /// resulting one and may fail before anything is written
    pub(crate) fn update_with<F>(
        &self,
        store: StoreId,
        key: Option<RawKey<'_>>,
        updater: F,
    ) -> Result<Option<Value>, StoreError>
    where
        F: FnOnce(Option<Value>) -> Result<Option<Value>, StoreError>,
    {
        let key = self.prepare(store, key, true)?;
        self.check_reentrancy(store)?;
        let current = self.lock()?.table.read(store, key.as_deref());
        let result = updater(current)?;
        if let Some(value) = &result {
            self.lock()?.table.write(store, key.as_deref(), value.clone());
        }
        trace!(store = store.get(), key = key.as_deref(), "update");
        self.dispatch(store, key.as_deref(), result.as_ref())?;
        Ok(result)
    }

    /// Applies `updater` to every key of a keyed store
    ///
    /// Each returned value replaces the one under its key; in-place edits are
    /// kept otherwise. Watchers run once per key, and failures across all
    /// keys are reported together.
    pub fn map<F>(&self, store: StoreId, mut updater: F) -> Result<(), StoreError>
    where
        F: FnMut(&str, &mut Value) -> Option<Value>,
    {
        self.map_with(store, |key, mut value| {
            Ok(updater(key, &mut value).unwrap_or(value))
        })
    }

    pub(crate) fn map_with<F>(&self, store: StoreId, mut updater: F) -> Result<(), StoreError>
    where
        F: FnMut(&str, Value) -> Result<Value, StoreError>,
    {
        let entries: Vec<(String, Value)> = {
            let inner = self.lock()?;
            let shape = inner.registration(store)?.shape;
            if shape != Shape::Keyed {
                return Err(StoreError::ShapeMismatch { store, shape });
            }
            match inner.table.entry(store) {
                Some(Entry::Keyed(map)) => map.clone().into_iter().collect(),
                _ => Vec::new(),
            }
        };
        self.check_reentrancy(store)?;

        let mut results = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let value = updater(key.as_str(), value)?;
            results.push((key, value));
        }
        {
            let mut inner = self.lock()?;
            for (key, value) in &results {
                inner.table.write(store, Some(key.as_str()), value.clone());
            }
        }
        trace!(store = store.get(), keys = results.len(), "map");

        let mut failures = Vec::new();
        for (key, value) in &results {
            match self.dispatch(store, Some(key.as_str()), Some(value)) {
                Ok(()) => {}
                Err(StoreError::Watcher { failures: batch, .. }) => failures.extend(batch),
                Err(err) => return Err(err),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Watcher { store, failures })
        }
    }

    /// Subscribes `watcher` to every mutation of `store`
    ///
    /// Watchers receive the manager, the new value (`None` after a clear) and
    /// the key. They run in the order they were added.
    pub fn watch<F>(&self, store: StoreId, watcher: F) -> Result<WatcherId, StoreError>
    where
        F: Fn(&StoreManager, Option<&Value>, Option<&str>) -> WatchResult + Send + Sync + 'static,
    {
        let mut inner = self.lock()?;
        inner.registration(store)?;
        inner.next_watcher += 1;
        let id = WatcherId(inner.next_watcher);
        let watcher: Watcher = Arc::new(watcher);
        inner.registration_mut(store)?.watchers.push((id, watcher));
        Ok(id)
    }

    /// Removes a watcher; returns false if it was not subscribed to `store`
    pub fn unwatch(&self, store: StoreId, watcher: WatcherId) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let watchers = &mut inner.registration_mut(store)?.watchers;
        let before = watchers.len();
        watchers.retain(|(id, _)| *id != watcher);
        Ok(watchers.len() != before)
    }

    /// Calls every watcher of `store` without touching the data
    ///
    /// All watchers run even if some fail; the failures are then returned
    /// together as `StoreError::Watcher`.
    pub fn trigger(
        &self,
        store: StoreId,
        key: Option<RawKey<'_>>,
        value: Option<&Value>,
    ) -> Result<(), StoreError> {
        let key = self.prepare(store, key, false)?;
        self.dispatch(store, key.as_deref(), value)
    }

    fn dispatch(
        &self,
        store: StoreId,
        key: Option<&str>,
        value: Option<&Value>,
    ) -> Result<(), StoreError> {
        let watchers: Vec<Watcher> = {
            let mut inner = self.lock()?;
            let active = inner.active_dispatches(store);
            if !self.config.reentrancy.permits(active) {
                warn!(store = store.get(), active, "rejected re-entrant dispatch");
                return Err(StoreError::Reentrant(store));
            }
            let watchers = inner
                .registration(store)?
                .watchers
                .iter()
                .map(|(_, watcher)| Arc::clone(watcher))
                .collect();
            *inner.dispatching.entry((thread::current().id(), store)).or_insert(0) += 1;
            watchers
        };
        let _guard = DispatchGuard {
            manager: self,
            slot: (thread::current().id(), store),
        };
        trace!(store = store.get(), key, watchers = watchers.len(), "dispatch");

        let mut failures = Vec::new();
        for watcher in &watchers {
            if let Err(err) = watcher(self, value, key) {
                if self.config.log_watcher_failures {
                    error!(store = store.get(), key, error = %err, "store watcher failed");
                }
                failures.push(err.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Watcher { store, failures })
        }
    }

    /// Returns a copy of the data table, for the host to checkpoint
    pub fn snapshot(&self) -> Result<DataTable, StoreError> {
        Ok(self.lock()?.table.clone())
    }

    /// Replaces the data table with a previously saved one
    ///
    /// Nothing is re-derived and no watcher fires. The replaced table is
    /// returned.
    ///
    /// # Errors
    ///
    /// The current table is kept if an entry names an unregistered store
    /// (`StoreError::InvalidStore`) or holds data of the wrong shape
    /// (`StoreError::ShapeMismatch`).
    pub fn attach(&self, table: DataTable) -> Result<DataTable, StoreError> {
        let mut inner = self.lock()?;
        for (store, entry) in table.iter() {
            let shape = inner.registration(store)?.shape;
            if entry.shape() != shape {
                return Err(StoreError::ShapeMismatch { store, shape });
            }
        }
        debug!(entries = table.len(), "attached data table");
        Ok(std::mem::replace(&mut inner.table, table))
    }
}

impl Default for StoreManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StoreManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("StoreManager");
        match self.inner.lock() {
            Ok(inner) => debug
                .field("stores", &inner.stores.len())
                .field("setup", &inner.setup)
                .field("table", &inner.table),
            Err(_) => debug.field("inner", &"<poisoned>"),
        };
        debug.field("config", &self.config).finish()
    }
}

/// Ends one dispatch of a store when dropped
struct DispatchGuard<'a> {
    manager: &'a StoreManager,
    slot: (ThreadId, StoreId),
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        let mut inner = match self.manager.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(active) = inner.dispatching.get_mut(&self.slot) {
            *active -= 1;
            if *active == 0 {
                inner.dispatching.remove(&self.slot);
            }
        }
    }
}
