use crate::error::{BoxError, StoreError};
use crate::key::{KeySerializer, Shape, StoreId, StoreKey};
use crate::manager::{StoreManager, WatchResult, WatcherId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

fn encode<V: Serialize>(store: StoreId, value: &V) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Codec {
        store,
        cause: e.to_string(),
    })
}

fn decode<V: DeserializeOwned>(store: StoreId, value: Value) -> Result<V, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Codec {
        store,
        cause: e.to_string(),
    })
}

impl StoreManager {
    /// Registers a store holding a single value of type `V`
    pub fn register_scalar<V>(&self) -> Result<ScalarStore<V>, StoreError>
    where
        V: Serialize + DeserializeOwned + 'static,
    {
        Ok(ScalarStore::from_id(self.register(Shape::Scalar, None)?))
    }

    /// Registers a store mapping string keys to values of type `V`
    pub fn register_keyed<V>(&self) -> Result<KeyedStore<str, V>, StoreError>
    where
        V: Serialize + DeserializeOwned + 'static,
    {
        Ok(KeyedStore::from_id(self.register(Shape::Keyed, None)?))
    }

    /// Registers a keyed store whose keys of type `K` are turned into strings
    /// by `serializer`
    ///
    /// ```
    /// use sovran_store::{StoreError, StoreManager};
    ///
    /// let manager = StoreManager::new();
    /// let by_player = manager
    ///     .register_keyed_with::<u32, i64, _, _>(|index| Ok::<_, StoreError>(format!("player-{}", index)))?;
    ///
    /// by_player.set(&manager, &7, 120)?;
    /// assert_eq!(by_player.keys(&manager)?, vec!["player-7"]);
    /// # Ok::<(), StoreError>(())
    /// ```
    pub fn register_keyed_with<K, V, F, E>(
        &self,
        serializer: F,
    ) -> Result<KeyedStore<K, V>, StoreError>
    where
        K: StoreKey,
        V: Serialize + DeserializeOwned + 'static,
        F: Fn(&K) -> Result<String, E> + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
    {
        let serializer = KeySerializer::new(serializer);
        Ok(KeyedStore::from_id(
            self.register(Shape::Keyed, Some(serializer))?,
        ))
    }
}

/// Typed handle to a scalar store
///
/// The handle is only an id plus a value type; the data lives in the
/// [`StoreManager`] passed to every call.
pub struct ScalarStore<V> {
    id: StoreId,
    _marker: PhantomData<fn() -> V>,
}

impl<V> Clone for ScalarStore<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for ScalarStore<V> {}

impl<V> fmt::Debug for ScalarStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("ScalarStore").field(&self.id).finish()
    }
}

impl<V> ScalarStore<V>
where
    V: Serialize + DeserializeOwned + 'static,
{
    /// Wraps an id issued for a scalar store
    pub fn from_id(id: StoreId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    pub fn get(&self, manager: &StoreManager) -> Result<Option<V>, StoreError> {
        manager
            .get(self.id, None)?
            .map(|value| decode(self.id, value))
            .transpose()
    }

    pub fn set(&self, manager: &StoreManager, value: V) -> Result<(), StoreError> {
        manager.set(self.id, None, encode(self.id, &value)?)
    }

    pub fn clear(&self, manager: &StoreManager) -> Result<(), StoreError> {
        manager.clear(self.id, None)
    }

    /// Replaces the value with what `updater` returns, or keeps its in-place edits
    pub fn update<F>(&self, manager: &StoreManager, updater: F) -> Result<Option<V>, StoreError>
    where
        F: FnOnce(Option<&mut V>) -> Option<V>,
    {
        let id = self.id;
        manager
            .update_with(id, None, |current| apply_update(id, current, updater))?
            .map(|value| decode(id, value))
            .transpose()
    }

    pub fn watch<F>(&self, manager: &StoreManager, watcher: F) -> Result<WatcherId, StoreError>
    where
        F: Fn(&StoreManager, Option<&V>) -> WatchResult + Send + Sync + 'static,
    {
        let id = self.id;
        manager.watch(id, move |manager, value, _| {
            let value: Option<V> = value.map(|v| decode(id, v.clone())).transpose()?;
            watcher(manager, value.as_ref())
        })
    }
}

/// Typed handle to a keyed store with keys of type `K`
///
/// `K = str` for plain string keys, anything else through the serializer
/// given at registration.
pub struct KeyedStore<K: ?Sized, V> {
    id: StoreId,
    _marker: PhantomData<fn(&K) -> V>,
}

impl<K: ?Sized, V> Clone for KeyedStore<K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: ?Sized, V> Copy for KeyedStore<K, V> {}

impl<K: ?Sized, V> fmt::Debug for KeyedStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("KeyedStore").field(&self.id).finish()
    }
}

impl<K, V> KeyedStore<K, V>
where
    K: StoreKey + ?Sized,
    V: Serialize + DeserializeOwned + 'static,
{
    /// Wraps an id issued for a keyed store
    pub fn from_id(id: StoreId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    pub fn get(&self, manager: &StoreManager, key: &K) -> Result<Option<V>, StoreError> {
        manager
            .get(self.id, Some(key.raw_key()))?
            .map(|value| decode(self.id, value))
            .transpose()
    }

    /// Returns every key and value held by the store
    pub fn get_all(&self, manager: &StoreManager) -> Result<BTreeMap<String, V>, StoreError> {
        match manager.get(self.id, None)? {
            Some(Value::Object(map)) => map
                .into_iter()
                .map(|(key, value)| decode(self.id, value).map(|value| (key, value)))
                .collect(),
            _ => Ok(BTreeMap::new()),
        }
    }

    pub fn keys(&self, manager: &StoreManager) -> Result<Vec<String>, StoreError> {
        manager.keys(self.id)
    }

    pub fn set(&self, manager: &StoreManager, key: &K, value: V) -> Result<(), StoreError> {
        manager.set(self.id, Some(key.raw_key()), encode(self.id, &value)?)
    }

    pub fn clear(&self, manager: &StoreManager, key: &K) -> Result<(), StoreError> {
        manager.clear(self.id, Some(key.raw_key()))
    }

    /// Removes every key
    pub fn clear_all(&self, manager: &StoreManager) -> Result<(), StoreError> {
        manager.clear(self.id, None)
    }

    pub fn update<F>(
        &self,
        manager: &StoreManager,
        key: &K,
        updater: F,
    ) -> Result<Option<V>, StoreError>
    where
        F: FnOnce(Option<&mut V>) -> Option<V>,
    {
        let id = self.id;
        manager
            .update_with(id, Some(key.raw_key()), |current| {
                apply_update(id, current, updater)
            })?
            .map(|value| decode(id, value))
            .transpose()
    }

    /// Runs `updater` over every stored key; see [`StoreManager::map`]
    pub fn map<F>(&self, manager: &StoreManager, mut updater: F) -> Result<(), StoreError>
    where
        F: FnMut(&str, &mut V) -> Option<V>,
    {
        let id = self.id;
        manager.map_with(id, |key, value| {
            let mut value: V = decode(id, value)?;
            if let Some(replaced) = updater(key, &mut value) {
                value = replaced;
            }
            encode(id, &value)
        })
    }

    pub fn watch<F>(&self, manager: &StoreManager, watcher: F) -> Result<WatcherId, StoreError>
    where
        F: Fn(&StoreManager, Option<&V>, Option<&str>) -> WatchResult + Send + Sync + 'static,
    {
        let id = self.id;
        manager.watch(id, move |manager, value, key| {
            let value: Option<V> = value.map(|v| decode(id, v.clone())).transpose()?;
            watcher(manager, value.as_ref(), key)
        })
    }
}

fn apply_update<V, F>(
    store: StoreId,
    current: Option<Value>,
    updater: F,
) -> Result<Option<Value>, StoreError>
where
    V: Serialize + DeserializeOwned + 'static,
    F: FnOnce(Option<&mut V>) -> Option<V>,
{
    let mut current: Option<V> = current.map(|value| decode(store, value)).transpose()?;
    let replaced = updater(current.as_mut());
    replaced
        .or(current)
        .map(|value| encode(store, &value))
        .transpose()
}
