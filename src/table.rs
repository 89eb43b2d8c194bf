use crate::key::{Shape, StoreId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One store's data: a single value or a key → value mapping
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "data", rename_all = "lowercase")]
pub enum Entry {
    Scalar(Value),
    Keyed(BTreeMap<String, Value>),
}

impl Entry {
    pub fn shape(&self) -> Shape {
        match self {
            Entry::Scalar(_) => Shape::Scalar,
            Entry::Keyed(_) => Shape::Keyed,
        }
    }
}

/// The data of every store, indexed by store id
///
/// This is the only part of a manager that outlives the process: hosts
/// checkpoint it with [`StoreManager::snapshot`](crate::StoreManager::snapshot)
/// and hand it back with [`StoreManager::attach`](crate::StoreManager::attach).
///
/// ```
/// use sovran_store::DataTable;
///
/// let table: DataTable = serde_json::from_str(
///     r#"{"1":{"shape":"keyed","data":{"alice":10}}}"#,
/// ).unwrap();
/// assert_eq!(table.len(), 1);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataTable {
    entries: BTreeMap<StoreId, Entry>,
}

impl DataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, store: StoreId) -> Option<&Entry> {
        self.entries.get(&store)
    }

    /// Iterates entries in store id order
    pub fn iter(&self) -> impl Iterator<Item = (StoreId, &Entry)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    /// Reads a scalar, a single keyed value, or a whole mapping
    pub(crate) fn read(&self, store: StoreId, key: Option<&str>) -> Option<Value> {
        match (self.entries.get(&store)?, key) {
            (Entry::Scalar(value), None) => Some(value.clone()),
            (Entry::Keyed(map), Some(key)) => map.get(key).cloned(),
            (Entry::Keyed(map), None) => Some(Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            )),
            (Entry::Scalar(_), Some(_)) => None,
        }
    }

    /// Stores a scalar, or one keyed value
    ///
    /// A keyed write over a scalar entry replaces the entry with a fresh
    /// mapping; the write always lands.
    pub(crate) fn write(&mut self, store: StoreId, key: Option<&str>, value: Value) {
        let Some(key) = key else {
            self.entries.insert(store, Entry::Scalar(value));
            return;
        };
        let entry = self
            .entries
            .entry(store)
            .or_insert_with(|| Entry::Keyed(BTreeMap::new()));
        if let Entry::Scalar(_) = entry {
            *entry = Entry::Keyed(BTreeMap::new());
        }
        if let Entry::Keyed(map) = entry {
            map.insert(key.to_string(), value);
        }
    }

    /// Removes a key, or the whole entry when `key` is `None`
    ///
    /// A keyed entry whose last key goes away is dropped from the table.
    pub(crate) fn remove(&mut self, store: StoreId, key: Option<&str>) -> bool {
        let Some(key) = key else {
            return self.entries.remove(&store).is_some();
        };
        let Some(Entry::Keyed(map)) = self.entries.get_mut(&store) else {
            return false;
        };
        let removed = map.remove(key).is_some();
        if map.is_empty() {
            self.entries.remove(&store);
        }
        removed
    }

    pub(crate) fn keys(&self, store: StoreId) -> Vec<String> {
        match self.entries.get(&store) {
            Some(Entry::Keyed(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }
}
