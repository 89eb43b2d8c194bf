use crate::error::BoxError;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Identifier of a registered store
///
/// Ids are issued by [`StoreManager::register`](crate::StoreManager::register)
/// starting at 1, in registration order. A raw id can be rebuilt with
/// [`StoreId::new`] (for example after restoring a saved table); the manager
/// rejects it with `InvalidStore` unless it was actually issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(u32);

impl StoreId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "store #{}", self.0)
    }
}

/// The data shape a store commits to when it is registered
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    /// One value, no keys
    Scalar,
    /// A mapping from string keys to values
    Keyed,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Shape::Scalar => write!(f, "scalar"),
            Shape::Keyed => write!(f, "keyed"),
        }
    }
}

/// A key as seen by validation: either already a string, or an arbitrary
/// value that needs the store's serializer
#[derive(Clone, Copy)]
pub enum RawKey<'a> {
    Str(&'a str),
    Other(&'a dyn Any),
}

impl fmt::Debug for RawKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RawKey::Str(s) => f.debug_tuple("Str").field(s).finish(),
            RawKey::Other(_) => f.write_str("Other(..)"),
        }
    }
}

impl<'a> From<&'a str> for RawKey<'a> {
    fn from(value: &'a str) -> Self {
        RawKey::Str(value)
    }
}

impl<'a> From<&'a String> for RawKey<'a> {
    fn from(value: &'a String) -> Self {
        RawKey::Str(value.as_str())
    }
}

/// Types usable as keys of a [`KeyedStore`](crate::KeyedStore)
///
/// String types pass through validation untouched. Anything else is handed
/// to the store's serializer:
///
/// ```
/// use sovran_store::{RawKey, StoreKey};
///
/// struct PlayerIndex(u32);
///
/// impl StoreKey for PlayerIndex {
///     fn raw_key(&self) -> RawKey<'_> {
///         RawKey::Other(self)
///     }
/// }
/// ```
pub trait StoreKey: Any {
    fn raw_key(&self) -> RawKey<'_>;
}

impl StoreKey for str {
    fn raw_key(&self) -> RawKey<'_> {
        RawKey::Str(self)
    }
}

impl StoreKey for String {
    fn raw_key(&self) -> RawKey<'_> {
        RawKey::Str(self)
    }
}

macro_rules! other_key {
    ($($ty:ty),*) => {
        $(impl StoreKey for $ty {
            fn raw_key(&self) -> RawKey<'_> {
                RawKey::Other(self)
            }
        })*
    };
}

other_key!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, bool, char);

/// A type-erased key serializer held by the registry
#[derive(Clone)]
pub struct KeySerializer {
    func: Arc<dyn Fn(&dyn Any) -> Result<String, BoxError> + Send + Sync>,
}

impl KeySerializer {
    /// Wraps a serializer for keys of type `K`
    ///
    /// A key of any other concrete type is rejected when the serializer runs.
    pub fn new<K, F, E>(f: F) -> Self
    where
        K: Any,
        F: Fn(&K) -> Result<String, E> + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
    {
        Self {
            func: Arc::new(move |key: &dyn Any| -> Result<String, BoxError> {
                match key.downcast_ref::<K>() {
                    Some(key) => f(key).map_err(Into::into),
                    None => Err(format!(
                        "serializer expects keys of type {}",
                        std::any::type_name::<K>()
                    )
                    .into()),
                }
            }),
        }
    }

    pub(crate) fn serialize(&self, key: &dyn Any) -> Result<String, BoxError> {
        (self.func)(key)
    }
}

impl fmt::Debug for KeySerializer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("KeySerializer(..)")
    }
}
