use crate::key::{Shape, StoreId};
use std::fmt;

/// Boxed error returned by watchers, serializers and option-set callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur when using a StoreManager
#[derive(Debug)]
pub enum StoreError {
    /// The id was never issued by this manager
    InvalidStore(u32),
    /// A key was supplied that the store cannot accept
    InvalidKey { store: StoreId, reason: String },
    /// The store's key serializer failed or rejected the key
    Serializer { store: StoreId, cause: String },
    /// One or more watchers failed; every failure of the batch is listed
    Watcher { store: StoreId, failures: Vec<String> },
    /// `register` was called after the setup phase ended
    RegistrationTiming,
    /// A keyed operation hit a scalar store, or the reverse
    ShapeMismatch { store: StoreId, shape: Shape },
    /// A store was mutated from inside its own watcher dispatch
    Reentrant(StoreId),
    /// A typed value could not be converted to or from its stored form
    Codec { store: StoreId, cause: String },
    /// The option set has no member with this option name
    UnknownOption { set: String, option: String },
    /// An option set, member or option name is already taken
    Duplicate(String),
    /// No option set or member is registered under this name
    UnknownMember(String),
    /// Failed to acquire lock on the manager
    LockError,
}

impl StoreError {
    /// Returns the store the error refers to, if any
    pub fn store(&self) -> Option<StoreId> {
        match self {
            StoreError::InvalidKey { store, .. }
            | StoreError::Serializer { store, .. }
            | StoreError::Watcher { store, .. }
            | StoreError::ShapeMismatch { store, .. }
            | StoreError::Codec { store, .. } => Some(*store),
            StoreError::Reentrant(store) => Some(*store),
            _ => None,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreError::InvalidStore(raw) => write!(f, "Invalid store id {}", raw),
            StoreError::InvalidKey { store, reason } => {
                write!(f, "Invalid key for {}: {}", store, reason)
            }
            StoreError::Serializer { store, cause } => {
                write!(f, "Key serializer for {} failed: {}", store, cause)
            }
            StoreError::Watcher { store, failures } => write!(
                f,
                "{} watcher(s) of {} failed: {}",
                failures.len(),
                store,
                failures.join("; ")
            ),
            StoreError::RegistrationTiming => {
                write!(f, "Stores can only be registered during setup")
            }
            StoreError::ShapeMismatch { store, shape } => {
                write!(f, "{} is a {} store", store, shape)
            }
            StoreError::Reentrant(store) => {
                write!(f, "{} was mutated from inside its own watchers", store)
            }
            StoreError::Codec { store, cause } => {
                write!(f, "Value conversion for {} failed: {}", store, cause)
            }
            StoreError::UnknownOption { set, option } => {
                write!(f, "Option set '{}' has no option '{}'", set, option)
            }
            StoreError::Duplicate(name) => write!(f, "'{}' is already registered", name),
            StoreError::UnknownMember(name) => write!(f, "Nothing registered as '{}'", name),
            StoreError::LockError => write!(f, "Failed to acquire lock"),
        }
    }
}

impl std::error::Error for StoreError {}
