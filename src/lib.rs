//! # sovran-store
//!
//! A reactive keyed state store for GUI state, with watchers and
//! mutually-exclusive option sets.
//!
//! `sovran-store` keeps small pieces of UI state (checkbox values, the
//! selected radio button of a group, per-player settings) in stores owned by
//! a single [`StoreManager`]. Every write fans out synchronously to the
//! store's watchers, which is how widgets stay in sync with the data they
//! display.
//!
//! ## Key Features
//!
//! - **Explicit registry**: Stores are registered during a setup phase and get
//!   dense ids starting at 1
//! - **Scalar or keyed**: A store commits to holding one value or a key → value
//!   mapping when it is registered
//! - **Key serializers**: Keyed stores can accept any key type through a
//!   serializer that turns it into a string
//! - **Watchers**: Callbacks run in registration order after every mutation;
//!   one failing watcher never stops the others
//! - **Option sets**: Groups of boolean members where selecting one
//!   deselects the rest, optionally per category
//! - **Checkpointable**: The whole data table is plain JSON-compatible data
//!
//! ## Usage Examples
//!
//! ### Basic Usage
//!
//! ```rust
//! use sovran_store::{StoreError, StoreManager};
//!
//! fn main() -> Result<(), StoreError> {
//!     let manager = StoreManager::new();
//!
//!     // Register stores during setup
//!     let scores = manager.register_keyed::<u32>()?;
//!     let theme = manager.register_scalar::<String>()?;
//!     manager.finish_setup()?;
//!
//!     scores.set(&manager, "alice", 10)?;
//!     scores.set(&manager, "bob", 5)?;
//!     theme.set(&manager, "dark".to_string())?;
//!
//!     assert_eq!(scores.get(&manager, "alice")?, Some(10));
//!     assert_eq!(scores.get_all(&manager)?.len(), 2);
//!
//!     scores.clear(&manager, "alice")?;
//!     assert_eq!(scores.get(&manager, "alice")?, None);
//!
//!     Ok(())
//! }
//! ```
//!
//! ### Watching a Store
//!
//! ```rust
//! use sovran_store::{StoreError, StoreManager};
//! use std::sync::{Arc, Mutex};
//!
//! fn main() -> Result<(), StoreError> {
//!     let manager = StoreManager::new();
//!     let scores = manager.register_keyed::<u32>()?;
//!
//!     let seen = Arc::new(Mutex::new(Vec::new()));
//!     let log = Arc::clone(&seen);
//!     scores.watch(&manager, move |_, value, key| {
//!         log.lock().unwrap().push((key.map(str::to_string), value.copied()));
//!         Ok(())
//!     })?;
//!
//!     scores.set(&manager, "alice", 10)?;
//!     scores.update(&manager, "alice", |value| value.map(|v| *v + 1))?;
//!     scores.clear(&manager, "alice")?;
//!
//!     let seen = seen.lock().unwrap();
//!     assert_eq!(seen[0], (Some("alice".to_string()), Some(10)));
//!     assert_eq!(seen[1], (Some("alice".to_string()), Some(11)));
//!     assert_eq!(seen[2], (Some("alice".to_string()), None));
//!     Ok(())
//! }
//! ```
//!
//! ### Option Sets
//!
//! ```rust
//! use sovran_store::{ElementKind, GuiElement, OptionSets, StoreError, StoreManager};
//!
//! #[derive(Clone)]
//! struct Radio(&'static str);
//!
//! impl GuiElement for Radio {
//!     fn name(&self) -> String { self.0.to_string() }
//!     fn kind(&self) -> ElementKind { ElementKind::RadioButton }
//!     fn children(&self) -> Vec<Self> { Vec::new() }
//!     fn set_state(&self, _state: bool) {}
//! }
//!
//! fn main() -> Result<(), StoreError> {
//!     let manager = StoreManager::new();
//!     let mut sets = OptionSets::<Radio>::new();
//!
//!     sets.new_option_set(&manager, "difficulty", |_, _, _| Ok(()))?;
//!     let easy = sets.add_as_option(&manager, "easy", "difficulty", None)?;
//!     let hard = sets.add_as_option(&manager, "hard", "difficulty", None)?;
//!     manager.finish_setup()?;
//!
//!     easy.set(&manager, None, true)?;
//!     sets.handle_state_changed(&manager, &Radio("hard"), true)?;
//!
//!     assert!(!easy.get(&manager, None)?);
//!     assert!(hard.get(&manager, None)?);
//!     Ok(())
//! }
//! ```
//!
//! ### Error Handling
//!
//! ```rust
//! use sovran_store::{RawKey, StoreError, StoreId, StoreManager};
//!
//! let manager = StoreManager::new();
//! let scores = manager.register_keyed::<u32>().unwrap();
//!
//! // Ids the manager never issued are rejected
//! match manager.get(StoreId::new(42), None) {
//!     Err(StoreError::InvalidStore(raw)) => assert_eq!(raw, 42),
//!     other => panic!("unexpected: {:?}", other),
//! }
//!
//! // Non-string keys need a serializer
//! match manager.validate(scores.id(), Some(RawKey::Other(&7u32))) {
//!     Err(StoreError::InvalidKey { .. }) => {}
//!     other => panic!("unexpected: {:?}", other),
//! }
//! ```

mod config;
mod error;
mod key;
mod manager;
pub mod options;
mod table;
mod typed;

pub use config::{Reentrancy, StoreConfig};
pub use error::{BoxError, StoreError};
pub use key::{KeySerializer, RawKey, Shape, StoreId, StoreKey};
pub use manager::{StoreManager, WatchResult, WatcherId};
pub use options::{ElementKind, GuiElement, OptionMember, OptionSet, OptionSets, Recursion};
pub use table::{DataTable, Entry};
pub use typed::{KeyedStore, ScalarStore};
