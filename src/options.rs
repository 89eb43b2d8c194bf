//! Mutually exclusive option sets built on top of stores.
//!
//! An option set is a store whose value is the name of the selected option.
//! Each member of the set owns a boolean store. Whenever the set's value
//! changes, its watcher rewrites every member's boolean to
//! `member == selected` and then calls the set's callback, so at most one
//! member per category reads `true`.
//!
//! With a categorize function the set and its members are keyed stores,
//! one independent selection per category (a player, a force, ...).
//! Without one they are scalar stores shared by everyone.

use crate::error::StoreError;
use crate::key::{RawKey, Shape, StoreId};
use crate::manager::{StoreManager, WatchResult, WatcherId};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// The kind of a host GUI element, as far as option sets care
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementKind {
    RadioButton,
    Checkbox,
    Other,
}

/// A host GUI element handle
///
/// Handles are expected to be cheap to clone and to refer to the same
/// underlying element, so `set_state` takes `&self`.
pub trait GuiElement: Sized {
    fn name(&self) -> String;

    fn kind(&self) -> ElementKind;

    /// Elements can be destroyed by the host while handles are still around
    fn is_valid(&self) -> bool {
        true
    }

    fn children(&self) -> Vec<Self>;

    /// Sets the visual checked state
    fn set_state(&self, state: bool);
}

/// How far [`OptionSets::reset_all`] descends below the root element
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Recursion {
    /// Only the root's direct children
    #[default]
    None,
    Unlimited,
    /// At most this many levels below the root's children
    Depth(u32),
}

impl Recursion {
    fn descend(self) -> Option<Recursion> {
        match self {
            Recursion::None | Recursion::Depth(0) => None,
            Recursion::Unlimited => Some(Recursion::Unlimited),
            Recursion::Depth(n) => Some(Recursion::Depth(n - 1)),
        }
    }
}

impl From<bool> for Recursion {
    fn from(recursive: bool) -> Self {
        if recursive {
            Recursion::Unlimited
        } else {
            Recursion::None
        }
    }
}

#[derive(Clone, Debug)]
struct MemberSlot {
    option: String,
    store: StoreId,
}

/// Handle to a registered option set
#[derive(Clone)]
pub struct OptionSet {
    name: String,
    store: StoreId,
    shape: Shape,
    members: Arc<Mutex<Vec<MemberSlot>>>,
}

impl fmt::Debug for OptionSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OptionSet")
            .field("name", &self.name)
            .field("store", &self.store)
            .field("shape", &self.shape)
            .finish()
    }
}

impl OptionSet {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The store holding the selected option name
    pub fn store_id(&self) -> StoreId {
        self.store
    }

    pub fn is_categorized(&self) -> bool {
        self.shape == Shape::Keyed
    }

    /// Option names in the order members were added
    pub fn options(&self) -> Result<Vec<String>, StoreError> {
        let members = self.members.lock().map_err(|_| StoreError::LockError)?;
        Ok(members.iter().map(|slot| slot.option.clone()).collect())
    }

    /// Selects `option` for `category`, driving every other member to false
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnknownOption` if no member carries `option`.
    pub fn select(
        &self,
        manager: &StoreManager,
        category: Option<&str>,
        option: &str,
    ) -> Result<(), StoreError> {
        if !self.options()?.iter().any(|known| known == option) {
            return Err(StoreError::UnknownOption {
                set: self.name.clone(),
                option: option.to_string(),
            });
        }
        manager.set(
            self.store,
            category.map(RawKey::Str),
            Value::String(option.to_string()),
        )
    }

    pub fn selected(
        &self,
        manager: &StoreManager,
        category: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        Ok(manager
            .get(self.store, category.map(RawKey::Str))?
            .and_then(|value| value.as_str().map(str::to_string)))
    }

    /// Deselects everything in `category`; every member reads false afterwards
    pub fn clear(&self, manager: &StoreManager, category: Option<&str>) -> Result<(), StoreError> {
        manager.clear(self.store, category.map(RawKey::Str))
    }

    fn slots(&self) -> Result<Vec<MemberSlot>, StoreError> {
        Ok(self
            .members
            .lock()
            .map_err(|_| StoreError::LockError)?
            .clone())
    }
}

/// One member of an option set, usable like a boolean store
///
/// Reads come from the member's own boolean. Writing `true` selects the
/// member through its set; writing `false` deselects the whole category if
/// this member was the selected one, and otherwise only clears its own flag.
#[derive(Clone, Debug)]
pub struct OptionMember {
    name: String,
    option: String,
    store: StoreId,
    set: OptionSet,
}

impl OptionMember {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn option(&self) -> &str {
        &self.option
    }

    pub fn store_id(&self) -> StoreId {
        self.store
    }

    pub fn option_set(&self) -> &OptionSet {
        &self.set
    }

    /// Returns the member's state; unset reads as false
    pub fn get(&self, manager: &StoreManager, category: Option<&str>) -> Result<bool, StoreError> {
        Ok(manager
            .get(self.store, category.map(RawKey::Str))?
            .and_then(|value| value.as_bool())
            .unwrap_or(false))
    }

    pub fn set(
        &self,
        manager: &StoreManager,
        category: Option<&str>,
        state: bool,
    ) -> Result<(), StoreError> {
        if state {
            return self.set.select(manager, category, &self.option);
        }
        if self.set.selected(manager, category)?.as_deref() == Some(self.option.as_str()) {
            self.set.clear(manager, category)
        } else {
            manager.set(self.store, category.map(RawKey::Str), Value::Bool(false))
        }
    }

    /// Watches the member's own boolean, e.g. to refresh its widget
    pub fn watch<F>(&self, manager: &StoreManager, watcher: F) -> Result<WatcherId, StoreError>
    where
        F: Fn(&StoreManager, bool, Option<&str>) -> WatchResult + Send + Sync + 'static,
    {
        manager.watch(self.store, move |manager, value, category| {
            watcher(
                manager,
                value.and_then(Value::as_bool).unwrap_or(false),
                category,
            )
        })
    }
}

type Categorize<E> = Box<dyn Fn(&E) -> String>;

struct RegisteredSet<E> {
    set: OptionSet,
    categorize: Option<Categorize<E>>,
}

/// Registry of option sets and their members, keyed by name
///
/// Members are looked up by the name of the GUI element they back, which
/// is how host events and [`reset_all`](OptionSets::reset_all) find them.
pub struct OptionSets<E> {
    sets: HashMap<String, RegisteredSet<E>>,
    members: HashMap<String, OptionMember>,
}

impl<E> Default for OptionSets<E> {
    fn default() -> Self {
        Self {
            sets: HashMap::new(),
            members: HashMap::new(),
        }
    }
}

impl<E> fmt::Debug for OptionSets<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut sets: Vec<&String> = self.sets.keys().collect();
        sets.sort();
        let mut members: Vec<&String> = self.members.keys().collect();
        members.sort();
        f.debug_struct("OptionSets")
            .field("sets", &sets)
            .field("members", &members)
            .finish()
    }
}

impl<E: GuiElement + 'static> OptionSets<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an option set shared by every player
    ///
    /// `callback` receives the selected option (`None` once deselected) and
    /// the category, after all member booleans have been rewritten.
    pub fn new_option_set<F>(
        &mut self,
        manager: &StoreManager,
        name: &str,
        callback: F,
    ) -> Result<OptionSet, StoreError>
    where
        F: Fn(&StoreManager, Option<&str>, Option<&str>) -> WatchResult + Send + Sync + 'static,
    {
        self.insert_set(manager, name, callback, None)
    }

    /// Registers an option set with one independent selection per category
    ///
    /// `categorize` maps the element an event came from to its category.
    pub fn new_categorized_option_set<F, C>(
        &mut self,
        manager: &StoreManager,
        name: &str,
        callback: F,
        categorize: C,
    ) -> Result<OptionSet, StoreError>
    where
        F: Fn(&StoreManager, Option<&str>, Option<&str>) -> WatchResult + Send + Sync + 'static,
        C: Fn(&E) -> String + 'static,
    {
        self.insert_set(manager, name, callback, Some(Box::new(categorize)))
    }

    fn insert_set<F>(
        &mut self,
        manager: &StoreManager,
        name: &str,
        callback: F,
        categorize: Option<Categorize<E>>,
    ) -> Result<OptionSet, StoreError>
    where
        F: Fn(&StoreManager, Option<&str>, Option<&str>) -> WatchResult + Send + Sync + 'static,
    {
        if self.sets.contains_key(name) {
            return Err(StoreError::Duplicate(name.to_string()));
        }
        let shape = if categorize.is_some() {
            Shape::Keyed
        } else {
            Shape::Scalar
        };
        let set = OptionSet {
            name: name.to_string(),
            store: manager.register(shape, None)?,
            shape,
            members: Arc::new(Mutex::new(Vec::new())),
        };

        let watched = set.clone();
        manager.watch(set.store, move |manager, value, category| {
            let selected = value.and_then(Value::as_str);
            let mut failures = Vec::new();
            for slot in watched.slots()? {
                let written = match (watched.shape, category) {
                    // The whole keyed set was cleared.
                    (Shape::Keyed, None) => manager.clear(slot.store, None),
                    (_, category) => manager.set(
                        slot.store,
                        category.map(RawKey::Str),
                        Value::Bool(selected == Some(slot.option.as_str())),
                    ),
                };
                if let Err(err) = written {
                    failures.push(err.to_string());
                }
            }
            if let Err(err) = callback(manager, selected, category) {
                failures.push(err.to_string());
            }
            if failures.is_empty() {
                Ok(())
            } else {
                Err(failures.join("; ").into())
            }
        })?;

        debug!(set = name, store = set.store.get(), %shape, "registered option set");
        self.sets.insert(
            name.to_string(),
            RegisteredSet {
                set: set.clone(),
                categorize,
            },
        );
        Ok(set)
    }

    /// Adds the element named `member` to an option set
    ///
    /// The member gets its own boolean store shaped like the set's store,
    /// and shares the set's categorize function. `option` defaults to the
    /// member name.
    ///
    /// # Errors
    ///
    /// - `StoreError::UnknownMember` if no set is named `set`
    /// - `StoreError::Duplicate` if the member or option name is taken
    /// - `StoreError::RegistrationTiming` outside the setup phase
    pub fn add_as_option(
        &mut self,
        manager: &StoreManager,
        member: &str,
        set: &str,
        option: Option<&str>,
    ) -> Result<OptionMember, StoreError> {
        let registered = self
            .sets
            .get(set)
            .ok_or_else(|| StoreError::UnknownMember(set.to_string()))?;
        let option = option.unwrap_or(member);
        if self.members.contains_key(member) {
            return Err(StoreError::Duplicate(member.to_string()));
        }
        if registered.set.options()?.iter().any(|known| known == option) {
            return Err(StoreError::Duplicate(format!("{}/{}", set, option)));
        }

        let store = manager.register(registered.set.shape, None)?;
        registered
            .set
            .members
            .lock()
            .map_err(|_| StoreError::LockError)?
            .push(MemberSlot {
                option: option.to_string(),
                store,
            });
        let added = OptionMember {
            name: member.to_string(),
            option: option.to_string(),
            store,
            set: registered.set.clone(),
        };
        self.members.insert(member.to_string(), added.clone());
        Ok(added)
    }

    pub fn option_set(&self, name: &str) -> Option<&OptionSet> {
        self.sets.get(name).map(|registered| &registered.set)
    }

    pub fn member(&self, name: &str) -> Option<&OptionMember> {
        self.members.get(name)
    }

    /// Returns the category of `element` under the member's set, if the set
    /// is categorized
    pub fn category_of(&self, member: &OptionMember, element: &E) -> Option<String> {
        self.sets
            .get(member.set.name())
            .and_then(|registered| registered.categorize.as_ref())
            .map(|categorize| categorize(element))
    }

    /// Applies a host "state changed" event for a radio button or checkbox
    ///
    /// Returns false if the element is not a registered member.
    pub fn handle_state_changed(
        &self,
        manager: &StoreManager,
        element: &E,
        state: bool,
    ) -> Result<bool, StoreError> {
        let Some(member) = self.members.get(&element.name()) else {
            return Ok(false);
        };
        let category = self.category_of(member, element);
        member.set(manager, category.as_deref(), state)?;
        Ok(true)
    }

    /// Unchecks every radio button below `root`
    ///
    /// Radio buttons named in `exclude` are checked instead. Registered
    /// members are written through their stores, anything else through
    /// [`GuiElement::set_state`]. Non-radio children are searched as far as
    /// `recursion` allows; invalid elements are skipped.
    pub fn reset_all(
        &self,
        manager: &StoreManager,
        root: &E,
        exclude: &[&str],
        recursion: Recursion,
    ) -> Result<(), StoreError> {
        if !root.is_valid() {
            return Ok(());
        }
        for child in root.children() {
            if !child.is_valid() {
                continue;
            }
            if child.kind() == ElementKind::RadioButton {
                let name = child.name();
                let state = exclude.contains(&name.as_str());
                match self.members.get(&name) {
                    Some(member) => {
                        let category = self.category_of(member, &child);
                        member.set(manager, category.as_deref(), state)?;
                    }
                    None => child.set_state(state),
                }
            } else if let Some(next) = recursion.descend() {
                self.reset_all(manager, &child, exclude, next)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_counts_down_to_no_recursion() {
        assert_eq!(Recursion::Depth(2).descend(), Some(Recursion::Depth(1)));
        assert_eq!(Recursion::Depth(0).descend(), None);
        assert_eq!(Recursion::None.descend(), None);
        assert_eq!(Recursion::from(true).descend(), Some(Recursion::Unlimited));
    }
}
