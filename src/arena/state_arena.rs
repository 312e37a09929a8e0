// State arena - storage for reactive cells
//
// A StateCell is the whole of one reactive object's bookkeeping: the raw
// value storage, the per-key subscriber sets, and the registry of derived
// values attached to the object. The cell owns all three, so they are
// created and destroyed together.
//
// StateId is a stable integer handle into the slab; it is what the public
// `Reactive` type wraps and what gets threaded through the engine instead
// of pointers. Access through a stale id returns None and degrades to a
// no-op at the call site.

use std::cell::RefCell;
use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};
use slab::Slab;

use crate::hash::FastHashBuilder;
use crate::value::Value;

use super::SubscriberId;
use super::subscriber_arena::current_subscriber;

thread_local! {
    static STATE_ARENA: RefCell<Slab<StateCell>> = RefCell::new(Slab::new());
}

/// A tracked location inside one reactive object.
///
/// Objects are tracked per property. Arrays are tracked per index plus two
/// coordinated keys: `Len` (the length) and `All` (the array as a whole,
/// which is also the enumeration key for objects). Structural array
/// mutations trigger `Len` and `All` exactly once each instead of touching
/// every index.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) enum Key {
    /// An object property.
    Prop(Box<str>),
    /// An array element.
    Index(u32),
    /// The array length.
    Len,
    /// The whole collection (element writes, structural changes, enumeration).
    All,
}

impl Key {
    pub(crate) fn prop(name: &str) -> Self {
        Key::Prop(name.into())
    }
}

/// Raw storage owned by a cell. Nested plain containers stay inline until
/// first read, at which point they are moved into their own cell and the
/// slot is replaced by a `Value::Ref` link.
pub(crate) enum RawStorage {
    Object(IndexMap<String, Value>),
    Array(Vec<Value>),
}

impl RawStorage {
    pub(crate) fn is_array(&self) -> bool {
        matches!(self, RawStorage::Array(_))
    }

    pub(crate) fn as_object_mut(&mut self) -> Option<&mut IndexMap<String, Value>> {
        match self {
            RawStorage::Object(map) => Some(map),
            RawStorage::Array(_) => None,
        }
    }

    pub(crate) fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            RawStorage::Array(items) => Some(items),
            RawStorage::Object(_) => None,
        }
    }
}

/// Per-object bookkeeping: raw storage, dependency entries, derived registry.
pub(crate) struct StateCell {
    pub(crate) storage: RawStorage,
    /// Dependency entries: key -> subscribers whose last run read that key.
    /// IndexSet preserves registration order, which is the propagation order.
    deps: HashMap<Key, IndexSet<SubscriberId, FastHashBuilder>, FastHashBuilder>,
    /// Derived values attached to this object, by the key they are read at.
    derived: HashMap<Key, SubscriberId, FastHashBuilder>,
}

impl StateCell {
    fn new(storage: RawStorage) -> Self {
        Self {
            storage,
            deps: HashMap::default(),
            derived: HashMap::default(),
        }
    }
}

/// Stable handle for a reactive cell in the arena.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub(crate) struct StateId(u32);

impl StateId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// Read access to the cell. Returns None for a stale id.
    ///
    /// The closure must not call back into the state arena.
    pub(crate) fn with<F, R>(self, f: F) -> Option<R>
    where
        F: FnOnce(&StateCell) -> R,
    {
        STATE_ARENA.with(|arena| arena.borrow().get(self.index()).map(f))
    }

    /// Mutable access to the cell. Returns None for a stale id.
    ///
    /// The closure must not call back into the state arena and must not run
    /// user code.
    pub(crate) fn with_mut<F, R>(self, f: F) -> Option<R>
    where
        F: FnOnce(&mut StateCell) -> R,
    {
        STATE_ARENA.with(|arena| arena.borrow_mut().get_mut(self.index()).map(f))
    }

    pub(crate) fn is_live(self) -> bool {
        STATE_ARENA.with(|arena| arena.borrow().contains(self.index()))
    }

    /// Record a read of `key` against the active subscriber, if any.
    ///
    /// This is the whole of dependency capture: the subscriber is added to
    /// the key's entry here, and the `(cell, key)` pair is appended to the
    /// subscriber's own source list so re-tracking can remove it later.
    pub(crate) fn track(self, key: Key) {
        let Some(subscriber) = current_subscriber() else {
            return;
        };
        let recorded = self.with_mut(|cell| {
            cell.deps.entry(key.clone()).or_default().insert(subscriber);
        });
        if recorded.is_some() {
            subscriber.add_source(self, key);
        }
    }

    /// Snapshot the subscribers of the given keys, deduplicated, in
    /// registration order. A key with no entry contributes nothing.
    pub(crate) fn subscribers(self, keys: &[Key]) -> Vec<SubscriberId> {
        let mut ordered: IndexSet<SubscriberId, FastHashBuilder> = IndexSet::default();
        self.with(|cell| {
            for key in keys {
                if let Some(entry) = cell.deps.get(key) {
                    ordered.extend(entry.iter().copied());
                }
            }
        });
        ordered.into_iter().collect()
    }

    /// Remove one subscriber from one dependency entry (re-tracking and
    /// disposal both funnel through here). Order of the remaining
    /// subscribers is preserved.
    pub(crate) fn remove_subscriber(self, key: &Key, subscriber: SubscriberId) {
        self.with_mut(|cell| {
            if let Some(entry) = cell.deps.get_mut(key) {
                entry.shift_remove(&subscriber);
                if entry.is_empty() {
                    cell.deps.remove(key);
                }
            }
        });
    }

    /// The derived value registered at `key`, if any.
    pub(crate) fn derived_at(self, key: &Key) -> Option<SubscriberId> {
        self.with(|cell| cell.derived.get(key).copied()).flatten()
    }

    /// Register a derived value at `key`, returning the one it replaced.
    pub(crate) fn register_derived(
        self,
        key: Key,
        subscriber: SubscriberId,
    ) -> Option<SubscriberId> {
        self.with_mut(|cell| cell.derived.insert(key, subscriber))
            .flatten()
    }

    /// All derived values registered on this cell.
    pub(crate) fn derived_ids(self) -> Vec<SubscriberId> {
        self.with(|cell| cell.derived.values().copied().collect())
            .unwrap_or_default()
    }

    /// All keys that currently have a dependency entry.
    pub(crate) fn dep_keys(self) -> Vec<Key> {
        self.with(|cell| cell.deps.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Allocate a cell and return its handle.
pub(crate) fn state_arena_insert(storage: RawStorage) -> StateId {
    STATE_ARENA.with(|arena| {
        let mut arena = arena.borrow_mut();
        let entry = arena.vacant_entry();
        let key = entry.key();
        entry.insert(StateCell::new(storage));
        StateId::new(key as u32)
    })
}
