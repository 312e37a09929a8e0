//! Reactive wrapper factory and the array mutation adapter.
//!
//! [`Reactive`] is the handle for one reactive object: a stable integer id
//! into the state arena, threaded through the API instead of a pointer.
//! Reads record dependencies against the active subscriber; writes route
//! the written keys' subscribers through the scheduler.
//!
//! Deep reactivity is lazy and cached: a nested plain object stays inline
//! in its parent's raw storage until the first read, at which point it is
//! moved into a cell of its own and the slot is replaced by a
//! [`Value::Ref`] link. Every later read returns that same link, so two
//! reads of the same nested field compare equal and share dependency
//! state, and a cell stored under two parents is one cell, not two copies.
//!
//! Array mutations that shift many elements (`push`, `shift`, `splice`,
//! `sort_by`, ...) are one coordinated change: they trigger the length key
//! once and the whole-array key once, never one notification per element.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::arena::{Key, RawStorage, StateId, state_arena_insert};
use crate::computed;
use crate::error::ReactiveError;
use crate::scheduler::{self, propagate};
use crate::value::Value;

/// Handle for a reactive object or array.
///
/// Copyable and cheap; identity (`==`) is cell identity. All methods
/// degrade gracefully on a stale handle: reads yield [`Value::Null`],
/// writes are dropped, fallible operations return
/// [`ReactiveError::StaleHandle`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Reactive {
    id: StateId,
}

/// Addresses one slot in a cell's raw storage.
#[derive(Copy, Clone)]
enum Slot<'a> {
    Prop(&'a str),
    Index(usize),
}

impl Reactive {
    /// Wrap a plain object or array.
    ///
    /// Wrapping is idempotent: a [`Value::Ref`] comes back as the handle it
    /// already is. Scalars are not wrappable and are a synchronous misuse
    /// error.
    pub fn new(value: Value) -> Result<Reactive, ReactiveError> {
        match value {
            Value::Ref(handle) => Ok(handle),
            Value::Object(map) => Ok(Self::from_cell(state_arena_insert(RawStorage::Object(map)))),
            Value::Array(items) => {
                Ok(Self::from_cell(state_arena_insert(RawStorage::Array(items))))
            }
            _ => Err(ReactiveError::NotWrappable),
        }
    }

    pub(crate) fn from_cell(id: StateId) -> Self {
        Self { id }
    }

    pub(crate) fn id(self) -> StateId {
        self.id
    }

    /// Whether the handle still points at a live cell.
    pub fn is_live(self) -> bool {
        self.id.is_live()
    }

    /// Whether this handle wraps an array.
    pub fn is_array(self) -> bool {
        self.id
            .with(|cell| cell.storage.is_array())
            .unwrap_or(false)
    }

    /// Whether this handle wraps an object.
    pub fn is_object(self) -> bool {
        self.id
            .with(|cell| !cell.storage.is_array())
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Object reads
    // ------------------------------------------------------------------

    /// Read a property.
    ///
    /// Records the dependency against the active subscriber, resolves a
    /// derived value registered at `key` if there is one, and lazily wraps
    /// a nested plain container before returning it. A missing key reads as
    /// [`Value::Null`] - and is still tracked, so an effect that branched
    /// on the key's absence re-runs when the key appears.
    pub fn get(&self, key: &str) -> Value {
        let k = Key::prop(key);
        self.id.track(k.clone());
        if let Some(derived) = self.id.derived_at(&k) {
            return computed::resolve(derived);
        }
        self.read_slot(Slot::Prop(key))
    }

    /// Whether the object currently has `key`. Tracked like a read of the
    /// key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.id.track(Key::prop(key));
        self.id
            .with(|cell| match &cell.storage {
                RawStorage::Object(map) => map.contains_key(key),
                RawStorage::Array(_) => false,
            })
            .unwrap_or(false)
    }

    /// Snapshot of the object's keys, in insertion order. Tracked against
    /// the enumeration key, so adding or removing properties re-runs the
    /// reader.
    pub fn keys(&self) -> Vec<String> {
        self.id.track(Key::All);
        self.id
            .with(|cell| match &cell.storage {
                RawStorage::Object(map) => map.keys().cloned().collect(),
                RawStorage::Array(_) => Vec::new(),
            })
            .unwrap_or_default()
    }

    /// Element count: array length or object property count.
    pub fn len(&self) -> usize {
        let counted = self.id.with(|cell| match &cell.storage {
            RawStorage::Array(items) => (true, items.len()),
            RawStorage::Object(map) => (false, map.len()),
        });
        match counted {
            Some((true, n)) => {
                self.id.track(Key::Len);
                n
            }
            Some((false, n)) => {
                self.id.track(Key::All);
                n
            }
            None => 0,
        }
    }

    /// True when [`len`](Reactive::len) is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------
    // Object writes
    // ------------------------------------------------------------------

    /// Write a property.
    ///
    /// Writing the value already present is a no-op (no propagation). A
    /// plain object/array payload is eagerly moved into its own cell so
    /// future reads share it. Writes to a key carrying a derived value are
    /// refused with a warning - derived keys have no raw slot.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        if !self.id.is_live() {
            tracing::debug!(key, "write through a stale handle ignored");
            return;
        }
        let k = Key::prop(key);
        if self.id.derived_at(&k).is_some() {
            tracing::warn!(key, "write to a key carrying a derived value ignored");
            return;
        }
        enum Write {
            Suppressed,
            Replaced,
            Inserted,
            WrongKind,
        }

        let incoming = prepare_for_storage(value.into());
        let outcome = self
            .id
            .with_mut(|cell| {
                let Some(map) = cell.storage.as_object_mut() else {
                    return Write::WrongKind;
                };
                match map.get(key) {
                    Some(existing) if *existing == incoming => Write::Suppressed,
                    Some(_) => {
                        map.insert(key.to_owned(), incoming);
                        Write::Replaced
                    }
                    None => {
                        map.insert(key.to_owned(), incoming);
                        Write::Inserted
                    }
                }
            })
            .unwrap_or(Write::WrongKind);

        match outcome {
            Write::Suppressed => {
                cov_mark::hit!(write_suppressed);
            }
            Write::Replaced => propagate(self.id, &[k]),
            // A new key also changes what enumeration sees.
            Write::Inserted => propagate(self.id, &[k, Key::All]),
            Write::WrongKind => {
                tracing::warn!(key, "property write on an array handle ignored");
            }
        }
    }

    /// Delete a property. Propagates like a write, without equality
    /// suppression; deleting an absent key is a no-op.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = self
            .id
            .with_mut(|cell| {
                cell.storage
                    .as_object_mut()
                    .and_then(|map| map.shift_remove(key))
            })
            .flatten();
        if removed.is_some() {
            propagate(self.id, &[Key::prop(key), Key::All]);
        }
        removed
    }

    // ------------------------------------------------------------------
    // Array reads
    // ------------------------------------------------------------------

    /// Read an element. Out of range reads as [`Value::Null`].
    ///
    /// Element reads are tracked per index and against the whole-array key:
    /// structural mutations notify through the whole-array key rather than
    /// touching every index, so element readers subscribe to both.
    pub fn index(&self, i: usize) -> Value {
        self.id.track(Key::Index(i as u32));
        self.id.track(Key::All);
        self.read_slot(Slot::Index(i))
    }

    /// Snapshot the array. Nested plain containers are wrapped first, so
    /// the caller never receives an inert copy of live state.
    pub fn to_vec(&self) -> Vec<Value> {
        self.id.track(Key::Len);
        self.id.track(Key::All);
        let len = self
            .id
            .with(|cell| match &cell.storage {
                RawStorage::Array(items) => items.len(),
                RawStorage::Object(_) => 0,
            })
            .unwrap_or(0);
        (0..len).map(|i| self.read_slot(Slot::Index(i))).collect()
    }

    // ------------------------------------------------------------------
    // Array writes
    // ------------------------------------------------------------------

    /// Write one element. Same suppression and eager-wrap rules as
    /// [`set`](Reactive::set). Writing past the end extends the array with
    /// nulls (a length change).
    pub fn set_index(&self, i: usize, value: impl Into<Value>) {
        if !self.id.is_live() {
            tracing::debug!(index = i, "write through a stale handle ignored");
            return;
        }
        enum Write {
            Suppressed,
            Replaced,
            Extended,
            WrongKind,
        }

        let incoming = prepare_for_storage(value.into());
        let outcome = self
            .id
            .with_mut(|cell| {
                let Some(items) = cell.storage.as_array_mut() else {
                    return Write::WrongKind;
                };
                if i < items.len() {
                    if items[i] == incoming {
                        Write::Suppressed
                    } else {
                        items[i] = incoming;
                        Write::Replaced
                    }
                } else {
                    items.resize(i + 1, Value::Null);
                    items[i] = incoming;
                    Write::Extended
                }
            })
            .unwrap_or(Write::WrongKind);

        match outcome {
            Write::Suppressed => {
                cov_mark::hit!(write_suppressed);
            }
            Write::Replaced => propagate(self.id, &[Key::Index(i as u32), Key::All]),
            Write::Extended => {
                propagate(self.id, &[Key::Index(i as u32), Key::Len, Key::All]);
            }
            Write::WrongKind => {
                tracing::warn!(index = i, "index write on an object handle ignored");
            }
        }
    }

    /// Append an element.
    pub fn push(&self, value: impl Into<Value>) -> Result<(), ReactiveError> {
        if !self.id.is_live() {
            return Err(ReactiveError::StaleHandle);
        }
        let incoming = prepare_for_storage(value.into());
        self.array_mutation(move |items| {
            items.push(incoming);
            ((), true)
        })
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Result<Option<Value>, ReactiveError> {
        self.array_mutation(|items| {
            let removed = items.pop();
            let mutated = removed.is_some();
            (removed, mutated)
        })
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Result<Option<Value>, ReactiveError> {
        self.array_mutation(|items| {
            if items.is_empty() {
                (None, false)
            } else {
                (Some(items.remove(0)), true)
            }
        })
    }

    /// Insert an element at the front.
    pub fn unshift(&self, value: impl Into<Value>) -> Result<(), ReactiveError> {
        if !self.id.is_live() {
            return Err(ReactiveError::StaleHandle);
        }
        let incoming = prepare_for_storage(value.into());
        self.array_mutation(move |items| {
            items.insert(0, incoming);
            ((), true)
        })
    }

    /// Remove `delete_count` elements starting at `start` (both clamped to
    /// the array), inserting `replacements` in their place. Returns the
    /// removed elements.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        replacements: Vec<Value>,
    ) -> Result<Vec<Value>, ReactiveError> {
        if !self.id.is_live() {
            return Err(ReactiveError::StaleHandle);
        }
        let replacements: Vec<Value> = replacements.into_iter().map(prepare_for_storage).collect();
        self.array_mutation(move |items| {
            let start = start.min(items.len());
            let end = (start + delete_count).min(items.len());
            let mutated = end > start || !replacements.is_empty();
            let removed: Vec<Value> = items.splice(start..end, replacements).collect();
            (removed, mutated)
        })
    }

    /// Sort in place with a caller-supplied comparator.
    ///
    /// The vector is moved out of the cell for the duration of the sort so
    /// the comparator may freely read other reactive state; writes it makes
    /// to *this* array during the sort are overwritten when the sorted
    /// vector is put back.
    pub fn sort_by<F>(&self, mut compare: F) -> Result<(), ReactiveError>
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        if !self.id.is_live() {
            return Err(ReactiveError::StaleHandle);
        }
        let taken = self
            .id
            .with_mut(|cell| cell.storage.as_array_mut().map(std::mem::take))
            .flatten();
        let Some(mut items) = taken else {
            return Err(ReactiveError::ExpectedArray);
        };
        items.sort_by(&mut compare);
        self.id.with_mut(|cell| {
            if let Some(slot) = cell.storage.as_array_mut() {
                *slot = items;
            }
        });
        propagate(self.id, &[Key::Len, Key::All]);
        Ok(())
    }

    /// Reverse in place.
    pub fn reverse(&self) -> Result<(), ReactiveError> {
        self.array_mutation(|items| {
            items.reverse();
            ((), true)
        })
    }

    /// Remove every element.
    pub fn clear(&self) -> Result<(), ReactiveError> {
        self.array_mutation(|items| {
            let mutated = !items.is_empty();
            items.clear();
            (mutated, mutated)
        })
        .map(|_| ())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// One coordinated structural mutation: run `f` on the raw vector, then
    /// trigger the length key once and the whole-array key once - not one
    /// notification per shifted element. `f` returns `(result, mutated)`;
    /// nothing propagates when the call turned out to be a no-op (pop on an
    /// empty array).
    fn array_mutation<R, F>(&self, f: F) -> Result<R, ReactiveError>
    where
        F: FnOnce(&mut Vec<Value>) -> (R, bool),
    {
        if !self.id.is_live() {
            return Err(ReactiveError::StaleHandle);
        }
        let outcome = self
            .id
            .with_mut(|cell| cell.storage.as_array_mut().map(f))
            .flatten();
        match outcome {
            None => Err(ReactiveError::ExpectedArray),
            Some((result, mutated)) => {
                if mutated {
                    propagate(self.id, &[Key::Len, Key::All]);
                }
                Ok(result)
            }
        }
    }

    /// Read one raw slot, lazily wrapping a plain container in place.
    ///
    /// Phase 1 inspects the slot under the borrow and, for a plain
    /// container, takes the payload out; the cell allocation and the
    /// link-back happen in separate borrows so the arena is never borrowed
    /// while it is being grown.
    fn read_slot(&self, slot: Slot<'_>) -> Value {
        enum Found {
            Missing,
            Ready(Value),
            Wrap(RawStorage),
        }

        let found = self.id.with_mut(|cell| {
            let entry = match slot {
                Slot::Prop(name) => cell
                    .storage
                    .as_object_mut()
                    .and_then(|map| map.get_mut(name)),
                Slot::Index(i) => cell.storage.as_array_mut().and_then(|items| items.get_mut(i)),
            };
            let Some(value) = entry else {
                return Found::Missing;
            };
            if value.is_plain_container() {
                match std::mem::replace(value, Value::Null) {
                    Value::Object(map) => Found::Wrap(RawStorage::Object(map)),
                    Value::Array(items) => Found::Wrap(RawStorage::Array(items)),
                    other => Found::Ready(other),
                }
            } else {
                Found::Ready(value.clone())
            }
        });

        match found {
            None | Some(Found::Missing) => Value::Null,
            Some(Found::Ready(value)) => value,
            Some(Found::Wrap(storage)) => {
                cov_mark::hit!(lazy_wrap_created);
                let child = Reactive::from_cell(state_arena_insert(storage));
                self.id.with_mut(|cell| {
                    let entry = match slot {
                        Slot::Prop(name) => cell
                            .storage
                            .as_object_mut()
                            .and_then(|map| map.get_mut(name)),
                        Slot::Index(i) => {
                            cell.storage.as_array_mut().and_then(|items| items.get_mut(i))
                        }
                    };
                    if let Some(value) = entry {
                        *value = Value::Ref(child);
                    }
                });
                Value::Ref(child)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn stale_for_tests() -> Reactive {
        Reactive::from_cell(StateId::new(u32::MAX))
    }
}

/// Prepare an incoming value for raw storage: plain containers are eagerly
/// moved into a cell of their own (the wrapper future reads will share),
/// everything else is stored as-is. A `Ref` stays the link it already is -
/// storing a reactive object inside another shares the cell, it does not
/// copy state.
fn prepare_for_storage(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            cov_mark::hit!(eager_wrap_on_write);
            Value::Ref(Reactive::from_cell(state_arena_insert(RawStorage::Object(
                map,
            ))))
        }
        Value::Array(items) => {
            cov_mark::hit!(eager_wrap_on_write);
            Value::Ref(Reactive::from_cell(state_arena_insert(RawStorage::Array(
                items,
            ))))
        }
        other => other,
    }
}

/// Wrap a plain value: objects and arrays become reactive links, scalars
/// and existing links pass through unchanged.
pub fn wrap(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Ref(Reactive::from_cell(state_arena_insert(
            RawStorage::Object(map),
        ))),
        Value::Array(items) => Value::Ref(Reactive::from_cell(state_arena_insert(
            RawStorage::Array(items),
        ))),
        other => other,
    }
}

/// Wrap a plain object or array and return its handle. See
/// [`Reactive::new`].
pub fn create_reactive(value: Value) -> Result<Reactive, ReactiveError> {
    Reactive::new(value)
}

/// Whether a value is a reactive link.
pub fn is_reactive(value: &Value) -> bool {
    matches!(value, Value::Ref(_))
}

/// Deep plain snapshot of a reactive object: every link resolved into an
/// inert copy of its current contents. The walk is untracked - snapshots
/// are an escape hatch, not a dependency. Reference cycles in the object
/// graph snapshot as [`Value::Null`] at the point of re-entry.
pub fn to_raw(handle: Reactive) -> Value {
    let mut visiting = HashSet::new();
    snapshot_cell(handle.id, &mut visiting)
}

fn snapshot_cell(id: StateId, visiting: &mut HashSet<StateId>) -> Value {
    if !visiting.insert(id) {
        tracing::warn!(
            cell = id.index(),
            "reference cycle while snapshotting; substituting null"
        );
        return Value::Null;
    }
    let out = id.with(|cell| match &cell.storage {
        RawStorage::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), snapshot_value(v, visiting)))
                .collect(),
        ),
        RawStorage::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| snapshot_value(v, visiting))
                .collect(),
        ),
    });
    visiting.remove(&id);
    out.unwrap_or(Value::Null)
}

fn snapshot_value(value: &Value, visiting: &mut HashSet<StateId>) -> Value {
    match value {
        Value::Ref(handle) => snapshot_cell(handle.id, visiting),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), snapshot_value(v, visiting)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| snapshot_value(v, visiting))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Manually invalidate: with a key, re-trigger that key (or mark the
/// derived value registered there dirty); with `None`, invalidate every
/// derived value on the handle and re-trigger every tracked key once.
pub fn notify(handle: Reactive, key: Option<&str>) {
    let id = handle.id;
    match key {
        Some(name) => {
            let k = Key::prop(name);
            if let Some(derived) = id.derived_at(&k) {
                scheduler::invalidate(derived);
            } else {
                propagate(id, &[k]);
            }
        }
        None => {
            for derived in id.derived_ids() {
                scheduler::invalidate(derived);
            }
            let keys = id.dep_keys();
            propagate(id, &keys);
        }
    }
}
