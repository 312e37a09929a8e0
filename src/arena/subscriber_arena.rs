// Subscriber arena - storage for effect and derived-value metadata
//
// SubscriberMeta is the unified record for both subscriber kinds: effects
// (a callback run for its side effects) and derived values (a function with
// a cached result and a dirty flag). Both carry a source list - the keys
// their last execution read - which is cleared before every re-execution so
// dependencies are re-derived from scratch each run.
//
// This module also owns the two pieces of execution context the engine
// threads through every tracked read:
// - ACTIVE_SUBSCRIBER: the subscriber currently executing, restored by an
//   RAII guard even when the body panics
// - PENDING: the deduplicated, insertion-ordered set of subscribers queued
//   while a batch is open or a drain is in progress

use std::cell::{Cell, RefCell};

use indexmap::IndexSet;
use slab::Slab;
use smallvec::SmallVec;

use crate::hash::FastHashBuilder;
use crate::value::Value;

use super::state_arena::{Key, StateId};

thread_local! {
    static SUBSCRIBER_ARENA: RefCell<Slab<SubscriberMeta>> = RefCell::new(Slab::new());
    static ACTIVE_SUBSCRIBER: Cell<Option<SubscriberId>> = const { Cell::new(None) };
    static PENDING: RefCell<IndexSet<SubscriberId, FastHashBuilder>> =
        RefCell::new(IndexSet::default());
}

pub(crate) type EffectFn = Box<dyn FnMut()>;
pub(crate) type DerivedFn = Box<dyn FnMut() -> Value>;

/// State of a derived value: its function, cache and dirty flag, plus the
/// host key it is readable at (used to notify its own dependents).
pub(crate) struct DerivedRecord {
    /// Taken out while evaluating; `None` therefore doubles as the
    /// re-entrancy marker for cycle detection.
    pub(crate) f: Option<DerivedFn>,
    pub(crate) cached: Option<Value>,
    pub(crate) dirty: bool,
    pub(crate) host: StateId,
    pub(crate) key: Key,
}

/// The two subscriber kinds.
pub(crate) enum SubscriberKind {
    /// Re-run for side effects on every invalidation. The callback is taken
    /// out of the arena while running so the arena borrow is never held
    /// across user code.
    Effect { callback: Option<EffectFn> },
    /// Memoized value, re-evaluated lazily on the next read after
    /// invalidation.
    Derived(DerivedRecord),
}

/// Unified metadata for one subscriber.
pub(crate) struct SubscriberMeta {
    pub(crate) kind: SubscriberKind,
    /// The `(cell, key)` pairs the last execution read. Cleared (and the
    /// matching dependency entries updated) before each re-execution.
    pub(crate) sources: SmallVec<[(StateId, Key); 4]>,
}

impl SubscriberMeta {
    pub(crate) fn effect(callback: EffectFn) -> Self {
        Self {
            kind: SubscriberKind::Effect {
                callback: Some(callback),
            },
            sources: SmallVec::new(),
        }
    }

    /// Derived values start dirty: the function is not invoked until the
    /// first read.
    pub(crate) fn derived(f: DerivedFn, host: StateId, key: Key) -> Self {
        Self {
            kind: SubscriberKind::Derived(DerivedRecord {
                f: Some(f),
                cached: None,
                dirty: true,
                host,
                key,
            }),
            sources: SmallVec::new(),
        }
    }
}

/// Stable handle for a subscriber in the arena.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub(crate) struct SubscriberId(u32);

impl SubscriberId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// Read access to the metadata. Returns None for a stale id.
    pub(crate) fn with<F, R>(self, f: F) -> Option<R>
    where
        F: FnOnce(&SubscriberMeta) -> R,
    {
        SUBSCRIBER_ARENA.with(|arena| arena.borrow().get(self.index()).map(f))
    }

    /// Mutable access to the metadata. Returns None for a stale id.
    ///
    /// The closure must not run user code or call back into this arena.
    pub(crate) fn with_mut<F, R>(self, f: F) -> Option<R>
    where
        F: FnOnce(&mut SubscriberMeta) -> R,
    {
        SUBSCRIBER_ARENA.with(|arena| arena.borrow_mut().get_mut(self.index()).map(f))
    }

    pub(crate) fn is_derived(self) -> bool {
        self.with(|meta| matches!(meta.kind, SubscriberKind::Derived(_)))
            .unwrap_or(false)
    }

    /// Append a source, deduplicated (reading the same key twice in one run
    /// records it once).
    pub(crate) fn add_source(self, state: StateId, key: Key) {
        self.with_mut(|meta| {
            if !meta
                .sources
                .iter()
                .any(|(s, k)| *s == state && *k == key)
            {
                meta.sources.push((state, key));
            }
        });
    }

    /// Clear the recorded sources and remove this subscriber from every
    /// dependency entry it appears in. Called before each re-execution
    /// (re-tracking) and on disposal.
    pub(crate) fn clear_sources(self) {
        let sources = self
            .with_mut(|meta| std::mem::take(&mut meta.sources))
            .unwrap_or_default();
        for (state, key) in sources {
            state.remove_subscriber(&key, self);
        }
    }

    /// Drop this subscriber entirely: pending queue, dependency entries,
    /// arena slot. Safe to call on a stale id.
    pub(crate) fn dispose(self) {
        remove_from_pending(self);
        self.clear_sources();
        SUBSCRIBER_ARENA.with(|arena| {
            let mut arena = arena.borrow_mut();
            if arena.contains(self.index()) {
                arena.remove(self.index());
            }
        });
    }
}

/// Insert subscriber metadata and return its handle.
pub(crate) fn subscriber_arena_insert(meta: SubscriberMeta) -> SubscriberId {
    SUBSCRIBER_ARENA.with(|arena| {
        let mut arena = arena.borrow_mut();
        let entry = arena.vacant_entry();
        let key = entry.key();
        entry.insert(meta);
        SubscriberId::new(key as u32)
    })
}

/// The subscriber currently executing, if any.
pub(crate) fn current_subscriber() -> Option<SubscriberId> {
    ACTIVE_SUBSCRIBER.with(Cell::get)
}

fn set_current_subscriber(subscriber: Option<SubscriberId>) -> Option<SubscriberId> {
    ACTIVE_SUBSCRIBER.with(|slot| slot.replace(subscriber))
}

/// RAII guard that restores the previous active subscriber when dropped,
/// including during unwinding from a panicking subscriber body.
pub(crate) struct ActiveSubscriberGuard {
    previous: Option<SubscriberId>,
}

impl ActiveSubscriberGuard {
    pub(crate) fn new(subscriber: Option<SubscriberId>) -> Self {
        let previous = set_current_subscriber(subscriber);
        Self { previous }
    }
}

impl Drop for ActiveSubscriberGuard {
    fn drop(&mut self) {
        set_current_subscriber(self.previous);
    }
}

/// Queue a subscriber for the next drain. Duplicates coalesce; insertion
/// order is preserved.
pub(crate) fn enqueue_pending(subscriber: SubscriberId) {
    PENDING.with(|pending| {
        pending.borrow_mut().insert(subscriber);
    });
}

/// Take the whole pending set, clearing it, so subscribers scheduled while
/// draining land in a fresh set for the follow-up pass.
pub(crate) fn take_pending() -> Vec<SubscriberId> {
    PENDING.with(|pending| pending.borrow_mut().drain(..).collect())
}

/// Remove a disposed subscriber from the queue without disturbing the
/// order of the rest.
pub(crate) fn remove_from_pending(subscriber: SubscriberId) {
    PENDING.with(|pending| {
        pending.borrow_mut().shift_remove(&subscriber);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_subscriber_guard_restores_on_panic() {
        let outer = SubscriberId::new(1001);
        let inner = SubscriberId::new(1002);

        let _outer_guard = ActiveSubscriberGuard::new(Some(outer));
        assert_eq!(current_subscriber(), Some(outer));

        let result = std::panic::catch_unwind(|| {
            let _guard = ActiveSubscriberGuard::new(Some(inner));
            assert_eq!(current_subscriber(), Some(inner));
            panic!("subscriber body panic");
        });

        assert!(result.is_err());
        assert_eq!(current_subscriber(), Some(outer));
    }

    #[test]
    fn pending_set_deduplicates_and_preserves_order() {
        let a = SubscriberId::new(2001);
        let b = SubscriberId::new(2002);

        enqueue_pending(a);
        enqueue_pending(b);
        enqueue_pending(a);

        assert_eq!(take_pending(), vec![a, b]);
        assert!(take_pending().is_empty());
    }

    #[test]
    fn dispose_is_idempotent() {
        let id = subscriber_arena_insert(SubscriberMeta::effect(Box::new(|| {})));
        id.dispose();
        id.dispose();
        assert!(id.with(|_| ()).is_none());
    }
}
