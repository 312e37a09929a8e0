//! Derived values: memoized, pull-based subscribers.
//!
//! A derived value is attached to a key on a reactive object and shadows
//! that key on read. It starts dirty and is never evaluated eagerly: the
//! function runs on the first read, and again only on the first read after
//! an invalidation. While it evaluates, the derived value itself is the
//! active subscriber, so the keys its function reads land in its own
//! dependency record - a later write to any of them flips it back to dirty
//! and notifies whatever reads the derived key, which is how
//! derived-on-derived chains propagate.
//!
//! Cyclic derivations (A reads B reads A) are a caller error. They are
//! detected rather than guarded by hope: re-entering a derived value whose
//! function is already running, or exceeding the evaluation depth cap,
//! logs an error and yields the stale cache instead of overflowing the
//! stack.

use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::arena::{
    ActiveSubscriberGuard, DerivedFn, Key, SubscriberId, SubscriberKind, SubscriberMeta,
    subscriber_arena_insert,
};
use crate::error::ReactiveError;
use crate::handle::Reactive;
use crate::value::Value;

thread_local! {
    static EVAL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Derivation chains deeper than this are assumed cyclic.
const MAX_EVAL_DEPTH: usize = 64;

/// Attach a derived value at `key` on `handle`.
///
/// Reads of `handle.get(key)` will resolve `f`'s memoized result from then
/// on. Attaching to a key that already carries a derived value replaces
/// (and disposes) the old one. `f` is not invoked here - evaluation is
/// lazy.
///
/// # Errors
///
/// [`ReactiveError::StaleHandle`] when `handle` no longer points at a live
/// reactive object; this is a misuse error reported at the call site, not
/// deferred.
pub fn computed<F>(handle: Reactive, key: &str, f: F) -> Result<(), ReactiveError>
where
    F: FnMut() -> Value + 'static,
{
    let host = handle.id();
    if !host.is_live() {
        return Err(ReactiveError::StaleHandle);
    }
    let key = Key::prop(key);
    let id = subscriber_arena_insert(SubscriberMeta::derived(Box::new(f), host, key.clone()));
    if let Some(replaced) = host.register_derived(key, id) {
        replaced.dispose();
    }
    Ok(())
}

/// Resolve a derived value: cached result when clean, re-evaluation when
/// dirty. Called from the read path with the host's dependency already
/// tracked for the outer reader.
pub(crate) fn resolve(id: SubscriberId) -> Value {
    enum Plan {
        Cached(Value),
        Evaluate(DerivedFn),
        Reentered(Value),
    }

    let plan = id.with_mut(|meta| match &mut meta.kind {
        SubscriberKind::Derived(derived) => {
            if !derived.dirty {
                cov_mark::hit!(derived_cache_hit);
                Plan::Cached(derived.cached.clone().unwrap_or(Value::Null))
            } else if let Some(f) = derived.f.take() {
                Plan::Evaluate(f)
            } else {
                // The function is already out: this read happened inside
                // the derived value's own evaluation.
                Plan::Reentered(derived.cached.clone().unwrap_or(Value::Null))
            }
        }
        SubscriberKind::Effect { .. } => Plan::Cached(Value::Null),
    });

    let Some(plan) = plan else {
        return Value::Null; // stale id
    };

    match plan {
        Plan::Cached(value) => value,
        Plan::Reentered(stale) => {
            cov_mark::hit!(derived_cycle_detected);
            tracing::error!(
                subscriber = id.index(),
                "cyclic derived value read itself during evaluation; returning stale value"
            );
            stale
        }
        Plan::Evaluate(f) => evaluate(id, f),
    }
}

fn evaluate(id: SubscriberId, mut f: DerivedFn) -> Value {
    let depth = EVAL_DEPTH.with(Cell::get);
    if depth >= MAX_EVAL_DEPTH {
        tracing::error!(
            subscriber = id.index(),
            "derived evaluation depth limit reached; derivation chain likely cyclic"
        );
        return restore(id, f, None);
    }
    EVAL_DEPTH.with(|d| d.set(depth + 1));

    // Start from a blank dependency record so this evaluation re-derives
    // exactly the keys it reads.
    id.clear_sources();

    let outcome = {
        let _active = ActiveSubscriberGuard::new(Some(id));
        catch_unwind(AssertUnwindSafe(|| f()))
    };

    EVAL_DEPTH.with(|d| d.set(depth));

    match outcome {
        Ok(value) => restore(id, f, Some(value)),
        Err(_) => {
            tracing::error!(
                subscriber = id.index(),
                "derived value function panicked; keeping previous value"
            );
            restore(id, f, None)
        }
    }
}

/// Put the function back, optionally install a fresh cache, mark clean.
///
/// A failed evaluation also marks clean (with the previous cache): the
/// next invalidation will retry, but repeated reads of a broken derivation
/// must not re-run a panicking function in a hot loop.
fn restore(id: SubscriberId, f: DerivedFn, fresh: Option<Value>) -> Value {
    id.with_mut(|meta| match &mut meta.kind {
        SubscriberKind::Derived(derived) => {
            derived.f = Some(f);
            if let Some(value) = fresh {
                derived.cached = Some(value);
            }
            derived.dirty = false;
            derived.cached.clone().unwrap_or(Value::Null)
        }
        SubscriberKind::Effect { .. } => Value::Null,
    })
    .unwrap_or(Value::Null)
}
