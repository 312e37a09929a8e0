//! Propagation scheduler.
//!
//! Every write funnels through [`propagate`]: the written keys' subscriber
//! sets are snapshotted (deduplicated, in registration order) and each
//! subscriber is invalidated exactly once. Derived values are marked dirty
//! immediately - batching never defers a dirty flag, only effect
//! execution. Effects go through [`schedule`]:
//!
//! - no batch open, no drain in progress: the effect runs synchronously on
//!   the spot, so a plain `state.set("count", 5)` is observable the moment
//!   the call returns;
//! - otherwise: the effect joins the pending set and runs once when the
//!   outermost batch exits.
//!
//! The drain loop re-takes the pending set until it stays empty, so effects
//! that schedule further work during the drain are honored by a follow-up
//! pass, bounded by a convergence cap. Subscriber bodies are panic-isolated
//! by the effect runner; a failing subscriber is logged and the rest of the
//! set still runs.

use std::cell::Cell;

use crate::arena::{
    Key, StateId, SubscriberId, SubscriberKind, current_subscriber, enqueue_pending, take_pending,
};
use crate::effect::run_effect_now;

thread_local! {
    static BATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
    static DRAINING: Cell<bool> = const { Cell::new(false) };
    static DISPATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Passes the drain loop will attempt before declaring non-convergence.
const MAX_DRAIN_PASSES: usize = 100;

/// Nested synchronous propagation depth (effects writing reactive keys,
/// derived chains) tolerated before the cycle guard trips.
const MAX_DISPATCH_DEPTH: usize = 128;

/// Defer and coalesce propagation for the duration of `f`.
///
/// Writes inside the batch mark derived values dirty as usual but park
/// affected effects in the pending set; when the outermost batch exits,
/// each parked effect runs exactly once, observing the final values.
/// Batches nest - only the outermost exit drains.
pub fn batch<R, F>(f: F) -> R
where
    F: FnOnce() -> R,
{
    BATCH_DEPTH.with(|depth| depth.set(depth.get() + 1));
    // Guard so the depth unwinds and the drain still happens if f panics.
    let _guard = BatchGuard;
    f()
}

struct BatchGuard;

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let depth = BATCH_DEPTH.with(|depth| {
            let next = depth.get().saturating_sub(1);
            depth.set(next);
            next
        });
        if depth == 0 {
            drain_pending();
        }
    }
}

pub(crate) fn is_batching() -> bool {
    BATCH_DEPTH.with(Cell::get) > 0
}

fn is_draining() -> bool {
    DRAINING.with(Cell::get)
}

/// Run everything in the pending set to convergence.
fn drain_pending() {
    if is_draining() {
        // A batch opened and closed inside a drained effect; the enclosing
        // drain loop will pick up whatever it queued.
        return;
    }
    DRAINING.with(|flag| flag.set(true));
    let _guard = DrainGuard;

    let mut pass = 0;
    loop {
        let queued = take_pending();
        if queued.is_empty() {
            break;
        }
        if pass == MAX_DRAIN_PASSES {
            tracing::error!(
                dropped = queued.len(),
                "propagation did not converge after {MAX_DRAIN_PASSES} passes; dropping remaining subscribers"
            );
            break;
        }
        if pass > 0 {
            cov_mark::hit!(drain_follow_up_pass);
        }
        for subscriber in queued {
            run_effect_now(subscriber);
        }
        pass += 1;
    }
}

struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DRAINING.with(|flag| flag.set(false));
    }
}

/// Notify every subscriber of `keys` on `target` exactly once.
///
/// Multi-key triggers (a push touches both the length key and the global
/// key) are deduplicated here so an effect reading both still runs once per
/// mutation.
pub(crate) fn propagate(target: StateId, keys: &[Key]) {
    let subscribers = target.subscribers(keys);
    if subscribers.is_empty() {
        return;
    }

    let depth = DISPATCH_DEPTH.with(Cell::get);
    if depth >= MAX_DISPATCH_DEPTH {
        cov_mark::hit!(dispatch_depth_capped);
        tracing::error!(
            cell = target.index(),
            "propagation recursion limit reached; subscriber chain likely cyclic"
        );
        return;
    }
    DISPATCH_DEPTH.with(|d| d.set(depth + 1));
    let _guard = DispatchGuard(depth);

    for subscriber in subscribers {
        invalidate(subscriber);
    }
}

struct DispatchGuard(usize);

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCH_DEPTH.with(|d| d.set(self.0));
    }
}

/// Invalidate one subscriber: derived values flip to dirty and pass the
/// notification on to their own dependents; effects are scheduled.
pub(crate) fn invalidate(subscriber: SubscriberId) {
    let chain = subscriber.with_mut(|meta| match &mut meta.kind {
        SubscriberKind::Derived(derived) => {
            if derived.dirty {
                // Already dirty: dependents were notified when it became
                // dirty, nothing further to push.
                None
            } else {
                derived.dirty = true;
                Some((derived.host, derived.key.clone()))
            }
        }
        SubscriberKind::Effect { .. } => None,
    });

    match chain {
        None => return, // stale id
        Some(Some((host, key))) => {
            // Derived-on-derived chains and effects reading the derived
            // value all live in the host cell's entry for its key.
            propagate(host, &[key]);
        }
        Some(None) => {
            if subscriber.is_derived() {
                return;
            }
            schedule(subscriber);
        }
    }
}

/// Route one effect through the batch decision.
pub(crate) fn schedule(subscriber: SubscriberId) {
    if current_subscriber() == Some(subscriber) {
        // The running subscriber wrote a key it also reads; re-entering it
        // would loop forever, so the self-notification is dropped.
        cov_mark::hit!(self_trigger_skipped);
        tracing::warn!(
            subscriber = subscriber.index(),
            "subscriber wrote a key it also reads; skipping self-notification"
        );
        return;
    }
    if is_batching() || is_draining() {
        enqueue_pending(subscriber);
    } else {
        run_effect_now(subscriber);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_depth_nests() {
        assert!(!is_batching());
        batch(|| {
            assert!(is_batching());
            batch(|| assert!(is_batching()));
            assert!(is_batching());
        });
        assert!(!is_batching());
    }

    #[test]
    fn batch_returns_value() {
        assert_eq!(batch(|| 42), 42);
    }

    #[test]
    fn batch_depth_unwinds_on_panic() {
        let result = std::panic::catch_unwind(|| {
            batch(|| panic!("boom"));
        });
        assert!(result.is_err());
        assert!(!is_batching());
    }
}
