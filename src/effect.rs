//! Effects: side-effecting subscribers.
//!
//! An effect runs once at registration and again on every invalidation of a
//! key its *previous* run read. Each run starts from a blank dependency
//! record - the effect unsubscribes from everything first, then the reads
//! inside the body re-subscribe it - so conditional code paths only depend
//! on the branch actually taken.
//!
//! ```ignore
//! let state = create_reactive(Value::object([("count", 0)]))?;
//! let seen = Rc::new(Cell::new(0.0));
//! let seen2 = seen.clone();
//! let binding = effect(move || {
//!     seen2.set(state.get("count").as_num().unwrap_or(0.0));
//! });
//! state.set("count", 5); // runs the effect synchronously
//! binding.dispose();     // stops it; disposing again is a no-op
//! ```

use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::arena::{
    ActiveSubscriberGuard, EffectFn, SubscriberId, SubscriberKind, SubscriberMeta,
    subscriber_arena_insert,
};

/// Disposer handle for a registered effect.
///
/// Dropping the handle does nothing - a binding registered and forgotten
/// keeps reacting, which is the normal fire-and-forget pattern for DOM
/// bindings. Stopping an effect is always an explicit [`dispose`] call, and
/// disposal is idempotent.
///
/// [`dispose`]: Effect::dispose
pub struct Effect {
    id: Cell<Option<SubscriberId>>,
}

impl Effect {
    /// Unsubscribe the effect from every key it depends on and drop it.
    /// After this call no write will ever invoke the body again. Calling
    /// `dispose` a second time is a no-op.
    pub fn dispose(&self) {
        if let Some(id) = self.id.take() {
            id.dispose();
        }
    }

    /// Whether [`dispose`](Effect::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.id.get().is_none()
    }
}

/// Register an effect and run it immediately.
///
/// The first run happens synchronously inside this call (even inside a
/// batch - registration is not propagation) and captures the initial
/// dependency set.
pub fn effect<F>(f: F) -> Effect
where
    F: FnMut() + 'static,
{
    let id = subscriber_arena_insert(SubscriberMeta::effect(Box::new(f)));
    run_effect_now(id);
    Effect {
        id: Cell::new(Some(id)),
    }
}

/// Run `f` with no active subscriber, so reads inside it are not recorded
/// as dependencies of the caller.
pub fn untrack<R, F>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ActiveSubscriberGuard::new(None);
    f()
}

/// Execute one effect: re-track, run, isolate panics.
///
/// The callback is taken out of the arena for the duration of the call so
/// no arena borrow is held across user code; a drop guard puts it back even
/// if the body panics. A stale id, a derived subscriber, or an effect whose
/// callback is already out (re-entrant trigger) all fall through silently.
pub(crate) fn run_effect_now(id: SubscriberId) {
    let callback = id
        .with_mut(|meta| match &mut meta.kind {
            SubscriberKind::Effect { callback } => callback.take(),
            SubscriberKind::Derived(_) => None,
        })
        .flatten();
    let Some(callback) = callback else {
        return;
    };

    // Unsubscribe from everything the previous run read; the reads below
    // re-derive the dependency set from scratch.
    id.clear_sources();

    let mut restore = CallbackRestore {
        id,
        callback: Some(callback),
    };
    let _active = ActiveSubscriberGuard::new(Some(id));
    let outcome = catch_unwind(AssertUnwindSafe(|| restore.run()));
    if outcome.is_err() {
        tracing::error!(
            subscriber = id.index(),
            "effect body panicked; continuing with remaining subscribers"
        );
    }
}

/// Puts a taken-out callback back into the arena on drop, panic or not.
struct CallbackRestore {
    id: SubscriberId,
    callback: Option<EffectFn>,
}

impl CallbackRestore {
    fn run(&mut self) {
        if let Some(callback) = &mut self.callback {
            callback();
        }
    }
}

impl Drop for CallbackRestore {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            self.id.with_mut(|meta| {
                if let SubscriberKind::Effect { callback: slot } = &mut meta.kind {
                    *slot = Some(callback);
                }
            });
        }
    }
}
