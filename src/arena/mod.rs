// Arena-based storage for reactive bookkeeping
//
// Two thread-local arenas:
// - State arena: one StateCell per reactive object (raw storage, dependency
//   entries, derived registry)
// - Subscriber arena: one SubscriberMeta per effect or derived value
//
// StateId and SubscriberId are lightweight newtypes indexing into the slabs.
// The arenas are thread-local RefCells; the engine is single-threaded, so
// the only discipline required is that no borrow is held across a call into
// user code.

pub(crate) mod state_arena;
pub(crate) mod subscriber_arena;

pub(crate) use state_arena::{Key, RawStorage, StateId, state_arena_insert};
pub(crate) use subscriber_arena::{
    ActiveSubscriberGuard, DerivedFn, EffectFn, SubscriberId, SubscriberKind, SubscriberMeta,
    current_subscriber, enqueue_pending, subscriber_arena_insert, take_pending,
};
