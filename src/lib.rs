#![deny(missing_docs)]

//! Fine-grained reactive state for DOM binding layers.
//!
//! This crate turns a plain data value into a reactive object: property
//! reads are tracked against whatever subscriber is currently running, and
//! property writes re-run exactly the effects and derived values that read
//! them. The engine knows nothing about elements, selectors or documents -
//! binding layers register effects that read reactive state and apply the
//! result to whatever they resolved elsewhere.
//!
//! # Quick Start
//!
//! ```ignore
//! use reflow::{Value, batch, computed, create_reactive, effect};
//!
//! let state = create_reactive(Value::object([("count", 0)]))?;
//!
//! // Effects auto-track what they read and re-run on writes, synchronously.
//! let binding = effect(move || {
//!     let count = state.get("count");
//!     label.set_text(format!("{count:?}"));
//! });
//!
//! // Derived values are lazy and memoized.
//! computed(state, "double", move || {
//!     Value::Num(state.get("count").as_num().unwrap_or(0.0) * 2.0)
//! })?;
//!
//! // Batches coalesce: the effect observes only the final value, once.
//! batch(|| {
//!     state.set("count", 1);
//!     state.set("count", 2);
//! });
//!
//! binding.dispose(); // explicit, idempotent
//! ```
//!
//! # Core Types
//!
//! - [`Value`] - plain data (scalars, objects, arrays) plus [`Value::Ref`],
//!   the link to a live reactive cell.
//! - [`Reactive`] - handle for one reactive object: `get`/`set`/`remove`
//!   for objects, `index`/`set_index` and the structural mutators for
//!   arrays.
//! - [`Effect`] - disposer handle returned by [`effect`] and [`watch`].
//! - [`ReactiveError`] - synchronous misuse errors.
//!
//! # Reading and writing
//!
//! Reads are recorded only while a subscriber is running; plain reads from
//! application code are free. Writes suppress when the stored value is
//! already equal, propagate synchronously when no batch is open, and park
//! affected effects (deduplicated) until the outermost [`batch`] exits
//! otherwise. Nested plain containers become reactive lazily on first
//! read and keep their identity from then on.
//!
//! # Derived values
//!
//! [`computed`] attaches a memoized derivation to a key. It is evaluated
//! on read, never on write: a write to one of its dependencies only marks
//! it dirty and notifies its readers. Chains of derived values propagate
//! the same way.
//!
//! # Failure policy
//!
//! A panicking subscriber body is caught at the propagation boundary,
//! logged through `tracing`, and the remaining subscribers still run.
//! Nothing is rethrown into the code that performed the write. Misuse
//! (wrapping a scalar, attaching a derivation to a dead handle, array ops
//! on an object) is an error at the call site instead.
//!
//! # Threading
//!
//! The engine is strictly single-threaded: all bookkeeping lives in
//! thread-locals and handles are plain indices. Use it from one thread.

pub(crate) mod arena;
mod computed;
mod effect;
mod error;
mod handle;
mod hash;
mod scheduler;
mod value;
mod watch;

pub use computed::computed;
pub use effect::{Effect, effect, untrack};
pub use error::ReactiveError;
pub use handle::{Reactive, create_reactive, is_reactive, notify, to_raw, wrap};
pub use scheduler::batch;
pub use value::Value;
pub use watch::{watch, watch_fn};

#[cfg(test)]
mod tests;
