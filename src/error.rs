//! Misuse errors.
//!
//! These are the synchronous errors of the engine: they are returned to the
//! caller at the point of misuse. Subscriber execution failures are a
//! different category entirely - those are caught at the propagation
//! boundary and logged, never surfaced as `Err` (see the scheduler).

use thiserror::Error;

/// Error returned for misused engine calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// The value is a scalar and cannot be wrapped; only objects and arrays
    /// carry reactive state.
    #[error("value of this type cannot be made reactive")]
    NotWrappable,

    /// The handle no longer points at a live reactive cell.
    #[error("reactive handle is no longer attached to a live object")]
    StaleHandle,

    /// An array operation was invoked on an object handle.
    #[error("operation requires an array, but the handle wraps an object")]
    ExpectedArray,

    /// An object operation was invoked on an array handle.
    #[error("operation requires an object, but the handle wraps an array")]
    ExpectedObject,
}
