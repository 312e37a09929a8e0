//! Snapshot-diffing convenience effects.
//!
//! `watch` layers a comparison on top of a plain effect: the source is
//! re-read on every invalidation like any effect body, but the callback
//! only fires when the captured value actually differs from the previous
//! snapshot - structurally, not by identity, so a watched object that is
//! replaced by an equal object stays quiet.

use std::collections::HashSet;

use crate::effect::{Effect, effect, untrack};
use crate::error::ReactiveError;
use crate::handle::Reactive;
use crate::value::Value;

/// Watch one property of a reactive object.
///
/// Runs `callback(new, old)` whenever the value at `key` changes
/// structurally. Nested objects are captured (and therefore tracked)
/// deeply: a write to `state.nested.x` re-evaluates a watcher on
/// `"nested"`. The first run only establishes the baseline snapshot; the
/// callback fires from the second distinct value on.
///
/// # Errors
///
/// [`ReactiveError::StaleHandle`] when `handle` is no longer live.
pub fn watch<F>(handle: Reactive, key: &str, callback: F) -> Result<Effect, ReactiveError>
where
    F: FnMut(&Value, &Value) + 'static,
{
    if !handle.is_live() {
        return Err(ReactiveError::StaleHandle);
    }
    let key = key.to_owned();
    Ok(watch_fn(move || handle.get(&key), callback))
}

/// Watch an arbitrary tracked computation.
///
/// `source` runs as an effect body (its reads are tracked); `callback`
/// runs untracked, so reactive reads inside it do not become dependencies
/// of the watcher.
pub fn watch_fn<S, F>(mut source: S, mut callback: F) -> Effect
where
    S: FnMut() -> Value + 'static,
    F: FnMut(&Value, &Value) + 'static,
{
    let mut previous: Option<Value> = None;
    effect(move || {
        let current = capture(source());
        match previous.take() {
            None => previous = Some(current),
            Some(old) => {
                if old == current {
                    cov_mark::hit!(watch_unchanged_skipped);
                    previous = Some(old);
                } else {
                    // Snapshot first: a panicking callback is caught at the
                    // propagation boundary and must not desync the baseline.
                    previous = Some(current.clone());
                    untrack(|| callback(&current, &old));
                }
            }
        }
    })
}

/// Deep, *tracked* capture of a value: links are resolved through the
/// public read path so every nested key the snapshot touches becomes a
/// dependency of the watcher. Reference cycles capture as null.
fn capture(value: Value) -> Value {
    let mut visiting = HashSet::new();
    capture_inner(value, &mut visiting)
}

fn capture_inner(value: Value, visiting: &mut HashSet<Reactive>) -> Value {
    match value {
        Value::Ref(handle) => {
            if !visiting.insert(handle) {
                return Value::Null;
            }
            let out = if handle.is_array() {
                Value::Array(
                    handle
                        .to_vec()
                        .into_iter()
                        .map(|item| capture_inner(item, visiting))
                        .collect(),
                )
            } else {
                Value::Object(
                    handle
                        .keys()
                        .into_iter()
                        .map(|key| {
                            let item = handle.get(&key);
                            (key, capture_inner(item, visiting))
                        })
                        .collect(),
                )
            };
            visiting.remove(&handle);
            out
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (key, capture_inner(item, visiting)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| capture_inner(item, visiting))
                .collect(),
        ),
        other => other,
    }
}
