//! Plain data model for reactive state.
//!
//! A [`Value`] is an ordinary JSON-shaped tree: scalars, insertion-ordered
//! objects and arrays. The one special variant is [`Value::Ref`], a link to a
//! live reactive cell - it is what nested objects turn into once the engine
//! has wrapped them, and it is how one reactive object is stored inside
//! another without duplicating state.

use crate::handle::Reactive;
use indexmap::IndexMap;

/// A plain data value, or a link to a reactive cell.
///
/// Objects use [`IndexMap`] so key iteration follows insertion order; that
/// ordering carries through to dependency registration and therefore to
/// propagation order, which is required to be deterministic.
///
/// Equality is structural for plain data and identity-based for [`Ref`]
/// links (two `Ref`s are equal only when they point at the same cell).
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Absent / null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Number. All numerics are `f64`, as in the host document model.
    Num(f64),
    /// String.
    Str(String),
    /// Plain (inert) object. Becomes reactive when wrapped or first read
    /// through a reactive parent.
    Object(IndexMap<String, Value>),
    /// Plain (inert) array.
    Array(Vec<Value>),
    /// Link to a live reactive cell.
    Ref(Reactive),
}

impl Value {
    /// Build an object value from key/value pairs.
    pub fn object<K, V, I>(entries: I) -> Value
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build an array value from items.
    pub fn array<V, I>(items: I) -> Value
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Value::Array(items.into_iter().map(Into::into).collect())
    }

    /// True for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for plain `Object`/`Array` payloads (wrappable, not yet wrapped).
    pub(crate) fn is_plain_container(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Array(_))
    }

    /// Numeric view.
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// Boolean view.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Reactive-link view.
    pub fn as_handle(&self) -> Option<Reactive> {
        match self {
            Value::Ref(handle) => Some(*handle),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Num(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Num(v as f64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Num(v as f64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Num(v as f64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Num(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(v: IndexMap<String, Value>) -> Self {
        Value::Object(v)
    }
}

impl From<Reactive> for Value {
    fn from(v: Reactive) -> Self {
        Value::Ref(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
