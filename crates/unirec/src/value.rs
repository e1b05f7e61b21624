use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An attribute value. `Map` and `List` exist so an initial attribute bag can
/// carry nested child / collection stubs; for declared children they are
/// consumed by the record at construction or `set` time, and never appear in
/// a synchronization snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Map(HashMap<String, Value>),
    List(Vec<Value>),
}

/// The subset of values usable as a record identifier. Identifiers must be
/// hashable registry-key components, which rules out floats and compounds.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Id {
    Int(i64),
    Text(String),
}

impl Value {
    /// Extract an identifier from this value. Anything that is not an integer
    /// or non-empty string is treated as "not identifiable".
    pub fn as_id(&self) -> Option<Id> {
        match self {
            Value::Int(i) => Some(Id::Int(*i)),
            Value::Text(s) if !s.is_empty() => Some(Id::Text(s.clone())),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}
impl From<Id> for Value {
    fn from(id: Id) -> Self {
        match id {
            Id::Int(i) => Value::Int(i),
            Id::Text(s) => Value::Text(s),
        }
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Id::Int(i) => write!(fmt, "{}", i),
            Id::Text(s) => write!(fmt, "{}", s),
        }
    }
}

/// A bag of named attribute values, as passed to record construction and
/// `set_many`, and as returned by snapshotting.
pub type AttrMap = HashMap<String, Value>;
