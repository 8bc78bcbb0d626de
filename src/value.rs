//! The dynamically typed value space shared by every component

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::channel::Channel;
use crate::task::TaskHandle;

/// An opaque runtime object that can be carried in a [`Value::Handle`].
///
/// Channels and tasks are the two handle kinds the core itself produces;
/// opcodes may stash arbitrary `Any` objects behind `Handle::Opaque`.
#[derive(Clone)]
pub enum Handle {
    Channel(Arc<Channel>),
    Task(TaskHandle),
    Opaque(Arc<dyn std::any::Any + Send + Sync>),
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Channel(_) => write!(f, "Handle::Channel"),
            Handle::Task(t) => write!(f, "Handle::Task({})", t.id()),
            Handle::Opaque(_) => write!(f, "Handle::Opaque"),
        }
    }
}

/// The universal value space: integers, floats, booleans, strings,
/// ordered sequences, unordered string-keyed mappings, opaque handles,
/// and a null/unit marker.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    Handle(Handle),
    Null,
}

impl Value {
    /// Standard truthiness: non-zero numbers, non-empty sequences/mappings,
    /// non-empty strings, non-null handles.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Bool(b) => *b,
            Value::String(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Handle(_) => true,
            Value::Null => false,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_channel(&self) -> Option<Arc<Channel>> {
        match self {
            Value::Handle(Handle::Channel(c)) => Some(c.clone()),
            _ => None,
        }
    }

    pub fn as_task(&self) -> Option<TaskHandle> {
        match self {
            Value::Handle(Handle::Task(t)) => Some(t.clone()),
            _ => None,
        }
    }

    /// Keys for `ForEach` over a mapping, or items for a sequence view.
    pub fn iter_items(&self) -> LexFlowIter {
        match self {
            Value::Map(m) => LexFlowIter::Keys(m.keys().cloned().collect::<Vec<_>>().into_iter()),
            Value::List(l) => LexFlowIter::Items(l.clone().into_iter()),
            Value::String(s) => LexFlowIter::Items(
                s.chars()
                    .map(|c| Value::String(c.to_string()))
                    .collect::<Vec<_>>()
                    .into_iter(),
            ),
            other => LexFlowIter::Items(vec![other.clone()].into_iter()),
        }
    }
}

pub enum LexFlowIter {
    Keys(std::vec::IntoIter<String>),
    Items(std::vec::IntoIter<Value>),
}

impl Iterator for LexFlowIter {
    type Item = Value;
    fn next(&mut self) -> Option<Value> {
        match self {
            LexFlowIter::Keys(it) => it.next().map(Value::String),
            LexFlowIter::Items(it) => it.next(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Null => write!(f, "null"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Handle(h) => write!(f, "{h:?}"),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::List(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Map(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Values embedded in a parsed document (literals, workflow `locals`
/// defaults, program globals) round-trip through `serde_json::Value`
/// rather than implementing `Serialize`/`Deserialize` directly, since
/// `Handle` has no on-the-wire representation. This keeps the AST's own
/// round-trip (structurally compared, not byte-compared) the sole
/// testable property.
impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(n) => serializer.serialize_f64(*n),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::String(s) => serializer.serialize_str(s),
            Value::Null => serializer.serialize_none(),
            Value::List(items) => items.serialize(serializer),
            Value::Map(m) => m.serialize(serializer),
            Value::Handle(_) => serializer.serialize_str("<handle>"),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from(json))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}
