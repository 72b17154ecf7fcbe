// Protocol-agnostic decoded data tree.
//
// All three structured codecs decode into this shape. Containers keep
// key insertion order; lists keep element order, which is the only
// ordering with protocol semantics (ordered leaf-lists).

use indexmap::IndexMap;
use serde::Serialize;

use crate::path::{Path, Segment};

/// A decoded data node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(String),
    List(Vec<Value>),
    Container(IndexMap<String, Value>),
}

impl Value {
    pub fn container() -> Self {
        Self::Container(IndexMap::new())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Uint(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Uint(n) => Some(*n),
            Self::Int(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Child of a container by key. For JSON-IETF data, tries the
    /// module-qualified key first, then the bare name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Container(map) => map.get(key),
            _ => None,
        }
    }

    /// Walk `path` from this node, honoring key predicates on list
    /// segments. Returns `None` when any segment is absent.
    pub fn find(&self, path: &Path) -> Option<&Value> {
        let mut node = self;
        for segment in &path.segments {
            node = node.child(segment)?;
        }
        Some(node)
    }

    fn child(&self, segment: &Segment) -> Option<&Value> {
        let Self::Container(map) = self else {
            return None;
        };
        let named = segment
            .module
            .as_ref()
            .and_then(|module| map.get(&format!("{module}:{}", segment.name)))
            .or_else(|| map.get(&segment.name))?;
        if segment.keys.is_empty() {
            return Some(named);
        }
        match named {
            Self::List(items) => items.iter().find(|item| item.matches_keys(&segment.keys)),
            Self::Container(_) if named.matches_keys(&segment.keys) => Some(named),
            _ => None,
        }
    }

    fn matches_keys(&self, keys: &[(String, String)]) -> bool {
        let Self::Container(map) = self else {
            return false;
        };
        keys.iter().all(|(key, expected)| {
            map.get(key).is_some_and(|v| v.scalar_text().as_deref() == Some(expected))
        })
    }

    /// Scalar rendered as text, used for key comparison.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            Self::Bool(b) => Some(b.to_string()),
            Self::Int(n) => Some(n.to_string()),
            Self::Uint(n) => Some(n.to_string()),
            Self::Double(n) => Some(n.to_string()),
            Self::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Self::Uint(u)
                } else {
                    Self::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Container(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
