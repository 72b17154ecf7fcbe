// Abstract data-tree addressing.
//
// One `Path` form serves all four protocols; each codec converts it to
// its native shape (XML subtree filter, RESTCONF URI, gNMI path
// elements). Textual form:
//
//   /ietf-interfaces:interfaces/interface[name=eth0]/state
//
// Key predicates are order-insensitive for equality and hashing, so a
// path decoded from a protocol that stores keys in a map compares equal
// to the one that produced it.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

use crate::error::Error;

/// One element of a [`Path`]: optional module prefix, element name,
/// and zero or more `[key=value]` predicates.
#[derive(Debug, Clone, Eq, Serialize)]
pub struct Segment {
    pub module: Option<String>,
    pub name: String,
    pub keys: Vec<(String, String)>,
}

impl Segment {
    pub fn new(name: impl Into<String>) -> Self {
        Self { module: None, name: name.into(), keys: Vec::new() }
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.keys.push((key.into(), value.into()));
        self
    }

    fn sorted_keys(&self) -> Vec<(&str, &str)> {
        let mut keys: Vec<(&str, &str)> =
            self.keys.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        keys.sort_unstable();
        keys
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.module == other.module
            && self.name == other.name
            && self.sorted_keys() == other.sorted_keys()
    }
}

impl Hash for Segment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.module.hash(state);
        self.name.hash(state);
        self.sorted_keys().hash(state);
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(module) = &self.module {
            write!(f, "{module}:")?;
        }
        write!(f, "{}", self.name)?;
        for (k, v) in &self.keys {
            write!(f, "[{k}={v}]")?;
        }
        Ok(())
    }
}

/// Ordered sequence of segments addressing one data-tree location.
/// An empty path addresses the datastore root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Path {
    pub segments: Vec<Segment>,
}

impl Path {
    /// The datastore root.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Parse the textual form. Accepts a leading `/`; `/` alone (or an
    /// empty string) is the root.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let trimmed = input.trim();
        let body = trimmed.strip_prefix('/').unwrap_or(trimmed);
        if body.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for raw in split_segments(input, body)? {
            segments.push(parse_segment(input, raw)?);
        }
        Ok(Self { segments })
    }

    /// Module prefix of the first segment, if any. The XML codec uses
    /// it to pick the filter namespace.
    pub fn root_module(&self) -> Option<&str> {
        self.segments.first().and_then(|s| s.module.as_deref())
    }

    /// Everything but the last segment; the root's parent is the root.
    pub fn parent(&self) -> Self {
        let mut segments = self.segments.clone();
        segments.pop();
        Self { segments }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// Split on `/` outside key predicates.
fn split_segments<'a>(full: &str, body: &'a str) -> Result<Vec<&'a str>, Error> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in body.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => {
                depth = depth.checked_sub(1).ok_or_else(|| Error::InvalidPath {
                    path: full.to_owned(),
                    detail: "unbalanced ']'".into(),
                })?;
            }
            '/' if depth == 0 => {
                parts.push(&body[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(Error::InvalidPath { path: full.to_owned(), detail: "unterminated '['".into() });
    }
    parts.push(&body[start..]);
    Ok(parts)
}

fn parse_segment(full: &str, raw: &str) -> Result<Segment, Error> {
    let invalid = |detail: &str| Error::InvalidPath {
        path: full.to_owned(),
        detail: detail.to_owned(),
    };

    let (head, preds) = match raw.find('[') {
        Some(idx) => (&raw[..idx], &raw[idx..]),
        None => (raw, ""),
    };
    if head.is_empty() {
        return Err(invalid("empty segment"));
    }

    let (module, name) = match head.split_once(':') {
        Some((module, name)) if !module.is_empty() && !name.is_empty() => {
            (Some(module.to_owned()), name.to_owned())
        }
        Some(_) => return Err(invalid("empty module prefix or name")),
        None => (None, head.to_owned()),
    };

    let mut keys = Vec::new();
    let mut rest = preds;
    while !rest.is_empty() {
        let inner_end = rest.find(']').ok_or_else(|| invalid("unterminated '['"))?;
        let inner = rest.get(1..inner_end).ok_or_else(|| invalid("unterminated '['"))?;
        let (key, value) = inner.split_once('=').ok_or_else(|| invalid("predicate missing '='"))?;
        if key.is_empty() {
            return Err(invalid("predicate missing key name"));
        }
        keys.push((key.to_owned(), unquote(value).to_owned()));
        rest = &rest[inner_end + 1..];
        if !rest.is_empty() && !rest.starts_with('[') {
            return Err(invalid("text after predicate"));
        }
    }

    Ok(Segment { module, name, keys })
}

/// Strip one level of matching quotes, as XPath-style predicates allow
/// both `[name=eth0]` and `[name="eth0"]`.
fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}
