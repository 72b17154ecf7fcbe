// NETCONF XML codec.
//
// Builds rpc envelopes (subtree filters, edit-config trees, datastore
// operations) and parses rpc-reply / notification frames into the
// shared value tree. Namespaces are resolved through a `ModelRegistry`
// computed once per session: a path whose module is bound to a
// namespace only matches response elements in that namespace, and a
// miss is an explicit lookup failure rather than an empty result.
//
// XML carries no type information without a schema, so decoded leaves
// stay strings; typed trees come from the JSON and gNMI codecs.

use std::collections::HashMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use quick_xml::NsReader;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::name::ResolveResult;

use crate::capabilities::{NETCONF_BASE_1_0, NETCONF_BASE_1_1};
use crate::error::Error;
use crate::op::{MergePolicy, Scope};
use crate::path::{Path, Segment};
use crate::value::Value;

pub(crate) const BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
const NOTIFICATION_NS: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";

// ── Model registry ──────────────────────────────────────────────────

/// Module-name (or element-name) to XML-namespace bindings, computed
/// once at session construction.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    bindings: HashMap<String, String>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self { bindings: HashMap::new() }
    }

    /// Bindings for the common IETF models; callers add vendor models
    /// with [`ModelRegistry::bind`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (module, ns) in [
            ("ietf-interfaces", "urn:ietf:params:xml:ns:yang:ietf-interfaces"),
            ("ietf-ip", "urn:ietf:params:xml:ns:yang:ietf-ip"),
            ("ietf-system", "urn:ietf:params:xml:ns:yang:ietf-system"),
            ("ietf-netconf-monitoring", "urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring"),
            ("ietf-yang-library", "urn:ietf:params:xml:ns:yang:ietf-yang-library"),
        ] {
            registry.bind(module, ns);
        }
        registry
    }

    pub fn bind(&mut self, module: impl Into<String>, namespace: impl Into<String>) {
        self.bindings.insert(module.into(), namespace.into());
    }

    /// Namespace a segment must live in, if one is bound. The module
    /// prefix wins over an element-name binding.
    pub(crate) fn namespace_for(&self, segment: &Segment) -> Option<&str> {
        segment
            .module
            .as_deref()
            .and_then(|module| self.bindings.get(module))
            .or_else(|| self.bindings.get(&segment.name))
            .map(String::as_str)
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ── Request building ────────────────────────────────────────────────

pub(crate) fn hello() -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <hello xmlns=\"{BASE_NS}\"><capabilities>\
         <capability>{NETCONF_BASE_1_0}</capability>\
         <capability>{NETCONF_BASE_1_1}</capability>\
         </capabilities></hello>"
    )
}

pub(crate) fn rpc_envelope(message_id: u64, body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <rpc xmlns=\"{BASE_NS}\" message-id=\"{message_id}\">{body}</rpc>"
    )
}

/// `<get>`/`<get-config>` body with a subtree filter derived from the
/// path. NETCONF has no state-only retrieval; `StateOnly` and `Both`
/// use `<get>`, which returns config and state together.
pub(crate) fn get_rpc(path: &Path, scope: Scope, registry: &ModelRegistry) -> String {
    let filter = match subtree_filter(path, registry) {
        Some(filter) => format!("<filter type=\"subtree\">{filter}</filter>"),
        None => String::new(),
    };
    match scope {
        Scope::ConfigOnly => {
            format!("<get-config><source><running/></source>{filter}</get-config>")
        }
        Scope::StateOnly | Scope::Both => format!("<get>{filter}</get>"),
    }
}

pub(crate) fn edit_config_rpc(
    path: &Path,
    payload: Option<&str>,
    policy: MergePolicy,
    datastore: &str,
    registry: &ModelRegistry,
) -> Result<String, Error> {
    let Some((last, ancestors)) = path.segments.split_last() else {
        return Err(Error::unsupported("edit-config requires a non-root path"));
    };

    let mut config = String::new();
    let mut parent_ns = None;
    for segment in ancestors {
        let ns = registry.namespace_for(segment);
        open_tag(&mut config, segment, ns, parent_ns, None);
        parent_ns = ns.or(parent_ns);
    }

    let ns = registry.namespace_for(last);
    open_tag(&mut config, last, ns, parent_ns, Some(policy.netconf_operation()));
    if let Some(body) = payload {
        config.push_str(body);
    }
    let _ = write!(config, "</{}>", last.name);

    for segment in ancestors.iter().rev() {
        let _ = write!(config, "</{}>", segment.name);
    }

    Ok(format!(
        "<edit-config><target><{datastore}/></target>\
         <default-operation>merge</default-operation>\
         <config xmlns:nc=\"{BASE_NS}\">{config}</config></edit-config>"
    ))
}

pub(crate) fn datastore_rpc(op: &str, datastore: &str) -> String {
    match op {
        "lock" | "unlock" => format!("<{op}><target><{datastore}/></target></{op}>"),
        "validate" => format!("<validate><source><{datastore}/></source></validate>"),
        other => format!("<{other}/>"),
    }
}

pub(crate) fn create_subscription_rpc(path: &Path, registry: &ModelRegistry) -> String {
    let filter = match subtree_filter(path, registry) {
        Some(filter) => format!("<filter type=\"subtree\">{filter}</filter>"),
        None => String::new(),
    };
    format!("<create-subscription xmlns=\"{NOTIFICATION_NS}\">{filter}</create-subscription>")
}

/// Subtree filter selecting `path`: nested elements with key leaves,
/// the innermost left empty to select its whole subtree. `None` for
/// the root path (no filter selects everything).
fn subtree_filter(path: &Path, registry: &ModelRegistry) -> Option<String> {
    if path.is_root() {
        return None;
    }
    let mut out = String::new();
    filter_body(&path.segments, registry, None, &mut out);
    Some(out)
}

fn filter_body(
    segments: &[Segment],
    registry: &ModelRegistry,
    parent_ns: Option<&str>,
    out: &mut String,
) {
    let Some((segment, rest)) = segments.split_first() else {
        return;
    };
    let ns = registry.namespace_for(segment);
    if segment.keys.is_empty() && rest.is_empty() {
        open_tag_selfclosing(out, segment, ns, parent_ns);
        return;
    }
    open_tag(out, segment, ns, parent_ns, None);
    filter_body(rest, registry, ns.or(parent_ns), out);
    let _ = write!(out, "</{}>", segment.name);
}

fn open_tag(
    out: &mut String,
    segment: &Segment,
    ns: Option<&str>,
    parent_ns: Option<&str>,
    operation: Option<&str>,
) {
    let _ = write!(out, "<{}", segment.name);
    if let Some(ns) = ns {
        if parent_ns != Some(ns) {
            let _ = write!(out, " xmlns=\"{}\"", escape(ns));
        }
    }
    if let Some(op) = operation {
        let _ = write!(out, " nc:operation=\"{op}\"");
    }
    out.push('>');
    for (key, value) in &segment.keys {
        let _ = write!(out, "<{key}>{}</{key}>", escape(value));
    }
}

fn open_tag_selfclosing(
    out: &mut String,
    segment: &Segment,
    ns: Option<&str>,
    parent_ns: Option<&str>,
) {
    let _ = write!(out, "<{}", segment.name);
    if let Some(ns) = ns {
        if parent_ns != Some(ns) {
            let _ = write!(out, " xmlns=\"{}\"", escape(ns));
        }
    }
    out.push_str("/>");
}

// ── Response parsing ────────────────────────────────────────────────

/// One parsed XML element with its resolved namespace.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct XmlNode {
    pub ns: Option<String>,
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    pub text: String,
}

impl XmlNode {
    pub(crate) fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub(crate) fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    pub(crate) fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

/// Parse one XML document into a node tree.
pub(crate) fn parse_tree(bytes: &[u8]) -> Result<XmlNode, Error> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::malformed("XML", format!("not UTF-8: {e}")))?;
    let mut reader = NsReader::from_str(text);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;
    loop {
        let (resolve, event) = reader
            .read_resolved_event()
            .map_err(|e| Error::malformed("XML", e.to_string()))?;
        match event {
            Event::Start(start) => {
                stack.push(make_node(&resolve, &start)?);
            }
            Event::Empty(start) => {
                let node = make_node(&resolve, &start)?;
                attach(&mut stack, &mut root, node);
            }
            Event::Text(t) => {
                let decoded =
                    t.unescape().map_err(|e| Error::malformed("XML", e.to_string()))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(decoded.trim());
                }
            }
            Event::CData(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| Error::malformed("XML", "unbalanced end tag"))?;
                attach(&mut stack, &mut root, node);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(Error::malformed("XML", "unterminated element"));
    }
    root.ok_or_else(|| Error::malformed("XML", "no root element"))
}

fn make_node(resolve: &ResolveResult<'_>, start: &quick_xml::events::BytesStart<'_>) -> Result<XmlNode, Error> {
    let ns = match resolve {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
        _ => None,
    };
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::malformed("XML", e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| Error::malformed("XML", e.to_string()))?
            .into_owned();
        attrs.push((key, value));
    }
    Ok(XmlNode { ns, name, attrs, children: Vec::new(), text: String::new() })
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else if root.is_none() {
        *root = Some(node);
    }
}

/// A decoded inbound frame: either an rpc-reply or an asynchronous
/// notification (RFC 5277 interleaves them on one session).
#[derive(Debug)]
pub(crate) enum Frame {
    Reply(RpcReply),
    Notification(EventNotification),
}

#[derive(Debug)]
pub(crate) struct RpcReply {
    pub message_id: Option<u64>,
    pub data: Option<XmlNode>,
    pub errors: Vec<RpcError>,
}

#[derive(Debug, Clone)]
pub(crate) struct RpcError {
    pub severity: Option<String>,
    pub tag: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug)]
pub(crate) struct EventNotification {
    pub event_time: Option<DateTime<Utc>>,
    pub body: Option<XmlNode>,
}

pub(crate) fn parse_frame(bytes: &[u8]) -> Result<Frame, Error> {
    let root = parse_tree(bytes)?;
    match root.name.as_str() {
        "rpc-reply" => {
            let message_id = root.attr("message-id").and_then(|v| v.parse().ok());
            let mut data = None;
            let mut errors = Vec::new();
            for child in root.children {
                match child.name.as_str() {
                    "data" => data = Some(child),
                    "rpc-error" => errors.push(RpcError {
                        severity: child.child_text("error-severity").map(str::to_owned),
                        tag: child.child_text("error-tag").map(str::to_owned),
                        message: child.child_text("error-message").map(str::to_owned),
                    }),
                    _ => {}
                }
            }
            Ok(Frame::Reply(RpcReply { message_id, data, errors }))
        }
        "notification" => {
            let event_time = root
                .child_text("eventTime")
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc));
            let body = root.children.into_iter().find(|c| c.name != "eventTime");
            Ok(Frame::Notification(EventNotification { event_time, body }))
        }
        other => Err(Error::malformed("NETCONF", format!("unexpected root element <{other}>"))),
    }
}

/// Parse the server `<hello>`: advertised capability URIs and the
/// session-id.
pub(crate) fn parse_hello(bytes: &[u8]) -> Result<(Vec<String>, Option<u64>), Error> {
    let root = parse_tree(bytes)?;
    if root.name != "hello" {
        return Err(Error::malformed(
            "NETCONF",
            format!("expected <hello>, got <{}>", root.name),
        ));
    }
    let capabilities = root
        .child("capabilities")
        .map(|caps| {
            caps.children
                .iter()
                .filter(|c| c.name == "capability")
                .map(|c| c.text.clone())
                .collect()
        })
        .unwrap_or_default();
    let session_id = root.child_text("session-id").and_then(|v| v.parse().ok());
    Ok((capabilities, session_id))
}

impl RpcReply {
    /// Collapse server-reported errors into the shared taxonomy.
    /// Warning-severity entries are not failures.
    pub(crate) fn into_checked(self) -> Result<Option<XmlNode>, Error> {
        let fatal = self
            .errors
            .iter()
            .find(|e| e.severity.as_deref() != Some("warning"));
        if let Some(error) = fatal {
            return Err(Error::Rejected {
                message: error
                    .message
                    .clone()
                    .or_else(|| error.tag.clone())
                    .unwrap_or_else(|| "rpc-error without message".to_owned()),
                severity: error.severity.clone(),
                tag: error.tag.clone(),
                atomic: false,
            });
        }
        Ok(self.data)
    }
}

/// Walk the `<data>` tree along `path`, enforcing bound namespaces and
/// key predicates. A miss is `NodeNotFound`, never an empty tree.
pub(crate) fn extract<'a>(
    data: &'a XmlNode,
    path: &Path,
    registry: &ModelRegistry,
) -> Result<&'a XmlNode, Error> {
    let mut node = data;
    for segment in &path.segments {
        let required_ns = registry.namespace_for(segment);
        node = node
            .children
            .iter()
            .find(|child| {
                child.name == segment.name
                    && required_ns.is_none_or(|ns| child.ns.as_deref() == Some(ns))
                    && segment_keys_match(child, segment)
            })
            .ok_or_else(|| Error::NodeNotFound { path: path.to_string() })?;
    }
    Ok(node)
}

fn segment_keys_match(node: &XmlNode, segment: &Segment) -> bool {
    segment
        .keys
        .iter()
        .all(|(key, value)| node.child_text(key) == Some(value.as_str()))
}

/// Convert a parsed element into the protocol-agnostic tree. Repeated
/// child names fold into lists; leaves stay textual.
pub(crate) fn node_to_value(node: &XmlNode) -> Value {
    if node.children.is_empty() {
        if node.text.is_empty() {
            return Value::Null;
        }
        return Value::String(node.text.clone());
    }
    let mut map: IndexMap<String, Value> = IndexMap::new();
    for child in &node.children {
        let value = node_to_value(child);
        match map.get_mut(&child.name) {
            None => {
                map.insert(child.name.clone(), value);
            }
            Some(Value::List(items)) => items.push(value),
            Some(existing) => {
                let first = std::mem::replace(existing, Value::Null);
                *existing = Value::List(vec![first, value]);
            }
        }
    }
    Value::Container(map)
}
