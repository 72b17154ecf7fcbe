// Protocol-agnostic operation and result types.
//
// The facade and all four protocol sessions speak in these; codecs
// translate them to wire shapes. The merge policy on writes is the
// safety-critical field here: nothing in this crate defaults it, every
// write call site names one explicitly.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::capabilities::Encoding;
use crate::path::Path;
use crate::value::Value;

/// Which class of data a read returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Scope {
    ConfigOnly,
    StateOnly,
    Both,
}

/// Edit semantics for a write. `Replace`, `Delete`, and `Remove` have
/// destructive blast radius and are tagged as such in telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum MergePolicy {
    /// Additive: overwrite by key, leave siblings alone.
    Merge,
    /// Wholesale subtree replacement.
    Replace,
    /// Like merge, but fails if the node already exists.
    Create,
    /// Removes the node, fails if it does not exist.
    Delete,
    /// Removes the node, silently succeeds if it does not exist.
    Remove,
}

impl MergePolicy {
    /// Policies that can destroy configuration outside the payload.
    pub fn is_destructive(self) -> bool {
        matches!(self, Self::Replace | Self::Delete | Self::Remove)
    }

    /// Whether this policy writes a payload (existence-only policies
    /// address a node without supplying content).
    pub fn carries_payload(self) -> bool {
        !matches!(self, Self::Delete | Self::Remove)
    }

    /// The NETCONF `operation` attribute value (RFC 6241 §7.2).
    pub(crate) fn netconf_operation(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Replace => "replace",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Remove => "remove",
        }
    }
}

/// Delivery cadence for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionMode {
    /// Periodic samples at the given interval.
    Sample(Duration),
    /// Updates only when the value changes.
    OnChange,
}

/// Opaque write payload plus its declared encoding. Produced by an
/// out-of-scope collaborator (templating, config generation); the
/// sessions only verify the encoding against negotiated capabilities.
#[derive(Debug, Clone)]
pub struct Payload {
    pub bytes: Bytes,
    pub encoding: Encoding,
}

impl Payload {
    pub fn new(bytes: impl Into<Bytes>, encoding: Encoding) -> Self {
        Self { bytes: bytes.into(), encoding }
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self { bytes: Bytes::from(value.to_string()), encoding: Encoding::Json }
    }

    pub fn xml(body: impl Into<String>) -> Self {
        Self { bytes: Bytes::from(body.into()), encoding: Encoding::Xml }
    }

    pub fn ascii(text: impl Into<String>) -> Self {
        Self { bytes: Bytes::from(text.into()), encoding: Encoding::Ascii }
    }
}

/// One edit inside an atomic multi-edit bundle (RESTCONF YANG-PATCH,
/// NETCONF candidate batches, gNMI SetRequest).
#[derive(Debug, Clone)]
pub struct PatchEdit {
    pub path: Path,
    pub operation: MergePolicy,
    /// Absent for existence-only operations (`Delete`, `Remove`).
    pub payload: Option<Payload>,
}

/// Decoded read result: the value tree plus which class of data it
/// came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub origin: Scope,
    pub root: Value,
}

/// One decoded subscription update. A `Null` value reports a deletion
/// at `path`.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub path: Path,
    pub value: Value,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Session liveness as observed by the protocol layer.
///
/// `Degraded` means a request deadline expired on a stateful transport
/// where a stray late reply may still arrive; correlation IDs discard
/// those, but callers may prefer to reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SessionHealth {
    Ready,
    Degraded,
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destructive_policies_are_flagged() {
        assert!(!MergePolicy::Merge.is_destructive());
        assert!(!MergePolicy::Create.is_destructive());
        assert!(MergePolicy::Replace.is_destructive());
        assert!(MergePolicy::Delete.is_destructive());
        assert!(MergePolicy::Remove.is_destructive());
    }

    #[test]
    fn existence_only_policies_carry_no_payload() {
        assert!(MergePolicy::Merge.carries_payload());
        assert!(!MergePolicy::Delete.carries_payload());
        assert!(!MergePolicy::Remove.carries_payload());
    }
}
