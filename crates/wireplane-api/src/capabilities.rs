// Negotiated session capabilities.
//
// Populated exactly once during session establishment and read-only
// afterwards; a device whose feature set changes requires a fresh
// session. Each protocol family has its own constructor translating
// the protocol-native announcement into this shape.

use std::collections::BTreeSet;

use serde::Serialize;
use url::Url;

use crate::target::Protocol;

/// Payload encodings a session can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Encoding {
    Xml,
    Json,
    JsonIetf,
    Proto,
    Ascii,
}

/// One advertised data model (YANG module or gNMI model).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub organization: Option<String>,
    pub revision: Option<String>,
}

/// Datastore and transaction features of the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DatastoreSupport {
    pub candidate: bool,
    pub startup: bool,
    pub writable_running: bool,
    pub confirmed_commit: bool,
    pub validate: bool,
    pub locking: bool,
}

/// NETCONF base protocol version, which selects the framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum NetconfBase {
    V1_0,
    V1_1,
}

// NETCONF capability URIs (RFC 6241 / RFC 5277).
pub(crate) const NETCONF_BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";
pub(crate) const NETCONF_BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";
const NETCONF_CAP_CANDIDATE: &str = "urn:ietf:params:netconf:capability:candidate:1.0";
const NETCONF_CAP_STARTUP: &str = "urn:ietf:params:netconf:capability:startup:1.0";
const NETCONF_CAP_WRITABLE_RUNNING: &str = "urn:ietf:params:netconf:capability:writable-running:1.0";
const NETCONF_CAP_CONFIRMED_COMMIT: &str = "urn:ietf:params:netconf:capability:confirmed-commit";
const NETCONF_CAP_VALIDATE: &str = "urn:ietf:params:netconf:capability:validate";
const NETCONF_CAP_NOTIFICATION: &str = "urn:ietf:params:netconf:capability:notification:1.0";

// RESTCONF capability URI for YANG-PATCH support (RFC 8072).
const RESTCONF_CAP_YANG_PATCH: &str = "urn:ietf:params:restconf:capability:yang-patch:1.0";

/// The negotiated feature set of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub protocol: Protocol,
    pub encodings: Vec<Encoding>,
    /// Raw advertised capability URIs (NETCONF, RESTCONF) or empty for
    /// protocols without URI-based announcements.
    pub features: BTreeSet<String>,
    pub models: Vec<ModelInfo>,
    pub datastores: DatastoreSupport,
    /// Present only for NETCONF sessions.
    pub netconf_base: Option<NetconfBase>,
}

impl Capabilities {
    /// Interpret a NETCONF `<hello>` capability list. Fails the caller
    /// side of negotiation when no known base version is present.
    pub fn from_netconf(uris: Vec<String>) -> Option<Self> {
        let mut features = BTreeSet::new();
        let mut models = Vec::new();
        let mut datastores = DatastoreSupport {
            // <lock>/<unlock> are base protocol operations.
            locking: true,
            ..DatastoreSupport::default()
        };
        let mut base: Option<NetconfBase> = None;

        for uri in uris {
            match uri.as_str() {
                NETCONF_BASE_1_0 => base = base.max(Some(NetconfBase::V1_0)),
                NETCONF_BASE_1_1 => base = base.max(Some(NetconfBase::V1_1)),
                NETCONF_CAP_CANDIDATE => datastores.candidate = true,
                NETCONF_CAP_STARTUP => datastores.startup = true,
                NETCONF_CAP_WRITABLE_RUNNING => datastores.writable_running = true,
                other if other.starts_with(NETCONF_CAP_CONFIRMED_COMMIT) => {
                    datastores.confirmed_commit = true;
                }
                other if other.starts_with(NETCONF_CAP_VALIDATE) => datastores.validate = true,
                _ => {}
            }
            if let Some(model) = parse_module_uri(&uri) {
                models.push(model);
            }
            features.insert(uri);
        }

        Some(Self {
            protocol: Protocol::Netconf,
            encodings: vec![Encoding::Xml],
            features,
            models,
            datastores,
            netconf_base: Some(base?),
        })
    }

    /// Assemble RESTCONF capabilities from the monitoring resource's
    /// capability URIs.
    pub fn from_restconf(uris: Vec<String>) -> Self {
        Self {
            protocol: Protocol::Restconf,
            encodings: vec![Encoding::Json, Encoding::Xml],
            features: uris.into_iter().collect(),
            models: Vec::new(),
            datastores: DatastoreSupport {
                writable_running: true,
                ..DatastoreSupport::default()
            },
            netconf_base: None,
        }
    }

    /// Assemble gNMI capabilities from the Capabilities RPC response.
    pub fn from_gnmi(encodings: Vec<Encoding>, models: Vec<ModelInfo>, version: String) -> Self {
        let mut features = BTreeSet::new();
        features.insert(format!("gnmi-version:{version}"));
        Self {
            protocol: Protocol::Gnmi,
            encodings,
            features,
            models,
            datastores: DatastoreSupport {
                writable_running: true,
                ..DatastoreSupport::default()
            },
            netconf_base: None,
        }
    }

    /// Static descriptor for raw CLI sessions, which have no server
    /// announcement to read.
    pub fn cli() -> Self {
        Self {
            protocol: Protocol::Cli,
            encodings: vec![Encoding::Ascii],
            features: BTreeSet::new(),
            models: Vec::new(),
            datastores: DatastoreSupport::default(),
            netconf_base: None,
        }
    }

    pub fn supports_encoding(&self, encoding: Encoding) -> bool {
        self.encodings.contains(&encoding)
    }

    /// Whether the session can carry long-lived subscriptions.
    pub fn supports_subscribe(&self) -> bool {
        match self.protocol {
            Protocol::Netconf => self.features.contains(NETCONF_CAP_NOTIFICATION),
            Protocol::Restconf | Protocol::Gnmi => true,
            Protocol::Cli => false,
        }
    }

    /// Whether multi-edit bundles are atomic on this session.
    pub fn supports_atomic_patch(&self) -> bool {
        match self.protocol {
            Protocol::Netconf => self.datastores.candidate,
            Protocol::Restconf => self.features.contains(RESTCONF_CAP_YANG_PATCH),
            Protocol::Gnmi => true,
            Protocol::Cli => false,
        }
    }
}

/// YANG module announcements ride in capability URI query parameters:
/// `http://example.com/ns/foo?module=foo&revision=2024-01-10`.
fn parse_module_uri(uri: &str) -> Option<ModelInfo> {
    let parsed = Url::parse(uri).ok()?;
    let mut name = None;
    let mut revision = None;
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "module" => name = Some(value.into_owned()),
            "revision" => revision = Some(value.into_owned()),
            _ => {}
        }
    }
    Some(ModelInfo { name: name?, organization: None, revision })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn hello_uris() -> Vec<String> {
        vec![
            NETCONF_BASE_1_0.to_owned(),
            NETCONF_BASE_1_1.to_owned(),
            NETCONF_CAP_CANDIDATE.to_owned(),
            "urn:ietf:params:netconf:capability:validate:1.1".to_owned(),
            NETCONF_CAP_NOTIFICATION.to_owned(),
            "http://example.com/ns/yang/acme-qos?module=acme-qos&revision=2023-06-01".to_owned(),
        ]
    }

    #[test]
    fn netconf_capabilities_pick_highest_base() {
        let caps = Capabilities::from_netconf(hello_uris()).expect("base advertised");
        assert_eq!(caps.netconf_base, Some(NetconfBase::V1_1));
        assert!(caps.datastores.candidate);
        assert!(caps.datastores.validate);
        assert!(caps.datastores.locking);
        assert!(caps.supports_subscribe());
        assert!(caps.supports_atomic_patch());
    }

    #[test]
    fn netconf_without_base_fails() {
        assert_eq!(Capabilities::from_netconf(vec!["urn:example:junk".to_owned()]), None);
    }

    #[test]
    fn module_uris_become_models() {
        let caps = Capabilities::from_netconf(hello_uris()).expect("base advertised");
        assert_eq!(
            caps.models,
            vec![ModelInfo {
                name: "acme-qos".to_owned(),
                organization: None,
                revision: Some("2023-06-01".to_owned()),
            }]
        );
    }

    #[test]
    fn restconf_patch_support_requires_capability_uri() {
        let with = Capabilities::from_restconf(vec![RESTCONF_CAP_YANG_PATCH.to_owned()]);
        let without = Capabilities::from_restconf(Vec::new());
        assert!(with.supports_atomic_patch());
        assert!(!without.supports_atomic_patch());
    }
}
