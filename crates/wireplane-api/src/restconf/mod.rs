// RESTCONF session (RFC 8040) over HTTPS.
//
// RESTCONF is stateless per request, so "session" here means a
// discovered API root plus the capability set fetched at connect time.
// Root discovery via /.well-known/host-meta is mandatory and fatal on
// failure; the capability fetch from restconf-state is advisory and
// degrades to an empty feature set.

mod stream;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use secrecy::ExposeSecret;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

pub use stream::RestconfNotifications;

use crate::capabilities::{Capabilities, Encoding};
use crate::error::Error;
use crate::netconf::codec::parse_tree;
use crate::op::{Fetched, MergePolicy, PatchEdit, Payload, Scope, SubscriptionMode};
use crate::path::Path;
use crate::target::{Credentials, Target};
use crate::value::Value;

const YANG_JSON: &str = "application/yang-data+json";
const YANG_XML: &str = "application/yang-data+xml";
const YANG_PATCH_JSON: &str = "application/yang-patch+json";
const XRD_XML: &str = "application/xrd+xml";
const EVENT_STREAM: &str = "text/event-stream";

const MONITORING_CAPABILITIES: &str =
    "/data/ietf-restconf-monitoring:restconf-state/capabilities";
const STREAM_LOCATION: &str =
    "/data/ietf-restconf-monitoring:restconf-state/streams/stream=NETCONF/access=json/location";

/// A discovered RESTCONF endpoint.
pub struct RestconfSession {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    base: Url,
    /// API root path from host-meta, e.g. `/restconf`.
    root: String,
    caps: Capabilities,
    credentials: Credentials,
    endpoint: String,
    closed: AtomicBool,
    patch_seq: AtomicU64,
}

impl RestconfSession {
    /// Discover the API root and capabilities of the target.
    pub async fn connect(target: &Target) -> Result<Self, Error> {
        if matches!(target.credentials, Credentials::PrivateKey { .. }) {
            return Err(Error::unsupported(
                "RESTCONF authenticates with a password or anonymously, not an SSH key",
            ));
        }
        let http = target.build_http_client()?;
        let stream_http = target.build_stream_client()?;
        let base = target.http_base(false)?;
        Self::establish(http, stream_http, base, target.credentials.clone(), target.endpoint())
            .await
    }

    /// Run discovery against an arbitrary base URL with a caller-built
    /// client. This is the seam tests use with a local mock server.
    pub async fn connect_with(
        http: reqwest::Client,
        base: Url,
        credentials: Credentials,
    ) -> Result<Self, Error> {
        let endpoint = base.as_str().trim_end_matches('/').to_owned();
        Self::establish(http.clone(), http, base, credentials, endpoint).await
    }

    async fn establish(
        http: reqwest::Client,
        stream_http: reqwest::Client,
        base: Url,
        credentials: Credentials,
        endpoint: String,
    ) -> Result<Self, Error> {
        let root = discover_root(&http, &base, &credentials, &endpoint).await?;
        debug!(%endpoint, root, "RESTCONF API root discovered");

        let mut session = Self {
            http,
            stream_http,
            base,
            root,
            caps: Capabilities::from_restconf(Vec::new()),
            credentials,
            endpoint,
            closed: AtomicBool::new(false),
            patch_seq: AtomicU64::new(0),
        };
        let uris = session.fetch_capability_uris().await;
        session.caps = Capabilities::from_restconf(uris);
        Ok(session)
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Read a subtree with the RFC 8040 `content` query parameter
    /// selecting config, state, or both.
    pub async fn get(&self, path: &Path, scope: Scope) -> Result<Fetched, Error> {
        self.ensure_open()?;
        let mut url = self.data_url(path)?;
        let content = match scope {
            Scope::ConfigOnly => "config",
            Scope::StateOnly => "nonconfig",
            Scope::Both => "all",
        };
        url.query_pairs_mut().append_pair("content", content);

        let resp = self
            .authed(self.http.get(url))
            .header(ACCEPT, YANG_JSON)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(Error::NodeNotFound { path: path.to_string() });
        }
        let resp = self.check(resp, true).await?;
        let body: serde_json::Value = resp.json().await?;
        Ok(Fetched { origin: scope, root: unwrap_data_reply(body, path) })
    }

    /// One edit, mapped onto the HTTP method the policy prescribes.
    /// `Remove` tolerates a missing node where `Delete` reports it.
    pub async fn set(
        &self,
        path: &Path,
        payload: Option<&Payload>,
        policy: MergePolicy,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        let body = payload.map(|p| self.encode_body(p)).transpose()?;

        let resp = match policy {
            MergePolicy::Merge => {
                let (content_type, bytes) = required_body(body, policy)?;
                self.authed(self.http.patch(self.data_url(path)?))
                    .header(CONTENT_TYPE, content_type)
                    .body(bytes)
                    .send()
                    .await?
            }
            MergePolicy::Replace => {
                let (content_type, bytes) = required_body(body, policy)?;
                self.authed(self.http.put(self.data_url(path)?))
                    .header(CONTENT_TYPE, content_type)
                    .body(bytes)
                    .send()
                    .await?
            }
            MergePolicy::Create => {
                // POST targets the parent; the payload names the child.
                let (content_type, bytes) = required_body(body, policy)?;
                self.authed(self.http.post(self.data_url(&path.parent())?))
                    .header(CONTENT_TYPE, content_type)
                    .body(bytes)
                    .send()
                    .await?
            }
            MergePolicy::Delete | MergePolicy::Remove => {
                let resp = self.authed(self.http.delete(self.data_url(path)?)).send().await?;
                if resp.status() == StatusCode::NOT_FOUND {
                    return if policy == MergePolicy::Remove {
                        Ok(())
                    } else {
                        Err(Error::NodeNotFound { path: path.to_string() })
                    };
                }
                resp
            }
        };
        self.check(resp, true).await?;
        Ok(())
    }

    /// Atomic multi-edit bundle as a YANG-PATCH (RFC 8072) against the
    /// datastore resource. Requires the server to advertise the
    /// yang-patch capability.
    pub async fn apply_patch(&self, edits: &[PatchEdit]) -> Result<(), Error> {
        self.ensure_open()?;
        if !self.caps.supports_atomic_patch() {
            return Err(Error::unsupported(
                "server does not advertise the yang-patch capability",
            ));
        }
        if edits.is_empty() {
            return Ok(());
        }

        let mut encoded = Vec::with_capacity(edits.len());
        for (index, edit) in edits.iter().enumerate() {
            let mut entry = json!({
                "edit-id": format!("edit-{}", index + 1),
                "operation": edit.operation.to_string(),
                "target": encode_data_path(&edit.path),
            });
            if edit.operation.carries_payload() {
                let payload = edit.payload.as_ref().ok_or_else(|| {
                    Error::unsupported(format!(
                        "policy {} requires a payload",
                        edit.operation
                    ))
                })?;
                if payload.encoding != Encoding::Json {
                    return Err(Error::unsupported(
                        "YANG-PATCH bundles require JSON payloads",
                    ));
                }
                let value: serde_json::Value = serde_json::from_slice(&payload.bytes)
                    .map_err(|e| Error::malformed("JSON", e.to_string()))?;
                entry["value"] = value;
            }
            encoded.push(entry);
        }

        let patch_id = self.patch_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let body = json!({
            "ietf-yang-patch:yang-patch": {
                "patch-id": format!("wireplane-{patch_id}"),
                "edit": encoded,
            }
        });

        let resp = self
            .authed(self.http.patch(self.url_for("/data")?))
            .header(CONTENT_TYPE, YANG_PATCH_JSON)
            .header(ACCEPT, YANG_JSON)
            .json(&body)
            .send()
            .await?;
        self.check(resp, true).await?;
        Ok(())
    }

    /// Attach to the device event stream as server-sent events.
    pub async fn subscribe(
        &self,
        path: &Path,
        mode: SubscriptionMode,
    ) -> Result<RestconfNotifications, Error> {
        self.ensure_open()?;
        if !matches!(mode, SubscriptionMode::OnChange) {
            return Err(Error::unsupported("RESTCONF event streams are on-change only"));
        }

        let location_url = self.url_for(STREAM_LOCATION)?;
        let resp = self
            .authed(self.http.get(location_url))
            .header(ACCEPT, YANG_JSON)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(Error::unsupported("server does not expose an event stream"));
        }
        let resp = self.check(resp, true).await?;
        let body: serde_json::Value = resp.json().await?;
        let location = body
            .get("ietf-restconf-monitoring:location")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::malformed("RESTCONF", "stream location reply without URI"))?;
        let location = self.base.join(location)?;
        debug!(endpoint = %self.endpoint, %location, "attaching to RESTCONF event stream");

        let resp = self
            .authed(self.stream_http.get(location))
            .header(ACCEPT, EVENT_STREAM)
            .send()
            .await?;
        let resp = self.check(resp, false).await?;
        Ok(RestconfNotifications::new(resp, path.clone()))
    }

    /// Stateless protocol: closing just fences further calls.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Credentials::Password { username, password } => {
                builder.basic_auth(username, Some(password.expose_secret()))
            }
            Credentials::PrivateKey { .. } | Credentials::Anonymous => builder,
        }
    }

    fn url_for(&self, suffix: &str) -> Result<Url, Error> {
        Ok(self.base.join(&format!("{}{suffix}", self.root))?)
    }

    fn data_url(&self, path: &Path) -> Result<Url, Error> {
        self.url_for(&format!("/data{}", encode_data_path(path)))
    }

    fn encode_body(&self, payload: &Payload) -> Result<(&'static str, bytes::Bytes), Error> {
        let content_type = match payload.encoding {
            Encoding::Json => YANG_JSON,
            Encoding::Xml => YANG_XML,
            other => {
                return Err(Error::unsupported(format!(
                    "RESTCONF carries JSON or XML payloads, got {other}"
                )));
            }
        };
        Ok((content_type, payload.bytes.clone()))
    }

    async fn fetch_capability_uris(&self) -> Vec<String> {
        let url = match self.url_for(MONITORING_CAPABILITIES) {
            Ok(url) => url,
            Err(_) => return Vec::new(),
        };
        let resp = self.authed(self.http.get(url)).header(ACCEPT, YANG_JSON).send().await;
        let body: serde_json::Value = match resp {
            Ok(resp) if resp.status().is_success() => match resp.json().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(endpoint = %self.endpoint, error = %e, "capability reply unreadable");
                    return Vec::new();
                }
            },
            Ok(resp) => {
                warn!(
                    endpoint = %self.endpoint,
                    status = %resp.status(),
                    "capability resource unavailable, continuing without"
                );
                return Vec::new();
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "capability fetch failed, continuing without");
                return Vec::new();
            }
        };
        body.pointer("/ietf-restconf-monitoring:capabilities/capability")
            .and_then(serde_json::Value::as_array)
            .map(|uris| {
                uris.iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn check(&self, resp: Response, atomic: bool) -> Result<Response, Error> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::connect(
                &self.endpoint,
                format!("authentication rejected ({status})"),
            ));
        }
        let body = resp.text().await.unwrap_or_default();
        Err(rejection(status, &body, atomic))
    }
}

impl std::fmt::Debug for RestconfSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestconfSession")
            .field("endpoint", &self.endpoint)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// Resolve the API root from `/.well-known/host-meta` (RFC 8040 §3.1).
/// RESTCONF is unusable without it, so any failure here is fatal.
async fn discover_root(
    http: &reqwest::Client,
    base: &Url,
    credentials: &Credentials,
    endpoint: &str,
) -> Result<String, Error> {
    let url = base.join("/.well-known/host-meta")?;
    let mut req = http.get(url).header(ACCEPT, XRD_XML);
    if let Credentials::Password { username, password } = credentials {
        req = req.basic_auth(username, Some(password.expose_secret()));
    }
    let resp = req.send().await?;
    if !resp.status().is_success() {
        return Err(Error::negotiation(
            endpoint,
            format!("host-meta discovery failed with status {}", resp.status()),
        ));
    }
    let body = resp.bytes().await?;
    let tree = parse_tree(&body)?;
    tree.children
        .iter()
        .find(|link| link.name == "Link" && link.attr("rel") == Some("restconf"))
        .and_then(|link| link.attr("href"))
        .map(|href| href.trim_end_matches('/').to_owned())
        .ok_or_else(|| Error::negotiation(endpoint, "host-meta has no restconf link"))
}

/// RFC 8040 data-resource identifier: `/module:name=key1,key2/child`.
/// Key values are percent-encoded so reserved characters survive.
fn encode_data_path(path: &Path) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    for segment in &path.segments {
        out.push('/');
        if let Some(module) = &segment.module {
            out.push_str(module);
            out.push(':');
        }
        out.push_str(&segment.name);
        for (i, (_, value)) in segment.keys.iter().enumerate() {
            out.push(if i == 0 { '=' } else { ',' });
            let _ = write!(out, "{}", PercentEncoded(value));
        }
    }
    out
}

struct PercentEncoded<'a>(&'a str);

impl std::fmt::Display for PercentEncoded<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use std::fmt::Write as _;

        for byte in self.0.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                    f.write_char(char::from(byte))?;
                }
                other => write!(f, "%{other:02X}")?,
            }
        }
        Ok(())
    }
}

/// RESTCONF wraps the requested node in a single-entry object keyed by
/// its qualified name, and list entries in a one-element array. Peel
/// both so the caller gets the node itself.
fn unwrap_data_reply(body: serde_json::Value, path: &Path) -> Value {
    let keyed_leaf = path.segments.last().is_some_and(|s| !s.keys.is_empty());
    let inner = match body {
        serde_json::Value::Object(map) if map.len() == 1 => {
            map.into_iter().next().map_or(serde_json::Value::Null, |(_, v)| v)
        }
        other => other,
    };
    let inner = match inner {
        serde_json::Value::Array(mut items) if keyed_leaf && items.len() == 1 => items.remove(0),
        other => other,
    };
    Value::from(inner)
}

/// Interpret an HTTP error response, preferring the structured
/// `ietf-restconf:errors` body (RFC 8040 §7.1) over the bare status.
fn rejection(status: StatusCode, body: &str, atomic: bool) -> Error {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| {
        v.pointer("/ietf-restconf:errors/error/0").or_else(|| {
            v.pointer(
                "/ietf-yang-patch:yang-patch-status/edit-status/edit/0/errors/error/0",
            )
        })
    });
    let field = |name: &str| {
        error
            .and_then(|e| e.get(name))
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
    };
    Error::Rejected {
        message: field("error-message").unwrap_or_else(|| format!("HTTP {status}")),
        severity: None,
        tag: field("error-tag"),
        atomic,
    }
}

fn required_body(
    body: Option<(&'static str, bytes::Bytes)>,
    policy: MergePolicy,
) -> Result<(&'static str, bytes::Bytes), Error> {
    body.ok_or_else(|| Error::unsupported(format!("policy {policy} requires a payload")))
}
