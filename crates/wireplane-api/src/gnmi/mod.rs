// gNMI session (gRPC Network Management Interface) over HTTP/2.
//
// The protobuf surface lives in `proto`, a hand-maintained mirror of
// gnmi.proto. Capabilities are exchanged with a unary rpc at connect
// time; reads and writes are unary Get/Set; subscriptions hold a
// bidirectional stream open where only the first client message (the
// SubscriptionList) carries content.

pub(crate) mod proto;

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tonic::metadata::MetadataValue;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tonic::{Code, Request};
use tracing::{debug, info, warn};

use crate::capabilities::{Capabilities, Encoding, ModelInfo};
use crate::error::Error;
use crate::op::{Fetched, MergePolicy, PatchEdit, Payload, Scope, SubscriptionMode, Update};
use crate::path::{Path, Segment};
use crate::target::{Credentials, Target, TlsPolicy};
use crate::value::Value;

use proto::g_nmi_client::GNmiClient;

/// Keep the HTTP/2 connection warm while a subscription idles.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// gNMI session over a single gRPC channel.
///
/// The channel multiplexes every rpc, so one session serves reads,
/// writes, and subscriptions concurrently. Authentication rides as
/// `username`/`password` metadata on each request, which is the
/// convention gNMI targets expect.
#[derive(Debug)]
pub struct GnmiSession {
    client: Mutex<GNmiClient<Channel>>,
    caps: Capabilities,
    /// Wire encoding chosen from the advertised set at connect time.
    encoding: proto::Encoding,
    credentials: Credentials,
    endpoint: String,
    request_timeout: Duration,
    closed: AtomicBool,
}

impl GnmiSession {
    /// Open a channel per the target's TLS policy and exchange
    /// capabilities.
    pub async fn connect(target: &Target) -> Result<Self, Error> {
        if let Credentials::PrivateKey { .. } = target.credentials {
            return Err(Error::unsupported(
                "gNMI authenticates with username/password metadata, not SSH keys",
            ));
        }
        let channel = build_channel(target).await?;
        Self::from_channel(
            channel,
            target.credentials.clone(),
            target.endpoint(),
            target.request_timeout,
        )
        .await
    }

    /// Wire up an already-connected channel. Tests use this to point
    /// the session at a local in-process server.
    pub async fn from_channel(
        channel: Channel,
        credentials: Credentials,
        endpoint: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, Error> {
        let endpoint = endpoint.into();
        let mut client = GNmiClient::new(channel);

        let mut request = Request::new(proto::CapabilityRequest::default());
        request.set_timeout(request_timeout);
        attach_auth(&mut request, &credentials)?;
        let reply = match client.capabilities(request).await {
            Ok(reply) => reply.into_inner(),
            Err(status) if status.code() == Code::DeadlineExceeded => {
                return Err(Error::Timeout { after: request_timeout });
            }
            Err(status) => {
                return Err(Error::negotiation(
                    &endpoint,
                    format!("capabilities rpc failed: {status}"),
                ));
            }
        };

        let encodings: Vec<Encoding> = reply
            .supported_encodings
            .iter()
            .filter_map(|&raw| proto::Encoding::try_from(raw).ok())
            .filter_map(api_encoding)
            .collect();
        let models = reply
            .supported_models
            .into_iter()
            .map(|model| ModelInfo {
                name: model.name,
                organization: (!model.organization.is_empty()).then_some(model.organization),
                revision: (!model.version.is_empty()).then_some(model.version),
            })
            .collect();

        let encoding = if encodings.contains(&Encoding::JsonIetf) {
            proto::Encoding::JsonIetf
        } else if encodings.contains(&Encoding::Json) {
            proto::Encoding::Json
        } else {
            warn!(endpoint = %endpoint, "device advertised no JSON encoding; assuming JSON");
            proto::Encoding::Json
        };

        let caps = Capabilities::from_gnmi(encodings, models, reply.g_nmi_version.clone());
        info!(
            endpoint = %endpoint,
            version = %reply.g_nmi_version,
            encoding = encoding.as_str_name(),
            models = caps.models.len(),
            "gNMI session ready"
        );
        Ok(Self {
            client: Mutex::new(client),
            caps,
            encoding,
            credentials,
            endpoint,
            request_timeout,
            closed: AtomicBool::new(false),
        })
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Read the subtree at `path`. `scope` maps onto the gNMI
    /// `DataType` filter, so the target does the config/state split.
    pub async fn get(&self, path: &Path, scope: Scope) -> Result<Fetched, Error> {
        self.ensure_open()?;
        let data_type = match scope {
            Scope::ConfigOnly => proto::get_request::DataType::Config,
            Scope::StateOnly => proto::get_request::DataType::State,
            Scope::Both => proto::get_request::DataType::All,
        };
        let request = proto::GetRequest {
            path: vec![encode_path(path)],
            r#type: data_type as i32,
            encoding: self.encoding as i32,
            ..Default::default()
        };
        let reply = self
            .client
            .lock()
            .await
            .get(self.authed(request)?)
            .await
            .map_err(|status| self.status_error(status, path))?
            .into_inner();

        let first = reply
            .notification
            .into_iter()
            .flat_map(|notification| notification.update)
            .next()
            .ok_or_else(|| Error::NodeNotFound { path: path.to_string() })?;
        let root = match first.val {
            Some(value) => decode_typed_value(value)?,
            None => Value::Null,
        };
        Ok(Fetched { origin: scope, root })
    }

    /// Write `payload` at `path` under `policy`.
    ///
    /// gNMI's Set knows merge (update), replace, and delete. `Create`
    /// and `Remove` need an existence test the protocol does not have,
    /// so they are refused rather than silently weakened to merge or
    /// delete.
    pub async fn set(
        &self,
        path: &Path,
        payload: Option<&Payload>,
        policy: MergePolicy,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        let request = match policy {
            MergePolicy::Merge => proto::SetRequest {
                update: vec![self.encode_update(path, payload, policy)?],
                ..Default::default()
            },
            MergePolicy::Replace => proto::SetRequest {
                replace: vec![self.encode_update(path, payload, policy)?],
                ..Default::default()
            },
            MergePolicy::Delete => proto::SetRequest {
                delete: vec![encode_path(path)],
                ..Default::default()
            },
            MergePolicy::Create | MergePolicy::Remove => {
                return Err(Error::unsupported(format!(
                    "gNMI Set cannot express `{policy}`; use merge, replace, or delete"
                )));
            }
        };
        self.client
            .lock()
            .await
            .set(self.authed(request)?)
            .await
            .map_err(|status| self.set_error(status))?;
        Ok(())
    }

    /// Apply a batch of edits as one Set rpc. The target applies the
    /// whole request transactionally, so a failure leaves the running
    /// datastore untouched.
    ///
    /// Within one SetRequest the protocol runs all deletes, then all
    /// replaces, then all updates; ordering across policies is not
    /// preserved from `edits`.
    pub async fn apply_patch(&self, edits: &[PatchEdit]) -> Result<(), Error> {
        self.ensure_open()?;
        if edits.is_empty() {
            return Ok(());
        }
        let mut request = proto::SetRequest::default();
        for edit in edits {
            match edit.operation {
                MergePolicy::Merge => request.update.push(self.encode_update(
                    &edit.path,
                    edit.payload.as_ref(),
                    edit.operation,
                )?),
                MergePolicy::Replace => request.replace.push(self.encode_update(
                    &edit.path,
                    edit.payload.as_ref(),
                    edit.operation,
                )?),
                MergePolicy::Delete => request.delete.push(encode_path(&edit.path)),
                MergePolicy::Create | MergePolicy::Remove => {
                    return Err(Error::unsupported(format!(
                        "gNMI Set cannot express `{}` in a patch",
                        edit.operation
                    )));
                }
            }
        }
        self.client
            .lock()
            .await
            .set(self.authed(request)?)
            .await
            .map_err(|status| self.set_error(status))?;
        Ok(())
    }

    /// Open a STREAM subscription for `path`. Both sampled and
    /// on-change cadences map directly onto gNMI subscription modes.
    pub async fn subscribe(
        &self,
        path: &Path,
        mode: SubscriptionMode,
    ) -> Result<GnmiUpdates, Error> {
        self.ensure_open()?;
        let list = subscription_list(path, mode, self.encoding);
        let first = proto::SubscribeRequest {
            request: Some(proto::subscribe_request::Request::Subscribe(list)),
        };
        // The request stream must stay open for the life of the
        // subscription; only the initial message carries content.
        let outbound = async_stream::stream! {
            yield first;
            std::future::pending::<()>().await;
        };
        let mut request = Request::new(outbound);
        attach_auth(&mut request, &self.credentials)?;

        let mut client = self.client.lock().await;
        let inbound = match timeout(self.request_timeout, client.subscribe(request)).await {
            Ok(Ok(response)) => response.into_inner(),
            Ok(Err(status)) => return Err(self.status_error(status, path)),
            Err(_) => return Err(Error::Timeout { after: self.request_timeout }),
        };
        drop(client);

        debug!(endpoint = %self.endpoint, path = %path, ?mode, "gNMI subscription active");
        Ok(GnmiUpdates { inner: inbound, pending: VecDeque::new() })
    }

    /// Fence the handle. gRPC has no teardown rpc; dropping the last
    /// clone of the channel closes the connection.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(endpoint = %self.endpoint, "gNMI session closed");
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn authed<T>(&self, message: T) -> Result<Request<T>, Error> {
        let mut request = Request::new(message);
        request.set_timeout(self.request_timeout);
        attach_auth(&mut request, &self.credentials)?;
        Ok(request)
    }

    fn encode_update(
        &self,
        path: &Path,
        payload: Option<&Payload>,
        policy: MergePolicy,
    ) -> Result<proto::Update, Error> {
        let payload = payload
            .ok_or_else(|| Error::unsupported(format!("policy `{policy}` requires a payload")))?;
        if !self.caps.supports_encoding(payload.encoding) {
            return Err(Error::unsupported(format!(
                "device did not advertise the {} encoding",
                payload.encoding
            )));
        }
        Ok(proto::Update {
            path: Some(encode_path(path)),
            val: Some(encode_payload(payload)?),
            duplicates: 0,
        })
    }

    fn status_error(&self, status: tonic::Status, path: &Path) -> Error {
        match status.code() {
            Code::NotFound => Error::NodeNotFound { path: path.to_string() },
            Code::Unimplemented => Error::unsupported(format!(
                "device rejected the rpc as unimplemented: {}",
                status.message()
            )),
            Code::DeadlineExceeded => Error::Timeout { after: self.request_timeout },
            _ => Error::GrpcStatus(status),
        }
    }

    /// Set failures carry `atomic: true`: the gNMI transaction model
    /// guarantees a rejected SetRequest changed nothing.
    fn set_error(&self, status: tonic::Status) -> Error {
        match status.code() {
            Code::DeadlineExceeded => Error::Timeout { after: self.request_timeout },
            Code::Unavailable | Code::Unauthenticated => Error::GrpcStatus(status),
            code => Error::Rejected {
                message: status.message().to_owned(),
                severity: None,
                tag: Some(format!("{code:?}")),
                atomic: true,
            },
        }
    }
}

/// Live update stream from a Subscribe rpc.
///
/// `sync_response` markers (end of initial state) are consumed
/// silently; every updated or deleted leaf surfaces as one [`Update`],
/// with deletions carrying [`Value::Null`].
pub struct GnmiUpdates {
    inner: tonic::codec::Streaming<proto::SubscribeResponse>,
    pending: VecDeque<Update>,
}

impl GnmiUpdates {
    /// Next update, or `None` once the server ends the stream.
    pub async fn next(&mut self) -> Option<Result<Update, Error>> {
        loop {
            if let Some(update) = self.pending.pop_front() {
                return Some(Ok(update));
            }
            match self.inner.message().await {
                Ok(Some(response)) => match response.response {
                    Some(proto::subscribe_response::Response::Update(notification)) => {
                        match decode_notification(notification) {
                            Ok(updates) => self.pending.extend(updates),
                            Err(e) => return Some(Err(e)),
                        }
                    }
                    Some(proto::subscribe_response::Response::SyncResponse(_)) | None => {}
                },
                Ok(None) => return None,
                Err(status) => return Some(Err(Error::GrpcStatus(status))),
            }
        }
    }
}

impl fmt::Debug for GnmiUpdates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GnmiUpdates")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

// ── Channel setup ───────────────────────────────────────────────────

async fn build_channel(target: &Target) -> Result<Channel, Error> {
    let endpoint = match &target.tls {
        TlsPolicy::DangerAcceptInvalid => {
            // tonic's rustls stack has no accept-any-certificate
            // switch, so this policy selects a plaintext channel.
            warn!(
                endpoint = %target.endpoint(),
                "TLS verification disabled; using a plaintext gRPC channel"
            );
            Endpoint::from_shared(target.http_base(true)?.to_string())?
        }
        TlsPolicy::SystemRoots => {
            let tls = ClientTlsConfig::new().with_native_roots();
            Endpoint::from_shared(target.http_base(false)?.to_string())?.tls_config(tls)?
        }
        TlsPolicy::CustomCa(path) => {
            let pem = std::fs::read(path).map_err(|e| {
                Error::security(
                    target.endpoint(),
                    format!("cannot read CA bundle {}: {e}", path.display()),
                )
            })?;
            let tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem));
            Endpoint::from_shared(target.http_base(false)?.to_string())?.tls_config(tls)?
        }
    };
    let channel = endpoint
        .connect_timeout(target.connect_timeout)
        .http2_keep_alive_interval(KEEPALIVE_INTERVAL)
        .keep_alive_while_idle(true)
        .connect()
        .await?;
    Ok(channel)
}

fn attach_auth<T>(request: &mut Request<T>, credentials: &Credentials) -> Result<(), Error> {
    if let Credentials::Password { username, password } = credentials {
        let user = MetadataValue::try_from(username.as_str())
            .map_err(|_| Error::unsupported("username contains bytes gRPC metadata cannot carry"))?;
        let pass = MetadataValue::try_from(password.expose_secret())
            .map_err(|_| Error::unsupported("password contains bytes gRPC metadata cannot carry"))?;
        request.metadata_mut().insert("username", user);
        request.metadata_mut().insert("password", pass);
    }
    Ok(())
}

fn api_encoding(encoding: proto::Encoding) -> Option<Encoding> {
    match encoding {
        proto::Encoding::Json => Some(Encoding::Json),
        proto::Encoding::JsonIetf => Some(Encoding::JsonIetf),
        proto::Encoding::Proto => Some(Encoding::Proto),
        proto::Encoding::Ascii => Some(Encoding::Ascii),
        proto::Encoding::Bytes => None,
    }
}

fn subscription_list(
    path: &Path,
    mode: SubscriptionMode,
    encoding: proto::Encoding,
) -> proto::SubscriptionList {
    let (proto_mode, sample_interval) = match mode {
        SubscriptionMode::OnChange => (proto::SubscriptionMode::OnChange, 0),
        SubscriptionMode::Sample(period) => (
            proto::SubscriptionMode::Sample,
            u64::try_from(period.as_nanos()).unwrap_or(u64::MAX),
        ),
    };
    proto::SubscriptionList {
        subscription: vec![proto::Subscription {
            path: Some(encode_path(path)),
            mode: proto_mode as i32,
            sample_interval,
            ..Default::default()
        }],
        mode: proto::subscription_list::Mode::Stream as i32,
        encoding: encoding as i32,
        ..Default::default()
    }
}

// ── Path and value mapping ──────────────────────────────────────────

fn encode_path(path: &Path) -> proto::Path {
    let elem = path
        .segments
        .iter()
        .map(|segment| proto::PathElem {
            name: match &segment.module {
                Some(module) => format!("{module}:{}", segment.name),
                None => segment.name.clone(),
            },
            key: segment.keys.iter().cloned().collect(),
        })
        .collect();
    proto::Path { elem, ..Default::default() }
}

fn decode_path(prefix: Option<&proto::Path>, path: Option<&proto::Path>) -> Path {
    let mut segments = Vec::new();
    for part in [prefix, path].into_iter().flatten() {
        segments.extend(part.elem.iter().map(decode_elem));
    }
    Path { segments }
}

fn decode_elem(elem: &proto::PathElem) -> Segment {
    let (module, name) = match elem.name.split_once(':') {
        Some((module, name)) => (Some(module.to_owned()), name.to_owned()),
        None => (None, elem.name.clone()),
    };
    // HashMap iteration order is arbitrary; sort so equal paths always
    // render identically.
    let mut keys: Vec<(String, String)> =
        elem.key.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    keys.sort();
    Segment { module, name, keys }
}

fn encode_payload(payload: &Payload) -> Result<proto::TypedValue, Error> {
    use proto::typed_value::Value as Tv;
    let value = match payload.encoding {
        Encoding::Json => Tv::JsonVal(payload.bytes.to_vec()),
        Encoding::JsonIetf => Tv::JsonIetfVal(payload.bytes.to_vec()),
        Encoding::Proto => Tv::ProtoBytes(payload.bytes.to_vec()),
        Encoding::Ascii => Tv::AsciiVal(
            String::from_utf8(payload.bytes.to_vec())
                .map_err(|_| Error::malformed("ASCII", "payload is not valid UTF-8"))?,
        ),
        Encoding::Xml => return Err(Error::unsupported("gNMI has no XML value encoding")),
    };
    Ok(proto::TypedValue { value: Some(value) })
}

fn decode_typed_value(value: proto::TypedValue) -> Result<Value, Error> {
    use proto::typed_value::Value as Tv;
    match value.value {
        None => Ok(Value::Null),
        Some(Tv::StringVal(s) | Tv::AsciiVal(s)) => Ok(Value::String(s)),
        Some(Tv::IntVal(i)) => Ok(Value::Int(i)),
        Some(Tv::UintVal(u)) => Ok(Value::Uint(u)),
        Some(Tv::BoolVal(b)) => Ok(Value::Bool(b)),
        Some(Tv::DoubleVal(d)) => Ok(Value::Double(d)),
        Some(Tv::JsonVal(bytes) | Tv::JsonIetfVal(bytes)) => {
            let json: serde_json::Value = serde_json::from_slice(&bytes)
                .map_err(|e| Error::malformed("JSON", e.to_string()))?;
            Ok(Value::from(json))
        }
        Some(Tv::BytesVal(_) | Tv::ProtoBytes(_)) => Err(Error::unsupported(
            "BYTES and PROTO values are not decoded; negotiate a JSON encoding",
        )),
    }
}

fn decode_notification(notification: proto::Notification) -> Result<Vec<Update>, Error> {
    let timestamp = nanos_to_utc(notification.timestamp);
    let prefix = notification.prefix;
    let mut updates =
        Vec::with_capacity(notification.update.len() + notification.delete.len());
    for update in notification.update {
        let path = decode_path(prefix.as_ref(), update.path.as_ref());
        let value = match update.val {
            Some(value) => decode_typed_value(value)?,
            None => Value::Null,
        };
        updates.push(Update { path, value, timestamp });
    }
    for deleted in notification.delete {
        updates.push(Update {
            path: decode_path(prefix.as_ref(), Some(&deleted)),
            value: Value::Null,
            timestamp,
        });
    }
    Ok(updates)
}

fn nanos_to_utc(nanos: i64) -> Option<DateTime<Utc>> {
    if nanos == 0 {
        return None;
    }
    let secs = nanos.div_euclid(1_000_000_000);
    let subsec = u32::try_from(nanos.rem_euclid(1_000_000_000)).ok()?;
    DateTime::from_timestamp(secs, subsec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn eth0() -> Path {
        Path::parse("/openconfig-interfaces:interfaces/interface[name=eth0]/state/oper-status")
            .unwrap()
    }

    #[test]
    fn paths_round_trip_and_keys_come_back_sorted() {
        let original = Path::parse("/interfaces/interface[z-index=4][name=eth0]").unwrap();
        let decoded = decode_path(None, Some(&encode_path(&original)));
        assert_eq!(decoded, original);
        // the map on the wire loses declaration order; decode must
        // settle on the sorted form
        assert_eq!(
            decoded.segments[1].keys,
            vec![
                ("name".to_owned(), "eth0".to_owned()),
                ("z-index".to_owned(), "4".to_owned()),
            ]
        );
    }

    #[test]
    fn module_prefix_travels_in_the_elem_name() {
        let encoded = encode_path(&eth0());
        assert_eq!(encoded.elem[0].name, "openconfig-interfaces:interfaces");
        assert_eq!(encoded.elem[1].name, "interface");
        assert_eq!(encoded.elem[1].key.get("name").map(String::as_str), Some("eth0"));

        let decoded = decode_path(None, Some(&encoded));
        assert_eq!(decoded.segments[0].module.as_deref(), Some("openconfig-interfaces"));
        assert_eq!(decoded.segments[0].name, "interfaces");
    }

    #[test]
    fn typed_values_decode_to_data_nodes() {
        use proto::typed_value::Value as Tv;
        let wrap = |v| proto::TypedValue { value: Some(v) };

        assert_eq!(decode_typed_value(wrap(Tv::UintVal(42))).unwrap(), Value::Uint(42));
        assert_eq!(
            decode_typed_value(wrap(Tv::StringVal("UP".into()))).unwrap(),
            Value::String("UP".to_owned())
        );
        assert_eq!(
            decode_typed_value(proto::TypedValue { value: None }).unwrap(),
            Value::Null
        );

        let json = wrap(Tv::JsonIetfVal(br#"{"mtu": 1500}"#.to_vec()));
        let decoded = decode_typed_value(json).unwrap();
        assert_eq!(decoded.get("mtu").and_then(Value::as_u64), Some(1500));

        let opaque = decode_typed_value(wrap(Tv::BytesVal(vec![1, 2, 3])));
        assert!(matches!(opaque, Err(Error::Unsupported { .. })));
    }

    #[test]
    fn sampled_subscriptions_carry_the_interval_in_nanoseconds() {
        let list = subscription_list(
            &eth0(),
            SubscriptionMode::Sample(Duration::from_secs(10)),
            proto::Encoding::JsonIetf,
        );
        assert_eq!(list.mode, proto::subscription_list::Mode::Stream as i32);
        assert_eq!(list.encoding, proto::Encoding::JsonIetf as i32);

        let sub = &list.subscription[0];
        assert_eq!(sub.mode, proto::SubscriptionMode::Sample as i32);
        assert_eq!(sub.sample_interval, 10_000_000_000);

        let on_change =
            subscription_list(&eth0(), SubscriptionMode::OnChange, proto::Encoding::Json);
        assert_eq!(
            on_change.subscription[0].mode,
            proto::SubscriptionMode::OnChange as i32
        );
        assert_eq!(on_change.subscription[0].sample_interval, 0);
    }

    #[test]
    fn notifications_join_prefix_and_surface_deletes_as_null() {
        let prefix = encode_path(&Path::parse("/interfaces").unwrap());
        let notification = proto::Notification {
            timestamp: 1_717_000_000_123_456_789,
            prefix: Some(prefix),
            update: vec![proto::Update {
                path: Some(encode_path(&Path::parse("/interface[name=eth0]/mtu").unwrap())),
                val: Some(proto::TypedValue {
                    value: Some(proto::typed_value::Value::UintVal(9000)),
                }),
                duplicates: 0,
            }],
            delete: vec![encode_path(&Path::parse("/interface[name=eth1]").unwrap())],
            atomic: false,
        };

        let updates = decode_notification(notification).unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(
            updates[0].path,
            Path::parse("/interfaces/interface[name=eth0]/mtu").unwrap()
        );
        assert_eq!(updates[0].value, Value::Uint(9000));
        assert!(updates[0].timestamp.is_some());
        assert_eq!(
            updates[1].path,
            Path::parse("/interfaces/interface[name=eth1]").unwrap()
        );
        assert_eq!(updates[1].value, Value::Null);
    }

    #[test]
    fn xml_payloads_have_no_gnmi_encoding() {
        let err = encode_payload(&Payload::xml("<mtu>1500</mtu>")).unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }
}
