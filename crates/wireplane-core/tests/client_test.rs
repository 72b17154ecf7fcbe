#![allow(clippy::unwrap_used)]
// Facade-level tests: a `Client` assembled around a real RESTCONF
// session against wiremock, plus a CLI session on a duplex pipe for
// the protocol-gap paths.

use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wireplane_api::{CliSession, IoLink, NetconfSession, RestconfSession};
use wireplane_core::{
    Client, CliPlatform, Credentials, Error, MergePolicy, ModelRegistry, OperationKind, Path,
    PatchEdit, Payload, Protocol, Scope, SessionHealth, SubscriptionMode, Target, Value,
};

// ── Helpers ─────────────────────────────────────────────────────────

const HOST_META: &str = concat!(
    "<XRD xmlns='http://docs.oasis-open.org/ns/xri/xrd-1.0'>",
    "<Link rel='restconf' href='/restconf'/>",
    "</XRD>"
);

const YANG_PATCH_CAP: &str = "urn:ietf:params:restconf:capability:yang-patch:1.0";

async fn mount_discovery(server: &MockServer, caps: &[&str]) {
    Mock::given(method("GET"))
        .and(path("/.well-known/host-meta"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(HOST_META, "application/xrd+xml"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/restconf/data/ietf-restconf-monitoring:restconf-state/capabilities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ietf-restconf-monitoring:capabilities": { "capability": caps }
        })))
        .mount(server)
        .await;
}

/// A facade over a real RESTCONF session talking to wiremock.
async fn restconf_client(caps: &[&str]) -> (MockServer, Client) {
    let server = MockServer::start().await;
    mount_discovery(&server, caps).await;

    let base = Url::parse(&server.uri()).unwrap();
    let session =
        RestconfSession::connect_with(reqwest::Client::new(), base, Credentials::Anonymous)
            .await
            .unwrap();
    let target = Target::builder("127.0.0.1", Protocol::Restconf).build();
    (server, Client::from_parts(target, session))
}

/// A facade over a CLI session driving one end of a duplex pipe.
async fn cli_client() -> (Client, tokio::io::DuplexStream) {
    let platform = CliPlatform {
        prompt: r"router[>#]\s*$".to_owned(),
        failed_when_contains: vec!["% Invalid input".to_owned()],
    };
    let (ours, mut device) = duplex(4096);
    device.write_all(b"router> ").await.unwrap();
    let link = Box::new(IoLink::new(ours));
    let session = CliSession::from_link(link, &platform, "lab:22", Duration::from_secs(1))
        .await
        .unwrap();
    let target = Target::builder("lab", Protocol::Cli).cli_platform(platform).build();
    (Client::from_parts(target, session), device)
}

fn eth0() -> Path {
    Path::parse("/ietf-interfaces:interfaces/interface[name=eth0]").unwrap()
}

// ── Reads ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_returns_the_requested_node() {
    let (server, client) = restconf_client(&[]).await;
    Mock::given(method("GET"))
        .and(path("/restconf/data/ietf-interfaces:interfaces/interface=eth0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ietf-interfaces:interface": { "name": "eth0", "enabled": true }
        })))
        .mount(&server)
        .await;

    let fetched = client.get(&eth0(), Scope::Both).await.unwrap();
    assert_eq!(fetched.origin, Scope::Both);
    assert_eq!(fetched.root.get("name").and_then(Value::as_str), Some("eth0"));

    assert_eq!(client.protocol(), Protocol::Restconf);
    assert_eq!(client.capabilities().protocol, Protocol::Restconf);
}

// ── Writes ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_merge_write_patches_and_reports_the_guarantee() {
    let (server, client) = restconf_client(&[]).await;
    Mock::given(method("PATCH"))
        .and(path("/restconf/data/ietf-interfaces:interfaces/interface=eth0"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let payload = Payload::json(&json!({ "ietf-interfaces:interface": { "enabled": false } }));
    let outcome = client.set(&eth0(), Some(&payload), MergePolicy::Merge).await.unwrap();
    assert!(outcome.transactional, "one HTTP request is all-or-none");
    assert!(!outcome.destructive);
}

#[tokio::test]
async fn test_rejected_replace_surfaces_the_server_diagnostic() {
    let (server, client) = restconf_client(&[]).await;
    Mock::given(method("PUT"))
        .and(path("/restconf/data/ietf-interfaces:interfaces/interface=eth0"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "ietf-restconf:errors": { "error": [{
                "error-type": "application",
                "error-tag": "resource-denied",
                "error-message": "interface is owned by another controller"
            }]}
        })))
        .mount(&server)
        .await;

    let payload = Payload::json(&json!({ "ietf-interfaces:interface": { "name": "eth0" } }));
    let result = client.set(&eth0(), Some(&payload), MergePolicy::Replace).await;
    match result {
        Err(Error::ServerRejected { message, tag, transactional }) => {
            assert!(message.contains("owned by another controller"), "got: {message}");
            assert_eq!(tag.as_deref(), Some("resource-denied"));
            assert!(transactional, "a refused PUT changed nothing");
        }
        other => panic!("expected ServerRejected, got: {other:?}"),
    }

    // The rejection was the device's answer, not a session failure.
    Mock::given(method("GET"))
        .and(path("/restconf/data/ietf-interfaces:interfaces/interface=eth0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ietf-interfaces:interface": { "name": "eth0" }
        })))
        .mount(&server)
        .await;
    client.get(&eth0(), Scope::ConfigOnly).await.unwrap();
    assert_eq!(*client.state().borrow(), SessionHealth::Ready);
}

#[tokio::test]
async fn test_patch_bundles_ride_the_atomic_mechanism() {
    let (server, client) = restconf_client(&[YANG_PATCH_CAP]).await;
    Mock::given(method("PATCH"))
        .and(path("/restconf/data"))
        .and(header("content-type", "application/yang-patch+json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ietf-yang-patch:yang-patch-status": { "patch-id": "wireplane-1", "ok": [null] }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let edits = vec![
        PatchEdit {
            path: eth0(),
            operation: MergePolicy::Merge,
            payload: Some(Payload::json(&json!({ "enabled": true }))),
        },
        PatchEdit {
            path: Path::parse("/ietf-interfaces:interfaces/interface[name=eth1]").unwrap(),
            operation: MergePolicy::Delete,
            payload: None,
        },
    ];
    let outcome = client.apply_patch(edits).await.unwrap();
    assert!(outcome.transactional);
    assert!(outcome.destructive, "the bundle deletes eth1");
}

#[tokio::test]
async fn test_patch_bundles_without_the_capability_are_refused() {
    let (_server, client) = restconf_client(&[]).await;
    let edits = vec![PatchEdit {
        path: eth0(),
        operation: MergePolicy::Merge,
        payload: Some(Payload::json(&json!({ "enabled": true }))),
    }];
    let result = client.apply_patch(edits).await;
    assert!(
        matches!(result, Err(Error::Unsupported { .. })),
        "expected Unsupported, got: {result:?}"
    );
}

// ── Candidate and locking operations ────────────────────────────────

#[tokio::test]
async fn test_candidate_operations_need_a_netconf_session() {
    let (_server, client) = restconf_client(&[YANG_PATCH_CAP]).await;

    for result in [
        client.commit().await,
        client.discard().await,
        client.validate().await,
        client.lock().await,
        client.unlock().await,
    ] {
        assert!(
            matches!(result, Err(Error::Unsupported { .. })),
            "expected Unsupported, got: {result:?}"
        );
    }
}

// ── Subscriptions ───────────────────────────────────────────────────

async fn mount_stream(server: &MockServer, events: &'static str) {
    Mock::given(method("GET"))
        .and(path(
            "/restconf/data/ietf-restconf-monitoring:restconf-state/streams\
             /stream=NETCONF/access=json/location",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ietf-restconf-monitoring:location": "/streams/NETCONF-JSON"
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/streams/NETCONF-JSON"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(events, "text/event-stream"))
        .mount(server)
        .await;
}

const CHANGE_EVENTS: &str = concat!(
    "data: {\"ietf-restconf:notification\":{",
    "\"eventTime\":\"2024-06-15T10:30:00Z\",",
    "\"ietf-netconf-notifications:netconf-config-change\":",
    "{\"target\":\"eth0\"}}}\n",
    "\n",
    "data: {\"ietf-restconf:notification\":{",
    "\"eventTime\":\"2024-06-15T10:30:05Z\",",
    "\"ietf-netconf-notifications:netconf-config-change\":",
    "{\"target\":\"eth1\"}}}\n",
    "\n",
);

#[tokio::test]
async fn test_subscription_delivers_updates_then_ends_cleanly() {
    let (server, client) = restconf_client(&[]).await;
    mount_stream(&server, CHANGE_EVENTS).await;

    let watch_path = Path::parse("/ietf-interfaces:interfaces").unwrap();
    let mut stream = client.subscribe(&watch_path, SubscriptionMode::OnChange).await.unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.path, watch_path);
    assert_eq!(first.value.get("target").and_then(Value::as_str), Some("eth0"));

    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second.value.get("target").and_then(Value::as_str), Some("eth1"));

    // Server closed the response body: exactly one terminal outcome.
    assert!(stream.next().await.is_none());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_cancelled_subscriptions_stay_silent() {
    let (server, client) = restconf_client(&[]).await;
    mount_stream(&server, CHANGE_EVENTS).await;

    let watch_path = Path::parse("/ietf-interfaces:interfaces").unwrap();
    let mut stream = client.subscribe(&watch_path, SubscriptionMode::OnChange).await.unwrap();

    // Events may already sit in the delivery buffer; cancellation
    // still wins.
    stream.cancel();
    assert!(stream.next().await.is_none());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_sampled_subscriptions_are_refused_on_restconf() {
    let (_server, client) = restconf_client(&[]).await;
    let watch_path = Path::parse("/ietf-interfaces:interfaces").unwrap();
    let result = client
        .subscribe(&watch_path, SubscriptionMode::Sample(Duration::from_secs(10)))
        .await;
    assert!(
        matches!(result, Err(Error::Unsupported { .. })),
        "expected Unsupported, got: {result:?}"
    );
}

#[tokio::test]
async fn test_cli_sessions_cannot_subscribe() {
    let (client, _device) = cli_client().await;
    let result = client
        .subscribe(&Path::parse("/show/interfaces").unwrap(), SubscriptionMode::OnChange)
        .await;
    assert!(
        matches!(result, Err(Error::Unsupported { .. })),
        "expected Unsupported, got: {result:?}"
    );
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_close_is_idempotent_and_fences_every_operation() {
    let (_server, client) = restconf_client(&[]).await;

    client.close().await.unwrap();
    client.close().await.unwrap();
    assert!(client.is_closed());
    assert_eq!(*client.state().borrow(), SessionHealth::Closed);

    let get = client.get(&eth0(), Scope::Both).await;
    assert!(matches!(get, Err(Error::Closed)), "got: {get:?}");

    let payload = Payload::json(&json!({ "enabled": true }));
    let set = client.set(&eth0(), Some(&payload), MergePolicy::Merge).await;
    assert!(matches!(set, Err(Error::Closed)), "got: {set:?}");

    let subscribe = client
        .subscribe(&Path::parse("/ietf-interfaces:interfaces").unwrap(), SubscriptionMode::OnChange)
        .await;
    assert!(matches!(subscribe, Err(Error::Closed)), "got: {subscribe:?}");
}

#[tokio::test]
async fn test_closing_the_client_cancels_open_subscriptions() {
    let (server, client) = restconf_client(&[]).await;
    mount_stream(&server, CHANGE_EVENTS).await;

    let watch_path = Path::parse("/ietf-interfaces:interfaces").unwrap();
    let mut stream = client.subscribe(&watch_path, SubscriptionMode::OnChange).await.unwrap();

    client.close().await.unwrap();
    assert!(stream.next().await.is_none());
    assert!(stream.is_cancelled());
}

// ── Telemetry ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_operations_broadcast_telemetry_in_order() {
    let (server, client) = restconf_client(&[]).await;
    let mut events = client.events();

    Mock::given(method("GET"))
        .and(path("/restconf/data/ietf-interfaces:interfaces/interface=eth0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ietf-interfaces:interface": { "name": "eth0" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/restconf/data/ietf-interfaces:interfaces/interface=eth0"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "ietf-restconf:errors": { "error": [{ "error-tag": "access-denied" }] }
        })))
        .mount(&server)
        .await;

    client.get(&eth0(), Scope::ConfigOnly).await.unwrap();
    let payload = Payload::json(&json!({ "ietf-interfaces:interface": { "name": "eth0" } }));
    let _ = client.set(&eth0(), Some(&payload), MergePolicy::Replace).await;

    let get_event = events.recv().await.unwrap();
    assert_eq!(get_event.seq, 0);
    assert_eq!(get_event.kind, OperationKind::Get);
    assert_eq!(get_event.protocol, Protocol::Restconf);
    assert_eq!(get_event.path.as_ref(), Some(&eth0()));
    assert_eq!(get_event.scope, Some(Scope::ConfigOnly));
    assert!(get_event.outcome.is_success());
    assert!(!get_event.destructive);

    let set_event = events.recv().await.unwrap();
    assert_eq!(set_event.seq, 1);
    assert_eq!(set_event.kind, OperationKind::Set);
    assert_eq!(set_event.policy, Some(MergePolicy::Replace));
    assert!(set_event.destructive, "replace has destructive blast radius");
    assert!(!set_event.outcome.is_success());
}

#[tokio::test]
async fn test_close_emits_a_final_event() {
    let (_server, client) = restconf_client(&[]).await;
    let mut events = client.events();

    client.close().await.unwrap();
    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, OperationKind::Close);
    assert!(event.outcome.is_success());
}

// ── NETCONF candidate bundles ───────────────────────────────────────

const BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
const NC_DELIM: &[u8] = b"]]>]]>";

/// Scripted NETCONF peer on the far end of a duplex pipe, base 1.0
/// framing only.
struct NetconfMock {
    stream: DuplexStream,
    buf: Vec<u8>,
}

impl NetconfMock {
    fn new(stream: DuplexStream) -> Self {
        Self { stream, buf: Vec::new() }
    }

    async fn recv_frame(&mut self) -> String {
        loop {
            if let Some(pos) = self.buf.windows(NC_DELIM.len()).position(|w| w == NC_DELIM) {
                let frame: Vec<u8> = self.buf.drain(..pos).collect();
                self.buf.drain(..NC_DELIM.len());
                return String::from_utf8(frame).unwrap();
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client hung up mid-conversation");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn send_frame(&mut self, xml: &str) {
        self.stream.write_all(xml.as_bytes()).await.unwrap();
        self.stream.write_all(NC_DELIM).await.unwrap();
    }

    async fn send_hello(&mut self) {
        let hello = format!(
            "<hello xmlns=\"{BASE_NS}\"><capabilities>\
             <capability>urn:ietf:params:netconf:base:1.0</capability>\
             <capability>urn:ietf:params:netconf:capability:candidate:1.0</capability>\
             </capabilities><session-id>7</session-id></hello>"
        );
        self.send_frame(&hello).await;
    }

    async fn send_ok(&mut self, id: u64) {
        let reply =
            format!("<rpc-reply xmlns=\"{BASE_NS}\" message-id=\"{id}\"><ok/></rpc-reply>");
        self.send_frame(&reply).await;
    }

    async fn send_error(&mut self, id: u64, tag: &str, message: &str) {
        let reply = format!(
            "<rpc-reply xmlns=\"{BASE_NS}\" message-id=\"{id}\"><rpc-error>\
             <error-type>application</error-type>\
             <error-tag>{tag}</error-tag>\
             <error-severity>error</error-severity>\
             <error-message>{message}</error-message>\
             </rpc-error></rpc-reply>"
        );
        self.send_frame(&reply).await;
    }
}

/// A facade over a real NETCONF session negotiated against the mock.
async fn netconf_client(
    script: impl FnOnce(NetconfMock) -> tokio::task::JoinHandle<()>,
) -> (Client, tokio::task::JoinHandle<()>) {
    let (ours, theirs) = duplex(64 * 1024);
    let peer = script(NetconfMock::new(theirs));
    let session = NetconfSession::from_link(
        Box::new(IoLink::new(ours)),
        "device:830",
        Duration::from_secs(5),
        ModelRegistry::with_defaults(),
    )
    .await
    .unwrap();
    let target = Target::builder("device", Protocol::Netconf).build();
    (Client::from_parts(target, session), peer)
}

fn mtu_edits() -> Vec<PatchEdit> {
    vec![
        PatchEdit {
            path: Path::parse("/ietf-interfaces:interfaces/interface[name=eth0]").unwrap(),
            operation: MergePolicy::Merge,
            payload: Some(Payload::xml("<mtu>9000</mtu>")),
        },
        PatchEdit {
            path: Path::parse("/ietf-interfaces:interfaces/interface[name=eth1]").unwrap(),
            operation: MergePolicy::Merge,
            payload: Some(Payload::xml("<mtu>9000</mtu>")),
        },
    ]
}

#[tokio::test]
async fn test_netconf_bundles_edit_the_candidate_then_commit_once() {
    let (client, peer) = netconf_client(|mut srv| {
        tokio::spawn(async move {
            let _client_hello = srv.recv_frame().await;
            srv.send_hello().await;

            let first = srv.recv_frame().await;
            assert!(first.contains("<edit-config>"), "got: {first}");
            assert!(first.contains("<candidate/>"), "bundle edits stage on the candidate");
            srv.send_ok(1).await;

            let second = srv.recv_frame().await;
            assert!(second.contains("<edit-config>"), "got: {second}");
            srv.send_ok(2).await;

            let commit = srv.recv_frame().await;
            assert!(commit.contains("<commit"), "got: {commit}");
            srv.send_ok(3).await;

            let close = srv.recv_frame().await;
            assert!(close.contains("<close-session/>"), "got: {close}");
            srv.send_ok(4).await;
        })
    })
    .await;

    let outcome = client.apply_patch(mtu_edits()).await.unwrap();
    assert!(outcome.transactional, "candidate bundles commit all-or-none");
    assert!(!outcome.destructive);

    client.close().await.unwrap();
    peer.await.unwrap();
}

#[tokio::test]
async fn test_failed_netconf_bundles_discard_the_candidate() {
    let (client, peer) = netconf_client(|mut srv| {
        tokio::spawn(async move {
            let _client_hello = srv.recv_frame().await;
            srv.send_hello().await;

            let first = srv.recv_frame().await;
            assert!(first.contains("<edit-config>"), "got: {first}");
            srv.send_ok(1).await;

            let second = srv.recv_frame().await;
            assert!(second.contains("<edit-config>"), "got: {second}");
            srv.send_error(2, "data-exists", "interface already configured").await;

            // No commit: the client drops the staged half instead.
            let discard = srv.recv_frame().await;
            assert!(discard.contains("<discard-changes"), "got: {discard}");
            srv.send_ok(3).await;

            let close = srv.recv_frame().await;
            assert!(close.contains("<close-session/>"), "got: {close}");
            srv.send_ok(4).await;
        })
    })
    .await;

    let result = client.apply_patch(mtu_edits()).await;
    match result {
        Err(Error::ServerRejected { message, tag, transactional }) => {
            assert!(message.contains("already configured"), "got: {message}");
            assert_eq!(tag.as_deref(), Some("data-exists"));
            assert!(transactional, "the discarded candidate applied nothing");
        }
        other => panic!("expected ServerRejected, got: {other:?}"),
    }

    client.close().await.unwrap();
    peer.await.unwrap();
}
