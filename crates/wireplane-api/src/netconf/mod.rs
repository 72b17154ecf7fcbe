// NETCONF session (RFC 6241) over an SSH subsystem channel.
//
// One background task owns the link: it writes queued rpcs, reassembles
// inbound frames, and routes rpc-replies to waiters by message-id.
// Replies whose id matches no waiter (a request that already timed out,
// or a server echoing stale state) are discarded, so a late answer can
// never be attributed to the wrong request. Notifications interleave on
// the same channel (RFC 5277) and flow into a bounded buffer.

pub(crate) mod codec;
mod framing;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

pub use codec::ModelRegistry;

use crate::capabilities::{Capabilities, Encoding, NetconfBase};
use crate::error::Error;
use crate::link::Link;
use crate::op::{Fetched, MergePolicy, Payload, Scope, SessionHealth, SubscriptionMode, Update};
use crate::path::Path;
use crate::ssh::{ChannelMode, SshLink};
use crate::target::Target;
use crate::value::Value;

use self::codec::{EventNotification, Frame, RpcReply};
use self::framing::{FrameDecoder, Framing};

const COMMAND_BUFFER: usize = 32;
const NOTIFICATION_BUFFER: usize = 256;
/// How long an orderly close waits for the server's `<ok/>`.
const CLOSE_GRACE: Duration = Duration::from_secs(3);

/// A negotiated NETCONF session. Cheap to share behind the facade;
/// all operations take `&self`.
pub struct NetconfSession {
    endpoint: String,
    caps: Capabilities,
    registry: ModelRegistry,
    framing: Framing,
    session_id: Option<u64>,
    request_timeout: Duration,
    cmd_tx: mpsc::Sender<Outbound>,
    next_id: AtomicU64,
    health: Arc<watch::Sender<SessionHealth>>,
    closed: AtomicBool,
    subscribed: AtomicBool,
    notif_rx: Mutex<Option<mpsc::Receiver<Result<EventNotification, Error>>>>,
    cancel: CancellationToken,
}

struct Outbound {
    frame: Bytes,
    reply: Option<(u64, oneshot::Sender<RpcReply>)>,
}

impl NetconfSession {
    /// Open the SSH `netconf` subsystem against the target and run the
    /// `<hello>` exchange.
    pub async fn connect(target: &Target, registry: ModelRegistry) -> Result<Self, Error> {
        let link = SshLink::connect(target, ChannelMode::Subsystem("netconf")).await?;
        Self::from_link(Box::new(link), target.endpoint(), target.request_timeout, registry).await
    }

    /// Negotiate over an already-open byte transport. This is the seam
    /// tests use with in-memory pipes.
    pub async fn from_link(
        mut link: Box<dyn Link>,
        endpoint: impl Into<String>,
        request_timeout: Duration,
        registry: ModelRegistry,
    ) -> Result<Self, Error> {
        let endpoint = endpoint.into();
        let mut decoder = FrameDecoder::new(Framing::EndOfMessage);

        // The hello is always end-of-message framed; the negotiated
        // base version selects the framing for everything after it.
        link.send(&framing::encode(Framing::EndOfMessage, codec::hello().as_bytes())).await?;

        let exchange = async {
            loop {
                if let Some(frame) = decoder.next_frame()? {
                    return Ok::<Bytes, Error>(frame);
                }
                match link.recv().await? {
                    Some(bytes) => decoder.extend(&bytes),
                    None => {
                        return Err(Error::negotiation(
                            &endpoint,
                            "connection closed during <hello> exchange",
                        ));
                    }
                }
            }
        };
        let server_hello = tokio::time::timeout(request_timeout, exchange)
            .await
            .map_err(|_| Error::Timeout { after: request_timeout })??;

        let (uris, session_id) = codec::parse_hello(&server_hello)?;
        let caps = Capabilities::from_netconf(uris).ok_or_else(|| {
            Error::negotiation(&endpoint, "no supported NETCONF base version advertised")
        })?;
        let framing = match caps.netconf_base {
            Some(NetconfBase::V1_1) => Framing::Chunked,
            _ => Framing::EndOfMessage,
        };
        decoder.set_framing(framing);
        debug!(%endpoint, ?framing, session_id, "NETCONF session negotiated");

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (notif_tx, notif_rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let (health_tx, _) = watch::channel(SessionHealth::Ready);
        let health = Arc::new(health_tx);
        let cancel = CancellationToken::new();

        tokio::spawn(
            SessionLoop {
                link,
                decoder,
                cmd_rx,
                pending: HashMap::new(),
                notif_tx,
                dropped: 0,
                health: Arc::clone(&health),
                cancel: cancel.clone(),
                endpoint: endpoint.clone(),
            }
            .run(),
        );

        Ok(Self {
            endpoint,
            caps,
            registry,
            framing,
            session_id,
            request_timeout,
            cmd_tx,
            next_id: AtomicU64::new(1),
            health,
            closed: AtomicBool::new(false),
            subscribed: AtomicBool::new(false),
            notif_rx: Mutex::new(Some(notif_rx)),
            cancel,
        })
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Server-assigned session-id from the hello, when present.
    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn health(&self) -> watch::Receiver<SessionHealth> {
        self.health.subscribe()
    }

    /// Read a subtree. `ConfigOnly` maps to `<get-config>` on the
    /// running datastore; state reads use `<get>`, which always
    /// includes config (NETCONF has no state-only retrieval).
    pub async fn get(&self, path: &Path, scope: Scope) -> Result<Fetched, Error> {
        let body = codec::get_rpc(path, scope, &self.registry);
        let data = self
            .rpc(&body)
            .await?
            .ok_or_else(|| Error::malformed("NETCONF", "get reply without <data>"))?;
        let node = codec::extract(&data, path, &self.registry)?;
        Ok(Fetched { origin: scope, root: codec::node_to_value(node) })
    }

    /// One `<edit-config>` carrying the policy as an `nc:operation`
    /// attribute. Targets the candidate datastore when the server has
    /// one (changes then wait for [`NetconfSession::commit`]), the
    /// running datastore otherwise.
    pub async fn set(
        &self,
        path: &Path,
        payload: Option<&Payload>,
        policy: MergePolicy,
    ) -> Result<(), Error> {
        let body = match payload {
            Some(payload) => {
                if payload.encoding != Encoding::Xml {
                    return Err(Error::unsupported(format!(
                        "NETCONF writes require XML payloads, got {}",
                        payload.encoding
                    )));
                }
                Some(std::str::from_utf8(&payload.bytes).map_err(|e| {
                    Error::malformed("payload", format!("not UTF-8: {e}"))
                })?)
            }
            None => None,
        };
        let rpc =
            codec::edit_config_rpc(path, body, policy, self.edit_datastore(), &self.registry)?;
        self.rpc(&rpc).await?;
        Ok(())
    }

    /// Promote candidate changes to running.
    pub async fn commit(&self) -> Result<(), Error> {
        self.require_candidate("commit")?;
        self.rpc(&codec::datastore_rpc("commit", "")).await?;
        Ok(())
    }

    /// Throw away uncommitted candidate changes.
    pub async fn discard(&self) -> Result<(), Error> {
        self.require_candidate("discard-changes")?;
        self.rpc(&codec::datastore_rpc("discard-changes", "")).await?;
        Ok(())
    }

    /// Server-side validation of the edit datastore.
    pub async fn validate(&self) -> Result<(), Error> {
        if !self.caps.datastores.validate {
            return Err(Error::unsupported("server does not advertise :validate"));
        }
        self.rpc(&codec::datastore_rpc("validate", self.edit_datastore())).await?;
        Ok(())
    }

    pub async fn lock(&self) -> Result<(), Error> {
        self.rpc(&codec::datastore_rpc("lock", self.edit_datastore())).await?;
        Ok(())
    }

    pub async fn unlock(&self) -> Result<(), Error> {
        self.rpc(&codec::datastore_rpc("unlock", self.edit_datastore())).await?;
        Ok(())
    }

    /// RFC 5277 `<create-subscription>`. The base notification
    /// capability allows one subscription per session and only
    /// on-change delivery; periodic sampling needs gNMI.
    pub async fn subscribe(
        &self,
        path: &Path,
        mode: SubscriptionMode,
    ) -> Result<NetconfNotifications, Error> {
        if !matches!(mode, SubscriptionMode::OnChange) {
            return Err(Error::unsupported("NETCONF subscriptions are on-change only"));
        }
        if !self.caps.supports_subscribe() {
            return Err(Error::unsupported(
                "server does not advertise the notification capability",
            ));
        }
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Err(Error::unsupported("one subscription per NETCONF session"));
        }
        let rx = match self.notif_rx.lock().await.take() {
            Some(rx) => rx,
            None => return Err(Error::Closed),
        };
        if let Err(e) = self.rpc(&codec::create_subscription_rpc(path, &self.registry)).await {
            self.subscribed.store(false, Ordering::SeqCst);
            *self.notif_rx.lock().await = Some(rx);
            return Err(e);
        }
        Ok(NetconfNotifications { rx, path: path.clone() })
    }

    /// Orderly teardown: `<close-session>`, then stop the loop. Safe to
    /// call more than once.
    pub async fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = self.frame_rpc(id, "<close-session/>");
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Outbound { frame, reply: Some((id, tx)) }).await.is_ok() {
            // The server may already be gone; do not wait forever.
            let _ = tokio::time::timeout(CLOSE_GRACE, rx).await;
        }
        self.cancel.cancel();
        Ok(())
    }

    fn edit_datastore(&self) -> &'static str {
        if self.caps.datastores.candidate { "candidate" } else { "running" }
    }

    fn require_candidate(&self, op: &str) -> Result<(), Error> {
        if self.caps.datastores.candidate {
            Ok(())
        } else {
            Err(Error::unsupported(format!(
                "<{op}> requires the :candidate capability"
            )))
        }
    }

    fn frame_rpc(&self, id: u64, body: &str) -> Bytes {
        framing::encode(self.framing, codec::rpc_envelope(id, body).as_bytes())
    }

    /// Send one rpc and wait for its correlated reply. A deadline miss
    /// marks the session degraded; the entry stays registered so the
    /// loop can discard the late reply by id.
    async fn rpc(&self, body: &str) -> Result<Option<codec::XmlNode>, Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = self.frame_rpc(id, body);
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Outbound { frame, reply: Some((id, tx)) })
            .await
            .map_err(|_| Error::Closed)?;

        let reply = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(Error::Closed),
            Err(_) => {
                self.set_health(SessionHealth::Degraded);
                return Err(Error::Timeout { after: self.request_timeout });
            }
        };
        self.set_health(SessionHealth::Ready);
        reply.into_checked()
    }

    fn set_health(&self, health: SessionHealth) {
        self.health.send_if_modified(|current| {
            if *current == SessionHealth::Closed || *current == health {
                return false;
            }
            *current = health;
            true
        });
    }
}

impl Drop for NetconfSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for NetconfSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetconfSession")
            .field("endpoint", &self.endpoint)
            .field("session_id", &self.session_id)
            .field("framing", &self.framing)
            .finish_non_exhaustive()
    }
}

/// Notifications for the session's single RFC 5277 subscription.
///
/// When the receiver falls behind the bounded buffer, newer events are
/// dropped and the next delivered item is an [`Error::Overflow`]
/// carrying the count; the stream itself continues.
#[derive(Debug)]
pub struct NetconfNotifications {
    rx: mpsc::Receiver<Result<EventNotification, Error>>,
    path: Path,
}

impl NetconfNotifications {
    /// Next event, `None` once the session is gone.
    pub async fn next(&mut self) -> Option<Result<Update, Error>> {
        match self.rx.recv().await? {
            Ok(event) => Some(Ok(Update {
                path: self.path.clone(),
                value: event.body.as_ref().map_or(Value::Null, codec::node_to_value),
                timestamp: event.event_time,
            })),
            Err(e) => Some(Err(e)),
        }
    }
}

// ── Background loop ─────────────────────────────────────────────────

struct SessionLoop {
    link: Box<dyn Link>,
    decoder: FrameDecoder,
    cmd_rx: mpsc::Receiver<Outbound>,
    pending: HashMap<u64, oneshot::Sender<RpcReply>>,
    notif_tx: mpsc::Sender<Result<EventNotification, Error>>,
    dropped: u64,
    health: Arc<watch::Sender<SessionHealth>>,
    cancel: CancellationToken,
    endpoint: String,
}

impl SessionLoop {
    async fn run(mut self) {
        let orderly = self.serve().await;
        // Dropping the waiters surfaces `Closed` to in-flight rpcs.
        self.pending.clear();
        if !orderly {
            let _ = self.notif_tx.try_send(Err(Error::Closed));
        }
        let _ = self.link.shutdown().await;
        self.health.send_replace(SessionHealth::Closed);
        debug!(endpoint = %self.endpoint, "NETCONF session loop stopped");
    }

    /// `true` when stopping was requested, `false` on transport
    /// failure or unexpected peer close.
    async fn serve(&mut self) -> bool {
        loop {
            loop {
                match self.decoder.next_frame() {
                    Ok(Some(frame)) => self.handle_frame(&frame),
                    Ok(None) => break,
                    Err(e) => {
                        error!(endpoint = %self.endpoint, error = %e, "NETCONF framing violation");
                        return false;
                    }
                }
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return true,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(out) => {
                        if let Some((id, tx)) = out.reply {
                            self.pending.insert(id, tx);
                        }
                        if let Err(e) = self.link.send(&out.frame).await {
                            error!(endpoint = %self.endpoint, error = %e, "NETCONF send failed");
                            return false;
                        }
                    }
                    None => return true,
                },
                read = self.link.recv() => match read {
                    Ok(Some(bytes)) => self.decoder.extend(&bytes),
                    Ok(None) => {
                        debug!(endpoint = %self.endpoint, "NETCONF peer closed the connection");
                        return false;
                    }
                    Err(e) => {
                        error!(endpoint = %self.endpoint, error = %e, "NETCONF receive failed");
                        return false;
                    }
                },
            }
        }
    }

    fn handle_frame(&mut self, bytes: &Bytes) {
        match codec::parse_frame(bytes) {
            Ok(Frame::Reply(reply)) => {
                let Some(id) = reply.message_id else {
                    trace!(endpoint = %self.endpoint, "discarding reply without message-id");
                    return;
                };
                match self.pending.remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(reply);
                    }
                    None => trace!(
                        endpoint = %self.endpoint,
                        message_id = id,
                        "discarding reply with no waiting request"
                    ),
                }
            }
            Ok(Frame::Notification(event)) => self.push_notification(Ok(event)),
            Err(e) => {
                // One undecodable frame does not kill the session; the
                // affected request surfaces as a timeout.
                warn!(endpoint = %self.endpoint, error = %e, "skipping undecodable frame");
            }
        }
    }

    fn push_notification(&mut self, item: Result<EventNotification, Error>) {
        if self.dropped > 0 {
            match self.notif_tx.try_send(Err(Error::Overflow { dropped: self.dropped })) {
                Ok(()) => self.dropped = 0,
                Err(_) => {
                    self.dropped += 1;
                    return;
                }
            }
        }
        if self.notif_tx.try_send(item).is_err() {
            self.dropped += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::DuplexStream;

    use crate::link::IoLink;

    use super::*;

    const IF_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-interfaces";

    struct MockServer {
        link: IoLink<DuplexStream>,
        decoder: FrameDecoder,
        framing: Framing,
    }

    impl MockServer {
        fn new(stream: DuplexStream) -> Self {
            Self {
                link: IoLink::new(stream),
                decoder: FrameDecoder::new(Framing::EndOfMessage),
                framing: Framing::EndOfMessage,
            }
        }

        fn switch(&mut self, framing: Framing) {
            self.framing = framing;
            self.decoder.set_framing(framing);
        }

        async fn recv_frame(&mut self) -> String {
            loop {
                if let Some(frame) = self.decoder.next_frame().expect("well-formed frame") {
                    return String::from_utf8(frame.to_vec()).expect("utf-8 frame");
                }
                let bytes = self.link.recv().await.expect("recv").expect("peer open");
                self.decoder.extend(&bytes);
            }
        }

        async fn send_frame(&mut self, xml: &str) {
            let framed = framing::encode(self.framing, xml.as_bytes());
            self.link.send(&framed).await.expect("send");
        }
    }

    fn hello(bases: &[&str], extra: &[&str]) -> String {
        let caps: String = bases
            .iter()
            .chain(extra)
            .map(|uri| format!("<capability>{uri}</capability>"))
            .collect();
        format!(
            "<hello xmlns=\"{}\"><capabilities>{caps}</capabilities>\
             <session-id>99</session-id></hello>",
            codec::BASE_NS
        )
    }

    fn ok_reply(id: u64) -> String {
        format!("<rpc-reply xmlns=\"{}\" message-id=\"{id}\"><ok/></rpc-reply>", codec::BASE_NS)
    }

    fn interfaces_reply(id: u64) -> String {
        format!(
            "<rpc-reply xmlns=\"{}\" message-id=\"{id}\"><data>\
             <interfaces xmlns=\"{IF_NS}\">\
             <interface><name>eth0</name><enabled>true</enabled></interface>\
             </interfaces></data></rpc-reply>",
            codec::BASE_NS
        )
    }

    fn eth0_path() -> Path {
        Path::parse("/ietf-interfaces:interfaces/interface[name=eth0]").expect("valid path")
    }

    async fn start(
        server_behavior: impl FnOnce(MockServer) -> tokio::task::JoinHandle<()>,
    ) -> (NetconfSession, tokio::task::JoinHandle<()>) {
        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        let server = server_behavior(MockServer::new(server_end));
        let session = NetconfSession::from_link(
            Box::new(IoLink::new(client_end)),
            "device:830",
            Duration::from_secs(5),
            ModelRegistry::with_defaults(),
        )
        .await
        .expect("negotiation");
        (session, server)
    }

    #[tokio::test]
    async fn config_read_returns_the_selected_node() {
        let (session, server) = start(|mut srv| {
            tokio::spawn(async move {
                let _client_hello = srv.recv_frame().await;
                srv.send_frame(&hello(&["urn:ietf:params:netconf:base:1.0"], &[])).await;
                let get = srv.recv_frame().await;
                assert!(get.contains("<get-config>"));
                assert!(get.contains("message-id=\"1\""));
                assert!(get.contains("<name>eth0</name>"));
                srv.send_frame(&interfaces_reply(1)).await;
                let close = srv.recv_frame().await;
                assert!(close.contains("<close-session/>"));
                srv.send_frame(&ok_reply(2)).await;
            })
        })
        .await;

        assert_eq!(session.session_id(), Some(99));
        let fetched = session.get(&eth0_path(), Scope::ConfigOnly).await.expect("get");
        assert_eq!(fetched.origin, Scope::ConfigOnly);
        assert_eq!(
            fetched.root.get("name").and_then(Value::as_str),
            Some("eth0"),
            "exactly the requested list entry comes back"
        );
        session.close().await.expect("close");
        server.await.expect("server");
    }

    #[tokio::test]
    async fn chunked_framing_after_base_1_1_hello() {
        let (session, server) = start(|mut srv| {
            tokio::spawn(async move {
                let _client_hello = srv.recv_frame().await;
                srv.send_frame(&hello(
                    &["urn:ietf:params:netconf:base:1.0", "urn:ietf:params:netconf:base:1.1"],
                    &[],
                ))
                .await;
                srv.switch(Framing::Chunked);
                let get = srv.recv_frame().await;
                assert!(get.contains("<get>"));
                srv.send_frame(&interfaces_reply(1)).await;
            })
        })
        .await;

        assert_eq!(session.capabilities().netconf_base, Some(NetconfBase::V1_1));
        let fetched = session.get(&eth0_path(), Scope::Both).await.expect("get");
        assert_eq!(fetched.root.get("name").and_then(Value::as_str), Some("eth0"));
        server.await.expect("server");
    }

    #[tokio::test]
    async fn missing_base_version_fails_negotiation() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            let mut srv = MockServer::new(server_end);
            let _client_hello = srv.recv_frame().await;
            srv.send_frame(&hello(&[], &["urn:example:custom"])).await;
        });
        let err = NetconfSession::from_link(
            Box::new(IoLink::new(client_end)),
            "device:830",
            Duration::from_secs(5),
            ModelRegistry::with_defaults(),
        )
        .await
        .expect_err("no base version");
        assert!(matches!(err, Error::Negotiation { .. }));
        server.await.expect("server");
    }

    #[tokio::test]
    async fn stray_reply_is_discarded_by_message_id() {
        let (session, server) = start(|mut srv| {
            tokio::spawn(async move {
                let _client_hello = srv.recv_frame().await;
                srv.send_frame(&hello(&["urn:ietf:params:netconf:base:1.0"], &[])).await;
                let _get = srv.recv_frame().await;
                // A reply nobody asked for, then the real one.
                srv.send_frame(&interfaces_reply(777)).await;
                srv.send_frame(&interfaces_reply(1)).await;
            })
        })
        .await;

        let fetched = session.get(&eth0_path(), Scope::ConfigOnly).await.expect("get");
        assert_eq!(fetched.root.get("name").and_then(Value::as_str), Some("eth0"));
        server.await.expect("server");
    }

    #[tokio::test]
    async fn unanswered_rpc_times_out_and_degrades_health() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            let mut srv = MockServer::new(server_end);
            let _client_hello = srv.recv_frame().await;
            srv.send_frame(&hello(&["urn:ietf:params:netconf:base:1.0"], &[])).await;
            // Swallow the rpc without answering.
            let _get = srv.recv_frame().await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        });
        let session = NetconfSession::from_link(
            Box::new(IoLink::new(client_end)),
            "device:830",
            Duration::from_millis(100),
            ModelRegistry::with_defaults(),
        )
        .await
        .expect("negotiation");

        let err = session.get(&eth0_path(), Scope::Both).await.expect_err("no reply");
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(*session.health().borrow(), SessionHealth::Degraded);
        server.abort();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_fences_later_calls() {
        let (session, server) = start(|mut srv| {
            tokio::spawn(async move {
                let _client_hello = srv.recv_frame().await;
                srv.send_frame(&hello(&["urn:ietf:params:netconf:base:1.0"], &[])).await;
                let close = srv.recv_frame().await;
                assert!(close.contains("<close-session/>"));
                srv.send_frame(&ok_reply(1)).await;
            })
        })
        .await;

        session.close().await.expect("first close");
        session.close().await.expect("second close");
        let err = session.get(&eth0_path(), Scope::Both).await.expect_err("fenced");
        assert!(matches!(err, Error::Closed));
        server.await.expect("server");
    }

    #[tokio::test]
    async fn single_subscription_delivers_updates_in_order() {
        let notification = |name: &str| {
            format!(
                "<notification xmlns=\"urn:ietf:params:xml:ns:netconf:notification:1.0\">\
                 <eventTime>2026-03-01T10:20:30Z</eventTime>\
                 <netconf-config-change xmlns=\"urn:example:events\">\
                 <edit><target>{name}</target></edit>\
                 </netconf-config-change></notification>"
            )
        };
        let (session, server) = start(move |mut srv| {
            tokio::spawn(async move {
                let _client_hello = srv.recv_frame().await;
                srv.send_frame(&hello(
                    &["urn:ietf:params:netconf:base:1.0"],
                    &["urn:ietf:params:netconf:capability:notification:1.0"],
                ))
                .await;
                let create = srv.recv_frame().await;
                assert!(create.contains("<create-subscription"));
                srv.send_frame(&ok_reply(1)).await;
                srv.send_frame(&notification("eth0")).await;
                srv.send_frame(&notification("eth1")).await;
            })
        })
        .await;

        let path = Path::parse("/ietf-interfaces:interfaces").expect("valid path");
        let mut updates = session
            .subscribe(&path, SubscriptionMode::OnChange)
            .await
            .expect("subscription accepted");

        let err = session
            .subscribe(&path, SubscriptionMode::OnChange)
            .await
            .expect_err("second subscription");
        assert!(matches!(err, Error::Unsupported { .. }));

        for expected in ["eth0", "eth1"] {
            let update = updates.next().await.expect("update").expect("not an error");
            assert_eq!(update.path, path);
            assert!(update.timestamp.is_some());
            let target = update
                .value
                .get("edit")
                .and_then(|edit| edit.get("target"))
                .and_then(Value::as_str);
            assert_eq!(target, Some(expected));
        }
        server.await.expect("server");
    }

    #[tokio::test]
    async fn sampled_subscription_is_rejected() {
        let (session, server) = start(|mut srv| {
            tokio::spawn(async move {
                let _client_hello = srv.recv_frame().await;
                srv.send_frame(&hello(
                    &["urn:ietf:params:netconf:base:1.0"],
                    &["urn:ietf:params:netconf:capability:notification:1.0"],
                ))
                .await;
            })
        })
        .await;

        let path = Path::parse("/ietf-interfaces:interfaces").expect("valid path");
        let err = session
            .subscribe(&path, SubscriptionMode::Sample(Duration::from_secs(10)))
            .await
            .expect_err("sampling unsupported");
        assert!(matches!(err, Error::Unsupported { .. }));
        server.await.expect("server");
    }
}
