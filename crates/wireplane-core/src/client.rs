// ── Client facade ──
//
// One handle over whichever protocol session the target negotiated.
// Simple operations serialize on an internal mutex so a session sees
// at most one request at a time; subscriptions deliver on their own
// channels and never hold that mutex. Every operation broadcasts one
// telemetry event after it resolves.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wireplane_api::{
    Capabilities, Fetched, MergePolicy, ModelRegistry, Path, PatchEdit, Payload, Protocol, Scope,
    SessionHealth, SubscriptionMode, Target,
};

use crate::error::Error;
use crate::session::ProtocolSession;
use crate::subscription::UpdateStream;
use crate::telemetry::{OperationEvent, OperationKind, OperationOutcome};

const EVENT_CHANNEL_SIZE: usize = 256;

/// What the device guaranteed about an accepted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOutcome {
    /// `true` when the write went through an all-or-none mechanism
    /// (one HTTP request, one gNMI SetRequest, a NETCONF candidate
    /// bundle). `false` means a mid-write failure could have left
    /// partial state, so verify with reads before repeating it.
    pub transactional: bool,
    /// Whether the policy could destroy configuration beyond the
    /// payload (`Replace`, `Delete`, `Remove`).
    pub destructive: bool,
}

// ── Client ───────────────────────────────────────────────────────

/// The unified management facade, cheaply cloneable.
///
/// All methods take `&self`; clones share one session, one telemetry
/// channel, and one lifecycle. Dropping an in-flight call abandons the
/// wait, not the session; a write the device already received may
/// still apply.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    target: Target,
    protocol: Protocol,
    endpoint: String,
    capabilities: Capabilities,
    session: Mutex<ProtocolSession>,
    state_tx: watch::Sender<SessionHealth>,
    event_tx: broadcast::Sender<Arc<OperationEvent>>,
    seq: AtomicU64,
    closed: AtomicBool,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Connect to `target` over whichever protocol it names and
    /// negotiate capabilities.
    pub async fn connect(target: Target) -> Result<Self, Error> {
        Self::connect_with_models(target, ModelRegistry::with_defaults()).await
    }

    /// Like [`connect`](Self::connect), with an explicit namespace
    /// registry for the NETCONF filter codec. The other protocols
    /// carry module names in-band and ignore it.
    pub async fn connect_with_models(
        target: Target,
        models: ModelRegistry,
    ) -> Result<Self, Error> {
        info!(endpoint = %target.endpoint(), protocol = %target.protocol, "connecting");
        let session = ProtocolSession::connect(&target, models).await?;
        Ok(Self::from_parts(target, session))
    }

    /// Assemble a client around an already-negotiated session.
    pub fn from_parts(target: Target, session: impl Into<ProtocolSession>) -> Self {
        let session = session.into();
        let protocol = session.protocol();
        let endpoint = session.endpoint().to_owned();
        let capabilities = session.capabilities().clone();
        let (state_tx, _) = watch::channel(SessionHealth::Ready);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let cancel = CancellationToken::new();

        // Stateful transports report liveness themselves (read-loop
        // death, prompt timeouts); mirror that into the facade state.
        let mut task_handles = Vec::new();
        if let Some(health) = session.health() {
            task_handles.push(tokio::spawn(forward_health(
                health,
                state_tx.clone(),
                cancel.clone(),
            )));
        }

        info!(endpoint = %endpoint, %protocol, "client ready");
        Self {
            inner: Arc::new(ClientInner {
                target,
                protocol,
                endpoint,
                capabilities,
                session: Mutex::new(session),
                state_tx,
                event_tx,
                seq: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                cancel,
                task_handles: Mutex::new(task_handles),
            }),
        }
    }

    // ── Introspection ────────────────────────────────────────────

    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    pub fn protocol(&self) -> Protocol {
        self.inner.protocol
    }

    /// The feature set negotiated at connect time.
    pub fn capabilities(&self) -> &Capabilities {
        &self.inner.capabilities
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Watch session liveness. Degraded means a deadline expired on a
    /// stateful transport; Closed is terminal.
    pub fn state(&self) -> watch::Receiver<SessionHealth> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to per-operation telemetry. A lagging receiver skips
    /// events; operations are never blocked by one.
    pub fn events(&self) -> broadcast::Receiver<Arc<OperationEvent>> {
        self.inner.event_tx.subscribe()
    }

    // ── Operations ───────────────────────────────────────────────

    /// Read the subtree at `path`, constrained to config, state, or
    /// both.
    pub async fn get(&self, path: &Path, scope: Scope) -> Result<Fetched, Error> {
        self.inner.ensure_open()?;
        let started = Instant::now();
        let result = {
            let session = self.inner.session.lock().await;
            session.get(path, scope).await
        };
        let shape = OpShape { path: Some(path), scope: Some(scope), ..OpShape::default() };
        self.inner.observe(OperationKind::Get, shape, started, result)
    }

    /// Write under `path` with an explicit merge policy. Never commits
    /// implicitly: on a candidate-datastore NETCONF session the change
    /// waits for [`commit`](Self::commit). Never retried internally,
    /// whatever the failure.
    pub async fn set(
        &self,
        path: &Path,
        payload: Option<&Payload>,
        policy: MergePolicy,
    ) -> Result<SetOutcome, Error> {
        self.inner.ensure_open()?;
        if policy.is_destructive() {
            warn!(endpoint = %self.inner.endpoint, %path, %policy, "destructive write");
        }
        let started = Instant::now();
        let result = {
            let session = self.inner.session.lock().await;
            session.set(path, payload, policy).await
        };
        let shape = OpShape {
            path: Some(path),
            policy: Some(policy),
            destructive: policy.is_destructive(),
            ..OpShape::default()
        };
        self.inner.observe(OperationKind::Set, shape, started, result).map(|()| SetOutcome {
            transactional: single_write_is_transactional(self.inner.protocol),
            destructive: policy.is_destructive(),
        })
    }

    /// Apply a multi-edit bundle atomically: RESTCONF YANG-PATCH, a
    /// NETCONF candidate commit, or one gNMI SetRequest. Sessions
    /// without an all-or-none mechanism refuse with `Unsupported`
    /// instead of degrading to sequential writes.
    pub async fn apply_patch(&self, edits: Vec<PatchEdit>) -> Result<SetOutcome, Error> {
        self.inner.ensure_open()?;
        let destructive = edits.iter().any(|e| e.operation.is_destructive());
        if destructive {
            warn!(
                endpoint = %self.inner.endpoint,
                edits = edits.len(),
                "patch bundle contains destructive edits"
            );
        }
        let started = Instant::now();
        let result = {
            let session = self.inner.session.lock().await;
            session.apply_patch(&edits).await
        };
        let shape = OpShape { destructive, ..OpShape::default() };
        self.inner
            .observe(OperationKind::ApplyPatch, shape, started, result)
            .map(|()| SetOutcome { transactional: true, destructive })
    }

    /// Open a subscription at `path`. Updates flow on their own
    /// channel; a slow consumer sheds updates and is told how many,
    /// and simple operations never wait behind delivery.
    pub async fn subscribe(
        &self,
        path: &Path,
        mode: SubscriptionMode,
    ) -> Result<UpdateStream, Error> {
        self.inner.ensure_open()?;
        let started = Instant::now();
        let result = {
            let session = self.inner.session.lock().await;
            session.subscribe(path, mode).await
        };
        let shape = OpShape { path: Some(path), ..OpShape::default() };
        let source = self.inner.observe(OperationKind::Subscribe, shape, started, result)?;
        Ok(UpdateStream::spawn(source, &self.inner.cancel))
    }

    /// Promote staged candidate changes to running (NETCONF only).
    pub async fn commit(&self) -> Result<(), Error> {
        self.inner.ensure_open()?;
        let started = Instant::now();
        let result = {
            let session = self.inner.session.lock().await;
            session.commit().await
        };
        self.inner.observe(OperationKind::Commit, OpShape::default(), started, result)
    }

    /// Throw away staged candidate changes (NETCONF only).
    pub async fn discard(&self) -> Result<(), Error> {
        self.inner.ensure_open()?;
        let started = Instant::now();
        let result = {
            let session = self.inner.session.lock().await;
            session.discard().await
        };
        self.inner.observe(OperationKind::Discard, OpShape::default(), started, result)
    }

    /// Ask the device to validate the edit datastore (NETCONF only).
    pub async fn validate(&self) -> Result<(), Error> {
        self.inner.ensure_open()?;
        let started = Instant::now();
        let result = {
            let session = self.inner.session.lock().await;
            session.validate().await
        };
        self.inner.observe(OperationKind::Validate, OpShape::default(), started, result)
    }

    /// Take the edit datastore lock (NETCONF only).
    pub async fn lock(&self) -> Result<(), Error> {
        self.inner.ensure_open()?;
        let started = Instant::now();
        let result = {
            let session = self.inner.session.lock().await;
            session.lock().await
        };
        self.inner.observe(OperationKind::Lock, OpShape::default(), started, result)
    }

    /// Release the edit datastore lock (NETCONF only).
    pub async fn unlock(&self) -> Result<(), Error> {
        self.inner.ensure_open()?;
        let started = Instant::now();
        let result = {
            let session = self.inner.session.lock().await;
            session.unlock().await
        };
        self.inner.observe(OperationKind::Unlock, OpShape::default(), started, result)
    }

    /// Tear the session down. Safe to call repeatedly; after the first
    /// call every method returns [`Error::Closed`] without touching
    /// the transport, and outstanding subscriptions are cancelled.
    pub async fn close(&self) -> Result<(), Error> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let started = Instant::now();
        self.inner.cancel.cancel();
        let result = {
            let session = self.inner.session.lock().await;
            session.close().await
        };
        for handle in self.inner.task_handles.lock().await.drain(..) {
            let _ = handle.await;
        }
        self.inner.set_state(SessionHealth::Closed);

        let result = result.map_err(Error::from);
        let outcome = match &result {
            Ok(()) => OperationOutcome::Succeeded,
            Err(err) => OperationOutcome::Failed { error: err.to_string() },
        };
        self.inner.emit(OperationKind::Close, OpShape::default(), started, outcome);
        info!(endpoint = %self.inner.endpoint, "session closed");
        result
    }
}

// ── Internals ────────────────────────────────────────────────────

/// The operation fields riding on a telemetry event, where the kind
/// has them.
#[derive(Default)]
struct OpShape<'a> {
    path: Option<&'a Path>,
    scope: Option<Scope>,
    policy: Option<MergePolicy>,
    destructive: bool,
}

impl ClientInner {
    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn set_state(&self, next: SessionHealth) {
        advance_state(&self.state_tx, next);
    }

    /// Translate, reflect the outcome into session state, and emit
    /// telemetry. Runs for every operation except `close`, which
    /// manages state itself.
    fn observe<T>(
        &self,
        kind: OperationKind,
        shape: OpShape<'_>,
        started: Instant,
        result: Result<T, wireplane_api::Error>,
    ) -> Result<T, Error> {
        let result = result.map_err(Error::from);
        match &result {
            Ok(_) => self.set_state(SessionHealth::Ready),
            Err(Error::Timeout { .. }) => self.set_state(SessionHealth::Degraded),
            Err(Error::Closed) => self.set_state(SessionHealth::Closed),
            Err(_) => {}
        }
        let outcome = match &result {
            Ok(_) => OperationOutcome::Succeeded,
            Err(err) => OperationOutcome::Failed { error: err.to_string() },
        };
        self.emit(kind, shape, started, outcome);
        result
    }

    fn emit(
        &self,
        kind: OperationKind,
        shape: OpShape<'_>,
        started: Instant,
        outcome: OperationOutcome,
    ) {
        let event = OperationEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            at: Utc::now(),
            protocol: self.protocol,
            kind,
            path: shape.path.cloned(),
            scope: shape.scope,
            policy: shape.policy,
            destructive: shape.destructive,
            outcome,
            elapsed: started.elapsed(),
        };
        // No receivers is the normal case, not an error.
        let _ = self.event_tx.send(Arc::new(event));
    }
}

/// HTTP and gNMI writes ride one all-or-none request. A NETCONF
/// edit-config may stop mid-edit and CLI pushes lines one at a time.
fn single_write_is_transactional(protocol: Protocol) -> bool {
    matches!(protocol, Protocol::Restconf | Protocol::Gnmi)
}

/// Never leaves `Closed`; repeated states do not re-notify.
fn advance_state(tx: &watch::Sender<SessionHealth>, next: SessionHealth) {
    tx.send_if_modified(|current| {
        if *current == next || *current == SessionHealth::Closed {
            return false;
        }
        *current = next;
        true
    });
}

/// Mirror a stateful transport's liveness channel into the facade
/// state channel until either side closes.
async fn forward_health(
    mut health: watch::Receiver<SessionHealth>,
    state_tx: watch::Sender<SessionHealth>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = health.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = *health.borrow_and_update();
                advance_state(&state_tx, next);
                if next == SessionHealth::Closed {
                    break;
                }
            }
        }
    }
    debug!("health forwarding stopped");
}
