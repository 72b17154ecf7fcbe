// ── Protocol session dispatch ──
//
// One enum over the four protocol backends so the facade can hold "a
// session" without caring which wire format is underneath. Operations
// a protocol cannot express fail with `Unsupported` here rather than
// deep inside a codec.

use tokio::sync::watch;
use tracing::warn;

use wireplane_api::{
    Capabilities, CliSession, Fetched, GnmiSession, MergePolicy, ModelRegistry, NetconfSession,
    Path, PatchEdit, Payload, Protocol, RestconfSession, Scope, SessionHealth, SubscriptionMode,
    Target,
};

use crate::subscription::ProtocolUpdates;

/// One negotiated session, whichever protocol the target named.
///
/// Normally built through [`Client::connect`](crate::Client::connect);
/// tests and embedders with a pre-negotiated session hand one to
/// [`Client::from_parts`](crate::Client::from_parts) instead.
#[derive(Debug)]
pub enum ProtocolSession {
    Netconf(NetconfSession),
    Restconf(RestconfSession),
    Gnmi(GnmiSession),
    Cli(CliSession),
}

impl From<NetconfSession> for ProtocolSession {
    fn from(session: NetconfSession) -> Self {
        Self::Netconf(session)
    }
}

impl From<RestconfSession> for ProtocolSession {
    fn from(session: RestconfSession) -> Self {
        Self::Restconf(session)
    }
}

impl From<GnmiSession> for ProtocolSession {
    fn from(session: GnmiSession) -> Self {
        Self::Gnmi(session)
    }
}

impl From<CliSession> for ProtocolSession {
    fn from(session: CliSession) -> Self {
        Self::Cli(session)
    }
}

impl ProtocolSession {
    pub(crate) async fn connect(
        target: &Target,
        models: ModelRegistry,
    ) -> Result<Self, wireplane_api::Error> {
        match target.protocol {
            Protocol::Netconf => {
                Ok(Self::Netconf(NetconfSession::connect(target, models).await?))
            }
            Protocol::Restconf => Ok(Self::Restconf(RestconfSession::connect(target).await?)),
            Protocol::Gnmi => Ok(Self::Gnmi(GnmiSession::connect(target).await?)),
            Protocol::Cli => Ok(Self::Cli(CliSession::connect(target).await?)),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Netconf(_) => Protocol::Netconf,
            Self::Restconf(_) => Protocol::Restconf,
            Self::Gnmi(_) => Protocol::Gnmi,
            Self::Cli(_) => Protocol::Cli,
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        match self {
            Self::Netconf(session) => session.capabilities(),
            Self::Restconf(session) => session.capabilities(),
            Self::Gnmi(session) => session.capabilities(),
            Self::Cli(session) => session.capabilities(),
        }
    }

    pub fn endpoint(&self) -> &str {
        match self {
            Self::Netconf(session) => session.endpoint(),
            Self::Restconf(session) => session.endpoint(),
            Self::Gnmi(session) => session.endpoint(),
            Self::Cli(session) => session.endpoint(),
        }
    }

    /// Liveness channel of the stateful transports. The HTTP-shaped
    /// protocols are connectionless between requests and have none.
    pub(crate) fn health(&self) -> Option<watch::Receiver<SessionHealth>> {
        match self {
            Self::Netconf(session) => Some(session.health()),
            Self::Cli(session) => Some(session.health()),
            Self::Restconf(_) | Self::Gnmi(_) => None,
        }
    }

    pub(crate) async fn get(
        &self,
        path: &Path,
        scope: Scope,
    ) -> Result<Fetched, wireplane_api::Error> {
        match self {
            Self::Netconf(session) => session.get(path, scope).await,
            Self::Restconf(session) => session.get(path, scope).await,
            Self::Gnmi(session) => session.get(path, scope).await,
            Self::Cli(session) => session.get(path, scope).await,
        }
    }

    pub(crate) async fn set(
        &self,
        path: &Path,
        payload: Option<&Payload>,
        policy: MergePolicy,
    ) -> Result<(), wireplane_api::Error> {
        match self {
            Self::Netconf(session) => session.set(path, payload, policy).await,
            Self::Restconf(session) => session.set(path, payload, policy).await,
            Self::Gnmi(session) => session.set(path, payload, policy).await,
            Self::Cli(session) => session.set(path, payload, policy).await,
        }
    }

    pub(crate) async fn apply_patch(
        &self,
        edits: &[PatchEdit],
    ) -> Result<(), wireplane_api::Error> {
        match self {
            Self::Netconf(session) => netconf_patch(session, edits).await,
            Self::Restconf(session) => session.apply_patch(edits).await,
            Self::Gnmi(session) => session.apply_patch(edits).await,
            Self::Cli(_) => Err(unsupported("CLI sessions cannot apply patch bundles")),
        }
    }

    pub(crate) async fn subscribe(
        &self,
        path: &Path,
        mode: SubscriptionMode,
    ) -> Result<ProtocolUpdates, wireplane_api::Error> {
        match self {
            Self::Netconf(session) => {
                Ok(ProtocolUpdates::Netconf(session.subscribe(path, mode).await?))
            }
            Self::Restconf(session) => {
                Ok(ProtocolUpdates::Restconf(session.subscribe(path, mode).await?))
            }
            Self::Gnmi(session) => Ok(ProtocolUpdates::Gnmi(session.subscribe(path, mode).await?)),
            Self::Cli(_) => Err(unsupported("CLI sessions cannot stream updates")),
        }
    }

    pub(crate) async fn commit(&self) -> Result<(), wireplane_api::Error> {
        match self {
            Self::Netconf(session) => session.commit().await,
            _ => Err(unsupported("commit needs a NETCONF candidate datastore")),
        }
    }

    pub(crate) async fn discard(&self) -> Result<(), wireplane_api::Error> {
        match self {
            Self::Netconf(session) => session.discard().await,
            _ => Err(unsupported("discard needs a NETCONF candidate datastore")),
        }
    }

    pub(crate) async fn validate(&self) -> Result<(), wireplane_api::Error> {
        match self {
            Self::Netconf(session) => session.validate().await,
            _ => Err(unsupported("validate is a NETCONF operation")),
        }
    }

    pub(crate) async fn lock(&self) -> Result<(), wireplane_api::Error> {
        match self {
            Self::Netconf(session) => session.lock().await,
            _ => Err(unsupported("datastore locking is a NETCONF operation")),
        }
    }

    pub(crate) async fn unlock(&self) -> Result<(), wireplane_api::Error> {
        match self {
            Self::Netconf(session) => session.unlock().await,
            _ => Err(unsupported("datastore locking is a NETCONF operation")),
        }
    }

    pub(crate) async fn close(&self) -> Result<(), wireplane_api::Error> {
        match self {
            Self::Netconf(session) => session.close().await,
            Self::Restconf(session) => {
                session.close();
                Ok(())
            }
            Self::Gnmi(session) => {
                session.close();
                Ok(())
            }
            Self::Cli(session) => {
                session.close().await;
                Ok(())
            }
        }
    }
}

fn unsupported(what: &str) -> wireplane_api::Error {
    wireplane_api::Error::Unsupported { what: what.into() }
}

// ── NETCONF candidate bundles ────────────────────────────────────

/// Sequential candidate edits with all-or-none semantics: nothing
/// reaches running until `<commit>`, so a failed edit (or a failed
/// commit) discards the candidate and the error reports a clean
/// transaction. Edits a caller already staged on the candidate ride
/// along with the bundle's commit.
async fn netconf_patch(
    session: &NetconfSession,
    edits: &[PatchEdit],
) -> Result<(), wireplane_api::Error> {
    if !session.capabilities().supports_atomic_patch() {
        return Err(unsupported("atomic patch bundles need the candidate datastore"));
    }
    for edit in edits {
        if let Err(err) = session.set(&edit.path, edit.payload.as_ref(), edit.operation).await {
            return Err(abandon(session, err).await);
        }
    }
    match session.commit().await {
        Ok(()) => Ok(()),
        Err(err) => Err(abandon(session, err).await),
    }
}

/// Drop the candidate and re-tag the failure as transactional, since
/// nothing was promoted to running.
async fn abandon(
    session: &NetconfSession,
    err: wireplane_api::Error,
) -> wireplane_api::Error {
    if let Err(discard_err) = session.discard().await {
        warn!(error = %discard_err, "candidate discard after a failed patch bundle also failed");
    }
    match err {
        wireplane_api::Error::Rejected { message, severity, tag, .. } => {
            wireplane_api::Error::Rejected { message, severity, tag, atomic: true }
        }
        other => other,
    }
}
