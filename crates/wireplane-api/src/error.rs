use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the `wireplane-api` crate.
///
/// Covers every failure mode across all protocol surfaces: SSH/TLS
/// transport, NETCONF framing and RPC handling, RESTCONF HTTP calls,
/// gNMI RPCs, and CLI prompt handling. `wireplane-core` maps these into
/// the protocol-agnostic taxonomy callers branch on.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// Underlying connection could not be established.
    #[error("Connection to {endpoint} failed: {detail}")]
    Connect { endpoint: String, detail: String },

    /// TLS certificate or SSH host-key verification failed.
    #[error("Transport security failure for {endpoint}: {detail}")]
    Security { endpoint: String, detail: String },

    /// Request or handshake exceeded its deadline.
    #[error("Timed out after {after:?}")]
    Timeout { after: Duration },

    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// SSH protocol or channel error.
    #[error("SSH transport error: {0}")]
    Ssh(#[from] russh::Error),

    /// SSH private-key material could not be decoded.
    #[error("SSH key error: {0}")]
    SshKey(#[from] russh_keys::Error),

    /// gRPC channel setup error.
    #[error("gRPC channel error: {0}")]
    GrpcChannel(#[from] tonic::transport::Error),

    /// Non-OK gRPC status from the device.
    #[error("gRPC status: {0}")]
    GrpcStatus(#[from] tonic::Status),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Raw stream I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Session lifecycle ───────────────────────────────────────────
    /// Capability handshake failed; no usable session exists.
    #[error("Capability negotiation with {endpoint} failed: {detail}")]
    Negotiation { endpoint: String, detail: String },

    /// Operation attempted on a session that is already closed.
    #[error("Session is closed")]
    Closed,

    // ── Requests ────────────────────────────────────────────────────
    /// Requested encoding, merge policy, or operation is outside the
    /// negotiated capability set.
    #[error("Unsupported by this session: {what}")]
    Unsupported { what: String },

    /// Decode-time lookup failure: the requested path (or its
    /// namespace) is absent from the response data.
    #[error("Node not found in response: {path}")]
    NodeNotFound { path: String },

    /// The device reported a semantic failure (NETCONF `rpc-error`,
    /// HTTP 4xx/5xx, gNMI non-OK set result). `atomic` records whether
    /// the protocol guarantees the failed change was all-or-none.
    #[error("Server rejected request: {message}")]
    Rejected {
        message: String,
        severity: Option<String>,
        tag: Option<String>,
        atomic: bool,
    },

    /// A session-side notification buffer filled up and updates were
    /// discarded before the caller drained them.
    #[error("Subscription buffer overflowed: {dropped} updates dropped")]
    Overflow { dropped: u64 },

    // ── Data ────────────────────────────────────────────────────────
    /// A wire payload could not be parsed, with a body preview for
    /// debugging.
    #[error("Malformed {kind} payload: {detail}")]
    Malformed { kind: &'static str, detail: String },

    /// A path string could not be parsed into segments.
    #[error("Invalid path {path:?}: {detail}")]
    InvalidPath { path: String, detail: String },
}

impl Error {
    pub(crate) fn connect(endpoint: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Connect { endpoint: endpoint.into(), detail: detail.into() }
    }

    pub(crate) fn security(endpoint: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Security { endpoint: endpoint.into(), detail: detail.into() }
    }

    pub(crate) fn negotiation(endpoint: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Negotiation { endpoint: endpoint.into(), detail: detail.into() }
    }

    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported { what: what.into() }
    }

    pub(crate) fn malformed(kind: &'static str, detail: impl Into<String>) -> Self {
        Self::Malformed { kind, detail: detail.into() }
    }

    /// Returns `true` if this error is a deadline expiry at any layer.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Http(e) => e.is_timeout(),
            Self::GrpcStatus(s) => s.code() == tonic::Code::DeadlineExceeded,
            _ => false,
        }
    }

    /// Returns `true` if this is a transient transport error. Callers
    /// own retry policy; the protocol sessions never retry internally.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connect { .. } | Self::Timeout { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::GrpcStatus(s) => s.code() == tonic::Code::Unavailable,
            _ => false,
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
