// ── Core error types ──
//
// User-facing errors from wireplane-core. These are NOT protocol-specific --
// consumers never see reqwest, russh, or tonic errors directly. The
// `From<wireplane_api::Error>` impl translates transport-layer errors
// into protocol-agnostic variants.

use std::time::Duration;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to {endpoint}: {detail}")]
    Connect { endpoint: String, detail: String },

    #[error("Transport security failure for {endpoint}: {detail}")]
    Tls { endpoint: String, detail: String },

    #[error("Operation timed out")]
    Timeout {
        /// The deadline that expired, when the protocol layer knows it.
        after: Option<Duration>,
    },

    #[error("Capability negotiation with {endpoint} failed: {detail}")]
    Negotiation { endpoint: String, detail: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Not supported on this session: {what}")]
    Unsupported { what: String },

    #[error("Node not found: {path}")]
    NodeNotFound { path: String },

    #[error("Device rejected the request: {message}")]
    ServerRejected {
        message: String,
        /// Protocol error tag (`data-exists`, `access-denied`, a gRPC
        /// status code name) when the device sent one.
        tag: Option<String>,
        /// When `true` the device guarantees nothing was applied; when
        /// `false` a partial apply is possible and the caller must
        /// inspect device state before retrying.
        transactional: bool,
    },

    #[error("Session is closed")]
    Closed,

    // ── Subscription errors ──────────────────────────────────────────
    #[error("Subscription fell behind: {dropped} updates dropped")]
    Overflow { dropped: u64 },

    // ── Decode errors ────────────────────────────────────────────────
    #[error("Malformed {kind} payload from device: {detail}")]
    Malformed { kind: &'static str, detail: String },

    #[error("Invalid path {path:?}: {detail}")]
    InvalidPath { path: String, detail: String },
}

impl Error {
    /// Errors worth a reconnect-and-retry by the caller. Writes are
    /// never retried here: a timed-out `set` may still have applied.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Connect { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<wireplane_api::Error> for Error {
    fn from(err: wireplane_api::Error) -> Self {
        use wireplane_api::Error as Api;
        match err {
            Api::Connect { endpoint, detail } => Error::Connect { endpoint, detail },
            Api::Security { endpoint, detail } => Error::Tls { endpoint, detail },
            Api::Timeout { after } => Error::Timeout { after: Some(after) },
            Api::Http(ref e) => {
                if e.is_timeout() {
                    Error::Timeout { after: None }
                } else if e.is_connect() {
                    Error::Connect {
                        endpoint: e.url().map(|u| u.to_string()).unwrap_or_default(),
                        detail: e.to_string(),
                    }
                } else {
                    // Status-carrying failures are classified by the
                    // session before they get here; the rest is decode
                    // and body-read plumbing.
                    Error::Malformed { kind: "HTTP", detail: e.to_string() }
                }
            }
            Api::Ssh(e) => Error::Connect { endpoint: String::new(), detail: e.to_string() },
            Api::SshKey(e) => Error::Tls { endpoint: String::new(), detail: e.to_string() },
            Api::GrpcChannel(e) => {
                Error::Connect { endpoint: String::new(), detail: e.to_string() }
            }
            Api::GrpcStatus(status) => {
                // Numeric gRPC codes: 4 DEADLINE_EXCEEDED, 5 NOT_FOUND,
                // 12 UNIMPLEMENTED, 14 UNAVAILABLE, 16 UNAUTHENTICATED.
                match status.code() as i32 {
                    4 => Error::Timeout { after: None },
                    5 => Error::NodeNotFound { path: status.message().to_owned() },
                    12 => Error::Unsupported { what: status.message().to_owned() },
                    14 => Error::Connect {
                        endpoint: String::new(),
                        detail: status.message().to_owned(),
                    },
                    16 => Error::Tls {
                        endpoint: String::new(),
                        detail: format!("authentication rejected: {}", status.message()),
                    },
                    _ => Error::ServerRejected {
                        message: status.message().to_owned(),
                        tag: Some(format!("{:?}", status.code())),
                        // gNMI sets are all-or-none; anything else
                        // reaching this arm is a read, where the
                        // distinction is moot.
                        transactional: true,
                    },
                }
            }
            Api::InvalidUrl(e) => Error::Connect {
                endpoint: String::new(),
                detail: format!("invalid URL: {e}"),
            },
            Api::Io(e) => Error::Connect { endpoint: String::new(), detail: e.to_string() },
            Api::Negotiation { endpoint, detail } => Error::Negotiation { endpoint, detail },
            Api::Closed => Error::Closed,
            Api::Unsupported { what } => Error::Unsupported { what },
            Api::NodeNotFound { path } => Error::NodeNotFound { path },
            Api::Rejected { message, severity: _, tag, atomic } => {
                Error::ServerRejected { message, tag, transactional: atomic }
            }
            Api::Overflow { dropped } => Error::Overflow { dropped },
            Api::Malformed { kind, detail } => Error::Malformed { kind, detail },
            Api::InvalidPath { path, detail } => Error::InvalidPath { path, detail },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_keep_tag_and_transaction_guarantee() {
        let api = wireplane_api::Error::Rejected {
            message: "resource denied".into(),
            severity: Some("error".into()),
            tag: Some("access-denied".into()),
            atomic: true,
        };
        match Error::from(api) {
            Error::ServerRejected { message, tag, transactional } => {
                assert_eq!(message, "resource denied");
                assert_eq!(tag.as_deref(), Some("access-denied"));
                assert!(transactional);
            }
            other => panic!("expected ServerRejected, got: {other:?}"),
        }
    }

    #[test]
    fn timeouts_translate_with_their_deadline() {
        let api = wireplane_api::Error::Timeout { after: Duration::from_secs(30) };
        match Error::from(api) {
            Error::Timeout { after } => assert_eq!(after, Some(Duration::from_secs(30))),
            other => panic!("expected Timeout, got: {other:?}"),
        }
    }

    #[test]
    fn session_lifecycle_variants_pass_through() {
        assert!(matches!(Error::from(wireplane_api::Error::Closed), Error::Closed));
        assert!(matches!(
            Error::from(wireplane_api::Error::Overflow { dropped: 4 }),
            Error::Overflow { dropped: 4 }
        ));
        assert!(matches!(
            Error::from(wireplane_api::Error::Unsupported { what: "commit".into() }),
            Error::Unsupported { .. }
        ));
    }

    #[test]
    fn grpc_statuses_map_by_code() {
        let not_found = wireplane_api::Error::GrpcStatus(tonic::Status::not_found("no node"));
        assert!(matches!(Error::from(not_found), Error::NodeNotFound { .. }));

        let deadline =
            wireplane_api::Error::GrpcStatus(tonic::Status::deadline_exceeded("too slow"));
        assert!(matches!(Error::from(deadline), Error::Timeout { after: None }));

        let unavailable = wireplane_api::Error::GrpcStatus(tonic::Status::unavailable("down"));
        assert!(matches!(Error::from(unavailable), Error::Connect { .. }));
    }

    #[test]
    fn only_connects_and_timeouts_are_transient() {
        assert!(Error::Timeout { after: None }.is_transient());
        assert!(!Error::Closed.is_transient());
        assert!(
            !Error::ServerRejected { message: String::new(), tag: None, transactional: true }
                .is_transient()
        );
    }
}
