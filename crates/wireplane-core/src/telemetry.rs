// ── Operation telemetry ──
//
// Every facade operation broadcasts one `OperationEvent` after it
// resolves, success or failure. Consumers subscribe through
// [`Client::events`](crate::Client::events); a lagging or absent
// consumer never blocks an operation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use wireplane_api::{MergePolicy, Path, Protocol, Scope};

/// Which facade method produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
#[non_exhaustive]
pub enum OperationKind {
    Get,
    Set,
    ApplyPatch,
    Subscribe,
    Commit,
    Discard,
    Validate,
    Lock,
    Unlock,
    Close,
}

/// How the operation resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub enum OperationOutcome {
    Succeeded,
    Failed { error: String },
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Succeeded)
    }
}

/// One management operation as observed at the facade.
#[derive(Debug, Clone, Serialize)]
pub struct OperationEvent {
    /// Monotonic per-client sequence number, in completion order.
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub protocol: Protocol,
    pub kind: OperationKind,

    // Operation shape, where the kind has one
    pub path: Option<Path>,
    pub scope: Option<Scope>,
    pub policy: Option<MergePolicy>,
    /// Set for writes whose policy can destroy configuration beyond
    /// the payload (`Replace`, `Delete`, `Remove`).
    pub destructive: bool,

    pub outcome: OperationOutcome,
    pub elapsed: Duration,
}
