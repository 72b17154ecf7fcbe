// wireplane-core: one management facade over the wireplane-api
// protocol sessions (NETCONF, RESTCONF, gNMI, CLI).

pub mod client;
pub mod error;
pub mod session;
pub mod subscription;
pub mod telemetry;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::{Client, SetOutcome};
pub use error::Error;
pub use session::ProtocolSession;
pub use subscription::UpdateStream;
pub use telemetry::{OperationEvent, OperationKind, OperationOutcome};

// Re-export the protocol-agnostic vocabulary so consumers rarely need
// wireplane-api directly.
pub use wireplane_api::{
    // Addressing
    Path, Segment, Target, TargetBuilder,
    // Session setup
    CliPlatform, Credentials, HostKeyPolicy, ModelRegistry, Protocol, TlsPolicy,
    // Operations
    Fetched, MergePolicy, PatchEdit, Payload, Scope, SessionHealth, SubscriptionMode, Update,
    // Negotiated features
    Capabilities, DatastoreSupport, Encoding, ModelInfo, NetconfBase,
    // Data model
    Value,
};
