// wireplane-api: protocol sessions and codecs for network-device
// management (NETCONF, RESTCONF, gNMI, raw CLI)

pub mod capabilities;
pub mod cli;
pub mod error;
pub mod gnmi;
pub mod link;
pub mod netconf;
pub mod op;
pub mod path;
pub mod restconf;
pub mod target;
pub mod value;

pub(crate) mod ssh;

pub use capabilities::{Capabilities, DatastoreSupport, Encoding, ModelInfo, NetconfBase};
pub use cli::CliSession;
pub use error::Error;
pub use gnmi::{GnmiSession, GnmiUpdates};
pub use link::{IoLink, Link};
pub use netconf::{ModelRegistry, NetconfNotifications, NetconfSession};
pub use op::{
    Fetched, MergePolicy, PatchEdit, Payload, Scope, SessionHealth, SubscriptionMode, Update,
};
pub use path::{Path, Segment};
pub use restconf::{RestconfNotifications, RestconfSession};
pub use target::{
    CliPlatform, Credentials, HostKeyPolicy, Protocol, Target, TargetBuilder, TlsPolicy,
};
pub use value::Value;
