//! Tool permission handling
//!
//! The agent asks before running tools. Those checks reach us through the
//! helper process (`helper`), travel over a Unix socket (`protocol`) to the
//! bridge server (`bridge`), which consults the cache (`cache`) keyed by a
//! normalized target (`target`) before asking the human.

pub mod bridge;
pub mod cache;
pub mod helper;
pub mod protocol;
pub mod target;

pub use bridge::{PermissionBridge, PermissionCounts, PermissionGate};
pub use cache::{PermissionCache, PermissionDecision, StoredPermission};
pub use helper::{ApproverServer, BridgeClient, HelperLaunch};
pub use protocol::{BridgeRequest, BridgeResponse};
