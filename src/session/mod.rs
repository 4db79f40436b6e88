//! Session orchestration
//!
//! Runs one prompt against the agent to completion, resuming the session as
//! often as needed to deliver answers to interaction markers.

pub mod heartbeat;
pub mod orchestrator;
pub mod result;

pub use heartbeat::{Heartbeat, ProgressReporter, HEARTBEAT_INTERVAL};
pub use orchestrator::{ExecutionRequest, Orchestrator, Timeouts};
pub use result::{ExecutionResult, InteractionCounts, SessionState};
