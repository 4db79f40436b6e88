//! Parley - interactive orchestrator for the Claude Code agent
//!
//! Parley runs the agent in stream-json mode and keeps a human in the loop:
//! tool permission checks are routed through a local bridge, and structured
//! questions the agent embeds in its replies are answered by resuming the
//! session with the human's answer.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

pub mod claude;
pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod interaction;
pub mod logging;
pub mod permission;
pub mod session;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use claude::cli::build_command;
pub use claude::event::{Event, EventType};
pub use claude::process::AgentProcess;
pub use claude::stream::{EventStream, StreamAccumulator};
pub use config::Settings;
pub use error::{Error, Result};
pub use host::{ElicitRequest, ElicitResponse, ExecutionRegistry, Host};
pub use interaction::{detect, InteractionMarker};
pub use permission::{PermissionBridge, PermissionCache, PermissionDecision};
pub use session::{ExecutionRequest, ExecutionResult, Orchestrator, SessionState};
