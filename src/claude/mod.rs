//! Claude Code integration
//!
//! This module handles the stream-json event model and parser, CLI command
//! building, the agent process supervisor, and progress formatting.

pub mod cli;
pub mod event;
pub mod process;
pub mod progress;
pub mod stream;
