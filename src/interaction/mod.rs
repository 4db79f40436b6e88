//! Human-in-the-loop interactions requested by the agent
//!
//! - `marker`: detection of embedded choice/question/confirmation requests
//! - `handler`: asking the host and phrasing the answer
//! - `prompts`: system prompt text describing the protocols

pub mod handler;
pub mod marker;
pub mod prompts;

pub use handler::{resolve, InteractionKind, InteractionOutcome};
pub use marker::{detect, InteractionMarker};
