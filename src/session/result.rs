//! Execution outcome types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::interaction::InteractionKind;
use crate::permission::PermissionCounts;

/// Where an execution is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not started
    Init,
    /// Reading events from the first agent process
    Running,
    /// Turn ended with answers queued; about to restart the agent
    AwaitingResume,
    /// Reading events from a resumed agent process
    Resuming,
    /// Agent reported success
    Complete,
    /// Agent reported failure, exited early, or the execution was cancelled
    Failed,
    /// Inactivity window or hard deadline expired
    TimedOut,
}

impl SessionState {
    /// Whether no further transitions can happen
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::TimedOut)
    }
}

/// Human interactions that happened during one execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionCounts {
    /// Permission checks received by the bridge
    pub permissions_requested: u64,
    /// Permission checks granted (cached or by the human)
    pub permissions_granted: u64,
    /// Choice markers answered
    pub choices_asked: u32,
    /// Question markers answered
    pub questions_asked: u32,
    /// Confirmation markers answered
    pub confirmations_asked: u32,
}

impl InteractionCounts {
    /// Count one resolved marker.
    pub fn record(&mut self, kind: InteractionKind) {
        match kind {
            InteractionKind::Choice => self.choices_asked += 1,
            InteractionKind::Question => self.questions_asked += 1,
            InteractionKind::Confirmation => self.confirmations_asked += 1,
        }
    }

    /// Add the bridge's permission counters.
    pub fn merge_permissions(&mut self, counts: PermissionCounts) {
        self.permissions_requested += counts.requested;
        self.permissions_granted += counts.granted;
    }

    /// Total of all interactions
    #[must_use]
    pub fn total(&self) -> u64 {
        self.permissions_requested
            + u64::from(self.choices_asked)
            + u64::from(self.questions_asked)
            + u64::from(self.confirmations_asked)
    }
}

/// Final outcome of one execution. Every execution produces one, whatever
/// went wrong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the agent completed successfully
    pub success: bool,
    /// Terminal state
    pub state: SessionState,
    /// Final text from the agent
    pub output: String,
    /// What went wrong, on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Exit code of the last agent process (None if killed by signal or unknown)
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Agent session id, usable to resume later
    #[serde(default)]
    pub session_id: Option<String>,
    /// Cost summed over all resume rounds
    pub total_cost_usd: f64,
    /// Wall-clock duration of the whole execution
    pub duration_ms: u64,
    /// Turns summed over all resume rounds
    pub num_turns: u32,
    /// How many times the agent was restarted to deliver answers
    pub resume_rounds: u32,
    /// Interaction counters
    pub counts: InteractionCounts,
    /// When the execution ended
    pub finished_at: DateTime<Utc>,
}
