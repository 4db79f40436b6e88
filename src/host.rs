//! Host capabilities
//!
//! The orchestrator never talks to a human directly. It asks the [`Host`]
//! to elicit a decision and to display progress. The host also owns the
//! [`ExecutionRegistry`] used to cancel running executions on shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;

/// What kind of answer an elicitation expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElicitKind {
    /// Free text
    Text,
    /// Yes or no
    Confirm,
    /// Pick from a fixed list
    Select {
        /// Allowed answers, in display order
        options: Vec<String>,
        /// Whether several options may be picked
        multi: bool,
    },
}

/// A request for a human decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElicitRequest {
    /// Prompt shown to the human
    pub message: String,
    /// Expected answer shape
    pub kind: ElicitKind,
}

impl ElicitRequest {
    /// Free-text question
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ElicitKind::Text,
        }
    }

    /// Yes/no question
    pub fn confirm(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ElicitKind::Confirm,
        }
    }

    /// Single or multiple choice from `options`
    pub fn select(message: impl Into<String>, options: Vec<String>, multi: bool) -> Self {
        Self {
            message: message.into(),
            kind: ElicitKind::Select { options, multi },
        }
    }
}

/// Whether the human answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElicitAction {
    /// Answered; see `value`
    Accept,
    /// Dismissed or refused
    Decline,
}

/// The human's reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElicitResponse {
    /// Accept or decline
    pub action: ElicitAction,
    /// The answer, when accepted
    pub value: Option<String>,
}

impl ElicitResponse {
    /// Accepted with a value
    pub fn accept(value: impl Into<String>) -> Self {
        Self {
            action: ElicitAction::Accept,
            value: Some(value.into()),
        }
    }

    /// Declined
    #[must_use]
    pub const fn decline() -> Self {
        Self {
            action: ElicitAction::Decline,
            value: None,
        }
    }

    /// The value, only if accepted and non-blank.
    #[must_use]
    pub fn accepted_value(&self) -> Option<&str> {
        match self.action {
            ElicitAction::Accept => self.value.as_deref().filter(|v| !v.trim().is_empty()),
            ElicitAction::Decline => None,
        }
    }
}

/// Capabilities the surrounding service provides to the orchestrator.
#[async_trait]
pub trait Host: Send + Sync {
    /// Ask a human. May take arbitrarily long.
    async fn elicit(&self, request: ElicitRequest) -> Result<ElicitResponse>;

    /// Display progress. `total` is `None` when unknown.
    async fn report_progress(&self, progress: u64, total: Option<u64>, message: &str);
}

/// Identifier handed out by [`ExecutionRegistry::register`]
pub type ExecutionId = u64;

/// Running executions, so the host can cancel them all on shutdown
#[derive(Debug, Default)]
pub struct ExecutionRegistry {
    next_id: AtomicU64,
    active: Mutex<HashMap<ExecutionId, CancellationToken>>,
}

impl ExecutionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new execution and get its cancellation token.
    pub fn register(&self) -> (ExecutionId, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.active.lock().insert(id, token.clone());
        debug!(execution = id, "execution registered");
        (id, token)
    }

    /// Forget a finished execution. Unknown ids are ignored.
    pub fn unregister(&self, id: ExecutionId) {
        self.active.lock().remove(&id);
        debug!(execution = id, "execution unregistered");
    }

    /// Cancel every registered execution. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let active = self.active.lock();
        for token in active.values() {
            token.cancel();
        }
        active.len()
    }

    /// Number of registered executions
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    /// Whether nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.lock().is_empty()
    }
}
