//! Shared test utilities
//!
//! Common helpers used across test modules. Only compiled in test builds.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::host::{ElicitRequest, ElicitResponse, Host};

/// Host that replays canned answers and records what it was asked.
///
/// Once the script runs out every further elicitation is declined.
pub struct ScriptedHost {
    responses: Mutex<VecDeque<ElicitResponse>>,
    requests: Mutex<Vec<ElicitRequest>>,
    progress: Mutex<Vec<String>>,
    fail: bool,
}

impl ScriptedHost {
    /// Answer elicitations with `responses`, in order.
    #[must_use]
    pub fn new(responses: Vec<ElicitResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            progress: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// Every elicitation returns an error.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    /// Elicitations received so far
    pub fn requests(&self) -> Vec<ElicitRequest> {
        self.requests.lock().clone()
    }

    /// Progress messages received so far
    pub fn progress(&self) -> Vec<String> {
        self.progress.lock().clone()
    }
}

#[async_trait]
impl Host for ScriptedHost {
    async fn elicit(&self, request: ElicitRequest) -> Result<ElicitResponse> {
        self.requests.lock().push(request);
        if self.fail {
            return Err(Error::Host("scripted failure".to_string()));
        }
        Ok(self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(ElicitResponse::decline))
    }

    async fn report_progress(&self, _progress: u64, _total: Option<u64>, message: &str) {
        self.progress.lock().push(message.to_string());
    }
}
