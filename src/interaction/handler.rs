//! Turning a detected marker into an answer
//!
//! The host is asked the question; whatever it returns (including a
//! decline or an error) is folded into an answer string the agent can
//! read. This step never fails.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::marker::InteractionMarker;
use crate::host::{ElicitRequest, ElicitResponse, Host};

/// Answer used for a declined question with no default.
pub const SKIPPED: &str = "Skipped";

/// Kind of a resolved interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// Multiple choice
    Choice,
    /// Free text
    Question,
    /// Yes/no
    Confirmation,
}

/// A question and the answer the human gave
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionOutcome {
    /// Interaction kind
    pub kind: InteractionKind,
    /// The question as the agent asked it
    pub question: String,
    /// The answer, already phrased for the agent
    pub answer: String,
}

impl InteractionOutcome {
    /// Text sent as the next user turn when resuming. Restates the question
    /// so the agent reads it as an answer, not a new instruction.
    #[must_use]
    pub fn resume_text(&self) -> String {
        format!("In response to your question \"{}\": {}", self.question, self.answer)
    }

    /// Text written straight to stdin when no session can be resumed.
    #[must_use]
    pub fn direct_text(&self) -> &str {
        &self.answer
    }
}

/// Ask the host and build the answer for `marker`.
pub async fn resolve(host: &dyn Host, marker: &InteractionMarker) -> InteractionOutcome {
    match marker {
        InteractionMarker::Choice(choice) => {
            let request = ElicitRequest::select(
                choice.question.clone(),
                choice.options.clone(),
                choice.multi_select,
            );
            let response = ask(host, request).await;
            let picked = response
                .accepted_value()
                .map(str::to_string)
                .or_else(|| choice.options.first().cloned())
                .unwrap_or_default();
            info!(question = %choice.question, answer = %picked, "choice resolved");
            InteractionOutcome {
                kind: InteractionKind::Choice,
                question: choice.question.clone(),
                answer: format!("I choose: {picked}"),
            }
        }
        InteractionMarker::Question(question) => {
            let response = ask(host, ElicitRequest::text(question.question.clone())).await;
            let answer = response.accepted_value().map_or_else(
                || {
                    if question.default.is_empty() {
                        SKIPPED.to_string()
                    } else {
                        question.default.clone()
                    }
                },
                str::to_string,
            );
            info!(question = %question.question, "question answered");
            InteractionOutcome {
                kind: InteractionKind::Question,
                question: question.question.clone(),
                answer,
            }
        }
        InteractionMarker::Confirmation(confirmation) => {
            let prompt = match &confirmation.warning {
                Some(warning) if !warning.is_empty() => {
                    format!("{}\n\nWARNING: {warning}", confirmation.question)
                }
                _ => confirmation.question.clone(),
            };
            let response = ask(host, ElicitRequest::confirm(prompt)).await;
            let confirmed = response.accepted_value().is_some_and(is_truthy);
            info!(question = %confirmation.question, confirmed, "confirmation resolved");
            InteractionOutcome {
                kind: InteractionKind::Confirmation,
                question: confirmation.question.clone(),
                answer: format!("CONFIRMED: {}", if confirmed { "Yes" } else { "No" }),
            }
        }
    }
}

async fn ask(host: &dyn Host, request: ElicitRequest) -> ElicitResponse {
    match host.elicit(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "elicitation failed, treating as declined");
            ElicitResponse::decline()
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "y" | "true" | "1" | "confirm" | "confirmed" | "ok"
    )
}
