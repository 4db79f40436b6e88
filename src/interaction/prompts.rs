//! System prompt text teaching the agent the marker protocols

use crate::config::InteractionToggles;

const CHOICE_PROTOCOL: &str = r#"When you need the user to pick between alternatives, output exactly one JSON object of this form and then end your turn:
{"__user_choice__": {"question": "<question>", "options": ["<option 1>", "<option 2>"], "multiSelect": false}}
The user's answer arrives as your next message, starting with "I choose:"."#;

const QUESTION_PROTOCOL: &str = r#"When you need free-form information from the user, output exactly one JSON object of this form and then end your turn:
{"__user_question__": {"question": "<question>", "default": "<answer used if the user skips>"}}
The user's answer arrives as your next message."#;

const CONFIRMATION_PROTOCOL: &str = r#"Before a destructive or irreversible action, ask for confirmation with exactly one JSON object of this form and then end your turn:
{"__confirmation__": {"question": "<what you are about to do>", "warning": "<optional risk description>"}}
The reply is "CONFIRMED: Yes" or "CONFIRMED: No". Do not proceed on "No"."#;

/// Instructions to append to the agent's system prompt, or `None` when all
/// interaction kinds are disabled.
#[must_use]
pub fn system_prompt(toggles: InteractionToggles) -> Option<String> {
    let blocks: Vec<&str> = [
        (toggles.choices, CHOICE_PROTOCOL),
        (toggles.questions, QUESTION_PROTOCOL),
        (toggles.confirmations, CONFIRMATION_PROTOCOL),
    ]
    .into_iter()
    .filter_map(|(enabled, block)| enabled.then_some(block))
    .collect();

    if blocks.is_empty() {
        None
    } else {
        Some(blocks.join("\n\n"))
    }
}
