//! Embedded interaction markers
//!
//! The agent asks for human input by writing a JSON object such as
//! `{"__user_question__":{"question":"Name?"}}` somewhere in its text.
//! Detection finds the sentinel key and the `{` that opens the enclosing
//! object, then walks forward counting braces (ignoring braces inside
//! strings) to cut out exactly that object.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Sentinel key of a multiple-choice marker
pub const CHOICE_KEY: &str = "__user_choice__";
/// Sentinel key of a free-text question marker
pub const QUESTION_KEY: &str = "__user_question__";
/// Sentinel key of a confirmation marker
pub const CONFIRMATION_KEY: &str = "__confirmation__";

/// All sentinel keys, in detection priority order
pub const SENTINEL_KEYS: [&str; 3] = [CHOICE_KEY, QUESTION_KEY, CONFIRMATION_KEY];

/// Pick one (or several) of a fixed set of options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceQuestion {
    /// The question
    pub question: String,
    /// Options, at least one
    pub options: Vec<String>,
    /// Whether several options may be picked
    #[serde(default, rename = "multiSelect")]
    pub multi_select: bool,
}

/// Free-text question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextQuestion {
    /// The question
    pub question: String,
    /// Answer used when the human declines
    #[serde(default)]
    pub default: String,
}

/// Yes/no confirmation of a risky step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    /// The question
    pub question: String,
    /// Extra warning shown with the question
    #[serde(default)]
    pub warning: Option<String>,
}

/// A detected interaction request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionMarker {
    /// `__user_choice__`
    Choice(ChoiceQuestion),
    /// `__user_question__`
    Question(TextQuestion),
    /// `__confirmation__`
    Confirmation(Confirmation),
}

impl InteractionMarker {
    /// The question text
    #[must_use]
    pub fn question(&self) -> &str {
        match self {
            Self::Choice(c) => &c.question,
            Self::Question(q) => &q.question,
            Self::Confirmation(c) => &c.question,
        }
    }
}

/// Whether `text` mentions any sentinel key at all.
#[must_use]
pub fn contains_marker(text: &str) -> bool {
    SENTINEL_KEYS.iter().any(|key| text.contains(key))
}

/// Find the interaction marker in `text`, if any.
///
/// At most one marker is returned. When several kinds are present, choice
/// wins over question, which wins over confirmation.
#[must_use]
pub fn detect(text: &str) -> Option<InteractionMarker> {
    if !contains_marker(text) {
        return None;
    }
    find_payload::<ChoiceQuestion>(text, CHOICE_KEY)
        .filter(|c| valid_choice(c))
        .map(InteractionMarker::Choice)
        .or_else(|| {
            find_payload::<TextQuestion>(text, QUESTION_KEY)
                .filter(|q| !q.question.trim().is_empty())
                .map(InteractionMarker::Question)
        })
        .or_else(|| {
            find_payload::<Confirmation>(text, CONFIRMATION_KEY)
                .filter(|c| !c.question.trim().is_empty())
                .map(InteractionMarker::Confirmation)
        })
}

fn valid_choice(choice: &ChoiceQuestion) -> bool {
    if choice.question.trim().is_empty() || choice.options.is_empty() {
        warn!(question = %choice.question, "choice marker without question or options, ignoring");
        return false;
    }
    true
}

/// Try every occurrence of `"key"` until one decodes.
fn find_payload<T: DeserializeOwned>(text: &str, key: &str) -> Option<T> {
    let quoted = format!("\"{key}\"");
    for (pos, _) in text.match_indices(&quoted) {
        let Some(start) = enclosing_open_brace(text, pos) else {
            warn!(key, "marker key outside any JSON object, ignoring");
            continue;
        };
        let Some(object) = balanced_object(&text[start..]) else {
            warn!(key, "unterminated marker object, ignoring");
            continue;
        };
        let payload = serde_json::from_str::<Value>(object)
            .ok()
            .and_then(|mut v| v.get_mut(key).map(Value::take));
        match payload.map(serde_json::from_value::<T>) {
            Some(Ok(decoded)) => return Some(decoded),
            Some(Err(e)) => warn!(key, error = %e, "malformed marker payload, ignoring"),
            None => warn!(key, "marker object is not valid JSON, ignoring"),
        }
    }
    None
}

/// Index of the innermost `{` still open at `pos`. Braces inside JSON
/// strings are skipped; quotes in prose outside any object are not strings.
fn enclosing_open_brace(text: &str, pos: usize) -> Option<usize> {
    let mut open = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in text.as_bytes()[..pos].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *b == b'\\' {
                escaped = true;
            } else if *b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' if !open.is_empty() => in_string = true,
            b'{' => open.push(i),
            b'}' => {
                open.pop();
            }
            _ => {}
        }
    }
    // key text quoted inside another string value
    if in_string {
        return None;
    }
    open.last().copied()
}

/// The JSON object starting at the `{` at the front of `text`.
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in text.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
