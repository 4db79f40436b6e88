//! Event model for Claude Code's `--output-format stream-json` lines
//!
//! One [`Event`] per protocol line. The event type comes only from the
//! line's `type` field; anything that fails to decode becomes
//! [`EventType::Unknown`] carrying the raw text.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of a stream-json line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Session start (carries the session id)
    Init,
    /// User turn, usually tool results fed back to the model
    User,
    /// Assistant turn: text and/or tool use blocks
    Assistant,
    /// Stand-alone tool use line
    ToolUse,
    /// Stand-alone tool result line
    ToolResult,
    /// Final summary of a turn
    Result,
    /// Missing, unrecognized or undecodable
    Unknown,
}

impl EventType {
    /// Map a `type` tag to an event type.
    ///
    /// `system` is the tag the real CLI uses for its init line.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "init" | "system" => Self::Init,
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "tool_use" => Self::ToolUse,
            "tool_result" => Self::ToolResult,
            "result" => Self::Result,
            _ => Self::Unknown,
        }
    }
}

/// One block of message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text
    Text {
        /// The text
        #[serde(default)]
        text: String,
    },
    /// A tool invocation requested by the assistant
    ToolUse {
        /// Tool use id
        #[serde(default)]
        id: Option<String>,
        /// Tool name (e.g. "Edit", "mcp__perm__approve")
        #[serde(default)]
        name: Option<String>,
        /// Tool arguments
        #[serde(default)]
        input: Value,
    },
    /// Output of a tool fed back to the model
    ToolResult {
        /// Id of the tool use this answers
        #[serde(default)]
        tool_use_id: Option<String>,
        /// Result payload (string or list of blocks)
        #[serde(default)]
        content: Value,
        /// Whether the tool failed
        #[serde(default)]
        is_error: bool,
    },
    /// Any other block kind (e.g. "thinking")
    #[serde(other)]
    Other,
}

/// A tool use block borrowed out of an event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolUse<'a> {
    /// Tool use id
    pub id: Option<&'a str>,
    /// Tool name, "unknown" when absent
    pub name: &'a str,
    /// Tool arguments
    pub input: &'a Value,
}

/// A message carried by user/assistant events
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    /// "assistant" or "user"
    pub role: String,
    /// Content blocks in order
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Build a message from its JSON object, dropping blocks that don't decode.
    fn from_value(value: &Map<String, Value>) -> Self {
        let role = value
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let content = value
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.is_object())
                    .filter_map(|b| serde_json::from_value(b.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        Self { role, content }
    }
}

/// Summary extracted from a `result` event
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSummary {
    /// `subtype == "success"`
    pub success: bool,
    /// Final text reported by the agent
    pub output: String,
    /// Total API cost in USD
    pub total_cost_usd: f64,
    /// Wall time of the turn as reported by the agent
    pub duration_ms: u64,
    /// Number of conversation turns
    pub num_turns: u32,
    /// Error detail on failure
    pub error_message: Option<String>,
}

/// A parsed stream-json line
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event kind, from the `type` field
    pub kind: EventType,
    /// The original line
    pub raw: String,
    /// Parsed message for user/assistant events
    pub message: Option<Message>,
    /// All top-level fields of the line (empty when undecodable)
    pub fields: Map<String, Value>,
}

impl Event {
    /// Decode one line. Never fails: malformed input yields an `Unknown` event.
    #[must_use]
    pub fn from_json_line(line: &str) -> Self {
        let fields = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => map,
            _ => {
                return Self {
                    kind: EventType::Unknown,
                    raw: line.to_string(),
                    message: None,
                    fields: Map::new(),
                }
            }
        };

        let kind = fields
            .get("type")
            .and_then(Value::as_str)
            .map_or(EventType::Unknown, EventType::from_tag);

        let message = fields
            .get("message")
            .and_then(Value::as_object)
            .map(Message::from_value);

        Self {
            kind,
            raw: line.to_string(),
            message,
            fields,
        }
    }

    /// Session id carried by the line, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.fields
            .get("session_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Concatenated text of all text blocks.
    #[must_use]
    pub fn text_content(&self) -> String {
        let Some(message) = &self.message else {
            return String::new();
        };
        message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } if !text.is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool use blocks in order.
    pub fn tool_uses(&self) -> impl Iterator<Item = ToolUse<'_>> {
        self.message
            .iter()
            .flat_map(|m| m.content.iter())
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolUse {
                    id: id.as_deref(),
                    name: name.as_deref().unwrap_or("unknown"),
                    input,
                }),
                _ => None,
            })
    }

    /// Result summary, for `Result` events only.
    #[must_use]
    pub fn result_summary(&self) -> Option<ResultSummary> {
        if self.kind != EventType::Result {
            return None;
        }
        let f = &self.fields;
        let text = |key: &str| f.get(key).and_then(Value::as_str).map(String::from);

        Some(ResultSummary {
            success: f.get("subtype").and_then(Value::as_str) == Some("success"),
            output: text("result").unwrap_or_default(),
            total_cost_usd: f
                .get("total_cost_usd")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            duration_ms: f.get("duration_ms").and_then(Value::as_u64).unwrap_or(0),
            num_turns: f
                .get("num_turns")
                .and_then(Value::as_u64)
                .map_or(0, |v| u32::try_from(v).unwrap_or(u32::MAX)),
            error_message: text("error_message"),
        })
    }
}
