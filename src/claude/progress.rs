//! One-line progress messages for stream events

use serde_json::Value;

use super::event::{Event, EventType};
use crate::interaction::marker::contains_marker;

const MAX_PATH_LEN: usize = 35;
const MAX_COMMAND_LEN: usize = 45;
const MAX_TEXT_PREVIEW_LEN: usize = 55;

/// Whether `name` is the permission tool the bridge already handles.
#[must_use]
pub fn is_permission_tool(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.contains("approve") || name.contains("perm")
}

/// Progress message for `event`, or `None` if it is not worth showing.
///
/// Assistant events whose only tool uses are permission checks produce no
/// message: the bridge is already asking the human about them.
#[must_use]
pub fn format_progress(event: &Event) -> Option<String> {
    match event.kind {
        EventType::Init => Some("Starting agent".to_string()),
        EventType::Assistant => format_assistant(event),
        EventType::ToolUse => {
            let name = event.fields.get("name").and_then(Value::as_str)?;
            if is_permission_tool(name) {
                return None;
            }
            let input = event.fields.get("input").unwrap_or(&Value::Null);
            Some(tool_entry(name, input))
        }
        EventType::User => Some("Processing tool result".to_string()),
        EventType::Result => {
            let summary = event.result_summary()?;
            if summary.success {
                Some(format!(
                    "Completed in {}ms, cost ${:.4}",
                    summary.duration_ms, summary.total_cost_usd
                ))
            } else {
                Some(format!(
                    "Failed: {}",
                    summary.error_message.as_deref().unwrap_or("unknown error")
                ))
            }
        }
        EventType::ToolResult | EventType::Unknown => None,
    }
}

fn format_assistant(event: &Event) -> Option<String> {
    let mut saw_tool = false;
    let entries: Vec<String> = event
        .tool_uses()
        .inspect(|_| saw_tool = true)
        .filter(|tool| !is_permission_tool(tool.name))
        .map(|tool| tool_entry(tool.name, tool.input))
        .collect();

    if !entries.is_empty() {
        return Some(entries.join(" | "));
    }
    if saw_tool {
        return None;
    }

    let text = event.text_content();
    let text = text.trim();
    if text.is_empty() {
        None
    } else if contains_marker(text) {
        Some("Awaiting user input".to_string())
    } else {
        Some(truncate(&text.replace('\n', " "), MAX_TEXT_PREVIEW_LEN))
    }
}

fn tool_entry(name: &str, input: &Value) -> String {
    let display = display_name(name);
    let detail = tool_detail(name, input);
    if detail.is_empty() {
        display.to_string()
    } else {
        format!("{display}: {detail}")
    }
}

/// `mcp__server__tool` shows as `tool`.
fn display_name(name: &str) -> &str {
    if name.starts_with("mcp__") {
        name.rsplit("__").next().unwrap_or(name)
    } else {
        name
    }
}

fn tool_detail(name: &str, input: &Value) -> String {
    let field = |key: &str| input.get(key).and_then(Value::as_str);
    match name {
        "Read" | "Write" | "Edit" | "MultiEdit" => {
            field("file_path").map_or_else(String::new, truncate_path)
        }
        "NotebookEdit" => field("notebook_path").map_or_else(String::new, truncate_path),
        "Bash" => field("command").map_or_else(String::new, |c| truncate(c.trim(), MAX_COMMAND_LEN)),
        "Glob" | "Grep" => match (field("pattern"), field("path")) {
            (Some(pattern), Some(path)) => format!("{pattern} in {}", truncate_path(path)),
            (Some(pattern), None) => pattern.to_string(),
            _ => String::new(),
        },
        "WebFetch" => field("url").map_or_else(String::new, |u| url_host(u).to_string()),
        "WebSearch" => field("query").map_or_else(String::new, |q| truncate(q, MAX_COMMAND_LEN)),
        "Task" => field("description").map_or_else(String::new, |d| truncate(d, MAX_COMMAND_LEN)),
        "TodoWrite" => input
            .get("todos")
            .and_then(Value::as_array)
            .map_or_else(String::new, |todos| format!("{} items", todos.len())),
        _ => String::new(),
    }
}

/// Shorten a long path to `.../parent/file`.
#[must_use]
pub fn truncate_path(path: &str) -> String {
    if path.chars().count() <= MAX_PATH_LEN {
        return path.to_string();
    }
    let tail: Vec<&str> = path.rsplit('/').filter(|p| !p.is_empty()).take(2).collect();
    let short = match tail.as_slice() {
        [file, parent] => format!(".../{parent}/{file}"),
        [file] => format!(".../{file}"),
        _ => path.to_string(),
    };
    truncate(&short, MAX_PATH_LEN)
}

fn url_host(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.split(['/', '?', '#']).next().unwrap_or(rest)
}

/// Cap `text` at `max` characters, marking the cut with `...`.
#[must_use]
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant(content: &str) -> Event {
        Event::from_json_line(&format!(
            r#"{{"type":"assistant","message":{{"role":"assistant","content":{content}}}}}"#
        ))
    }

    #[test]
    fn test_init_and_user_messages() {
        let init = Event::from_json_line(r#"{"type":"init","session_id":"s"}"#);
        assert_eq!(format_progress(&init).as_deref(), Some("Starting agent"));
        let user = Event::from_json_line(r#"{"type":"user"}"#);
        assert_eq!(
            format_progress(&user).as_deref(),
            Some("Processing tool result")
        );
    }

    #[test]
    fn test_tool_uses_joined() {
        let event = assistant(
            r#"[{"type":"tool_use","name":"Read","input":{"file_path":"src/main.rs"}},{"type":"tool_use","name":"Bash","input":{"command":"cargo test"}}]"#,
        );
        assert_eq!(
            format_progress(&event).as_deref(),
            Some("Read: src/main.rs | Bash: cargo test")
        );
    }

    #[test]
    fn test_permission_only_tool_use_is_suppressed() {
        let event = assistant(
            r#"[{"type":"tool_use","name":"mcp__perm__approve","input":{"tool_name":"Bash"}}]"#,
        );
        assert_eq!(format_progress(&event), None);
    }

    #[test]
    fn test_permission_tool_filtered_from_mixed_event() {
        let event = assistant(
            r#"[{"type":"tool_use","name":"mcp__perm__approve","input":{}},{"type":"tool_use","name":"Glob","input":{"pattern":"*.rs"}}]"#,
        );
        assert_eq!(format_progress(&event).as_deref(), Some("Glob: *.rs"));
    }

    #[test]
    fn test_is_permission_tool() {
        assert!(is_permission_tool("mcp__perm__approve"));
        assert!(is_permission_tool("ApproveAction"));
        assert!(!is_permission_tool("Edit"));
    }

    #[test]
    fn test_marker_text_shows_awaiting_input() {
        let event = assistant(
            r#"[{"type":"text","text":"{\"__user_question__\":{\"question\":\"Name?\"}}"}]"#,
        );
        assert_eq!(
            format_progress(&event).as_deref(),
            Some("Awaiting user input")
        );
    }

    #[test]
    fn test_long_text_preview_truncated() {
        let long = "word ".repeat(30);
        let event = assistant(&format!(r#"[{{"type":"text","text":"{long}"}}]"#));
        let message = format_progress(&event).unwrap();
        assert_eq!(message.chars().count(), MAX_TEXT_PREVIEW_LEN);
        assert!(message.ends_with("..."));
    }

    #[test]
    fn test_empty_assistant_event_has_no_message() {
        assert_eq!(format_progress(&assistant("[]")), None);
    }

    #[test]
    fn test_result_messages() {
        let ok = Event::from_json_line(
            r#"{"type":"result","subtype":"success","duration_ms":1200,"total_cost_usd":0.05}"#,
        );
        assert_eq!(
            format_progress(&ok).as_deref(),
            Some("Completed in 1200ms, cost $0.0500")
        );
        let failed =
            Event::from_json_line(r#"{"type":"result","subtype":"error","error_message":"boom"}"#);
        assert_eq!(format_progress(&failed).as_deref(), Some("Failed: boom"));
    }

    #[test]
    fn test_tool_details() {
        let cases = [
            ("Grep", serde_json::json!({"pattern": "fn main", "path": "src"}), "fn main in src"),
            ("WebFetch", serde_json::json!({"url": "https://docs.rs/tokio/latest"}), "docs.rs"),
            ("TodoWrite", serde_json::json!({"todos": [{}, {}, {}]}), "3 items"),
            ("Unknown", serde_json::json!({"x": 1}), ""),
        ];
        for (name, input, expected) in cases {
            assert_eq!(tool_detail(name, &input), expected, "tool: {name}");
        }
        assert_eq!(display_name("mcp__github__create_issue"), "create_issue");
        assert_eq!(display_name("Read"), "Read");
    }

    #[test]
    fn test_truncate_path() {
        assert_eq!(truncate_path("src/main.rs"), "src/main.rs");
        assert_eq!(
            truncate_path("/home/user/projects/very/deep/tree/module/file.rs"),
            ".../module/file.rs"
        );
    }

    #[test]
    fn test_long_command_truncated() {
        let command = "x".repeat(100);
        let detail = tool_detail("Bash", &serde_json::json!({ "command": command }));
        assert_eq!(detail.chars().count(), MAX_COMMAND_LEN);
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("ééééé", 4), "é...");
        assert_eq!(truncate("short", 10), "short");
    }
}
