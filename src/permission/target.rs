//! Permission targets
//!
//! A target is the thing a tool call acts on, normalized so the same
//! action always produces the same cache key and a readable prompt.

use std::path::{Component, Path, PathBuf};

use serde_json::Value;

/// Longest command or argument dump kept in a target.
pub const MAX_TARGET_LEN: usize = 100;

/// How a tool's target is derived from its input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetRule {
    /// Path in the named field, resolved to an absolute path
    FilePath(&'static str),
    /// Shell command, trimmed and capped
    Command,
    /// Search pattern plus search root
    Search {
        default_path: Option<&'static str>,
    },
    /// A plain string field
    Field(&'static str),
    /// Capped JSON dump of the whole input
    Dump,
}

fn rule_for(tool: &str) -> TargetRule {
    match tool {
        "Read" | "Write" | "Edit" | "MultiEdit" => TargetRule::FilePath("file_path"),
        "NotebookEdit" => TargetRule::FilePath("notebook_path"),
        "Bash" => TargetRule::Command,
        "Glob" => TargetRule::Search { default_path: None },
        "Grep" => TargetRule::Search {
            default_path: Some("."),
        },
        "WebFetch" => TargetRule::Field("url"),
        "WebSearch" => TargetRule::Field("query"),
        _ => TargetRule::Dump,
    }
}

/// Normalized target of `tool` called with `input`. Relative paths are
/// resolved against `base`.
#[must_use]
pub fn normalize_target(tool: &str, input: &Value, base: &Path) -> String {
    let field = |key: &str| input.get(key).and_then(Value::as_str);
    let target = match rule_for(tool) {
        TargetRule::FilePath(key) => {
            field(key).map(|p| resolve_path(p, base).to_string_lossy().into_owned())
        }
        TargetRule::Command => field("command").map(|c| cap(c.trim())),
        TargetRule::Search { default_path } => field("pattern").map(|pattern| {
            match field("path").or(default_path) {
                Some(path) => format!("{pattern} in {}", resolve_path(path, base).display()),
                None => pattern.to_string(),
            }
        }),
        TargetRule::Field(key) => field(key).map(str::to_string),
        TargetRule::Dump => None,
    };
    target.unwrap_or_else(|| cap(&input.to_string()))
}

/// Absolute, lexically normalized form of `path`. The longest existing
/// prefix is canonicalized so symlinked directories compare equal.
#[must_use]
pub fn resolve_path(path: &str, base: &Path) -> PathBuf {
    let joined = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        base.join(path)
    };
    canonicalize_existing_prefix(&normalize_lexically(&joined))
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn canonicalize_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut rest = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            out.extend(rest.iter().rev());
            return out;
        }
        match (existing.file_name().map(ToOwned::to_owned), existing.parent()) {
            (Some(name), Some(parent)) => {
                rest.push(name);
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}

fn cap(text: &str) -> String {
    text.chars().take(MAX_TARGET_LEN).collect()
}
