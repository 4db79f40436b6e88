//! Helpers shared by integration tests: a scripted host and a fake agent
//! executable driven by per-round shell snippets.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

use parley::config::PermissionMode;
use parley::host::{ElicitRequest, ElicitResponse, Host};
use parley::session::Timeouts;
use parley::{Result, Settings};

pub const SESSION: &str = "sess-1";

/// Host that replays canned answers, then declines.
#[derive(Default)]
pub struct ScriptedHost {
    responses: Mutex<VecDeque<ElicitResponse>>,
    requests: Mutex<Vec<ElicitRequest>>,
    progress: Mutex<Vec<String>>,
}

impl ScriptedHost {
    pub fn new(responses: Vec<ElicitResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<ElicitRequest> {
        self.requests.lock().clone()
    }

    pub fn progress(&self) -> Vec<String> {
        self.progress.lock().clone()
    }
}

#[async_trait]
impl Host for ScriptedHost {
    async fn elicit(&self, request: ElicitRequest) -> Result<ElicitResponse> {
        self.requests.lock().push(request);
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

const PRELUDE: &str = r#"#!/bin/sh
dir=$(dirname "$0")
n=$(( $(cat "$dir/count" 2>/dev/null || echo 0) + 1 ))
echo "$n" > "$dir/count"
printf '%s\n' "$@" > "$dir/args-$n"
prev=""
for a in "$@"; do
  if [ "$prev" = "--mcp-config" ]; then cp "$a" "$dir/mcp-$n.json"; fi
  prev="$a"
done
emit() { printf '%s\n' "$1"; }
turn() { IFS= read -r line; printf '%s\n' "$line" >> "$dir/stdin-$n"; }
script="$dir/round-$n.sh"
[ -f "$script" ] || script="$dir/round-default.sh"
. "$script"
"#;

/// Stand-in for the agent binary. Round `n` runs `round-n.sh`, falling back
/// to `round-default.sh`. Records argv as `args-n`, received turns as
/// `stdin-n`, and a copy of the MCP config as `mcp-n.json`.
pub struct FakeAgent {
    dir: TempDir,
}

impl FakeAgent {
    pub fn new(rounds: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let agent = dir.path().join("agent");
        std::fs::write(&agent, PRELUDE).unwrap();
        std::fs::set_permissions(&agent, std::fs::Permissions::from_mode(0o755)).unwrap();
        for (i, body) in rounds.iter().enumerate() {
            std::fs::write(dir.path().join(format!("round-{}.sh", i + 1)), body).unwrap();
        }
        Self { dir }
    }

    /// Body for every round without its own script
    pub fn with_default_round(self, body: &str) -> Self {
        std::fs::write(self.dir.path().join("round-default.sh"), body).unwrap();
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Contents of a recorded file, empty if it was never written.
    pub fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).unwrap_or_default()
    }

    pub fn rounds(&self) -> u32 {
        self.read("count").trim().parse().unwrap_or(0)
    }

    /// Settings launching this agent in bypass mode, in its own directory.
    pub fn settings(&self) -> Settings {
        Settings {
            agent_path: self.dir.path().join("agent").to_string_lossy().into_owned(),
            workspace_root: Some(self.dir.path().to_path_buf()),
            permission_mode: PermissionMode::Bypass,
            permission_storage_path: Some(self.dir.path().join("permissions.json")),
            ..Settings::default()
        }
    }

    /// Settings routing permission checks through the bridge and this
    /// crate's own `approve` helper.
    pub fn bridge_settings(&self) -> Settings {
        Settings {
            permission_mode: PermissionMode::Bridge,
            helper_path: Some(PathBuf::from(env!("CARGO_BIN_EXE_parley"))),
            ..self.settings()
        }
    }
}

pub fn fast_timeouts() -> Timeouts {
    Timeouts {
        max_execution: Duration::from_secs(20),
        inactivity: Duration::from_secs(10),
        heartbeat: Duration::from_secs(60),
        grace: Duration::from_millis(500),
    }
}

/// Shell line printing `line` as one stdout line.
pub fn emit(line: &str) -> String {
    format!("emit '{}'\n", line.replace('\'', r"'\''"))
}

pub fn init_event() -> String {
    json!({ "type": "system", "subtype": "init", "session_id": SESSION, "model": "test" })
        .to_string()
}

pub fn assistant(text: &str, session: Option<&str>) -> String {
    let mut event = json!({
        "type": "assistant",
        "message": { "role": "assistant", "content": [{ "type": "text", "text": text }] },
    });
    if let Some(id) = session {
        event["session_id"] = json!(id);
    }
    event.to_string()
}

pub fn result_ok(text: &str) -> String {
    json!({
        "type": "result",
        "subtype": "success",
        "result": text,
        "total_cost_usd": 0.01,
        "duration_ms": 5,
        "num_turns": 1,
    })
    .to_string()
}

pub fn question_marker(question: &str) -> String {
    format!(
        "I need one detail.\n{}",
        json!({ "__user_question__": { "question": question } })
    )
}
