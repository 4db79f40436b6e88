//! Agent process supervisor
//!
//! Owns one running agent subprocess and its three pipes. Stdout is handed
//! out as an [`EventStream`]; stderr is drained in the background so the
//! child never blocks on a full pipe and so failures can report it.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::stream::EventStream;
use crate::error::{Error, Result};

/// Time a process gets to exit after SIGTERM before it is killed.
pub const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How long `wait` lets the stderr reader catch up after exit.
const STDERR_DRAIN: Duration = Duration::from_secs(1);

/// Encode one user turn in the stream-json input format, newline included.
#[must_use]
pub fn user_turn_line(text: &str) -> String {
    let turn = json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": [{ "type": "text", "text": text }],
        },
    });
    format!("{turn}\n")
}

/// Handle to a running agent process
pub struct AgentProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Arc<Mutex<String>>,
    stderr_task: Option<JoinHandle<()>>,
    grace: Duration,
}

impl AgentProcess {
    /// Start `cmd` with all three stdio channels piped.
    ///
    /// The child is killed if the handle is dropped without [`terminate`].
    ///
    /// [`terminate`]: Self::terminate
    pub fn spawn(cmd: std::process::Command, working_dir: Option<&Path>) -> Result<Self> {
        let program = cmd.get_program().to_string_lossy().into_owned();
        let mut tokio_cmd = TokioCommand::from(cmd);
        if let Some(dir) = working_dir {
            tokio_cmd.current_dir(dir);
        }
        tokio_cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = tokio_cmd
            .spawn()
            .map_err(|source| Error::Spawn { program, source })?;

        let stdin = child.stdin.take().ok_or(Error::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(Error::MissingPipe("stdout"))?;
        let child_stderr = child.stderr.take().ok_or(Error::MissingPipe("stderr"))?;

        let stderr = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&stderr);
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(child_stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(line = %line, "agent stderr");
                let mut captured = sink.lock();
                if !captured.is_empty() {
                    captured.push('\n');
                }
                captured.push_str(&line);
            }
        });

        debug!(pid = ?child.id(), "agent process started");

        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout: Some(stdout),
            stderr,
            stderr_task: Some(stderr_task),
            grace: GRACE_PERIOD,
        })
    }

    /// Override the SIGTERM grace period.
    #[must_use]
    pub const fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// OS process id, while the child has not been reaped.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Take the stdout event stream. Only the first call succeeds.
    pub fn take_events(&mut self) -> Result<EventStream<ChildStdout>> {
        self.stdout
            .take()
            .map(EventStream::new)
            .ok_or(Error::MissingPipe("stdout"))
    }

    /// Send `text` as one user turn and flush.
    pub async fn write_line(&mut self, text: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(Error::MissingPipe("stdin"))?;
        let line = user_turn_line(text);
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(Error::Stdin)?;
        stdin.flush().await.map_err(Error::Stdin)
    }

    /// Everything the child wrote to stderr so far.
    #[must_use]
    pub fn stderr_output(&self) -> String {
        self.stderr.lock().clone()
    }

    /// Wait for the child to exit on its own. `None` when killed by a signal.
    pub async fn wait(&mut self) -> Result<Option<i32>> {
        self.stdin.take();
        let status = self.child.wait().await.map_err(Error::Wait)?;
        if let Some(task) = self.stderr_task.take() {
            // a grandchild may still hold the pipe open
            let _ = tokio::time::timeout(STDERR_DRAIN, task).await;
        }
        Ok(status.code())
    }

    /// Stop the child: close stdin, send SIGTERM, and kill it if it is
    /// still alive after the grace period. Returns the exit code if known.
    pub async fn terminate(&mut self) -> Option<i32> {
        self.stdin.take();

        if let Ok(Some(status)) = self.child.try_wait() {
            return status.code();
        }

        if let Some(pid) = self.child.id() {
            if let Err(e) = send_sigterm(pid) {
                warn!(pid, error = %e, "SIGTERM failed, killing agent process");
                return self.kill().await;
            }
        }

        match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                warn!(error = %e, "failed to wait for agent process");
                None
            }
            Err(_) => {
                warn!(grace = ?self.grace, "agent process ignored SIGTERM, killing");
                self.kill().await
            }
        }
    }

    async fn kill(&mut self) -> Option<i32> {
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "failed to kill agent process");
        }
        self.child.wait().await.ok().and_then(|s| s.code())
    }
}

#[allow(unsafe_code)]
fn send_sigterm(pid: u32) -> std::io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::other(format!("PID {pid} exceeds pid_t range")))?;
    // SAFETY: kill(2) takes plain integers. The pid belongs to our own
    // unreaped child, so it cannot have been recycled.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;
    use std::time::Instant;

    use super::*;
    use crate::claude::event::EventType;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn test_user_turn_line_format() {
        let line = user_turn_line("say \"hi\"");
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["type"], "user");
        assert_eq!(value["message"]["role"], "user");
        assert_eq!(value["message"]["content"][0]["type"], "text");
        assert_eq!(value["message"]["content"][0]["text"], "say \"hi\"");
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_is_typed_error() {
        let result = AgentProcess::spawn(Command::new("/nonexistent/agent-binary"), None);
        match result {
            Err(Error::Spawn { program, .. }) => assert_eq!(program, "/nonexistent/agent-binary"),
            Err(other) => panic!("Expected Spawn error, got {other}"),
            Ok(_) => panic!("Expected spawn to fail"),
        }
    }

    #[tokio::test]
    async fn test_write_line_reaches_child_stdin() {
        let mut process = AgentProcess::spawn(sh("read -r line; printf '%s\\n' \"$line\""), None).unwrap();
        let mut events = process.take_events().unwrap();

        process.write_line("hello").await.unwrap();

        let event = events.next_event().await.unwrap();
        assert_eq!(event.kind, EventType::User);
        assert_eq!(event.text_content(), "hello");
        assert_eq!(process.wait().await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_take_events_only_once() {
        let mut process = AgentProcess::spawn(sh("true"), None).unwrap();
        assert!(process.take_events().is_ok());
        assert!(matches!(
            process.take_events(),
            Err(Error::MissingPipe("stdout"))
        ));
        process.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_reports_exit_code_and_stderr() {
        let mut process = AgentProcess::spawn(sh("echo boom >&2; exit 3"), None).unwrap();
        assert_eq!(process.wait().await.unwrap(), Some(3));
        assert_eq!(process.stderr_output(), "boom");
    }

    #[tokio::test]
    async fn test_working_dir_is_applied() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut process = AgentProcess::spawn(sh("pwd > where.txt"), Some(dir.path())).unwrap();
        process.wait().await.unwrap();
        let recorded = std::fs::read_to_string(dir.path().join("where.txt")).unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(
            Path::new(recorded.trim()).canonicalize().unwrap(),
            expected
        );
    }

    #[tokio::test]
    async fn test_terminate_stops_cooperative_process() {
        let mut process = AgentProcess::spawn(sh("exec sleep 30"), None).unwrap();
        let start = Instant::now();
        let code = process.terminate().await;
        assert!(start.elapsed() < GRACE_PERIOD);
        // killed by SIGTERM, no exit code
        assert_eq!(code, None);
    }

    #[tokio::test]
    async fn test_terminate_kills_after_grace_period() {
        let mut process = AgentProcess::spawn(sh("trap '' TERM; exec sleep 30"), None)
            .unwrap()
            .with_grace_period(Duration::from_millis(200));
        let start = Instant::now();
        process.terminate().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "elapsed: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "elapsed: {elapsed:?}");
    }

    #[tokio::test]
    async fn test_terminate_after_exit_returns_code() {
        let mut process = AgentProcess::spawn(sh("exit 7"), None).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(process.terminate().await, Some(7));
    }

    #[tokio::test]
    async fn test_write_after_exit_is_error() {
        let mut process = AgentProcess::spawn(sh("exit 0"), None).unwrap();
        process.wait().await.unwrap();
        assert!(process.write_line("late").await.is_err());
    }
}
