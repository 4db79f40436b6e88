//! Session orchestrator
//!
//! Drives one logical conversation with the agent:
//!
//! 1. Spawn the agent and send the prompt as the first turn.
//! 2. Read events, reporting progress and watching assistant text for
//!    interaction markers.
//! 3. Answer markers through the host. Once a session id is known the
//!    answers are queued; at the end of the turn the agent is restarted with
//!    `--resume` and the answers are sent as the next turn.
//! 4. Repeat until a turn ends with nothing queued.
//!
//! An inactivity window bounds each read and a hard deadline bounds the
//! whole execution, resume rounds included.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::process::ChildStdout;
use tracing::{debug, info, warn};

use super::heartbeat::{Heartbeat, ProgressReporter, HEARTBEAT_INTERVAL};
use super::result::{ExecutionResult, InteractionCounts, SessionState};
use crate::claude::cli::{build_command, LaunchOptions, PermissionWiring};
use crate::claude::event::{EventType, ResultSummary};
use crate::claude::process::{AgentProcess, GRACE_PERIOD};
use crate::claude::progress::format_progress;
use crate::claude::stream::{EventStream, StreamAccumulator};
use crate::config::{PermissionMode, Settings};
use crate::error::{Error, Result};
use crate::host::{ExecutionRegistry, Host};
use crate::interaction::{self, prompts};
use crate::permission::{HelperLaunch, PermissionBridge, PermissionCache, PermissionGate};

/// Error text of a cancelled execution.
pub const CANCELLED: &str = "Execution cancelled";

static CONFIG_SEQ: AtomicU64 = AtomicU64::new(0);

/// One prompt to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// First user turn
    pub prompt: String,
    /// Working directory (settings workspace when unset)
    pub working_dir: Option<PathBuf>,
    /// Continue an earlier session instead of starting a new one
    pub resume_session_id: Option<String>,
}

impl ExecutionRequest {
    /// Fresh session in the default workspace
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            working_dir: None,
            resume_session_id: None,
        }
    }
}

/// Time limits of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Hard deadline across all rounds
    pub max_execution: Duration,
    /// Longest allowed silence from the agent
    pub inactivity: Duration,
    /// Heartbeat period
    pub heartbeat: Duration,
    /// SIGTERM grace period when stopping the agent
    pub grace: Duration,
}

impl Timeouts {
    /// Limits taken from settings, with the default heartbeat and grace period.
    #[must_use]
    pub const fn from_settings(settings: &Settings) -> Self {
        Self {
            max_execution: settings.max_execution(),
            inactivity: settings.inactivity_timeout(),
            heartbeat: HEARTBEAT_INTERVAL,
            grace: GRACE_PERIOD,
        }
    }
}

/// How an execution ended, before bookkeeping is attached.
#[derive(Debug)]
struct Outcome {
    state: SessionState,
    error: Option<String>,
}

impl Outcome {
    const fn complete() -> Self {
        Self {
            state: SessionState::Complete,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            state: SessionState::Failed,
            error: Some(error.into()),
        }
    }

    fn timed_out(error: impl Into<String>) -> Self {
        Self {
            state: SessionState::TimedOut,
            error: Some(error.into()),
        }
    }

    fn from_summary(summary: &ResultSummary) -> Self {
        if summary.success {
            Self::complete()
        } else {
            Self::failed(
                summary
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "Agent reported an unsuccessful result".to_string()),
            )
        }
    }
}

/// How one agent process's turn ended
enum RoundEnd {
    Finished(Outcome),
    Resume(String),
}

/// Everything the event loop accumulates. Lives outside the loop future so
/// it survives a deadline or cancellation.
struct RunState {
    state: SessionState,
    process: Option<AgentProcess>,
    session_id: Option<String>,
    accumulator: StreamAccumulator,
    counts: InteractionCounts,
    resume_rounds: u32,
    last_summary: Option<ResultSummary>,
    total_cost_usd: f64,
    num_turns: u32,
    exit_code: Option<i32>,
}

impl RunState {
    fn new(session_id: Option<String>) -> Self {
        Self {
            state: SessionState::Init,
            process: None,
            session_id,
            accumulator: StreamAccumulator::new(),
            counts: InteractionCounts::default(),
            resume_rounds: 0,
            last_summary: None,
            total_cost_usd: 0.0,
            num_turns: 0,
            exit_code: None,
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    fn record_summary(&mut self, summary: &ResultSummary) {
        self.total_cost_usd += summary.total_cost_usd;
        self.num_turns += summary.num_turns;
        self.last_summary = Some(summary.clone());
    }

    fn into_result(self, outcome: Outcome, elapsed: Duration) -> ExecutionResult {
        let output = self
            .last_summary
            .as_ref()
            .map(|s| s.output.clone())
            .filter(|o| !o.is_empty())
            .unwrap_or_else(|| self.accumulator.output());
        ExecutionResult {
            success: outcome.state == SessionState::Complete,
            state: outcome.state,
            output,
            error: outcome.error,
            exit_code: self.exit_code,
            session_id: self.session_id,
            total_cost_usd: self.total_cost_usd,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            num_turns: self.num_turns,
            resume_rounds: self.resume_rounds,
            counts: self.counts,
            finished_at: Utc::now(),
        }
    }
}

/// Runs prompts against the agent, one conversation per [`execute`] call.
///
/// [`execute`]: Self::execute
pub struct Orchestrator {
    settings: Settings,
    host: Arc<dyn Host>,
    cache: Arc<PermissionCache>,
    registry: Arc<ExecutionRegistry>,
    timeouts: Timeouts,
}

impl Orchestrator {
    /// Orchestrator with limits from `settings` and a private registry
    pub fn new(settings: Settings, host: Arc<dyn Host>, cache: Arc<PermissionCache>) -> Self {
        let timeouts = Timeouts::from_settings(&settings);
        Self {
            settings,
            host,
            cache,
            registry: Arc::new(ExecutionRegistry::new()),
            timeouts,
        }
    }

    /// Register executions with the host's registry
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ExecutionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Override time limits
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Registry executions are registered with
    #[must_use]
    pub const fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.registry
    }

    /// Run `request` to completion. Never fails: every problem is reported
    /// in the returned result.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let (execution_id, cancel) = self.registry.register();
        let started = Instant::now();
        let workspace = request
            .working_dir
            .clone()
            .unwrap_or_else(|| self.settings.workspace());
        info!(execution = execution_id, workspace = %workspace.display(), "execution started");

        let mut run = RunState::new(request.resume_session_id.clone());
        let mut bridge = None;
        let mut mcp_config = None;

        let outcome = match self.permission_wiring(&workspace) {
            Err(e) => Outcome::failed(format!("Failed to start permission bridge: {e}")),
            Ok((wiring, started_bridge)) => {
                if let PermissionWiring::Bridge { mcp_config: path } = &wiring {
                    mcp_config = Some(path.clone());
                }
                bridge = started_bridge;

                let launch = LaunchOptions {
                    agent_path: self.settings.agent_path.clone(),
                    model: self.settings.model.clone(),
                    resume_session_id: request.resume_session_id.clone(),
                    system_prompt: prompts::system_prompt(self.settings.interactions),
                    permissions: wiring,
                };
                let reporter = Arc::new(ProgressReporter::new(Arc::clone(&self.host)));
                let _heartbeat =
                    Heartbeat::start(Arc::clone(&reporter), self.timeouts.heartbeat, started);

                tokio::select! {
                    outcome = self.drive(&mut run, launch, &request.prompt, &workspace, &reporter) => outcome,
                    () = tokio::time::sleep(self.timeouts.max_execution) => {
                        warn!(limit = ?self.timeouts.max_execution, "execution deadline reached");
                        Outcome::timed_out(format!(
                            "Execution exceeded maximum time of {:?}",
                            self.timeouts.max_execution
                        ))
                    }
                    () = cancel.cancelled() => {
                        info!(execution = execution_id, "execution cancelled");
                        Outcome::failed(CANCELLED)
                    }
                }
            }
        };

        if let Some(mut process) = run.process.take() {
            let code = process.terminate().await;
            run.exit_code = run.exit_code.or(code);
        }
        if let Some(bridge) = bridge {
            run.counts.merge_permissions(bridge.stop().await);
        }
        if let Some(path) = mcp_config {
            if let Err(e) = std::fs::remove_file(&path) {
                debug!(path = %path.display(), error = %e, "could not remove MCP config");
            }
        }
        self.registry.unregister(execution_id);

        run.transition(outcome.state);
        let result = run.into_result(outcome, started.elapsed());
        info!(
            execution = execution_id,
            state = ?result.state,
            resume_rounds = result.resume_rounds,
            duration_ms = result.duration_ms,
            "execution finished"
        );
        result
    }

    /// Start the bridge and write the helper's MCP config, unless bypassing.
    fn permission_wiring(
        &self,
        workspace: &Path,
    ) -> Result<(PermissionWiring, Option<PermissionBridge>)> {
        if self.settings.permission_mode == PermissionMode::Bypass {
            return Ok((PermissionWiring::Bypass, None));
        }

        let gate = PermissionGate::new(
            Arc::clone(&self.host),
            Arc::clone(&self.cache),
            workspace.to_path_buf(),
        );
        let bridge = PermissionBridge::start(
            gate,
            Duration::from_secs(self.settings.bridge_read_timeout_secs),
        )?;

        let program = match &self.settings.helper_path {
            Some(path) => path.clone(),
            None => std::env::current_exe().map_err(Error::Bridge)?,
        };
        let launch = HelperLaunch {
            program,
            socket_path: bridge.socket_path().to_path_buf(),
            timeout: Duration::from_secs(self.settings.permission_timeout_secs),
            retries: self.settings.socket_retry_attempts,
            retry_delay: Duration::from_millis(self.settings.socket_retry_delay_ms),
        };
        let config_path = std::env::temp_dir().join(format!(
            "parley-mcp-{}-{}.json",
            std::process::id(),
            CONFIG_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        launch.write_config(&config_path)?;
        debug!(path = %config_path.display(), "wrote helper MCP config");

        Ok((
            PermissionWiring::Bridge {
                mcp_config: config_path,
            },
            Some(bridge),
        ))
    }

    /// Resume rounds, iteratively.
    async fn drive(
        &self,
        run: &mut RunState,
        base: LaunchOptions,
        prompt: &str,
        workspace: &Path,
        reporter: &ProgressReporter,
    ) -> Outcome {
        let mut launch = base.clone();
        let mut turn = prompt.to_string();

        loop {
            run.transition(if run.resume_rounds == 0 {
                SessionState::Running
            } else {
                SessionState::Resuming
            });

            let mut events = match self.launch(run, &launch, &turn, workspace).await {
                Ok(events) => events,
                Err(e) => return Outcome::failed(e.to_string()),
            };

            match self.read_turn(run, &mut events, reporter).await {
                RoundEnd::Finished(outcome) => return outcome,
                RoundEnd::Resume(answers) => {
                    run.transition(SessionState::AwaitingResume);
                    if let Some(mut process) = run.process.take() {
                        run.exit_code = process.terminate().await;
                    }

                    let Some(session_id) = run.session_id.clone() else {
                        return Outcome::failed("Cannot resume: agent never reported a session id");
                    };
                    if run.resume_rounds >= self.settings.max_resume_rounds {
                        warn!(limit = self.settings.max_resume_rounds, "resume limit reached");
                        return Outcome::failed(format!(
                            "Exceeded maximum of {} resume rounds",
                            self.settings.max_resume_rounds
                        ));
                    }

                    run.resume_rounds += 1;
                    info!(session_id = %session_id, round = run.resume_rounds, "resuming session with answers");
                    reporter.report("Resuming with your answer").await;
                    launch = base.resuming(&session_id);
                    turn = answers;
                }
            }
        }
    }

    /// Spawn one agent process and send it `turn`.
    async fn launch(
        &self,
        run: &mut RunState,
        launch: &LaunchOptions,
        turn: &str,
        workspace: &Path,
    ) -> Result<EventStream<ChildStdout>> {
        let process = AgentProcess::spawn(build_command(launch), Some(workspace))?
            .with_grace_period(self.timeouts.grace);
        let process = run.process.insert(process);
        let events = process.take_events()?;
        process.write_line(turn).await?;
        debug!(resume = ?launch.resume_session_id, "agent turn sent");
        Ok(events)
    }

    /// Read events until the current turn ends.
    async fn read_turn(
        &self,
        run: &mut RunState,
        events: &mut EventStream<ChildStdout>,
        reporter: &ProgressReporter,
    ) -> RoundEnd {
        let mut queued: Vec<String> = Vec::new();

        loop {
            let event = match tokio::time::timeout(self.timeouts.inactivity, events.next_event()).await
            {
                Err(_) => {
                    warn!(window = ?self.timeouts.inactivity, "agent inactive, giving up");
                    return RoundEnd::Finished(Outcome::timed_out(format!(
                        "Agent produced no output for {:?}",
                        self.timeouts.inactivity
                    )));
                }
                Ok(None) => return RoundEnd::Finished(self.stream_ended(run).await),
                Ok(Some(event)) => event,
            };

            run.accumulator.process(&event);
            if let Some(id) = event.session_id() {
                if run.session_id.as_deref() != Some(id) {
                    info!(session_id = id, "agent session established");
                    run.session_id = Some(id.to_string());
                }
            }
            if let Some(message) = format_progress(&event) {
                reporter.report(&message).await;
            }

            match event.kind {
                EventType::Assistant => {
                    let Some(marker) = interaction::detect(&event.text_content()) else {
                        continue;
                    };
                    let outcome = interaction::resolve(self.host.as_ref(), &marker).await;
                    run.counts.record(outcome.kind);

                    if run.session_id.is_some() {
                        debug!(kind = ?outcome.kind, "answer queued for resume");
                        queued.push(outcome.resume_text());
                    } else if let Some(process) = run.process.as_mut() {
                        warn!("no session id yet, writing answer directly to agent stdin");
                        if let Err(e) = process.write_line(outcome.direct_text()).await {
                            warn!(error = %e, "failed to deliver answer");
                        }
                    }
                }
                EventType::Result => {
                    let summary = event.result_summary().unwrap_or_default();
                    run.record_summary(&summary);

                    if !queued.is_empty() {
                        return RoundEnd::Resume(queued.join("\n\n"));
                    }
                    return RoundEnd::Finished(Outcome::from_summary(&summary));
                }
                _ => {}
            }
        }
    }

    /// Stdout closed before a result line.
    async fn stream_ended(&self, run: &mut RunState) -> Outcome {
        let Some(process) = run.process.as_mut() else {
            return Outcome::failed("Agent output ended before a result");
        };
        let exit_code = match tokio::time::timeout(self.timeouts.grace, process.wait()).await {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => {
                warn!(error = %e, "could not collect agent exit status");
                None
            }
            Err(_) => process.terminate().await,
        };
        run.exit_code = exit_code;
        let stderr = process.stderr_output();
        run.process = None;

        let code = exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string());
        warn!(exit_code = %code, "agent exited without a result");
        if stderr.trim().is_empty() {
            Outcome::failed(format!("Agent exited without a result (exit code {code})"))
        } else {
            Outcome::failed(format!(
                "Agent exited without a result (exit code {code}): {}",
                stderr.trim()
            ))
        }
    }
}
