//! Terminal host and result rendering
//!
//! Prompts and progress go to stderr so stdout stays clean for the final
//! output. Answers are read line by line from stdin.

use async_trait::async_trait;
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use crate::claude::progress::truncate;
use crate::error::{Error, Result};
use crate::host::{ElicitKind, ElicitRequest, ElicitResponse, Host};
use crate::permission::StoredPermission;
use crate::session::{ExecutionResult, SessionState};

/// [`Host`] backed by the terminal
pub struct TerminalHost<R = Stdin> {
    answers: Mutex<Lines<BufReader<R>>>,
}

impl TerminalHost {
    /// Read answers from the process's stdin
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }
}

impl<R: AsyncRead + Unpin> TerminalHost<R> {
    /// Read answers from `input`
    pub fn new(input: R) -> Self {
        Self {
            answers: Mutex::new(BufReader::new(input).lines()),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> Host for TerminalHost<R> {
    async fn elicit(&self, request: ElicitRequest) -> Result<ElicitResponse> {
        // one prompt at a time; concurrent permission checks queue here
        let mut answers = self.answers.lock().await;
        render_prompt(&request);

        let Some(line) = answers.next_line().await.map_err(|e| Error::Host(e.to_string()))? else {
            return Ok(ElicitResponse::decline());
        };
        let line = line.trim();
        if line.is_empty() {
            return Ok(ElicitResponse::decline());
        }

        Ok(match &request.kind {
            ElicitKind::Select { options, multi } => parse_selection(line, options, *multi)
                .map_or_else(ElicitResponse::decline, ElicitResponse::accept),
            ElicitKind::Text | ElicitKind::Confirm => ElicitResponse::accept(line),
        })
    }

    async fn report_progress(&self, _progress: u64, _total: Option<u64>, message: &str) {
        eprintln!("  {} {}", "▶".blue(), message.dimmed());
    }
}

fn render_prompt(request: &ElicitRequest) {
    eprintln!();
    eprintln!("{} {}", "?".yellow().bold(), request.message.bold());
    match &request.kind {
        ElicitKind::Text => eprint!("  {} ", ">".dimmed()),
        ElicitKind::Confirm => eprint!("  {} ", "[y/N]".dimmed()),
        ElicitKind::Select { options, multi } => {
            for (i, option) in options.iter().enumerate() {
                eprintln!("  {} {option}", format!("{}.", i + 1).cyan());
            }
            if *multi {
                eprint!("  {} ", "numbers, comma separated >".dimmed());
            } else {
                eprint!("  {} ", "number >".dimmed());
            }
        }
    }
}

/// Map a typed answer onto `options`: a 1-based number or an option's text.
/// With `multi`, several comma-separated picks are joined with ", ".
/// Returns `None` if any pick is not a valid option.
#[must_use]
pub fn parse_selection(input: &str, options: &[String], multi: bool) -> Option<String> {
    let pick = |token: &str| -> Option<String> {
        let token = token.trim();
        if let Ok(n) = token.parse::<usize>() {
            return n.checked_sub(1).and_then(|i| options.get(i)).cloned();
        }
        options
            .iter()
            .find(|o| o.eq_ignore_ascii_case(token))
            .cloned()
    };

    if !multi {
        return pick(input);
    }
    let picks = input
        .split(',')
        .filter(|t| !t.trim().is_empty())
        .map(pick)
        .collect::<Option<Vec<_>>>()?;
    if picks.is_empty() {
        None
    } else {
        Some(picks.join(", "))
    }
}

/// Print the execution summary to stderr.
pub fn render_result(result: &ExecutionResult) {
    eprintln!("{}", "─".repeat(50).dimmed());

    let status = match result.state {
        SessionState::Complete => "COMPLETED".green().bold().to_string(),
        SessionState::TimedOut => "TIMED OUT".yellow().bold().to_string(),
        _ => "FAILED".red().bold().to_string(),
    };
    match &result.session_id {
        Some(id) => eprintln!("  {status} {}", format!("session {id}").dimmed()),
        None => eprintln!("  {status}"),
    }

    if let Some(error) = &result.error {
        eprintln!("  {} {}", "✗".red().bold(), truncate(error, 200).red());
    }

    let duration_secs = result.duration_ms / 1000;
    let mins = duration_secs / 60;
    let secs = duration_secs % 60;
    eprintln!(
        "  {} {} turns | ${:.2} | {mins}m {secs}s | {} resume(s)",
        "Stats:".dimmed(),
        result.num_turns,
        result.total_cost_usd,
        result.resume_rounds,
    );

    let counts = &result.counts;
    if counts.total() > 0 {
        eprintln!(
            "  {} {} permission(s) ({} granted), {} choice(s), {} question(s), {} confirmation(s)",
            "Asked:".dimmed(),
            counts.permissions_requested,
            counts.permissions_granted,
            counts.choices_asked,
            counts.questions_asked,
            counts.confirmations_asked,
        );
    }

    eprintln!();
}

/// One line per stored permission, for `permissions list`.
#[must_use]
pub fn format_permission(entry: &StoredPermission) -> String {
    format!(
        "{:<18} {:<12} {}",
        entry.decision.label(),
        entry.action,
        entry.target
    )
}
