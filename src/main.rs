//! Parley - interactive orchestrator for the Claude Code agent
//!
//! CLI entry point. `run` executes one prompt with the terminal as host;
//! `approve` is the permission helper the agent launches over MCP.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing::info;

use parley::cli::{format_permission, render_result, TerminalHost};
use parley::permission::helper::{DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRIES, DEFAULT_RETRY_DELAY};
use parley::permission::{ApproverServer, BridgeClient, PermissionCache};
use parley::{logging, ExecutionRequest, Orchestrator, Settings};

/// Interactive orchestrator for the Claude Code agent
///
/// Runs the agent with permission checks and structured questions routed
/// back to you in the terminal.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one prompt to completion
    Run {
        /// Prompt sent as the first user turn
        #[arg(long)]
        prompt: String,

        /// Path to a parley.toml settings file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Working directory for the agent (defaults to the settings workspace)
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Continue an earlier agent session
        #[arg(long)]
        resume: Option<String>,

        /// Print the execution result as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// MCP permission helper (launched by the agent, speaks JSON-RPC on stdio)
    Approve {
        /// Permission bridge socket
        #[arg(long)]
        socket: PathBuf,

        /// Seconds to wait for a decision
        #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
        timeout_secs: u64,

        /// Connection retries after the first attempt
        #[arg(long, default_value_t = DEFAULT_RETRIES)]
        retries: u32,

        /// Base retry delay, doubled on every attempt
        #[arg(long, default_value_t = u64::try_from(DEFAULT_RETRY_DELAY.as_millis()).unwrap_or(100))]
        retry_delay_ms: u64,
    },

    /// Inspect or reset remembered permission decisions
    Permissions {
        /// Path to a parley.toml settings file
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(subcommand)]
        action: PermissionsAction,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum PermissionsAction {
    /// List "Always Allow" decisions
    List,
    /// Forget every stored decision
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_json);

    match cli.command {
        Command::Run {
            prompt,
            config,
            workdir,
            resume,
            json,
        } => {
            let request = ExecutionRequest {
                prompt,
                working_dir: workdir,
                resume_session_id: resume,
            };
            run(config, request, json).await
        }
        Command::Approve {
            socket,
            timeout_secs,
            retries,
            retry_delay_ms,
        } => {
            let client = BridgeClient::new(socket)
                .with_timeout(Duration::from_secs(timeout_secs))
                .with_retries(retries, Duration::from_millis(retry_delay_ms));
            ApproverServer::new(client)
                .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
                .await
        }
        Command::Permissions { config, action } => permissions(config, action),
    }
}

async fn run(config: Option<PathBuf>, request: ExecutionRequest, json: bool) -> Result<()> {
    let settings = Settings::load(config.as_deref()).context("Failed to load settings")?;
    let cache = Arc::new(PermissionCache::open(settings.permission_storage()));
    let orchestrator = Orchestrator::new(settings, Arc::new(TerminalHost::stdin()), cache);

    let registry = Arc::clone(orchestrator.registry());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let cancelled = registry.cancel_all();
            info!(cancelled, "interrupt received, cancelling");
        }
    });

    let result = orchestrator.execute(request).await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to encode result")?
        );
    } else {
        render_result(&result);
        if !result.output.is_empty() {
            println!("{}", result.output);
        }
    }

    if result.success {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn permissions(config: Option<PathBuf>, action: PermissionsAction) -> Result<()> {
    let settings = Settings::load(config.as_deref()).context("Failed to load settings")?;
    let path = settings.permission_storage();
    let cache = PermissionCache::open(&path);

    match action {
        PermissionsAction::List => {
            let entries = cache.entries();
            if entries.is_empty() {
                eprintln!("No stored permissions in {}", path.display());
            }
            for entry in &entries {
                println!("{}", format_permission(entry));
            }
        }
        PermissionsAction::Clear => {
            let count = cache.entries().len();
            cache
                .clear_all()
                .with_context(|| format!("Failed to clear {}", path.display()))?;
            eprintln!("Cleared {count} stored permission(s)");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from(["parley", "run", "--prompt", "hi", "--resume", "s-1"]);
        match cli.command {
            Command::Run {
                prompt,
                resume,
                json,
                ..
            } => {
                assert_eq!(prompt, "hi");
                assert_eq!(resume.as_deref(), Some("s-1"));
                assert!(!json);
            }
            other => panic!("Expected run, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_approve_matches_helper_config() {
        let launch = parley::permission::HelperLaunch {
            program: PathBuf::from("/usr/bin/parley"),
            socket_path: PathBuf::from("/tmp/p.sock"),
            timeout: Duration::from_secs(30),
            retries: 5,
            retry_delay: Duration::from_millis(250),
        };
        let config = launch.mcp_config();
        let args: Vec<String> = config["mcpServers"]["perm"]["args"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a.as_str().unwrap().to_string())
            .collect();

        let cli = Cli::parse_from(std::iter::once("parley".to_string()).chain(args));
        match cli.command {
            Command::Approve {
                socket,
                timeout_secs,
                retries,
                retry_delay_ms,
            } => {
                assert_eq!(socket, PathBuf::from("/tmp/p.sock"));
                assert_eq!(timeout_secs, 30);
                assert_eq!(retries, 5);
                assert_eq!(retry_delay_ms, 250);
            }
            other => panic!("Expected approve, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_permissions_clear() {
        let cli = Cli::parse_from(["parley", "permissions", "clear"]);
        assert!(matches!(
            cli.command,
            Command::Permissions {
                action: PermissionsAction::Clear,
                ..
            }
        ));
    }
}
