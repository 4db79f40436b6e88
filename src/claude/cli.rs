//! Claude Code CLI command builder
//!
//! Constructs the `std::process::Command` used to launch the agent in
//! bidirectional stream-json mode, optionally resuming a session and wiring
//! permission checks to the bridge helper.

use std::path::PathBuf;
use std::process::Command;

/// Name of the MCP tool the agent calls for permission checks.
pub const PERMISSION_PROMPT_TOOL: &str = "mcp__perm__approve";

/// How the agent handles tool permission checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionWiring {
    /// `--dangerously-skip-permissions`
    Bypass,
    /// Route checks to the helper described by this MCP config file
    Bridge {
        /// Generated MCP config file
        mcp_config: PathBuf,
    },
}

/// Everything needed to build one agent launch
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Agent executable
    pub agent_path: String,
    /// Model identifier
    pub model: String,
    /// Session to resume (`--resume <id>`). `None` starts a new session.
    pub resume_session_id: Option<String>,
    /// Interaction protocol instructions (`--append-system-prompt`)
    pub system_prompt: Option<String>,
    /// Permission handling
    pub permissions: PermissionWiring,
}

impl LaunchOptions {
    /// Same launch, continuing the given session.
    #[must_use]
    pub fn resuming(&self, session_id: &str) -> Self {
        Self {
            resume_session_id: Some(session_id.to_string()),
            ..self.clone()
        }
    }
}

/// Build the agent command.
///
/// The prompt is not an argument: it is sent as the first stream-json turn
/// on stdin. The working directory is applied at spawn time.
#[must_use]
pub fn build_command(options: &LaunchOptions) -> Command {
    let mut cmd = Command::new(&options.agent_path);

    cmd.arg("--print");
    cmd.arg("--model").arg(&options.model);
    cmd.arg("--output-format").arg("stream-json");
    cmd.arg("--input-format").arg("stream-json");
    cmd.arg("--verbose");

    if let Some(session_id) = &options.resume_session_id {
        cmd.arg("--resume").arg(session_id);
    }

    if let Some(prompt) = &options.system_prompt {
        cmd.arg("--append-system-prompt").arg(prompt);
    }

    match &options.permissions {
        PermissionWiring::Bypass => {
            cmd.arg("--dangerously-skip-permissions");
        }
        PermissionWiring::Bridge { mcp_config } => {
            cmd.arg("--strict-mcp-config");
            cmd.arg("--mcp-config").arg(mcp_config);
            cmd.arg("--permission-prompt-tool").arg(PERMISSION_PROMPT_TOOL);
        }
    }

    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> LaunchOptions {
        LaunchOptions {
            agent_path: "claude".to_string(),
            model: "sonnet".to_string(),
            resume_session_id: None,
            system_prompt: None,
            permissions: PermissionWiring::Bypass,
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_str().unwrap().to_string())
            .collect()
    }

    fn value_after(args: &[String], flag: &str) -> Option<String> {
        let pos = args.iter().position(|a| a == flag)?;
        args.get(pos + 1).cloned()
    }

    #[test]
    fn test_build_sets_agent_binary() {
        let opts = LaunchOptions {
            agent_path: "/usr/local/bin/claude".to_string(),
            ..options()
        };
        let cmd = build_command(&opts);
        assert_eq!(cmd.get_program().to_str().unwrap(), "/usr/local/bin/claude");
    }

    #[test]
    fn test_build_uses_stream_json_both_ways() {
        let args = args(&build_command(&options()));
        assert_eq!(
            value_after(&args, "--output-format").as_deref(),
            Some("stream-json")
        );
        assert_eq!(
            value_after(&args, "--input-format").as_deref(),
            Some("stream-json")
        );
        assert!(args.contains(&"--verbose".to_string()));
        assert!(args.contains(&"--print".to_string()));
    }

    #[test]
    fn test_build_passes_model() {
        let opts = LaunchOptions {
            model: "opus".to_string(),
            ..options()
        };
        let args = args(&build_command(&opts));
        assert_eq!(value_after(&args, "--model").as_deref(), Some("opus"));
    }

    #[test]
    fn test_build_without_resume_omits_flag() {
        let args = args(&build_command(&options()));
        assert!(!args.contains(&"--resume".to_string()), "got: {args:?}");
    }

    #[test]
    fn test_resuming_adds_resume_flag() {
        let opts = options().resuming("abc-123");
        let args = args(&build_command(&opts));
        assert_eq!(value_after(&args, "--resume").as_deref(), Some("abc-123"));
    }

    #[test]
    fn test_bypass_skips_permissions() {
        let args = args(&build_command(&options()));
        assert!(args.contains(&"--dangerously-skip-permissions".to_string()));
        assert!(!args.contains(&"--permission-prompt-tool".to_string()));
    }

    #[test]
    fn test_bridge_wires_permission_prompt_tool() {
        let opts = LaunchOptions {
            permissions: PermissionWiring::Bridge {
                mcp_config: PathBuf::from("/tmp/mcp.json"),
            },
            ..options()
        };
        let args = args(&build_command(&opts));
        assert!(args.contains(&"--strict-mcp-config".to_string()));
        assert_eq!(
            value_after(&args, "--mcp-config").as_deref(),
            Some("/tmp/mcp.json")
        );
        assert_eq!(
            value_after(&args, "--permission-prompt-tool").as_deref(),
            Some(PERMISSION_PROMPT_TOOL)
        );
        assert!(!args.contains(&"--dangerously-skip-permissions".to_string()));
    }

    #[test]
    fn test_system_prompt_appended_when_present() {
        let opts = LaunchOptions {
            system_prompt: Some("PROTOCOL".to_string()),
            ..options()
        };
        let with_prompt = args(&build_command(&opts));
        assert_eq!(
            value_after(&with_prompt, "--append-system-prompt").as_deref(),
            Some("PROTOCOL")
        );

        let without = args(&build_command(&options()));
        assert!(!without.contains(&"--append-system-prompt".to_string()));
    }
}
