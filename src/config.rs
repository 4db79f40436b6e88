//! Settings
//!
//! Parses `parley.toml` (optional) and applies `PARLEY_*` environment
//! overrides on top. Every field has a default so an empty file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "PARLEY_";

/// How tool permission checks inside the agent are handled
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    /// Route every permission check through the bridge helper to a human
    #[default]
    Bridge,
    /// Skip permission checks entirely
    Bypass,
}

impl std::str::FromStr for PermissionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bridge" => Ok(Self::Bridge),
            "bypass" => Ok(Self::Bypass),
            other => bail!("Unknown permission mode '{other}' (expected 'bridge' or 'bypass')"),
        }
    }
}

/// Which embedded interaction protocols the agent is told about
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InteractionToggles {
    /// `__user_choice__` markers
    pub choices: bool,
    /// `__user_question__` markers
    pub questions: bool,
    /// `__confirmation__` markers
    pub confirmations: bool,
}

impl Default for InteractionToggles {
    fn default() -> Self {
        Self {
            choices: true,
            questions: true,
            confirmations: true,
        }
    }
}

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Path or name of the agent executable
    pub agent_path: String,
    /// Model identifier passed to the agent
    pub model: String,
    /// Working directory for the agent (current directory when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,
    /// Permission handling mode
    pub permission_mode: PermissionMode,
    /// Hard wall-clock limit for one execution, across all resume rounds
    pub max_execution_secs: u64,
    /// Maximum silence from the agent before the execution is abandoned
    pub inactivity_timeout_secs: u64,
    /// How long the helper waits for a human permission decision
    pub permission_timeout_secs: u64,
    /// Per-connection read timeout on the bridge socket
    pub bridge_read_timeout_secs: u64,
    /// Connection retries performed by the helper after the first attempt
    pub socket_retry_attempts: u32,
    /// Base delay of the helper's exponential backoff
    pub socket_retry_delay_ms: u64,
    /// Persisted permission file (defaults to `<workspace>/.parley/permissions.json`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_storage_path: Option<PathBuf>,
    /// Upper bound on resume rounds within one execution
    pub max_resume_rounds: u32,
    /// Executable launched by the agent as the permission helper
    /// (defaults to the running executable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helper_path: Option<PathBuf>,
    /// Interaction protocols announced to the agent
    pub interactions: InteractionToggles,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            agent_path: "claude".to_string(),
            model: "sonnet".to_string(),
            workspace_root: None,
            permission_mode: PermissionMode::Bridge,
            max_execution_secs: 600,
            inactivity_timeout_secs: 120,
            permission_timeout_secs: 120,
            bridge_read_timeout_secs: 60,
            socket_retry_attempts: 3,
            socket_retry_delay_ms: 100,
            permission_storage_path: None,
            max_resume_rounds: 20,
            helper_path: None,
            interactions: InteractionToggles::default(),
        }
    }
}

impl Settings {
    /// Parse a settings file from a path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse settings TOML from a string
    pub fn parse(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content).context("Failed to parse settings")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from an optional file, then apply process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        settings.apply_env_overrides(std::env::vars())?;
        Ok(settings)
    }

    /// Apply `PARLEY_*` overrides from the given variables.
    ///
    /// Unknown `PARLEY_*` names are ignored; malformed values are errors.
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "AGENT_PATH" => self.agent_path = value,
                "MODEL" => self.model = value,
                "WORKSPACE_ROOT" => self.workspace_root = Some(PathBuf::from(value)),
                "PERMISSION_MODE" => self.permission_mode = value.parse()?,
                "MAX_EXECUTION_SECS" => self.max_execution_secs = parse_number(&key, &value)?,
                "INACTIVITY_TIMEOUT_SECS" => {
                    self.inactivity_timeout_secs = parse_number(&key, &value)?;
                }
                "PERMISSION_TIMEOUT_SECS" => {
                    self.permission_timeout_secs = parse_number(&key, &value)?;
                }
                "BRIDGE_READ_TIMEOUT_SECS" => {
                    self.bridge_read_timeout_secs = parse_number(&key, &value)?;
                }
                "SOCKET_RETRY_ATTEMPTS" => {
                    self.socket_retry_attempts = parse_number(&key, &value)?;
                }
                "SOCKET_RETRY_DELAY_MS" => {
                    self.socket_retry_delay_ms = parse_number(&key, &value)?;
                }
                "PERMISSION_STORAGE_PATH" => {
                    self.permission_storage_path = Some(PathBuf::from(value));
                }
                "MAX_RESUME_ROUNDS" => self.max_resume_rounds = parse_number(&key, &value)?,
                "HELPER_PATH" => self.helper_path = Some(PathBuf::from(value)),
                _ => {}
            }
        }
        self.validate()
    }

    /// Resolve the working directory for the agent.
    #[must_use]
    pub fn workspace(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Resolve the persisted permission file path.
    #[must_use]
    pub fn permission_storage(&self) -> PathBuf {
        self.permission_storage_path
            .clone()
            .unwrap_or_else(|| self.workspace().join(".parley").join("permissions.json"))
    }

    /// Hard deadline for one execution.
    #[must_use]
    pub const fn max_execution(&self) -> Duration {
        Duration::from_secs(self.max_execution_secs)
    }

    /// Inactivity window for agent output.
    #[must_use]
    pub const fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.agent_path.trim().is_empty() {
            bail!("agent_path cannot be empty");
        }
        if self.model.trim().is_empty() {
            bail!("model cannot be empty");
        }
        if self.max_execution_secs == 0 {
            bail!("max_execution_secs must be greater than zero");
        }
        if self.inactivity_timeout_secs == 0 {
            bail!("inactivity_timeout_secs must be greater than zero");
        }
        if self.permission_timeout_secs == 0 {
            bail!("permission_timeout_secs must be greater than zero");
        }
        if self.bridge_read_timeout_secs == 0 {
            bail!("bridge_read_timeout_secs must be greater than zero");
        }
        Ok(())
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {key}: '{value}'"))
}
