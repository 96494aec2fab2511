//! Global configuration parsing and validation.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, Result};

/// Environment variable overriding the configured agent binary.
pub const AGENT_BINARY_ENV: &str = "AGENT_RELAY_BINARY";

/// Execution limits applied to every backend invocation.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ExecutionConfig {
    /// Maximum agent turns per invocation.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Wall-clock deadline for one invocation, in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Whether the SDK backend is attempted before the subprocess backend.
    #[serde(default = "default_true")]
    pub sdk_enabled: bool,
}

fn default_max_turns() -> u32 {
    25
}

fn default_timeout_seconds() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            timeout_seconds: default_timeout_seconds(),
            sdk_enabled: true,
        }
    }
}

/// Session lifecycle limits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Maximum live sessions per owner; the least recently used is evicted.
    #[serde(default = "default_max_sessions_per_owner")]
    pub max_sessions_per_owner: usize,
    /// Idle time after which a session expires, in seconds.
    #[serde(default = "default_session_timeout_seconds")]
    pub session_timeout_seconds: u64,
}

fn default_max_sessions_per_owner() -> usize {
    5
}

fn default_session_timeout_seconds() -> u64 {
    86_400
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_owner: default_max_sessions_per_owner(),
            session_timeout_seconds: default_session_timeout_seconds(),
        }
    }
}

/// Tool policy configuration.
///
/// The `critical` set controls the fail-fast tier: a blocked tool named
/// here aborts the in-flight execution instead of being deferred to the
/// final response.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ToolsConfig {
    /// Allowed tool names or glob patterns. Empty means "allow everything
    /// not explicitly disallowed".
    #[serde(default)]
    pub allowed: Vec<String>,
    /// Denied tool names or glob patterns; checked before the allow list.
    #[serde(default)]
    pub disallowed: Vec<String>,
    /// Tools whose violation aborts the in-flight execution.
    #[serde(default = "default_file_mutation_tools")]
    pub critical: Vec<String>,
    /// Tools whose path arguments must stay inside the working directory.
    #[serde(default = "default_file_mutation_tools")]
    pub file_mutation: Vec<String>,
    /// Tools whose command argument is screened for dangerous patterns.
    #[serde(default = "default_shell_tools")]
    pub shell: Vec<String>,
}

fn default_file_mutation_tools() -> Vec<String> {
    ["Write", "Edit", "MultiEdit", "NotebookEdit"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn default_shell_tools() -> Vec<String> {
    vec!["Bash".to_owned()]
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allowed: Vec::new(),
            disallowed: Vec::new(),
            critical: default_file_mutation_tools(),
            file_mutation: default_file_mutation_tools(),
            shell: default_shell_tools(),
        }
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Agent CLI binary (e.g. `claude`).
    #[serde(default = "default_agent_binary")]
    pub agent_binary: String,
    /// Extra arguments always passed to the agent CLI.
    #[serde(default)]
    pub agent_args: Vec<String>,
    /// Workspace root used when the caller does not supply one.
    #[serde(default = "default_workspace_root")]
    pub default_workspace_root: PathBuf,
    /// Execution limits.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Session lifecycle limits.
    #[serde(default)]
    pub session: SessionConfig,
    /// Tool policy.
    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_agent_binary() -> String {
    "claude".to_owned()
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            agent_binary: default_agent_binary(),
            agent_args: Vec::new(),
            default_workspace_root: default_workspace_root(),
            execution: ExecutionConfig::default(),
            session: SessionConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// After parsing, the [`AGENT_BINARY_ENV`] environment variable, when
    /// set and non-empty, overrides `agent_binary`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be read, or
    /// `AppError::Config` if parsing or validation fails.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Io(format!("cannot read {}: {err}", path.display())))?;
        let mut config: Self = toml::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-variable overrides on top of parsed values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(binary) = env::var(AGENT_BINARY_ENV) {
            if !binary.trim().is_empty() {
                self.agent_binary = binary;
            }
        }
    }

    /// Validate field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.agent_binary.trim().is_empty() {
            return Err(AppError::Config("agent_binary must not be empty".into()));
        }
        if self.execution.max_turns == 0 {
            return Err(AppError::Config("execution.max_turns must be >= 1".into()));
        }
        if self.execution.timeout_seconds == 0 {
            return Err(AppError::Config(
                "execution.timeout_seconds must be >= 1".into(),
            ));
        }
        if self.session.max_sessions_per_owner == 0 {
            return Err(AppError::Config(
                "session.max_sessions_per_owner must be >= 1".into(),
            ));
        }
        Ok(())
    }
}
