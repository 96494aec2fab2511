//! Error types shared across the engine.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};

/// Shared engine result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Engine error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Session store read/write failure.
    Store(String),
    /// Stream framing failure (line too long, broken pipe).
    Protocol(String),
    /// Terminal result missing from an otherwise completed stream.
    Parse(String),
    /// Agent process exited with a non-zero status.
    Process {
        /// Exit code, if the process was not killed by a signal.
        exit_code: Option<i32>,
        /// Captured stderr text.
        stderr: String,
    },
    /// Agent refused the request because the usage limit was reached.
    UsageLimit {
        /// Parsed limit-reset time, when the agent reported one.
        resets_at: Option<DateTime<Utc>>,
    },
    /// Wall-clock deadline exceeded; the backend resource was torn down.
    Timeout(String),
    /// SDK client invocation failure.
    Sdk(String),
    /// A critical tool was blocked mid-stream and execution was aborted.
    ToolPolicy {
        /// Every tool name blocked during the aborted execution.
        blocked: Vec<String>,
        /// Tool names/patterns currently allowed, for the caller's message.
        allowed: Vec<String>,
    },
    /// Session lifecycle violation (unknown id, ownership mismatch).
    Session(String),
    /// File system path failed validation against the working directory.
    PathViolation(String),
    /// Execution cancelled before completion.
    Interrupted(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Store(msg) => write!(f, "store: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Parse(msg) => write!(f, "parse: {msg}"),
            Self::Process { exit_code, stderr } => match exit_code {
                Some(code) => write!(f, "process exited with code {code}: {stderr}"),
                None => write!(f, "process terminated by signal: {stderr}"),
            },
            Self::UsageLimit { resets_at } => match resets_at {
                Some(ts) => write!(f, "usage limit reached, resets at {ts}"),
                None => write!(f, "usage limit reached"),
            },
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Sdk(msg) => write!(f, "sdk: {msg}"),
            Self::ToolPolicy { blocked, allowed } => write!(
                f,
                "blocked tools: [{}]; allowed tools: [{}]",
                blocked.join(", "),
                allowed.join(", ")
            ),
            Self::Session(msg) => write!(f, "session: {msg}"),
            Self::PathViolation(msg) => write!(f, "path violation: {msg}"),
            Self::Interrupted(msg) => write!(f, "interrupted: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Short machine-readable kind tag, attached to error `Response`s.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Store(_) => "store",
            Self::Protocol(_) => "protocol",
            Self::Parse(_) => "parse",
            Self::Process { .. } => "process",
            Self::UsageLimit { .. } => "usage_limit",
            Self::Timeout(_) => "timeout",
            Self::Sdk(_) => "sdk",
            Self::ToolPolicy { .. } => "tool_policy",
            Self::Session(_) => "session",
            Self::PathViolation(_) => "path_violation",
            Self::Interrupted(_) => "interrupted",
            Self::Io(_) => "io",
        }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
