//! Subprocess execution backend.
//!
//! Launches the agent CLI as a child process with:
//! - a deterministic argument vector for the four invocation modes;
//! - `kill_on_drop(true)` plus `env_clear()` and a safe variable
//!   allowlist, so host secrets never leak into the agent's environment;
//! - stdout framed through [`StreamCodec`] (1 MiB line cap);
//! - one wall-clock deadline wrapping the entire read-and-wait sequence —
//!   on expiry the child is killed and reaped before the timeout error
//!   surfaces;
//! - stderr classification on non-zero exit, with a distinguished
//!   usage-limit signature carrying the parsed reset time.

use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{ExecuteFuture, ExecutionBackend, ExecutionRequest, InvocationMode};
use crate::config::GlobalConfig;
use crate::protocol::codec::StreamCodec;
use crate::protocol::parser::{self, StreamItem};
use crate::protocol::types::{StreamUpdate, TerminalResult};
use crate::{AppError, Result};

/// Environment variables inherited by the spawned agent process.
///
/// Everything else is stripped via `env_clear()` before launch.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    "LANG",
    "TERM",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Stderr signature marking an agent-side usage-limit refusal.
const USAGE_LIMIT_SIGNATURE: &str = "usage limit reached";

/// Executes the agent by spawning its CLI as a child process.
pub struct SubprocessBackend {
    binary: String,
    base_args: Vec<String>,
    deadline: Duration,
}

impl SubprocessBackend {
    /// Create a backend for the given binary and deadline.
    #[must_use]
    pub fn new(binary: String, base_args: Vec<String>, deadline: Duration) -> Self {
        Self {
            binary,
            base_args,
            deadline,
        }
    }

    /// Build a backend from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(
            config.agent_binary.clone(),
            config.agent_args.clone(),
            Duration::from_secs(config.execution.timeout_seconds),
        )
    }

    async fn run(
        &self,
        request: ExecutionRequest,
        update_tx: mpsc::Sender<StreamUpdate>,
        cancel: CancellationToken,
    ) -> Result<TerminalResult> {
        let args = build_args(&request);
        debug!(binary = %self.binary, ?args, "spawning agent process");

        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.base_args).args(&args);

        // Strip inherited environment, then inject only the safe allowlist.
        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }

        cmd.current_dir(&request.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Io(format!("failed to spawn agent: {err}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Io("failed to capture agent stdout".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Io("failed to capture agent stderr".into()))?;

        // Drain stderr concurrently so the child cannot block on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).await.ok();
            String::from_utf8_lossy(&buf).into_owned()
        });

        // The deadline wraps the entire read-and-wait sequence.
        let outcome = tokio::time::timeout(
            self.deadline,
            stream_and_wait(&mut child, stdout, &update_tx, &cancel),
        )
        .await;

        let end = match outcome {
            Ok(end) => end?,
            Err(_elapsed) => {
                child.kill().await.ok();
                child.wait().await.ok();
                return Err(AppError::Timeout(format!(
                    "agent did not complete within {:?}",
                    self.deadline
                )));
            }
        };

        let stderr_text = stderr_task.await.unwrap_or_default();

        if !end.status_success {
            return Err(classify_exit(end.exit_code, &stderr_text));
        }

        end.terminal
            .ok_or_else(|| AppError::Parse("stream ended without a terminal result".into()))
    }
}

impl ExecutionBackend for SubprocessBackend {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    fn execute(
        &self,
        request: ExecutionRequest,
        update_tx: mpsc::Sender<StreamUpdate>,
        cancel: CancellationToken,
    ) -> ExecuteFuture<'_> {
        Box::pin(self.run(request, update_tx, cancel))
    }
}

/// Build the agent CLI argument vector for one request.
///
/// Modes:
/// - new session → `-p <prompt>`;
/// - continue, no new prompt → `--continue` (+ `--resume <id>` when the
///   real id is known);
/// - continue with a new prompt → `--resume <id> -p <prompt>`.
///
/// Streaming output and verbose mode are always requested because the
/// line protocol requires them, along with the turn limit and, when
/// configured, the comma-joined allowed-tools list.
#[must_use]
pub fn build_args(request: &ExecutionRequest) -> Vec<String> {
    let mut args = Vec::new();

    match request.mode() {
        InvocationMode::NewSession => {
            args.push("-p".to_owned());
            args.push(request.prompt.clone());
        }
        InvocationMode::ContinueMostRecent { resume_id } => {
            args.push("--continue".to_owned());
            if let Some(id) = resume_id {
                args.push("--resume".to_owned());
                args.push(id.to_owned());
            }
        }
        InvocationMode::ResumeWithPrompt { resume_id } => {
            args.push("--resume".to_owned());
            args.push(resume_id.to_owned());
            args.push("-p".to_owned());
            args.push(request.prompt.clone());
        }
    }

    args.push("--output-format".to_owned());
    args.push("stream-json".to_owned());
    args.push("--verbose".to_owned());
    args.push("--max-turns".to_owned());
    args.push(request.max_turns.to_string());

    if let Some(tools) = &request.allowed_tools {
        if !tools.is_empty() {
            args.push("--allowedTools".to_owned());
            args.push(tools.join(","));
        }
    }

    args
}

/// Outcome of draining the stream and reaping the child.
struct StreamEnd {
    terminal: Option<TerminalResult>,
    status_success: bool,
    exit_code: Option<i32>,
}

/// Drain stdout line by line, forwarding updates, then reap the child.
///
/// Malformed lines and over-long lines are logged and skipped; only I/O
/// errors stop the read loop early (the child is still reaped).
/// Cancellation kills and reaps the child before returning
/// `AppError::Interrupted`.
async fn stream_and_wait(
    child: &mut Child,
    stdout: tokio::process::ChildStdout,
    update_tx: &mpsc::Sender<StreamUpdate>,
    cancel: &CancellationToken,
) -> Result<StreamEnd> {
    let mut framed = FramedRead::new(stdout, StreamCodec::new());
    let mut terminal = None;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("cancellation received, killing agent process");
                child.kill().await.ok();
                child.wait().await.ok();
                return Err(AppError::Interrupted("execution cancelled".into()));
            }

            item = framed.next() => {
                match item {
                    None => break,

                    Some(Err(AppError::Protocol(msg))) => {
                        // Framing error (line too long) — skip and continue.
                        warn!(error = msg.as_str(), "skipping oversized line");
                    }

                    Some(Err(err)) => {
                        warn!(error = %err, "stdout read error, stopping stream");
                        break;
                    }

                    Some(Ok(line)) => match parser::parse_line(&line) {
                        Ok(Some(StreamItem::Update(update))) => {
                            if update_tx.send(update).await.is_err() {
                                debug!("update channel closed, killing agent process");
                                child.kill().await.ok();
                                child.wait().await.ok();
                                return Err(AppError::Interrupted(
                                    "update channel closed".into(),
                                ));
                            }
                        }
                        Ok(Some(StreamItem::Terminal(result))) => terminal = Some(result),
                        Ok(None) => {}
                        Err(err) => {
                            warn!(error = %err, raw_line = %line, "skipping malformed line");
                        }
                    },
                }
            }
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|err| AppError::Io(format!("failed to reap agent process: {err}")))?;

    Ok(StreamEnd {
        terminal,
        status_success: status.success(),
        exit_code: status.code(),
    })
}

/// Classify a non-zero exit into a distinguished error kind.
///
/// The usage-limit stderr signature (optionally suffixed with
/// `|<epoch-seconds>`) becomes [`AppError::UsageLimit`] with the parsed
/// reset time; everything else is [`AppError::Process`].
fn classify_exit(exit_code: Option<i32>, stderr: &str) -> AppError {
    if stderr.to_lowercase().contains(USAGE_LIMIT_SIGNATURE) {
        return AppError::UsageLimit {
            resets_at: parse_reset_time(stderr),
        };
    }

    AppError::Process {
        exit_code,
        stderr: stderr.trim().to_owned(),
    }
}

/// Extract the epoch reset time the agent appends after the signature.
fn parse_reset_time(stderr: &str) -> Option<DateTime<Utc>> {
    let re = Regex::new(r"(?i)usage limit reached\|(\d{9,13})").ok()?;
    let raw = re.captures(stderr)?.get(1)?.as_str();
    let epoch: i64 = raw.parse().ok()?;

    // 13-digit values are milliseconds.
    if raw.len() >= 13 {
        DateTime::from_timestamp_millis(epoch)
    } else {
        DateTime::from_timestamp(epoch, 0)
    }
}
