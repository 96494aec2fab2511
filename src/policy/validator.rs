//! Tool-call validator.
//!
//! Every tool call observed in the agent stream is checked against the
//! configured policy while the stream is still in flight. Enforcement has
//! two tiers: a violation by a tool in the `critical` set aborts the
//! execution immediately; any other violation is recorded and reported on
//! the final response without interrupting the stream.

use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ToolsConfig;
use crate::policy::path_safety;
use crate::protocol::types::ToolCall;

/// Input fields treated as filesystem paths for file-mutation tools.
const PATH_FIELDS: &[&str] = &["file_path", "path", "notebook_path"];

/// Command substrings that always fail shell-tool screening.
///
/// Covers destructive recursive deletion, privilege escalation, piped
/// fetch-and-execute, raw device overwrite, and fork bombs.
const DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "rm -rf ~",
    "rm -rf *",
    "sudo ",
    "chmod -R 777 /",
    "mkfs",
    "> /dev/sd",
    "dd if=",
    ":(){ :|:& };:",
];

/// Shell-pipe suffixes that turn a network fetch into fetch-and-execute.
const PIPE_TO_SHELL: &[&str] = &["| sh", "| bash", "|sh", "|bash"];

/// Outcome of validating a single tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The call passes policy.
    Allowed,
    /// The call violates policy.
    Denied(Violation),
}

/// A recorded policy violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Offending tool name.
    pub tool: String,
    /// Human-readable denial reason.
    pub reason: String,
    /// Whether the tool is in the critical set (fail-fast tier).
    pub critical: bool,
}

/// Stateless policy check applied to each streamed tool call.
#[derive(Debug, Clone)]
pub struct ToolValidator {
    config: ToolsConfig,
}

impl ToolValidator {
    /// Create a validator over the given policy configuration.
    #[must_use]
    pub fn new(config: ToolsConfig) -> Self {
        Self { config }
    }

    /// Validate one tool call against the policy.
    ///
    /// Evaluation order:
    /// 1. Deny-list match (exact name or glob pattern) → deny.
    /// 2. Allow-list configured and nothing matches → deny.
    /// 3. File-mutation tool → every path argument must resolve inside
    ///    `working_dir`.
    /// 4. Shell tool → the command must pass dangerous-pattern screening.
    /// 5. Otherwise → allow.
    #[must_use]
    pub fn check(&self, call: &ToolCall, working_dir: &Path) -> Verdict {
        // ── 1. Deny list ─────────────────────────────────────
        if matches_any(&self.config.disallowed, &call.name) {
            return self.deny(call, format!("tool `{}` is disallowed", call.name));
        }

        // ── 2. Allow list (when configured) ──────────────────
        if !self.config.allowed.is_empty() && !matches_any(&self.config.allowed, &call.name) {
            return self.deny(call, format!("tool `{}` is not on the allow list", call.name));
        }

        // ── 3. Path boundary for file-mutation tools ─────────
        if self.config.file_mutation.contains(&call.name) {
            for field in PATH_FIELDS {
                if let Some(Value::String(raw)) = call.input.get(*field) {
                    if let Err(err) = path_safety::validate_path(working_dir, raw) {
                        return self.deny(
                            call,
                            format!("tool `{}` path argument rejected: {err}", call.name),
                        );
                    }
                }
            }
        }

        // ── 4. Command screening for shell tools ─────────────
        if self.config.shell.contains(&call.name) {
            if let Some(Value::String(command)) = call.input.get("command") {
                if let Some(pattern) = dangerous_pattern(command) {
                    return self.deny(
                        call,
                        format!("tool `{}` command matches dangerous pattern `{pattern}`", call.name),
                    );
                }
            }
        }

        debug!(tool = %call.name, "tool call allowed");
        Verdict::Allowed
    }

    /// Whether a violation by `tool` aborts the in-flight execution.
    #[must_use]
    pub fn is_critical(&self, tool: &str) -> bool {
        self.config.critical.iter().any(|c| c == tool)
    }

    /// The allowed names/patterns for caller-facing violation messages.
    ///
    /// An empty allow list means "everything not disallowed".
    #[must_use]
    pub fn allowed_display(&self) -> Vec<String> {
        if self.config.allowed.is_empty() {
            vec!["*".to_owned()]
        } else {
            self.config.allowed.clone()
        }
    }

    fn deny(&self, call: &ToolCall, reason: String) -> Verdict {
        let critical = self.is_critical(&call.name);
        warn!(tool = %call.name, critical, %reason, "tool call denied");
        Verdict::Denied(Violation {
            tool: call.name.clone(),
            reason,
            critical,
        })
    }
}

/// Screen a shell command against [`DANGEROUS_PATTERNS`].
///
/// Returns the first matching pattern. Whitespace runs are collapsed
/// before matching so spacing tricks do not slip through.
#[must_use]
pub fn dangerous_pattern(command: &str) -> Option<&'static str> {
    let collapsed = command.split_whitespace().collect::<Vec<_>>().join(" ");

    if let Some(pattern) = DANGEROUS_PATTERNS
        .iter()
        .find(|pattern| collapsed.contains(*pattern))
        .copied()
    {
        return Some(pattern);
    }

    // Blind fetch-and-execute: a network fetch piped straight into a shell.
    let fetches = collapsed.contains("curl ") || collapsed.contains("wget ");
    if fetches && PIPE_TO_SHELL.iter().any(|suffix| collapsed.contains(suffix)) {
        return Some("fetch piped to shell");
    }

    None
}

/// Match `name` against a list of exact names or glob patterns.
fn matches_any(patterns: &[String], name: &str) -> bool {
    patterns.iter().any(|entry| {
        if entry == name {
            return true;
        }
        match glob::Pattern::new(entry) {
            Ok(pattern) => pattern.matches(name),
            Err(err) => {
                warn!(pattern = %entry, %err, "invalid glob pattern in tool policy, skipping");
                false
            }
        }
    })
}
