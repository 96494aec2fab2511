//! Normalized stream and response types shared by both execution backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tool invocation the agent proposes inside an assistant update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ToolCall {
    /// Wire identifier of the tool-use block.
    pub id: String,
    /// Tool name (e.g. `Write`, `Bash`).
    pub name: String,
    /// Structured tool input as supplied by the agent.
    pub input: serde_json::Map<String, serde_json::Value>,
}

/// Typed payload of one streamed protocol message.
///
/// This is a closed set: unknown wire `type` values are skipped by the
/// parser, never surfaced as a variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum UpdateKind {
    /// Assistant turn: accumulated text plus proposed tool calls.
    Assistant {
        /// Concatenated text blocks of the turn.
        text: String,
        /// Tool-use blocks of the turn, in wire order.
        tool_calls: Vec<ToolCall>,
    },
    /// Outcome of a previously proposed tool call.
    ToolResult {
        /// Identifier of the tool-use block this result answers.
        tool_use_id: String,
        /// Result content, flattened to text.
        content: String,
        /// Whether the tool reported failure.
        is_error: bool,
        /// Tool execution time, when reported.
        duration_ms: Option<u64>,
    },
    /// Echoed user turn.
    User {
        /// User message text.
        text: String,
    },
    /// Stream initialization metadata.
    System {
        /// System message subtype (e.g. `init`).
        subtype: String,
        /// Tool names available to the agent.
        tools: Vec<String>,
        /// Model identifier the agent is running.
        model: Option<String>,
        /// Agent working directory.
        cwd: Option<String>,
    },
    /// Non-fatal error reported inside the stream.
    Error {
        /// Human-readable error message.
        message: String,
        /// Optional machine-readable code.
        code: Option<String>,
    },
    /// Progress report for long-running work.
    Progress {
        /// Percent complete, 0–100, when reported.
        percent: Option<f64>,
        /// Current step number.
        step: Option<u32>,
        /// Total number of steps.
        total_steps: Option<u32>,
    },
}

/// One normalized message from the agent stream.
///
/// Every update carries a receipt timestamp and the session context it was
/// observed under, regardless of which backend produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StreamUpdate {
    /// Time the engine parsed the message.
    pub timestamp: DateTime<Utc>,
    /// Session id carried on the wire message, when present.
    pub session_id: Option<String>,
    /// Typed payload.
    pub kind: UpdateKind,
}

impl StreamUpdate {
    /// Wrap `kind` with the current timestamp and the given session context.
    #[must_use]
    pub fn now(session_id: Option<String>, kind: UpdateKind) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id,
            kind,
        }
    }

    /// Tool calls carried by this update, if it is an assistant turn.
    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        match &self.kind {
            UpdateKind::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// The terminal `result` object closing a successful agent stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct TerminalResult {
    /// Agent-assigned session identifier.
    pub session_id: String,
    /// Total cost of the run in USD.
    pub cost_usd: f64,
    /// Wall-clock duration reported by the agent.
    pub duration_ms: u64,
    /// Number of agent turns consumed.
    pub num_turns: u32,
    /// Whether the agent reports the run as failed.
    pub is_error: bool,
    /// Result subtype (e.g. `success`, `error_max_turns`).
    pub subtype: Option<String>,
}

/// A tool the agent used during one execution, with first-seen time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ToolUse {
    /// Tool name.
    pub name: String,
    /// Time the engine first observed the call.
    pub timestamp: DateTime<Utc>,
}

/// Normalized result of one engine execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Response {
    /// Final assistant text (last assistant turn, or the policy explanation
    /// when tools were blocked).
    pub content: String,
    /// Agent-assigned session identifier.
    pub session_id: String,
    /// Total cost of the run in USD.
    pub cost_usd: f64,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
    /// Number of agent turns consumed.
    pub num_turns: u32,
    /// Whether the run failed (agent-reported or policy-flagged).
    pub is_error: bool,
    /// Machine-readable failure kind, when `is_error` is set.
    pub error_kind: Option<String>,
    /// Tools the agent invoked, in first-seen order.
    pub tools_used: Vec<ToolUse>,
}
