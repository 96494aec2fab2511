//! Agent stream parser.
//!
//! Converts one newline-delimited JSON message into a typed
//! [`StreamItem`]. Both backends funnel through [`convert_value`] so text
//! and tool-use extraction behave identically regardless of transport.
//!
//! # Known wire types
//!
//! | `type`        | Maps to                                   |
//! |---------------|-------------------------------------------|
//! | `system`      | [`UpdateKind::System`]                    |
//! | `user`        | [`UpdateKind::User`]                      |
//! | `assistant`   | [`UpdateKind::Assistant`]                 |
//! | `tool_result` | [`UpdateKind::ToolResult`]                |
//! | `error`       | [`UpdateKind::Error`]                     |
//! | `progress`    | [`UpdateKind::Progress`]                  |
//! | `result`      | [`StreamItem::Terminal`]                  |
//! | *(any other)* | Skipped; logged at `DEBUG`                |
//!
//! A malformed line is a local error: callers log it and keep reading.
//! Only a missing terminal result escalates, and that decision belongs to
//! the backend, not the parser.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::protocol::types::{StreamUpdate, TerminalResult, ToolCall, UpdateKind};
use crate::{AppError, Result};

/// One parsed message: either a mid-stream update or the terminal result.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// Mid-stream update delivered to the caller's progress callback.
    Update(StreamUpdate),
    /// Terminal `result` object closing the stream.
    Terminal(TerminalResult),
}

// ── Wire payload shapes ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SystemWire {
    subtype: Option<String>,
    #[serde(default)]
    tools: Vec<String>,
    model: Option<String>,
    cwd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ToolResultWire {
    tool_use_id: String,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    is_error: bool,
    duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorWire {
    message: String,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProgressWire {
    percent: Option<f64>,
    step: Option<u32>,
    total_steps: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ResultWire {
    session_id: String,
    // Older agent builds report `cost_usd`; newer ones `total_cost_usd`.
    #[serde(alias = "total_cost_usd")]
    cost_usd: f64,
    duration_ms: u64,
    num_turns: u32,
    #[serde(default)]
    is_error: bool,
    subtype: Option<String>,
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Parse a single line from the agent stream.
///
/// # Return value
///
/// - `Ok(Some(item))` — the line is a recognized, complete message.
/// - `Ok(None)` — the line is empty/whitespace or carries an unknown
///   `type` (skipped; unknown types are logged at `DEBUG`).
/// - `Err(AppError::Parse(…))` — the line is not valid JSON, lacks the
///   `type` discriminator, or a known type is missing a required field.
///
/// # Errors
///
/// See return value; parse errors never abort the stream — callers log
/// and continue.
pub fn parse_line(line: &str) -> Result<Option<StreamItem>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let value: Value =
        serde_json::from_str(line).map_err(|e| AppError::Parse(format!("malformed json: {e}")))?;
    convert_value(&value)
}

/// Convert one decoded wire object into a [`StreamItem`].
///
/// The SDK backend hands its native message objects straight to this
/// function; the subprocess backend goes through [`parse_line`] first.
///
/// # Errors
///
/// Returns `AppError::Parse` when the `type` discriminator is absent or a
/// recognized type is missing a required field.
pub fn convert_value(value: &Value) -> Result<Option<StreamItem>> {
    let Some(msg_type) = value.get("type").and_then(Value::as_str) else {
        return Err(AppError::Parse(
            "missing `type` discriminator field".into(),
        ));
    };

    let session_id = value
        .get("session_id")
        .and_then(Value::as_str)
        .map(str::to_owned);

    match msg_type {
        "system" => parse_system(value, session_id),
        "user" => parse_user(value, session_id),
        "assistant" => parse_assistant(value, session_id),
        "tool_result" => parse_tool_result(value, session_id),
        "error" => parse_error(value, session_id),
        "progress" => parse_progress(value, session_id),
        "result" => parse_result(value),
        other => {
            debug!(wire_type = other, "parser: skipping unknown message type");
            Ok(None)
        }
    }
}

// ── Per-type converters ──────────────────────────────────────────────────────

fn parse_system(value: &Value, session_id: Option<String>) -> Result<Option<StreamItem>> {
    let wire: SystemWire = from_value(value, "system")?;

    Ok(Some(StreamItem::Update(StreamUpdate::now(
        session_id,
        UpdateKind::System {
            subtype: wire.subtype.unwrap_or_default(),
            tools: wire.tools,
            model: wire.model,
            cwd: wire.cwd,
        },
    ))))
}

fn parse_user(value: &Value, session_id: Option<String>) -> Result<Option<StreamItem>> {
    // User messages carry either `message.content` blocks or a bare string.
    let content = value
        .pointer("/message/content")
        .map(flatten_content)
        .unwrap_or_default();

    Ok(Some(StreamItem::Update(StreamUpdate::now(
        session_id,
        UpdateKind::User { text: content },
    ))))
}

/// Walk `message.content` blocks, concatenating `text` blocks and
/// collecting `tool_use` blocks. Unknown block types are skipped.
fn parse_assistant(value: &Value, session_id: Option<String>) -> Result<Option<StreamItem>> {
    let blocks = value
        .pointer("/message/content")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            AppError::Parse("missing required field: assistant message.content".into())
        })?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(Value::as_str) {
                    text.push_str(t);
                }
            }
            Some("tool_use") => {
                let id = require_str(block, "id", "assistant tool_use block")?;
                let name = require_str(block, "name", "assistant tool_use block")?;
                let input = block
                    .get("input")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                tool_calls.push(ToolCall { id, name, input });
            }
            other => {
                debug!(block_type = ?other, "parser: skipping unknown content block");
            }
        }
    }

    Ok(Some(StreamItem::Update(StreamUpdate::now(
        session_id,
        UpdateKind::Assistant { text, tool_calls },
    ))))
}

fn parse_tool_result(value: &Value, session_id: Option<String>) -> Result<Option<StreamItem>> {
    let wire: ToolResultWire = from_value(value, "tool_result")?;

    Ok(Some(StreamItem::Update(StreamUpdate::now(
        session_id,
        UpdateKind::ToolResult {
            tool_use_id: wire.tool_use_id,
            content: flatten_content(&wire.content),
            is_error: wire.is_error,
            duration_ms: wire.duration_ms,
        },
    ))))
}

fn parse_error(value: &Value, session_id: Option<String>) -> Result<Option<StreamItem>> {
    let wire: ErrorWire = from_value(value, "error")?;

    Ok(Some(StreamItem::Update(StreamUpdate::now(
        session_id,
        UpdateKind::Error {
            message: wire.message,
            code: wire.code,
        },
    ))))
}

fn parse_progress(value: &Value, session_id: Option<String>) -> Result<Option<StreamItem>> {
    let wire: ProgressWire = from_value(value, "progress")?;

    Ok(Some(StreamItem::Update(StreamUpdate::now(
        session_id,
        UpdateKind::Progress {
            percent: wire.percent,
            step: wire.step,
            total_steps: wire.total_steps,
        },
    ))))
}

fn parse_result(value: &Value) -> Result<Option<StreamItem>> {
    let wire: ResultWire = from_value(value, "result")?;

    Ok(Some(StreamItem::Terminal(TerminalResult {
        session_id: wire.session_id,
        cost_usd: wire.cost_usd,
        duration_ms: wire.duration_ms,
        num_turns: wire.num_turns,
        is_error: wire.is_error,
        subtype: wire.subtype,
    })))
}

// ── Private helpers ──────────────────────────────────────────────────────────

/// Deserialize a wire payload, mapping failures to a parse error naming
/// the message type.
fn from_value<T: serde::de::DeserializeOwned>(value: &Value, msg_type: &str) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| AppError::Parse(format!("missing required field: {msg_type}: {e}")))
}

fn require_str(block: &Value, field: &str, context: &str) -> Result<String> {
    block
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| AppError::Parse(format!("missing required field: `{field}` in {context}")))
}

/// Flatten a content value (bare string or list of `text` blocks) to text.
fn flatten_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => {
            let mut out = String::new();
            for block in blocks {
                if block.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(t) = block.get("text").and_then(Value::as_str) {
                        out.push_str(t);
                    }
                }
            }
            out
        }
        _ => String::new(),
    }
}
