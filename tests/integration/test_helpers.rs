//! Shared fixtures: scripted fake agent binaries and a scripted SDK client.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};

use agent_relay::backend::sdk::{QueryFuture, SdkClient, SdkOptions};
use agent_relay::config::GlobalConfig;
use agent_relay::session::MemorySessionStore;
use agent_relay::{AppError, ExecutionEngine, Result};

// ── Wire message builders ────────────────────────────────────────────────────

/// The `system` init message.
pub fn system_message(session_id: &str) -> Value {
    json!({
        "type": "system",
        "subtype": "init",
        "tools": ["Read", "Bash", "Write"],
        "model": "agent-1",
        "cwd": "/work",
        "session_id": session_id,
    })
}

/// An assistant turn with a single text block.
pub fn assistant_text(session_id: &str, text: &str) -> Value {
    json!({
        "type": "assistant",
        "session_id": session_id,
        "message": { "content": [ { "type": "text", "text": text } ] },
    })
}

/// An assistant turn proposing one tool call.
pub fn assistant_tool_use(session_id: &str, id: &str, name: &str, input: Value) -> Value {
    json!({
        "type": "assistant",
        "session_id": session_id,
        "message": { "content": [
            { "type": "tool_use", "id": id, "name": name, "input": input }
        ] },
    })
}

/// A tool result answering `tool_use_id`.
pub fn tool_result(session_id: &str, tool_use_id: &str, content: &str) -> Value {
    json!({
        "type": "tool_result",
        "session_id": session_id,
        "tool_use_id": tool_use_id,
        "content": content,
        "is_error": false,
        "duration_ms": 7,
    })
}

/// The terminal `result` message.
pub fn result_message(session_id: &str) -> Value {
    json!({
        "type": "result",
        "subtype": "success",
        "session_id": session_id,
        "cost_usd": 0.0042,
        "duration_ms": 1200,
        "num_turns": 2,
        "is_error": false,
    })
}

/// The canonical happy-path stream used by the contract suite.
pub fn standard_messages(session_id: &str) -> Vec<Value> {
    vec![
        system_message(session_id),
        assistant_text(session_id, "Let me check."),
        assistant_tool_use(session_id, "tu1", "Read", json!({"file_path": "src/lib.rs"})),
        tool_result(session_id, "tu1", "12 files"),
        assistant_text(session_id, "All done."),
        result_message(session_id),
    ]
}

// ── Fake agent scripts (subprocess backend) ──────────────────────────────────

/// Write an executable `/bin/sh` script into `dir` and return its path.
#[cfg(unix)]
pub fn write_script(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-agent.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod script");
    path
}

/// Script body emitting the given NDJSON lines on stdout.
#[cfg(unix)]
pub fn emit_lines(messages: &[Value]) -> String {
    let lines: Vec<String> = messages.iter().map(Value::to_string).collect();
    format!("cat <<'NDJSON'\n{}\nNDJSON", lines.join("\n"))
}

// ── Scripted SDK client ──────────────────────────────────────────────────────

/// What the scripted client does when queried.
#[derive(Debug, Clone)]
pub enum SdkScript {
    /// Yield these messages, then end the stream.
    Messages(Vec<Value>),
    /// Fail the query itself before any message.
    FailQuery(AppError),
    /// Yield `before`, then fail the stream with `error`.
    FailMidStream {
        before: Vec<Value>,
        error: AppError,
    },
}

/// Deterministic [`SdkClient`] driven by an [`SdkScript`].
#[derive(Debug, Clone)]
pub struct ScriptedSdkClient {
    script: SdkScript,
}

impl ScriptedSdkClient {
    pub fn new(script: SdkScript) -> Arc<Self> {
        Arc::new(Self { script })
    }
}

impl SdkClient for ScriptedSdkClient {
    fn query(&self, _options: SdkOptions) -> QueryFuture<'_> {
        let script = self.script.clone();
        Box::pin(async move {
            match script {
                SdkScript::Messages(messages) => {
                    let items: Vec<Result<Value>> = messages.into_iter().map(Ok).collect();
                    Ok(stream::iter(items).boxed())
                }
                SdkScript::FailQuery(error) => Err(error),
                SdkScript::FailMidStream { before, error } => {
                    let items: Vec<Result<Value>> = before
                        .into_iter()
                        .map(Ok)
                        .chain(std::iter::once(Err(error)))
                        .collect();
                    Ok(stream::iter(items).boxed())
                }
            }
        })
    }
}

// ── Engine assembly ──────────────────────────────────────────────────────────

/// Configuration pointing the subprocess backend at `binary`.
pub fn test_config(binary: &str, timeout_seconds: u64) -> GlobalConfig {
    let mut config = GlobalConfig::default();
    config.agent_binary = binary.to_owned();
    config.execution.timeout_seconds = timeout_seconds;
    config
}

/// Engine over an in-memory store, optionally with a scripted SDK client.
pub fn engine(config: GlobalConfig, sdk: Option<Arc<ScriptedSdkClient>>) -> ExecutionEngine {
    let client = sdk.map(|c| c as Arc<dyn SdkClient>);
    ExecutionEngine::new(config, Arc::new(MemorySessionStore::new()), client)
}
