//! Execution facade.
//!
//! Orchestrates one `run` call end to end: resolve the session, pick the
//! SDK backend when configured, fall back to the subprocess backend on a
//! recognized fault signature, validate every streamed tool call while
//! the stream is in flight, aggregate the normalized response, and
//! reconcile the session afterwards.
//!
//! Fallback state machine:
//!
//! ```text
//! Idle → Executing(Sdk) → Complete
//!                       ↘ Fallback → Executing(Subprocess) → Complete
//!                       ↘ Failed                           ↘ Failed(original error)
//! ```

pub mod fallback;

use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::sdk::{SdkBackend, SdkClient};
use crate::backend::subprocess::SubprocessBackend;
use crate::backend::{ExecutionBackend, ExecutionRequest};
use crate::config::GlobalConfig;
use crate::policy::{ToolValidator, Verdict, Violation};
use crate::protocol::types::{Response, StreamUpdate, TerminalResult, ToolUse, UpdateKind};
use crate::session::{SessionInfo, SessionManager, SessionStore};
use crate::{AppError, Result};

/// Retained update history per execution; older updates are evicted.
///
/// Aggregation only needs tool-use extraction and the final assistant
/// text, so a bounded window is enough even for very long runs.
pub const RING_CAPACITY: usize = 1_000;

/// Caller-supplied progress callback, invoked once per update in stream
/// order. A failing callback is logged and never aborts the read loop.
pub type StreamObserver<'a> = &'a mut (dyn FnMut(&StreamUpdate) -> Result<()> + Send);

/// The engine facade exposed to the embedding application.
pub struct ExecutionEngine {
    config: GlobalConfig,
    sessions: SessionManager,
    validator: ToolValidator,
    subprocess: SubprocessBackend,
    sdk: Option<SdkBackend>,
}

impl ExecutionEngine {
    /// Assemble an engine from configuration and collaborators.
    ///
    /// The SDK backend is attempted first whenever a client is supplied
    /// and `execution.sdk_enabled` is set; otherwise every run goes
    /// straight to the subprocess backend.
    #[must_use]
    pub fn new(
        config: GlobalConfig,
        store: Arc<dyn SessionStore>,
        sdk_client: Option<Arc<dyn SdkClient>>,
    ) -> Self {
        let deadline = Duration::from_secs(config.execution.timeout_seconds);
        let sdk = if config.execution.sdk_enabled {
            sdk_client.map(|client| SdkBackend::new(client, deadline))
        } else {
            debug!("sdk backend disabled by configuration");
            None
        };

        Self {
            sessions: SessionManager::new(config.session.clone(), store),
            validator: ToolValidator::new(config.tools.clone()),
            subprocess: SubprocessBackend::from_config(&config),
            sdk,
            config,
        }
    }

    /// Execute one prompt under the caller's session.
    ///
    /// Resolves (or creates) the session for `(owner_id,
    /// working_directory, session_id)`, drives the chosen backend, and
    /// returns the normalized response after session reconciliation.
    ///
    /// # Errors
    ///
    /// Propagates every error kind of [`crate::AppError`] except those
    /// recovered by fallback; see the module docs for the state machine.
    pub async fn run(
        &self,
        prompt: &str,
        working_directory: &Path,
        owner_id: i64,
        session_id: Option<&str>,
        on_stream: Option<StreamObserver<'_>>,
    ) -> Result<Response> {
        let session = self
            .sessions
            .resolve(owner_id, working_directory, session_id)
            .await?;

        info!(
            session_id = %session.id,
            owner_id,
            provisional = session.is_provisional,
            "starting execution"
        );

        // A provisional session has no agent-side state to resume.
        let request = ExecutionRequest {
            prompt: prompt.to_owned(),
            working_directory: working_directory.to_owned(),
            session_id: (!session.is_provisional).then(|| session.id.clone()),
            continue_existing: !session.is_provisional,
            max_turns: self.config.execution.max_turns,
            allowed_tools: allowed_tools(&self.config),
        };

        self.execute_and_reconcile(&session.id, request, on_stream)
            .await
    }

    /// Continue the owner's most recent session in a directory.
    ///
    /// Returns `Ok(None)` when no live session exists for the pair.
    /// An empty prompt selects the "continue without new prompt" mode.
    ///
    /// # Errors
    ///
    /// Same as [`ExecutionEngine::run`].
    pub async fn continue_most_recent(
        &self,
        owner_id: i64,
        working_directory: &Path,
        prompt: Option<&str>,
        on_stream: Option<StreamObserver<'_>>,
    ) -> Result<Option<Response>> {
        let Some(session) = self.sessions.most_recent(owner_id, working_directory).await else {
            debug!(owner_id, "no session to continue in this directory");
            return Ok(None);
        };

        let request = ExecutionRequest {
            prompt: prompt.unwrap_or_default().to_owned(),
            working_directory: working_directory.to_owned(),
            session_id: (!session.is_provisional).then(|| session.id.clone()),
            continue_existing: true,
            max_turns: self.config.execution.max_turns,
            allowed_tools: allowed_tools(&self.config),
        };

        self.execute_and_reconcile(&session.id, request, on_stream)
            .await
            .map(Some)
    }

    /// Read-only session summary, if the session is known.
    pub async fn get_session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.get_info(session_id).await
    }

    /// Sweep expired sessions. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if a delete fails.
    pub async fn expire_sessions(&self) -> Result<usize> {
        self.sessions.expire().await
    }

    /// Persist live sessions and release the engine.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if persistence fails.
    pub async fn shutdown(&self) -> Result<()> {
        self.sessions.shutdown().await
    }

    // ── Fallback state machine ───────────────────────────────────────────────

    async fn execute_and_reconcile(
        &self,
        resolved_session_id: &str,
        request: ExecutionRequest,
        mut on_stream: Option<StreamObserver<'_>>,
    ) -> Result<Response> {
        let response = if let Some(sdk) = &self.sdk {
            match self.execute_once(sdk, request.clone(), on_stream.as_mut()).await {
                Ok(response) => response,
                Err(primary) => match fallback::classify(&primary) {
                    Some(signature) => {
                        warn!(
                            ?signature,
                            error = %primary,
                            "sdk backend failed with recognized signature, falling back to subprocess"
                        );
                        match self.execute_once(&self.subprocess, request, on_stream.as_mut()).await {
                            Ok(response) => response,
                            Err(secondary) => {
                                // The SDK was the method of record; its
                                // error is the one surfaced.
                                warn!(
                                    error = %secondary,
                                    "subprocess fallback also failed, surfacing original sdk error"
                                );
                                return Err(primary);
                            }
                        }
                    }
                    None => return Err(primary),
                },
            }
        } else {
            self.execute_once(&self.subprocess, request, on_stream.as_mut())
                .await?
        };

        let session = self.sessions.reconcile(resolved_session_id, &response).await?;
        debug!(
            session_id = %session.id,
            message_count = session.message_count,
            "session reconciled"
        );

        Ok(response)
    }

    // ── Streaming consume loop ───────────────────────────────────────────────

    /// Drive one backend invocation: validate tool calls in flight,
    /// forward updates to the observer, aggregate the response.
    async fn execute_once(
        &self,
        backend: &dyn ExecutionBackend,
        request: ExecutionRequest,
        mut observer: Option<&mut StreamObserver<'_>>,
    ) -> Result<Response> {
        debug!(backend = backend.name(), "executing request");

        let (update_tx, mut update_rx) = mpsc::channel::<StreamUpdate>(64);
        let cancel = CancellationToken::new();
        let working_directory = request.working_directory.clone();

        let mut backend_fut = backend.execute(request, update_tx, cancel.clone());
        let mut backend_result: Option<Result<TerminalResult>> = None;

        let mut ring: VecDeque<StreamUpdate> = VecDeque::new();
        let mut tools_used: Vec<ToolUse> = Vec::new();
        let mut seen_tools: BTreeSet<String> = BTreeSet::new();
        let mut violations: Vec<Violation> = Vec::new();
        let mut aborting = false;

        loop {
            tokio::select! {
                result = &mut backend_fut, if backend_result.is_none() => {
                    backend_result = Some(result);
                }

                maybe = update_rx.recv() => {
                    let Some(update) = maybe else {
                        // Every sender is gone: the stream is fully drained.
                        break;
                    };

                    for call in update.tool_calls() {
                        if seen_tools.insert(call.name.clone()) {
                            tools_used.push(ToolUse {
                                name: call.name.clone(),
                                timestamp: update.timestamp,
                            });
                        }

                        match self.validator.check(call, &working_directory) {
                            Verdict::Allowed => {}
                            Verdict::Denied(violation) => {
                                let critical = violation.critical;
                                violations.push(violation);
                                if critical && !aborting {
                                    // Abort before any further content
                                    // reaches the caller; the backend
                                    // tears its resource down first.
                                    aborting = true;
                                    cancel.cancel();
                                }
                            }
                        }
                    }

                    if !aborting {
                        if let Some(cb) = observer.as_deref_mut() {
                            if let Err(err) = cb(&update) {
                                warn!(error = %err, "stream observer failed, continuing");
                            }
                        }
                    }

                    if ring.len() == RING_CAPACITY {
                        ring.pop_front();
                    }
                    ring.push_back(update);
                }
            }
        }

        if aborting {
            let blocked: Vec<String> = violations.iter().map(|v| v.tool.clone()).collect();
            return Err(AppError::ToolPolicy {
                blocked,
                allowed: self.validator.allowed_display(),
            });
        }

        let terminal = match backend_result {
            Some(Ok(terminal)) => terminal,
            Some(Err(err)) => return Err(err),
            None => {
                return Err(AppError::Parse(
                    "backend ended without producing a result".into(),
                ))
            }
        };

        Ok(assemble_response(
            terminal,
            &ring,
            tools_used,
            &violations,
            &self.validator,
        ))
    }
}

/// The configured allow list, or `None` when everything is allowed.
fn allowed_tools(config: &GlobalConfig) -> Option<Vec<String>> {
    if config.tools.allowed.is_empty() {
        None
    } else {
        Some(config.tools.allowed.clone())
    }
}

/// Build the normalized response from the terminal result and the
/// retained update window.
fn assemble_response(
    terminal: TerminalResult,
    ring: &VecDeque<StreamUpdate>,
    tools_used: Vec<ToolUse>,
    violations: &[Violation],
    validator: &ToolValidator,
) -> Response {
    let mut content = ring
        .iter()
        .rev()
        .find_map(|update| match &update.kind {
            UpdateKind::Assistant { text, .. } if !text.is_empty() => Some(text.clone()),
            _ => None,
        })
        .unwrap_or_default();

    let mut is_error = terminal.is_error;
    let mut error_kind = terminal
        .is_error
        .then(|| terminal.subtype.clone().unwrap_or_else(|| "agent_error".to_owned()));

    if !violations.is_empty() {
        is_error = true;
        error_kind = Some("tool_policy".to_owned());
        let note = deferred_policy_note(violations, &validator.allowed_display());
        if content.is_empty() {
            content = note;
        } else {
            content.push_str("\n\n");
            content.push_str(&note);
        }
    }

    Response {
        content,
        session_id: terminal.session_id,
        cost_usd: terminal.cost_usd,
        duration_ms: terminal.duration_ms,
        num_turns: terminal.num_turns,
        is_error,
        error_kind,
        tools_used,
    }
}

/// Caller-facing explanation for deferred (non-critical) violations.
fn deferred_policy_note(violations: &[Violation], allowed: &[String]) -> String {
    let blocked: Vec<String> = violations
        .iter()
        .map(|v| format!("{} ({})", v.tool, v.reason))
        .collect();

    format!(
        "Some tool calls were blocked by policy: {}. Currently allowed tools: {}.",
        blocked.join("; "),
        allowed.join(", ")
    )
}
