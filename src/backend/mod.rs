//! Execution backends.
//!
//! The [`ExecutionBackend`] trait is the contract both strategies
//! implement: drive one agent invocation, emit normalized
//! [`StreamUpdate`]s through the provided channel, and return the
//! terminal result. The facade treats the two implementations as
//! interchangeable; one canonical contract test suite runs against both.

pub mod sdk;
pub mod subprocess;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::types::{StreamUpdate, TerminalResult};
use crate::Result;

/// One execution the facade hands to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Prompt text; may be empty for "continue without new prompt".
    pub prompt: String,
    /// Working directory the agent runs in.
    pub working_directory: PathBuf,
    /// Agent-assigned session id, when the session is past its first
    /// round trip. Provisional placeholder ids are never passed down.
    pub session_id: Option<String>,
    /// Whether this execution continues an existing session.
    pub continue_existing: bool,
    /// Maximum agent turns for this invocation.
    pub max_turns: u32,
    /// Allowed-tools list forwarded to the agent, when configured.
    pub allowed_tools: Option<Vec<String>>,
}

/// Invocation mode derived from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode<'a> {
    /// Fresh session started from the prompt.
    NewSession,
    /// Continue the most recent session, no new prompt.
    ContinueMostRecent {
        /// Explicit resume id, when the real id is known.
        resume_id: Option<&'a str>,
    },
    /// Resume a known session and deliver a new prompt.
    ResumeWithPrompt {
        /// The session to resume.
        resume_id: &'a str,
    },
}

impl ExecutionRequest {
    /// Derive the invocation mode.
    ///
    /// A continue request without a real session id and with a new prompt
    /// degrades to a fresh session: there is nothing to resume by id, and
    /// the prompt must not be dropped.
    #[must_use]
    pub fn mode(&self) -> InvocationMode<'_> {
        if !self.continue_existing {
            return InvocationMode::NewSession;
        }

        if self.prompt.is_empty() {
            return InvocationMode::ContinueMostRecent {
                resume_id: self.session_id.as_deref(),
            };
        }

        match self.session_id.as_deref() {
            Some(id) => InvocationMode::ResumeWithPrompt { resume_id: id },
            None => InvocationMode::NewSession,
        }
    }
}

/// Boxed future returned by [`ExecutionBackend::execute`].
pub type ExecuteFuture<'a> = Pin<Box<dyn Future<Output = Result<TerminalResult>> + Send + 'a>>;

/// Contract between the facade and an execution strategy.
///
/// Implementations stream every normalized update through `update_tx` in
/// wire order (ordered, at-most-once per call), honor `cancel` by tearing
/// down their resource before returning, and enforce their own wall-clock
/// deadline around the whole stream-and-wait sequence.
pub trait ExecutionBackend: Send + Sync {
    /// Stable backend name for logs and error context.
    fn name(&self) -> &'static str;

    /// Drive one agent invocation to completion.
    ///
    /// # Errors
    ///
    /// - `AppError::Timeout` — deadline exceeded (resource torn down).
    /// - `AppError::Interrupted` — `cancel` fired mid-stream.
    /// - `AppError::Process` / `AppError::UsageLimit` — subprocess exits.
    /// - `AppError::Sdk` — SDK client failures.
    /// - `AppError::Parse` — the terminal result never arrived.
    fn execute(
        &self,
        request: ExecutionRequest,
        update_tx: mpsc::Sender<StreamUpdate>,
        cancel: CancellationToken,
    ) -> ExecuteFuture<'_>;
}
