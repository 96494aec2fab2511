//! SDK execution backend.
//!
//! Invokes the agent through an injected in-process client instead of a
//! child process. The client yields backend-native message objects; each
//! one funnels through the same [`parser`] entry point the subprocess
//! backend uses, so text and tool-use extraction are identical and the
//! rest of the engine cannot tell the backends apart.
//!
//! There is no process to kill on timeout — the deadline simply abandons
//! the message stream.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{ExecuteFuture, ExecutionBackend, ExecutionRequest};
use crate::protocol::parser::{self, StreamItem};
use crate::protocol::types::{StreamUpdate, TerminalResult};
use crate::{AppError, Result};

/// Options handed to the SDK client, mirroring the CLI invocation modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkOptions {
    /// Prompt text; empty for "continue without new prompt".
    pub prompt: String,
    /// Working directory the agent operates in.
    pub working_directory: PathBuf,
    /// Agent-assigned session id to resume, when known.
    pub session_id: Option<String>,
    /// Whether this invocation continues an existing session.
    pub continue_existing: bool,
    /// Maximum agent turns.
    pub max_turns: u32,
    /// Allowed-tools list, when configured.
    pub allowed_tools: Option<Vec<String>>,
}

impl From<&ExecutionRequest> for SdkOptions {
    fn from(request: &ExecutionRequest) -> Self {
        Self {
            prompt: request.prompt.clone(),
            working_directory: request.working_directory.clone(),
            session_id: request.session_id.clone(),
            continue_existing: request.continue_existing,
            max_turns: request.max_turns,
            allowed_tools: request.allowed_tools.clone(),
        }
    }
}

/// Stream of backend-native message objects produced by an SDK query.
pub type SdkMessageStream = BoxStream<'static, Result<serde_json::Value>>;

/// Boxed future returned by [`SdkClient::query`].
pub type QueryFuture<'a> = Pin<Box<dyn Future<Output = Result<SdkMessageStream>> + Send + 'a>>;

/// In-process agent client collaborator.
///
/// The concrete client belongs to the embedding application; the engine
/// only requires that a query resolve to a stream of native message
/// objects shaped like the wire protocol.
pub trait SdkClient: Send + Sync {
    /// Start one agent query.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Sdk`] when the query cannot be started.
    fn query(&self, options: SdkOptions) -> QueryFuture<'_>;
}

/// Executes the agent through an [`SdkClient`].
pub struct SdkBackend {
    client: Arc<dyn SdkClient>,
    deadline: Duration,
}

impl SdkBackend {
    /// Create a backend over the given client and deadline.
    #[must_use]
    pub fn new(client: Arc<dyn SdkClient>, deadline: Duration) -> Self {
        Self { client, deadline }
    }

    async fn run(
        &self,
        request: ExecutionRequest,
        update_tx: mpsc::Sender<StreamUpdate>,
        cancel: CancellationToken,
    ) -> Result<TerminalResult> {
        let options = SdkOptions::from(&request);
        debug!(
            session_id = ?options.session_id,
            continue_existing = options.continue_existing,
            "starting sdk query"
        );

        let stream = self.client.query(options).await?;

        // Timeout abandons the iterator; dropping the stream is the only
        // teardown an in-process client needs.
        match tokio::time::timeout(self.deadline, consume(stream, &update_tx, &cancel)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(AppError::Timeout(format!(
                "sdk query did not complete within {:?}",
                self.deadline
            ))),
        }
    }
}

impl ExecutionBackend for SdkBackend {
    fn name(&self) -> &'static str {
        "sdk"
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

/// Drain the message stream, forwarding updates until the terminal result.
async fn consume(
    mut stream: SdkMessageStream,
    update_tx: &mpsc::Sender<StreamUpdate>,
    cancel: &CancellationToken,
) -> Result<TerminalResult> {
    let mut terminal = None;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("cancellation received, abandoning sdk stream");
                return Err(AppError::Interrupted("execution cancelled".into()));
            }

            item = stream.next() => {
                match item {
                    None => break,

                    Some(Err(err)) => {
                        // Keep the Sdk kind so the fallback matcher can
                        // classify the failure.
                        return Err(match err {
                            AppError::Sdk(_) => err,
                            other => AppError::Sdk(other.to_string()),
                        });
                    }

                    Some(Ok(value)) => match parser::convert_value(&value) {
                        Ok(Some(StreamItem::Update(update))) => {
                            if update_tx.send(update).await.is_err() {
                                debug!("update channel closed, abandoning sdk stream");
                                return Err(AppError::Interrupted(
                                    "update channel closed".into(),
                                ));
                            }
                        }
                        Ok(Some(StreamItem::Terminal(result))) => terminal = Some(result),
                        Ok(None) => {}
                        Err(err) => {
                            warn!(error = %err, "skipping malformed sdk message");
                        }
                    },
                }
            }
        }
    }

    terminal.ok_or_else(|| AppError::Sdk("malformed sdk stream: ended without a terminal result".into()))
}
