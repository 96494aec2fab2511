#![forbid(unsafe_code)]

//! `agent-relay` — one-shot CLI front for the execution engine.
//!
//! Loads configuration, runs a single prompt (or continues the most
//! recent session in the working directory), echoes streamed updates to
//! the log, and prints the normalized response as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::engine::StreamObserver;
use agent_relay::protocol::types::UpdateKind;
use agent_relay::session::MemorySessionStore;
use agent_relay::{AppError, ExecutionEngine, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "Run a prompt through the coding agent", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Working directory the agent runs in.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Continue the most recent session in the working directory.
    #[arg(long)]
    continue_session: bool,

    /// Resume a specific session by id.
    #[arg(long)]
    session: Option<String>,

    /// Prompt text; optional with `--continue-session`.
    prompt: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load(path)?,
        None => {
            let mut defaults = GlobalConfig::default();
            defaults.apply_env_overrides();
            defaults
        }
    };

    if let Some(workspace) = &args.workspace {
        config.default_workspace_root.clone_from(workspace);
    }

    let working_directory = config.default_workspace_root.clone();
    info!(workspace = %working_directory.display(), "agent-relay starting");

    // The one-shot CLI has no in-process client; every run goes through
    // the subprocess backend.
    let engine = ExecutionEngine::new(config, Arc::new(MemorySessionStore::new()), None);

    let mut echo = |update: &agent_relay::StreamUpdate| -> Result<()> {
        match &update.kind {
            UpdateKind::Assistant { text, tool_calls } => {
                info!(tool_calls = tool_calls.len(), "assistant: {text}");
            }
            UpdateKind::ToolResult { tool_use_id, is_error, .. } => {
                info!(tool_use_id = %tool_use_id, is_error = *is_error, "tool result");
            }
            other => info!(?other, "update"),
        }
        Ok(())
    };
    let observer: Option<StreamObserver<'_>> = Some(&mut echo);

    let result = if args.continue_session {
        match engine
            .continue_most_recent(
                0,
                &working_directory,
                args.prompt.as_deref(),
                observer,
            )
            .await?
        {
            Some(response) => Ok(response),
            None => Err(AppError::Session(
                "no session to continue in this directory".into(),
            )),
        }
    } else {
        let prompt = args
            .prompt
            .as_deref()
            .ok_or_else(|| AppError::Config("a prompt is required without --continue-session".into()))?;
        engine
            .run(prompt, &working_directory, 0, args.session.as_deref(), observer)
            .await
    };

    engine.shutdown().await?;

    match result {
        Ok(response) => {
            let rendered = serde_json::to_string_pretty(&response)
                .map_err(|err| AppError::Parse(format!("cannot render response: {err}")))?;
            println!("{rendered}");
            Ok(())
        }
        Err(err) => {
            error!(%err, "execution failed");
            Err(err)
        }
    }
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = fmt().with_env_filter(filter);
    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|err| AppError::Config(format!("failed to initialise tracing: {err}")))
}
