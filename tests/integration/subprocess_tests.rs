//! Subprocess backend tests against scripted fake agents.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agent_relay::backend::subprocess::SubprocessBackend;
use agent_relay::backend::{ExecutionBackend, ExecutionRequest};
use agent_relay::AppError;

use super::test_helpers::{emit_lines, result_message, standard_messages, write_script};

fn request(workdir: std::path::PathBuf) -> ExecutionRequest {
    ExecutionRequest {
        prompt: "list files".to_owned(),
        working_directory: workdir,
        session_id: None,
        continue_existing: false,
        max_turns: 5,
        allowed_tools: None,
    }
}

fn backend(script: &std::path::Path, timeout: Duration) -> SubprocessBackend {
    SubprocessBackend::new(script.to_string_lossy().into_owned(), Vec::new(), timeout)
}

async fn drive(
    backend: &SubprocessBackend,
    request: ExecutionRequest,
) -> (
    Vec<agent_relay::StreamUpdate>,
    agent_relay::Result<agent_relay::protocol::types::TerminalResult>,
) {
    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();

    let execute = backend.execute(request, tx, cancel);
    let collect = async {
        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update);
        }
        updates
    };

    let (terminal, updates) = tokio::join!(execute, collect);
    (updates, terminal)
}

/// Malformed lines interspersed among well-formed ones are skipped; the
/// run still completes from the remaining valid lines.
#[tokio::test]
async fn malformed_lines_do_not_abort_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut lines: Vec<String> = standard_messages("abc123")
        .iter()
        .map(ToString::to_string)
        .collect();
    lines.insert(1, "this is not json at all {{{".to_owned());
    lines.insert(3, "{\"no_type_field\": true}".to_owned());

    let body = format!("cat <<'NDJSON'\n{}\nNDJSON", lines.join("\n"));
    let script = write_script(dir.path(), &body);
    let backend = backend(&script, Duration::from_secs(5));

    let (updates, terminal) = drive(&backend, request(dir.path().to_path_buf())).await;

    let terminal = terminal.expect("run must complete despite malformed lines");
    assert_eq!(terminal.session_id, "abc123");
    assert_eq!(updates.len(), 5, "all valid updates must survive");
}

/// A stream that ends without the terminal result is a parse error.
#[tokio::test]
async fn missing_terminal_result_is_parse_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let messages = standard_messages("abc123");
    let truncated = &messages[..messages.len() - 1];
    let script = write_script(dir.path(), &emit_lines(truncated));
    let backend = backend(&script, Duration::from_secs(5));

    let (_updates, terminal) = drive(&backend, request(dir.path().to_path_buf())).await;

    assert!(
        matches!(terminal, Err(AppError::Parse(_))),
        "got: {terminal:?}"
    );
}

/// A non-zero exit surfaces the exit code and stderr text.
#[tokio::test]
async fn nonzero_exit_is_process_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_script(
        dir.path(),
        "echo 'model overloaded, try again later' >&2\nexit 7",
    );
    let backend = backend(&script, Duration::from_secs(5));

    let (_updates, terminal) = drive(&backend, request(dir.path().to_path_buf())).await;

    match terminal {
        Err(AppError::Process { exit_code, stderr }) => {
            assert_eq!(exit_code, Some(7));
            assert!(stderr.contains("model overloaded"));
        }
        other => panic!("expected Err(AppError::Process), got: {other:?}"),
    }
}

/// The usage-limit stderr signature becomes a distinguished error with
/// the parsed reset time.
#[tokio::test]
async fn usage_limit_signature_is_distinguished() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_script(
        dir.path(),
        "echo 'Claude AI usage limit reached|1767225600' >&2\nexit 1",
    );
    let backend = backend(&script, Duration::from_secs(5));

    let (_updates, terminal) = drive(&backend, request(dir.path().to_path_buf())).await;

    match terminal {
        Err(AppError::UsageLimit { resets_at }) => {
            let ts = resets_at.expect("reset time must be parsed");
            assert_eq!(ts.timestamp(), 1_767_225_600);
        }
        other => panic!("expected Err(AppError::UsageLimit), got: {other:?}"),
    }
}

/// The signature without a reset suffix still classifies.
#[tokio::test]
async fn usage_limit_without_reset_time_still_classifies() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_script(dir.path(), "echo 'usage limit reached' >&2\nexit 1");
    let backend = backend(&script, Duration::from_secs(5));

    let (_updates, terminal) = drive(&backend, request(dir.path().to_path_buf())).await;

    assert!(
        matches!(terminal, Err(AppError::UsageLimit { resets_at: None })),
        "got: {terminal:?}"
    );
}

/// Deadline expiry kills the child before the timeout error surfaces.
#[tokio::test]
async fn deadline_expiry_kills_the_child() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pid_file = dir.path().join("agent.pid");
    let body = format!("echo $$ > {}\nsleep 30", pid_file.display());
    let script = write_script(dir.path(), &body);
    let backend = backend(&script, Duration::from_millis(300));

    let started = Instant::now();
    let (_updates, terminal) = drive(&backend, request(dir.path().to_path_buf())).await;

    assert!(
        matches!(terminal, Err(AppError::Timeout(_))),
        "got: {terminal:?}"
    );
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "the deadline must cut the run short"
    );

    // The child must no longer be running: signal 0 probes existence.
    let pid = std::fs::read_to_string(&pid_file)
        .expect("pid file must exist")
        .trim()
        .to_owned();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let alive = std::process::Command::new("kill")
        .args(["-0", &pid])
        .status()
        .expect("kill probe")
        .success();
    assert!(!alive, "agent process {pid} must have been killed");
}

/// A script emitting output slowly still completes within the deadline.
#[tokio::test]
async fn slow_but_finite_stream_completes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let body = format!(
        "printf '%s\\n' '{}'\nsleep 0.2\nprintf '%s\\n' '{}'",
        super::test_helpers::system_message("abc123"),
        result_message("abc123"),
    );
    let script = write_script(dir.path(), &body);
    let backend = backend(&script, Duration::from_secs(5));

    let (updates, terminal) = drive(&backend, request(dir.path().to_path_buf())).await;

    assert_eq!(updates.len(), 1);
    assert_eq!(terminal.expect("must complete").session_id, "abc123");
}
