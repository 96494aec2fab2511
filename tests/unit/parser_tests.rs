//! Unit tests for the wire-protocol parser.

use agent_relay::protocol::parser::{parse_line, StreamItem};
use agent_relay::protocol::types::UpdateKind;
use agent_relay::AppError;

fn expect_update(line: &str) -> agent_relay::StreamUpdate {
    match parse_line(line).expect("line must parse") {
        Some(StreamItem::Update(update)) => update,
        other => panic!("expected Some(StreamItem::Update), got: {other:?}"),
    }
}

/// An assistant message concatenates text blocks and collects tool uses.
#[test]
fn assistant_message_extracts_text_and_tool_calls() {
    let line = r#"{"type":"assistant","session_id":"s1","message":{"content":[
        {"type":"text","text":"Let me "},
        {"type":"text","text":"check."},
        {"type":"tool_use","id":"tu1","name":"Read","input":{"file_path":"src/lib.rs"}}
    ]}}"#
        .replace('\n', "");

    let update = expect_update(&line);

    assert_eq!(update.session_id.as_deref(), Some("s1"));
    match update.kind {
        UpdateKind::Assistant { text, tool_calls } => {
            assert_eq!(text, "Let me check.");
            assert_eq!(tool_calls.len(), 1);
            assert_eq!(tool_calls[0].name, "Read");
            assert_eq!(tool_calls[0].id, "tu1");
            assert_eq!(
                tool_calls[0].input.get("file_path").and_then(|v| v.as_str()),
                Some("src/lib.rs")
            );
        }
        other => panic!("expected Assistant, got: {other:?}"),
    }
}

/// Unknown content block types inside an assistant message are skipped.
#[test]
fn assistant_message_skips_unknown_blocks() {
    let line = r#"{"type":"assistant","message":{"content":[
        {"type":"thinking","thinking":"..."},
        {"type":"text","text":"done"}
    ]}}"#
        .replace('\n', "");

    let update = expect_update(&line);
    match update.kind {
        UpdateKind::Assistant { text, tool_calls } => {
            assert_eq!(text, "done");
            assert!(tool_calls.is_empty());
        }
        other => panic!("expected Assistant, got: {other:?}"),
    }
}

/// The terminal result maps to `StreamItem::Terminal`.
#[test]
fn result_message_maps_to_terminal() {
    let line = r#"{"type":"result","subtype":"success","session_id":"abc123","cost_usd":0.0042,"duration_ms":1200,"num_turns":2,"is_error":false}"#;

    match parse_line(line).expect("must parse") {
        Some(StreamItem::Terminal(result)) => {
            assert_eq!(result.session_id, "abc123");
            assert!((result.cost_usd - 0.0042).abs() < f64::EPSILON);
            assert_eq!(result.duration_ms, 1200);
            assert_eq!(result.num_turns, 2);
            assert!(!result.is_error);
            assert_eq!(result.subtype.as_deref(), Some("success"));
        }
        other => panic!("expected Terminal, got: {other:?}"),
    }
}

/// Newer agents report `total_cost_usd`; the alias must be accepted.
#[test]
fn result_message_accepts_total_cost_alias() {
    let line = r#"{"type":"result","session_id":"abc123","total_cost_usd":1.5,"duration_ms":10,"num_turns":1}"#;

    match parse_line(line).expect("must parse") {
        Some(StreamItem::Terminal(result)) => {
            assert!((result.cost_usd - 1.5).abs() < f64::EPSILON);
        }
        other => panic!("expected Terminal, got: {other:?}"),
    }
}

/// Tool results flatten block-list content to plain text.
#[test]
fn tool_result_flattens_block_content() {
    let line = r#"{"type":"tool_result","tool_use_id":"tu1","content":[{"type":"text","text":"12 files"}],"is_error":false,"duration_ms":55}"#;

    let update = expect_update(line);
    match update.kind {
        UpdateKind::ToolResult {
            tool_use_id,
            content,
            is_error,
            duration_ms,
        } => {
            assert_eq!(tool_use_id, "tu1");
            assert_eq!(content, "12 files");
            assert!(!is_error);
            assert_eq!(duration_ms, Some(55));
        }
        other => panic!("expected ToolResult, got: {other:?}"),
    }
}

/// System init metadata is carried through.
#[test]
fn system_message_carries_metadata() {
    let line = r#"{"type":"system","subtype":"init","tools":["Bash","Read"],"model":"agent-1","cwd":"/work"}"#;

    let update = expect_update(line);
    match update.kind {
        UpdateKind::System {
            subtype,
            tools,
            model,
            cwd,
        } => {
            assert_eq!(subtype, "init");
            assert_eq!(tools, vec!["Bash".to_owned(), "Read".to_owned()]);
            assert_eq!(model.as_deref(), Some("agent-1"));
            assert_eq!(cwd.as_deref(), Some("/work"));
        }
        other => panic!("expected System, got: {other:?}"),
    }
}

/// Malformed JSON returns a parse error the caller can skip.
#[test]
fn malformed_json_returns_parse_error() {
    match parse_line("not-json{{{") {
        Err(AppError::Parse(msg)) => assert!(
            msg.contains("malformed json"),
            "error must mention 'malformed json', got: {msg}"
        ),
        other => panic!("expected Err(AppError::Parse), got: {other:?}"),
    }
}

/// A missing `type` discriminator is a parse error.
#[test]
fn missing_type_discriminator_is_parse_error() {
    let result = parse_line(r#"{"message":"no type here"}"#);
    assert!(
        matches!(result, Err(AppError::Parse(_))),
        "missing discriminator must be a parse error, got: {result:?}"
    );
}

/// Unknown wire types are skipped, never fatal — forward compatibility.
#[test]
fn unknown_type_is_skipped() {
    let result = parse_line(r#"{"type":"telemetry","payload":{}}"#);
    assert!(
        matches!(result, Ok(None)),
        "unknown type must be skipped, got: {result:?}"
    );
}

/// Empty and whitespace-only lines are skipped.
#[test]
fn blank_lines_are_skipped() {
    assert!(matches!(parse_line(""), Ok(None)));
    assert!(matches!(parse_line("   "), Ok(None)));
}

/// A recognized type missing a required field is a parse error.
#[test]
fn known_type_with_missing_field_is_parse_error() {
    // tool_result requires tool_use_id.
    let result = parse_line(r#"{"type":"tool_result","content":"ok"}"#);
    assert!(
        matches!(result, Err(AppError::Parse(_))),
        "missing required field must be a parse error, got: {result:?}"
    );
}
