//! Unit tests for error display and kind tags.

use chrono::TimeZone;

use agent_relay::AppError;

/// Every variant renders a stable, prefixed message.
#[test]
fn display_messages_carry_domain_prefix() {
    assert_eq!(
        AppError::Config("bad field".to_owned()).to_string(),
        "config: bad field"
    );
    assert_eq!(
        AppError::Timeout("600s elapsed".to_owned()).to_string(),
        "timeout: 600s elapsed"
    );
    assert_eq!(
        AppError::PathViolation("escape".to_owned()).to_string(),
        "path violation: escape"
    );
}

/// Process errors distinguish exit codes from signal deaths.
#[test]
fn process_error_distinguishes_signal_death() {
    let with_code = AppError::Process {
        exit_code: Some(2),
        stderr: "boom".to_owned(),
    };
    assert_eq!(with_code.to_string(), "process exited with code 2: boom");

    let signalled = AppError::Process {
        exit_code: None,
        stderr: "killed".to_owned(),
    };
    assert!(signalled.to_string().contains("terminated by signal"));
}

/// The usage-limit message includes the reset time when parsed.
#[test]
fn usage_limit_mentions_reset_time() {
    let ts = chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single();
    let err = AppError::UsageLimit { resets_at: ts };

    assert!(err.to_string().contains("resets at 2026-03-01"));
    assert_eq!(
        AppError::UsageLimit { resets_at: None }.to_string(),
        "usage limit reached"
    );
}

/// The tool-policy message names both the blocked and allowed sets.
#[test]
fn tool_policy_lists_blocked_and_allowed() {
    let err = AppError::ToolPolicy {
        blocked: vec!["Write".to_owned(), "Bash".to_owned()],
        allowed: vec!["Read".to_owned()],
    };

    let rendered = err.to_string();
    assert!(rendered.contains("Write"));
    assert!(rendered.contains("Bash"));
    assert!(rendered.contains("Read"));
}

/// Kind tags are stable identifiers for response flagging.
#[test]
fn kind_tags_are_stable() {
    assert_eq!(AppError::Timeout(String::new()).kind(), "timeout");
    assert_eq!(
        AppError::UsageLimit { resets_at: None }.kind(),
        "usage_limit"
    );
    assert_eq!(
        AppError::ToolPolicy {
            blocked: vec![],
            allowed: vec![]
        }
        .kind(),
        "tool_policy"
    );
    assert_eq!(AppError::Sdk(String::new()).kind(), "sdk");
}
