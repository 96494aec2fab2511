//! Unit tests for the fallback signature matcher.

use agent_relay::engine::fallback::{classify, FallbackSignature};
use agent_relay::AppError;

/// Decode-failure markers classify as a malformed SDK stream.
#[test]
fn malformed_stream_markers_match() {
    for message in [
        "malformed sdk stream: ended without a terminal result",
        "decode error near offset 12",
        "error decoding response body",
        "unexpected message format from client",
        "Malformed JSON in frame 3",
    ] {
        assert_eq!(
            classify(&AppError::Sdk(message.to_owned())),
            Some(FallbackSignature::MalformedSdkStream),
            "message must match: {message}"
        );
    }
}

/// Structured-concurrency collapse markers classify as a group failure.
#[test]
fn group_failure_markers_match() {
    for message in [
        "unhandled errors in a TaskGroup",
        "worker panicked while streaming",
        "join error: task cancelled",
        "exception group: 2 sub-exceptions",
    ] {
        assert_eq!(
            classify(&AppError::Sdk(message.to_owned())),
            Some(FallbackSignature::RuntimeGroupFailure),
            "message must match: {message}"
        );
    }
}

/// Unrecognized SDK errors never trigger fallback.
#[test]
fn unrecognized_sdk_error_does_not_match() {
    assert_eq!(classify(&AppError::Sdk("authentication failed".to_owned())), None);
    assert_eq!(classify(&AppError::Sdk("rate limited".to_owned())), None);
}

/// Non-SDK error kinds are never classified, whatever their message.
#[test]
fn non_sdk_errors_never_match() {
    assert_eq!(
        classify(&AppError::Timeout("decode error".to_owned())),
        None
    );
    assert_eq!(
        classify(&AppError::Process {
            exit_code: Some(1),
            stderr: "task group".to_owned()
        }),
        None
    );
    assert_eq!(
        classify(&AppError::ToolPolicy {
            blocked: vec!["Write".to_owned()],
            allowed: vec!["*".to_owned()]
        }),
        None
    );
}
