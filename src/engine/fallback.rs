//! Fallback signature matcher.
//!
//! The facade retries a failed SDK execution on the subprocess backend
//! only for a narrow, enumerated class of transient faults. The trigger
//! is a closed enum with a fixed marker list per arm — auditable and
//! unit-tested — rather than ad hoc substring checks scattered through
//! the call sites. Only [`AppError::Sdk`] values are ever classified;
//! every other error kind propagates without fallback.

use crate::AppError;

/// Recognized SDK fault categories that justify a subprocess retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackSignature {
    /// The client produced output the engine could not decode — a
    /// truncated stream, malformed message objects, or framing garbage.
    MalformedSdkStream,
    /// The client's internal task group collapsed (a worker panicked or
    /// an unrelated sibling task failed), taking the query down with it.
    RuntimeGroupFailure,
}

/// Markers for [`FallbackSignature::MalformedSdkStream`].
const MALFORMED_STREAM_MARKERS: &[&str] = &[
    "malformed sdk stream",
    "malformed json",
    "decode error",
    "error decoding response",
    "unexpected message format",
];

/// Markers for [`FallbackSignature::RuntimeGroupFailure`].
const GROUP_FAILURE_MARKERS: &[&str] = &[
    "task group",
    "taskgroup",
    "exception group",
    "join error",
    "panicked",
];

/// Classify an SDK error against the recognized fault categories.
///
/// Returns `None` for every non-SDK error kind and for SDK errors whose
/// message matches no marker — in both cases the caller must propagate
/// the error instead of falling back.
#[must_use]
pub fn classify(error: &AppError) -> Option<FallbackSignature> {
    let AppError::Sdk(message) = error else {
        return None;
    };
    let message = message.to_lowercase();

    if MALFORMED_STREAM_MARKERS.iter().any(|m| message.contains(m)) {
        return Some(FallbackSignature::MalformedSdkStream);
    }
    if GROUP_FAILURE_MARKERS.iter().any(|m| message.contains(m)) {
        return Some(FallbackSignature::RuntimeGroupFailure);
    }

    None
}
