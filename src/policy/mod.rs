//! Streaming tool-call policy enforcement.
//!
//! Covers tool allow/deny matching, working-directory path containment for
//! file-mutation tools, and command screening for shell tools.

pub mod path_safety;
pub mod validator;

pub use validator::{ToolValidator, Verdict, Violation};
