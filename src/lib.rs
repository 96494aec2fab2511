#![forbid(unsafe_code)]

//! Execution and session engine for a headless coding agent.
//!
//! Fronts an external coding agent — reachable as a CLI child process
//! emitting newline-delimited JSON, or through an in-process SDK client —
//! and exposes it as a single [`ExecutionEngine::run`] operation with
//! live progress callbacks, streaming tool-policy enforcement, automatic
//! SDK→subprocess fallback, and provisional-session promotion.

pub mod backend;
pub mod config;
pub mod engine;
pub mod errors;
pub mod policy;
pub mod protocol;
pub mod session;

pub use config::GlobalConfig;
pub use engine::ExecutionEngine;
pub use errors::{AppError, Result};
pub use protocol::types::{Response, StreamUpdate};
