//! Session entity and lifecycle helpers.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::types::Response;

/// Prefix of locally generated placeholder session identifiers.
///
/// The agent assigns the real identifier with its first terminal result;
/// until then the session is keyed under `relay-<uuid>`.
pub const PLACEHOLDER_PREFIX: &str = "relay-";

/// A logical continuation context for the agent.
///
/// Exclusively owned by the [`SessionManager`](crate::session::SessionManager);
/// callers only ever hold clones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Session identifier — placeholder until the agent assigns one.
    pub id: String,
    /// Owner identifier from the calling layer.
    pub owner_id: i64,
    /// Working directory the session is bound to.
    pub working_directory: PathBuf,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last completed-execution timestamp.
    pub last_used_at: DateTime<Utc>,
    /// Accumulated cost across executions, USD.
    pub total_cost_usd: f64,
    /// Accumulated agent turns across executions.
    pub total_turns: u32,
    /// Number of completed executions.
    pub message_count: u32,
    /// Every tool name the agent has used in this session.
    pub tools_used: BTreeSet<String>,
    /// True until the agent assigns the real identifier.
    pub is_provisional: bool,
}

impl Session {
    /// Construct a provisional session with a generated placeholder id.
    #[must_use]
    pub fn new_provisional(owner_id: i64, working_directory: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id: format!("{PLACEHOLDER_PREFIX}{}", Uuid::new_v4()),
            owner_id,
            working_directory,
            created_at: now,
            last_used_at: now,
            total_cost_usd: 0.0,
            total_turns: 0,
            message_count: 0,
            tools_used: BTreeSet::new(),
            is_provisional: true,
        }
    }

    /// Whether the session has been idle past `timeout`.
    #[must_use]
    pub fn is_expired(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        let idle = now.signed_duration_since(self.last_used_at);
        idle.to_std().map_or(false, |d| d > timeout)
    }

    /// Promote the session to the agent-assigned identifier.
    ///
    /// Once promoted the id never changes again; promoting a
    /// non-provisional session is a no-op.
    pub fn promote(&mut self, real_id: &str) {
        if self.is_provisional && !real_id.is_empty() {
            self.id = real_id.to_owned();
            self.is_provisional = false;
        }
    }

    /// Fold one completed execution into the session counters.
    ///
    /// Cost, turns, and message count increase monotonically;
    /// `tools_used` only grows.
    pub fn apply_usage(&mut self, response: &Response) {
        self.total_cost_usd += response.cost_usd;
        self.total_turns += response.num_turns;
        self.message_count += 1;
        for tool in &response.tools_used {
            self.tools_used.insert(tool.name.clone());
        }
        self.last_used_at = Utc::now();
    }
}

/// Read-only session summary handed to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SessionInfo {
    /// Session identifier.
    pub id: String,
    /// Owner identifier.
    pub owner_id: i64,
    /// Working directory.
    pub working_directory: PathBuf,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last completed-execution timestamp.
    pub last_used_at: DateTime<Utc>,
    /// Accumulated cost, USD.
    pub total_cost_usd: f64,
    /// Accumulated agent turns.
    pub total_turns: u32,
    /// Completed executions.
    pub message_count: u32,
    /// Tools the agent has used.
    pub tools_used: Vec<String>,
    /// True until the agent assigns the real identifier.
    pub is_provisional: bool,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            owner_id: session.owner_id,
            working_directory: session.working_directory.clone(),
            created_at: session.created_at,
            last_used_at: session.last_used_at,
            total_cost_usd: session.total_cost_usd,
            total_turns: session.total_turns,
            message_count: session.message_count,
            tools_used: session.tools_used.iter().cloned().collect(),
            is_provisional: session.is_provisional,
        }
    }
}
