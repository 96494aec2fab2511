//! Session manager: resolution, promotion, expiry, and eviction.
//!
//! Owns the in-memory table of live sessions. All access goes through one
//! async `RwLock`; the placeholder→real-id re-key happens under a single
//! write guard so no reader can observe both keys at once.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::protocol::types::Response;
use crate::session::model::{Session, SessionInfo};
use crate::session::store::SessionStore;
use crate::{AppError, Result};

/// Owns the session entity lifecycle for the engine.
pub struct SessionManager {
    config: SessionConfig,
    store: Arc<dyn SessionStore>,
    table: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
    /// Create a manager over the given store.
    #[must_use]
    pub fn new(config: SessionConfig, store: Arc<dyn SessionStore>) -> Self {
        Self {
            config,
            store,
            table: RwLock::new(HashMap::new()),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.session_timeout_seconds)
    }

    /// Resolve the session one execution should run under.
    ///
    /// Order: live non-expired session by id → store load → most recent
    /// live session for `(owner_id, working_directory)` → fresh
    /// provisional session. Creating a session past the per-owner limit
    /// evicts the least recently used one from the live table (its store
    /// record survives for later resume).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the id belongs to a different owner,
    /// or `AppError::Store` on persistence failure.
    pub async fn resolve(
        &self,
        owner_id: i64,
        working_directory: &Path,
        session_id: Option<&str>,
    ) -> Result<Session> {
        let mut table = self.table.write().await;
        let now = Utc::now();

        if let Some(id) = session_id {
            if let Some(session) = table.get(id) {
                if session.owner_id != owner_id {
                    return Err(AppError::Session(format!(
                        "session `{id}` belongs to a different owner"
                    )));
                }
                if !session.is_expired(self.timeout(), now) {
                    debug!(session_id = id, "resolved live session");
                    return Ok(session.clone());
                }
                info!(session_id = id, "session expired, discarding");
                table.remove(id);
                self.store.delete(id).await?;
            } else if let Some(session) = self.store.load(id).await? {
                if session.owner_id != owner_id {
                    return Err(AppError::Session(format!(
                        "session `{id}` belongs to a different owner"
                    )));
                }
                if !session.is_expired(self.timeout(), now) {
                    debug!(session_id = id, "resolved session from store");
                    table.insert(session.id.clone(), session.clone());
                    return Ok(session);
                }
                info!(session_id = id, "stored session expired, discarding");
                self.store.delete(id).await?;
            }
        } else if let Some(session) = most_recent_live(&table, owner_id, working_directory)
            .filter(|s| !s.is_expired(self.timeout(), now))
        {
            debug!(session_id = %session.id, "resolved most recent session for directory");
            return Ok(session);
        }

        self.create_locked(&mut table, owner_id, working_directory)
            .await
    }

    /// The most recent live, non-expired session for an owner/directory
    /// pair, if any. Used for "continue most recent" requests.
    pub async fn most_recent(&self, owner_id: i64, working_directory: &Path) -> Option<Session> {
        let table = self.table.read().await;
        most_recent_live(&table, owner_id, working_directory)
            .filter(|s| !s.is_expired(self.timeout(), Utc::now()))
    }

    /// Reconcile a session with the response of a completed execution.
    ///
    /// A provisional session whose response carries a real id is renamed
    /// first — store re-key, in-memory re-key, `is_provisional` flip — and
    /// only then is usage accounting applied.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if `session_id` is not live, or
    /// `AppError::Store` on persistence failure.
    pub async fn reconcile(&self, session_id: &str, response: &Response) -> Result<Session> {
        let mut table = self.table.write().await;

        let Some(mut session) = table.remove(session_id) else {
            return Err(AppError::Session(format!(
                "cannot reconcile unknown session `{session_id}`"
            )));
        };

        let real_id = response.session_id.as_str();
        if session.is_provisional && !real_id.is_empty() && real_id != session.id {
            if let Err(err) = self.store.rename_id(&session.id, real_id).await {
                // The save below recreates the record under the real id;
                // only the stale placeholder entry needs cleanup.
                warn!(%err, placeholder = %session.id, "store rename failed, deleting placeholder");
                self.store.delete(&session.id).await?;
            }
            info!(placeholder = %session.id, real_id, "session promoted to agent id");
            session.promote(real_id);
        }

        session.apply_usage(response);
        table.insert(session.id.clone(), session.clone());
        self.store.save(&session).await?;

        Ok(session)
    }

    /// Read-only view of a session, live table first, then the store.
    pub async fn get_info(&self, session_id: &str) -> Option<SessionInfo> {
        if let Some(session) = self.table.read().await.get(session_id) {
            return Some(SessionInfo::from(session));
        }
        match self.store.load(session_id).await {
            Ok(found) => found.as_ref().map(SessionInfo::from),
            Err(err) => {
                warn!(%err, session_id, "store load failed during info lookup");
                None
            }
        }
    }

    /// Sweep expired sessions out of the live table and the store.
    ///
    /// Returns the number of sessions removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if a delete fails; earlier removals stay
    /// applied.
    pub async fn expire(&self) -> Result<usize> {
        let mut table = self.table.write().await;
        let now = Utc::now();
        let timeout = self.timeout();

        let expired: Vec<String> = table
            .values()
            .filter(|s| s.is_expired(timeout, now))
            .map(|s| s.id.clone())
            .collect();

        for id in &expired {
            table.remove(id);
            self.store.delete(id).await?;
            info!(session_id = %id, "session expired");
        }

        Ok(expired.len())
    }

    /// Persist every live session. Called once at engine shutdown.
    ///
    /// # Errors
    ///
    /// Returns the first `AppError::Store` failure encountered.
    pub async fn shutdown(&self) -> Result<()> {
        let table = self.table.read().await;
        for session in table.values() {
            self.store.save(session).await?;
        }
        info!(live_sessions = table.len(), "session manager shut down");
        Ok(())
    }

    /// Create a provisional session, evicting the owner's LRU session if
    /// the live limit is reached. Caller holds the write guard.
    async fn create_locked(
        &self,
        table: &mut HashMap<String, Session>,
        owner_id: i64,
        working_directory: &Path,
    ) -> Result<Session> {
        let owned: Vec<&Session> = table.values().filter(|s| s.owner_id == owner_id).collect();
        if owned.len() >= self.config.max_sessions_per_owner {
            if let Some(lru) = owned
                .iter()
                .min_by_key(|s| s.last_used_at)
                .map(|s| s.id.clone())
            {
                if let Some(evicted) = table.remove(&lru) {
                    self.store.save(&evicted).await?;
                    info!(session_id = %lru, owner_id, "evicted least recently used session");
                }
            }
        }

        let session = Session::new_provisional(owner_id, working_directory.to_path_buf());
        table.insert(session.id.clone(), session.clone());
        self.store.save(&session).await?;
        info!(session_id = %session.id, owner_id, "created provisional session");

        Ok(session)
    }
}

/// The owner's most recently used live session bound to `working_directory`.
fn most_recent_live(
    table: &HashMap<String, Session>,
    owner_id: i64,
    working_directory: &Path,
) -> Option<Session> {
    table
        .values()
        .filter(|s| s.owner_id == owner_id && s.working_directory == working_directory)
        .max_by_key(|s| s.last_used_at)
        .cloned()
}
