//! Session storage collaborator interface.
//!
//! The engine persists session records through this trait; the concrete
//! backing store (database, file, remote service) belongs to the embedding
//! application. [`MemorySessionStore`] ships in-crate as the default and
//! as the test double.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::session::model::Session;
use crate::{AppError, Result};

/// Boxed future returned by [`SessionStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Persistence interface for session records, keyed by session id.
///
/// `rename_id` supports placeholder→real id promotion; implementations
/// without a native rename may delete-then-recreate, as long as the pair
/// is applied under the store's own lock.
pub trait SessionStore: Send + Sync {
    /// Insert or overwrite a session record.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] on persistence failure.
    fn save(&self, session: &Session) -> StoreFuture<'_, ()>;

    /// Load a session record by id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] on persistence failure; a missing
    /// record is `Ok(None)`, not an error.
    fn load(&self, id: &str) -> StoreFuture<'_, Option<Session>>;

    /// Delete a session record. Deleting a missing record is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] on persistence failure.
    fn delete(&self, id: &str) -> StoreFuture<'_, ()>;

    /// Re-key a record from `old_id` to `new_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] if `old_id` does not exist or the
    /// rename cannot be applied.
    fn rename_id(&self, old_id: &str, new_id: &str) -> StoreFuture<'_, ()>;

    /// All session records belonging to `owner_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] on persistence failure.
    fn list_by_owner(&self, owner_id: i64) -> StoreFuture<'_, Vec<Session>>;
}

/// In-memory [`SessionStore`] backed by a locked map.
#[derive(Debug, Default, Clone)]
pub struct MemorySessionStore {
    records: Arc<RwLock<HashMap<String, Session>>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records. Test convenience.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records. Test convenience.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, session: &Session) -> StoreFuture<'_, ()> {
        let session = session.clone();
        Box::pin(async move {
            self.records
                .write()
                .await
                .insert(session.id.clone(), session);
            Ok(())
        })
    }

    fn load(&self, id: &str) -> StoreFuture<'_, Option<Session>> {
        let id = id.to_owned();
        Box::pin(async move { Ok(self.records.read().await.get(&id).cloned()) })
    }

    fn delete(&self, id: &str) -> StoreFuture<'_, ()> {
        let id = id.to_owned();
        Box::pin(async move {
            self.records.write().await.remove(&id);
            Ok(())
        })
    }

    fn rename_id(&self, old_id: &str, new_id: &str) -> StoreFuture<'_, ()> {
        let old_id = old_id.to_owned();
        let new_id = new_id.to_owned();
        Box::pin(async move {
            // Single write guard: no reader can observe both ids at once.
            let mut records = self.records.write().await;
            let Some(mut session) = records.remove(&old_id) else {
                return Err(AppError::Store(format!(
                    "rename source `{old_id}` not found"
                )));
            };
            session.id.clone_from(&new_id);
            records.insert(new_id, session);
            Ok(())
        })
    }

    fn list_by_owner(&self, owner_id: i64) -> StoreFuture<'_, Vec<Session>> {
        Box::pin(async move {
            Ok(self
                .records
                .read()
                .await
                .values()
                .filter(|s| s.owner_id == owner_id)
                .cloned()
                .collect())
        })
    }
}
