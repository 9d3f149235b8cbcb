use std::sync::Arc;

use crate::coalesce::Coalescer;
use crate::crypto::digest::meeting_key;
use crate::error::{AppError, Result};
use crate::models::session::Session;
use crate::store::session::SessionStore;

/// Session operations exposed at the RPC boundary.
pub struct SessionService {
    store: Arc<SessionStore>,
    lookups: Coalescer<Session>,
}

impl SessionService {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self {
            store,
            lookups: Coalescer::new(),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Looks up a session, sharing concurrent lookups for the same key.
    pub async fn get(&self, meeting_key: &str) -> Result<Session> {
        let key = meeting_key.trim();
        let store = Arc::clone(&self.store);
        let owned = key.to_string();
        let (result, _) = self
            .lookups
            .run(key, move || async move { store.get(&owned).await })
            .await;
        result
    }

    pub async fn delete(&self, meeting_key: &str) -> Result<()> {
        self.store.delete(meeting_key.trim()).await
    }

    /// Promotes a provisional session once the editor reports the document open.
    pub async fn refresh(&self, meeting_key: &str) -> Result<Session> {
        self.store.confirm(meeting_key.trim()).await
    }

    pub async fn owner(&self, meeting_key: &str) -> Result<String> {
        Ok(self.get(meeting_key).await?.owner)
    }

    /// Removes the session of `raw_meeting_id` if `user_id` owns it.
    ///
    /// Returns whether a session was removed. A missing session, or one owned
    /// by someone else, is left alone.
    pub async fn owner_remove(&self, user_id: &str, raw_meeting_id: &str) -> Result<bool> {
        if raw_meeting_id.trim().is_empty() {
            return Ok(false);
        }

        let key = meeting_key(raw_meeting_id);
        let session = match self.store.get(&key).await {
            Ok(session) => session,
            Err(AppError::NotFound) => return Ok(false),
            Err(e) => return Err(e),
        };

        if session.owner != user_id {
            tracing::debug!("User {} does not own session {}", user_id, key);
            return Ok(false);
        }

        match self.store.delete(&key).await {
            Ok(()) => Ok(true),
            Err(AppError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::feed::MemoryFeed;
    use crate::store::kv::MemoryKv;
    use crate::store::lock::MemoryLock;
    use crate::store::session::StoreOptions;

    async fn service() -> SessionService {
        let store = SessionStore::new(
            Arc::new(MemoryKv::new()),
            Arc::new(MemoryFeed::new()),
            Arc::new(MemoryLock::new()),
            StoreOptions::default(),
        );
        store.start().await.unwrap();
        store.wait_hydrated().await;
        SessionService::new(store)
    }

    fn session(owner: &str) -> Session {
        Session::provisional(owner, "report.docx", "https://files.example.com/report.docx")
    }

    #[tokio::test]
    async fn owner_remove_deletes_only_for_the_owner() {
        let service = service().await;
        let key = meeting_key("85412345678");
        service.store().create(&key, session("alice")).await.unwrap();

        assert!(!service.owner_remove("bob", "85412345678").await.unwrap());
        assert_eq!(service.owner(&key).await.unwrap(), "alice");

        assert!(service.owner_remove("alice", "85412345678").await.unwrap());
        assert!(matches!(service.get(&key).await, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn owner_remove_without_session_is_a_no_op() {
        let service = service().await;
        assert!(!service.owner_remove("alice", "missing").await.unwrap());
        assert!(!service.owner_remove("alice", "  ").await.unwrap());
    }

    #[tokio::test]
    async fn refresh_promotes_and_keeps_the_document_key() {
        let service = service().await;
        let key = meeting_key("m1");
        let created = service.store().create(&key, session("alice")).await.unwrap();

        let confirmed = service.refresh(&key).await.unwrap();
        assert_eq!(confirmed.doc_key, created.doc_key);
        assert_eq!(confirmed.kind, crate::models::session::SessionKind::Confirmed);
    }
}
