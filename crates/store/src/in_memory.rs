//! In-memory store: useful for tests and single-process deployments
//! where conversations need not survive a restart.

use async_trait::async_trait;
use concierge_core::error::PersistenceError;
use concierge_core::{ConversationSession, Message, PersistenceGateway, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct InMemoryStore {
    sessions: Arc<RwLock<HashMap<SessionId, ConversationSession>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryStore {
    async fn create_session(&self, owner: &str, title: &str) -> Result<SessionId, PersistenceError> {
        let session = ConversationSession::new(owner, title);
        let id = session.id.clone();
        self.sessions.write().await.insert(id.clone(), session);
        Ok(id)
    }

    async fn append_message_pair(
        &self,
        session_id: &SessionId,
        user: &Message,
        assistant: &Message,
    ) -> Result<(), PersistenceError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| PersistenceError::SessionNotFound(session_id.to_string()))?;
        session.append_pair(user.for_storage(), assistant.for_storage());
        Ok(())
    }

    async fn load_session(&self, session_id: &SessionId) -> Result<Option<ConversationSession>, PersistenceError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }
}
