//! Conversation persistence contract.

use async_trait::async_trait;

use crate::error::PersistenceError;
use crate::message::{ConversationSession, Message, SessionId};

/// Where completed exchanges are stored.
///
/// The engine treats every call here as best-effort: failures are
/// logged by the caller and never reach the client.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Create an empty session owned by `owner` and return its id.
    async fn create_session(&self, owner: &str, title: &str) -> std::result::Result<SessionId, PersistenceError>;

    /// Append one user/assistant pair and touch the session timestamp atomically.
    async fn append_message_pair(
        &self,
        session_id: &SessionId,
        user: &Message,
        assistant: &Message,
    ) -> std::result::Result<(), PersistenceError>;

    async fn load_session(
        &self,
        session_id: &SessionId,
    ) -> std::result::Result<Option<ConversationSession>, PersistenceError>;
}
