//! The `Backend` trait - the surface the stores program against

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::types::{ChangeEvent, ConversationRow, MessageRow, ParticipantRow, Profile};

/// Client-side view of the hosted relational backend: filtered table queries
/// plus change-feed subscriptions keyed by table and filter.
///
/// Object-safe so stores can share it as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Ids of every conversation the user participates in.
    async fn participant_conversation_ids(&self, user_id: &str) -> Result<Vec<String>>;

    /// Full conversation rows for the given ids, newest `updated_at` first.
    async fn conversations_by_ids(&self, ids: &[String]) -> Result<Vec<ConversationRow>>;

    async fn participants_of(&self, conversation_id: &str) -> Result<Vec<ParticipantRow>>;

    async fn insert_conversation(&self, row: ConversationRow) -> Result<()>;

    async fn touch_conversation(&self, id: &str, updated_at: DateTime<Utc>) -> Result<()>;

    async fn delete_conversation(&self, id: &str) -> Result<()>;

    async fn insert_participant(&self, row: ParticipantRow) -> Result<()>;

    async fn remove_participant(&self, conversation_id: &str, user_id: &str) -> Result<()>;

    /// All messages of a conversation, ascending by creation time.
    async fn messages_of(&self, conversation_id: &str) -> Result<Vec<MessageRow>>;

    /// Most recent message of a conversation, for list previews.
    async fn latest_message(&self, conversation_id: &str) -> Result<Option<MessageRow>>;

    /// Insert a message and return the authoritative copy. The write is
    /// echoed on the conversation's message feed and every participant's
    /// user feed, the sender included.
    async fn insert_message(&self, row: MessageRow) -> Result<MessageRow>;

    /// Bulk delete of a conversation's messages. Returns rows removed.
    async fn delete_messages(&self, conversation_id: &str) -> Result<u64>;

    /// Batched profile lookup.
    async fn profiles_by_ids(&self, ids: &[String]) -> Result<Vec<Profile>>;

    /// Approved students of a teacher, for the new-conversation picker.
    async fn approved_students_of(&self, teacher_id: &str) -> Result<Vec<Profile>>;

    /// Change feed for one conversation's messages.
    async fn subscribe_messages(
        &self,
        conversation_id: &str,
    ) -> Result<broadcast::Receiver<ChangeEvent>>;

    /// Conversation-level change feed for everything a user participates in.
    async fn subscribe_user_feed(&self, user_id: &str) -> Result<broadcast::Receiver<ChangeEvent>>;
}
