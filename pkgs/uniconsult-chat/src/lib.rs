//! UniConsult chat - conversation and message stores
//!
//! The messaging core of the consulting platform, organized into a few
//! specialized pieces:
//!
//! - **ConversationStore**: the deduplicated list of conversations visible
//!   to the current user, with derived display names and last-message
//!   previews
//! - **MessageStore**: the ordered message list of one active conversation,
//!   optimistic send with echo reconciliation, and client-side search
//! - **SubscriptionManager**: change-feed subscriptions bound to the user
//!   session and the active conversation, with an explicit dispose contract
//! - **ProfileDirectory**: batched display-name resolution with a small
//!   cache, plus the student picker
//!
//! All store state lives behind `tokio::sync::Mutex` inside `Arc`-shared
//! stores, so a subscription task and a direct method call serialize on the
//! same lock. Deduplication and reconciliation are keyed by identifier, not
//! arrival order, which keeps that interleaving deterministic.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use uniconsult_backend::MemoryBackend;
//! use uniconsult_chat::{ChatConfig, ChatSession};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let backend = Arc::new(MemoryBackend::new());
//! let session = ChatSession::new(backend, "teacher-1", ChatConfig::default());
//!
//! session.subscriptions().watch_user_feed().await?;
//! let conversations = session.conversations().load_conversations().await;
//!
//! if let Some(first) = conversations.first() {
//!     session.messages().load_messages(&first.id).await;
//!     session.subscriptions().watch_conversation(&first.id).await?;
//!     session.messages().send_message("Hello!").await?;
//! }
//!
//! session.subscriptions().dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod conversation_store;
pub mod message_store;
pub mod profiles;
pub mod subscription;

pub use conversation_store::{ConversationName, ConversationStore, ConversationView, LastMessage};
pub use message_store::{MessageStore, MessageView, SendOutcome};
pub use profiles::ProfileDirectory;
pub use subscription::{SubscriptionManager, SubscriptionState};

use std::sync::Arc;

use uniconsult_backend::Backend;

/// Configuration for the chat stores
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Maximum characters kept in a conversation's last-message preview
    pub preview_length: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self { preview_length: 80 }
    }
}

/// One authenticated user's chat session: the stores plus the subscription
/// manager wired to them. Callers own calling
/// [`SubscriptionManager::dispose`] when the session ends.
pub struct ChatSession {
    conversations: Arc<ConversationStore>,
    messages: Arc<MessageStore>,
    subscriptions: SubscriptionManager,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn Backend>, user_id: &str, config: ChatConfig) -> Self {
        let directory = Arc::new(ProfileDirectory::new(backend.clone()));
        let conversations = Arc::new(ConversationStore::new(
            backend.clone(),
            user_id,
            directory.clone(),
            config.clone(),
        ));
        let messages = Arc::new(MessageStore::new(backend.clone(), user_id, directory));
        let subscriptions = SubscriptionManager::new(
            backend,
            user_id,
            conversations.clone(),
            messages.clone(),
        );
        Self {
            conversations,
            messages,
            subscriptions,
        }
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    pub fn messages(&self) -> &Arc<MessageStore> {
        &self.messages
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }
}
