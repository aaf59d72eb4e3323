//! Subscription manager - change-feed lifecycles bound to session scopes
//!
//! Two scopes exist: the user session (conversation-level events) and the
//! active conversation (message-level events). Each scope holds at most one
//! live subscription; selecting a new conversation tears the previous one
//! down before the new one goes up. Teardown is synchronous from the
//! caller's view and events in flight may drop silently.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use uniconsult_backend::{Backend, ChangeEvent};

use crate::conversation_store::ConversationStore;
use crate::message_store::MessageStore;

/// Lifecycle of one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Subscribing,
    Active,
}

struct Slot {
    /// Filter the live subscription was opened with (conversation id or
    /// user id), used to skip redundant re-subscribes.
    filter: String,
    handle: JoinHandle<()>,
}

impl Slot {
    fn tear_down(self) {
        self.handle.abort();
    }
}

/// Owns the change-feed subscriptions of one chat session and dispatches
/// inbound events into the stores. Callers own calling [`dispose`] exactly
/// once when the session ends; the call is idempotent.
///
/// [`dispose`]: SubscriptionManager::dispose
pub struct SubscriptionManager {
    backend: Arc<dyn Backend>,
    user_id: String,
    conversations: Arc<ConversationStore>,
    messages: Arc<MessageStore>,
    message_slot: Mutex<Option<Slot>>,
    // Observable lifecycle of the message scope. Kept separate from the
    // slot so it stays readable while `watch_conversation` holds the slot
    // lock across the subscribe request.
    message_state: Mutex<SubscriptionState>,
    feed_slot: Mutex<Option<Slot>>,
    disposed: Mutex<bool>,
}

impl SubscriptionManager {
    pub fn new(
        backend: Arc<dyn Backend>,
        user_id: &str,
        conversations: Arc<ConversationStore>,
        messages: Arc<MessageStore>,
    ) -> Self {
        Self {
            backend,
            user_id: user_id.to_string(),
            conversations,
            messages,
            message_slot: Mutex::new(None),
            message_state: Mutex::new(SubscriptionState::Idle),
            feed_slot: Mutex::new(None),
            disposed: Mutex::new(false),
        }
    }

    /// Subscribe to message events of `conversation_id`, tearing down the
    /// previous conversation's subscription first. Re-selecting the already
    /// watched conversation is a no-op.
    pub async fn watch_conversation(&self, conversation_id: &str) -> Result<()> {
        if *self.disposed.lock().await {
            warn!("subscription manager already disposed");
            return Ok(());
        }

        let mut slot = self.message_slot.lock().await;
        if let Some(existing) = slot.as_ref() {
            if existing.filter == conversation_id {
                return Ok(());
            }
        }
        if let Some(old) = slot.take() {
            debug!(conversation_id = %old.filter, "tearing down previous message subscription");
            old.tear_down();
        }

        // Events start flowing once the receiver is handed to the drain
        // task; until then the scope reports itself as subscribing.
        *self.message_state.lock().await = SubscriptionState::Subscribing;
        let rx = match self.backend.subscribe_messages(conversation_id).await {
            Ok(rx) => rx,
            Err(e) => {
                *self.message_state.lock().await = SubscriptionState::Idle;
                return Err(e.into());
            }
        };
        let messages = self.messages.clone();
        let handle = tokio::spawn(drain(rx, move |event| {
            let messages = messages.clone();
            async move { messages.apply_event(event).await }
        }));

        *slot = Some(Slot {
            filter: conversation_id.to_string(),
            handle,
        });
        *self.message_state.lock().await = SubscriptionState::Active;
        info!(conversation_id, "message subscription active");
        Ok(())
    }

    /// Subscribe to the session-scoped conversation feed. Idempotent while
    /// the session lives.
    pub async fn watch_user_feed(&self) -> Result<()> {
        if *self.disposed.lock().await {
            warn!("subscription manager already disposed");
            return Ok(());
        }

        let mut slot = self.feed_slot.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let rx = self.backend.subscribe_user_feed(&self.user_id).await?;
        let conversations = self.conversations.clone();
        let handle = tokio::spawn(drain(rx, move |event| {
            let conversations = conversations.clone();
            async move { conversations.apply_event(event).await }
        }));

        *slot = Some(Slot {
            filter: self.user_id.clone(),
            handle,
        });
        info!(user_id = %self.user_id, "user feed subscription active");
        Ok(())
    }

    /// Stop watching the active conversation without selecting a new one.
    pub async fn unwatch_conversation(&self) {
        if let Some(slot) = self.message_slot.lock().await.take() {
            debug!(conversation_id = %slot.filter, "message subscription torn down");
            slot.tear_down();
        }
        *self.message_state.lock().await = SubscriptionState::Idle;
    }

    /// State of the message-scope subscription.
    pub async fn conversation_subscription(&self) -> SubscriptionState {
        let state = *self.message_state.lock().await;
        if state != SubscriptionState::Active {
            return state;
        }
        match self.message_slot.lock().await.as_ref() {
            Some(slot) if !slot.handle.is_finished() => SubscriptionState::Active,
            // A finished drain task means the feed closed under us.
            Some(_) | None => SubscriptionState::Idle,
        }
    }

    /// Conversation id the message scope is currently bound to.
    pub async fn watched_conversation(&self) -> Option<String> {
        self.message_slot
            .lock()
            .await
            .as_ref()
            .map(|s| s.filter.clone())
    }

    /// Tear down every subscription. Idempotent; later watch calls are
    /// ignored.
    pub async fn dispose(&self) {
        let mut disposed = self.disposed.lock().await;
        if *disposed {
            return;
        }
        *disposed = true;

        if let Some(slot) = self.message_slot.lock().await.take() {
            slot.tear_down();
        }
        *self.message_state.lock().await = SubscriptionState::Idle;
        if let Some(slot) = self.feed_slot.lock().await.take() {
            slot.tear_down();
        }
        info!("subscription manager disposed");
    }
}

/// Drain a broadcast receiver into a dispatch closure until the channel
/// closes or the task is aborted. Lagged receivers skip ahead and keep
/// going.
async fn drain<F, Fut>(mut rx: broadcast::Receiver<ChangeEvent>, dispatch: F)
where
    F: Fn(ChangeEvent) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    loop {
        match rx.recv().await {
            Ok(event) => dispatch(event).await,
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "change feed lagged, events dropped");
            }
            Err(RecvError::Closed) => {
                debug!("change feed closed");
                break;
            }
        }
    }
}
