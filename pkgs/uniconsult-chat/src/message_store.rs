//! Message store - the ordered message list of one active conversation

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use uniconsult_backend::{Backend, ChangeEvent, MessageRow};

use crate::profiles::ProfileDirectory;

/// One visible message, annotated for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub announcement: bool,
    pub created_at: DateTime<Utc>,
    /// Sent by the current viewer
    pub own: bool,
    /// Optimistic entry awaiting its authoritative copy
    pub pending: bool,
}

/// Result of a send attempt that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Whitespace-only content, dropped before any network call
    Rejected,
}

#[derive(Default)]
struct MessageState {
    conversation_id: Option<String>,
    messages: Vec<MessageView>,
    /// Correlation ids of optimistic sends not yet confirmed. The client
    /// generates the message id, so the realtime echo and the insert
    /// response both reconcile against the same key.
    pending: HashSet<String>,
}

/// Manages the message list for exactly one active conversation at a time.
pub struct MessageStore {
    backend: Arc<dyn Backend>,
    user_id: String,
    directory: Arc<ProfileDirectory>,
    state: Mutex<MessageState>,
}

impl MessageStore {
    pub fn new(backend: Arc<dyn Backend>, user_id: &str, directory: Arc<ProfileDirectory>) -> Self {
        Self {
            backend,
            user_id: user_id.to_string(),
            directory,
            state: Mutex::new(MessageState::default()),
        }
    }

    /// Make `conversation_id` the active conversation and load its messages,
    /// ascending by creation time. Sender names come from one batched
    /// profile lookup over the distinct sender set. Fails open: on backend
    /// errors the list is empty, not an error.
    pub async fn load_messages(&self, conversation_id: &str) -> Vec<MessageView> {
        match self.try_load(conversation_id).await {
            Ok(views) => {
                let mut state = self.state.lock().await;
                state.conversation_id = Some(conversation_id.to_string());
                state.messages = views.clone();
                state.pending.clear();
                views
            }
            Err(e) => {
                warn!(conversation_id, "failed to load messages: {e:#}");
                let mut state = self.state.lock().await;
                state.conversation_id = Some(conversation_id.to_string());
                state.messages.clear();
                state.pending.clear();
                Vec::new()
            }
        }
    }

    async fn try_load(&self, conversation_id: &str) -> Result<Vec<MessageView>> {
        let rows = self.backend.messages_of(conversation_id).await?;
        let sender_ids: Vec<String> = rows.iter().map(|m| m.sender_id.clone()).collect();
        let names = self.directory.names_for(&sender_ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| self.view_of(row, &names))
            .collect())
    }

    fn view_of(&self, row: MessageRow, names: &HashMap<String, String>) -> MessageView {
        let sender_name = names
            .get(&row.sender_id)
            .cloned()
            .unwrap_or_else(|| row.sender_id.clone());
        MessageView {
            own: row.sender_id == self.user_id,
            id: row.id,
            sender_id: row.sender_id,
            sender_name,
            content: row.content,
            announcement: row.announcement,
            created_at: row.created_at,
            pending: false,
        }
    }

    /// Send a message to the active conversation. Whitespace-only content is
    /// rejected before any network call and is not an error. Backend
    /// failures are returned to the caller so the input box keeps its text
    /// for a retry; the optimistic entry is rolled back.
    pub async fn send_message(&self, content: &str) -> Result<SendOutcome> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            debug!("dropping whitespace-only message");
            return Ok(SendOutcome::Rejected);
        }

        let conversation_id = {
            let state = self.state.lock().await;
            match &state.conversation_id {
                Some(id) => id.clone(),
                None => bail!("no active conversation"),
            }
        };

        // Client-generated id doubles as the reconciliation key.
        let correlation_id = Uuid::new_v4().to_string();
        let sender_name = self
            .directory
            .name_for(&self.user_id)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| self.user_id.clone());

        let optimistic = MessageView {
            id: correlation_id.clone(),
            sender_id: self.user_id.clone(),
            sender_name,
            content: trimmed.to_string(),
            announcement: false,
            created_at: Utc::now(),
            own: true,
            pending: true,
        };
        {
            let mut state = self.state.lock().await;
            state.messages.push(optimistic);
            state.pending.insert(correlation_id.clone());
        }

        let row = MessageRow {
            id: correlation_id.clone(),
            conversation_id: conversation_id.clone(),
            sender_id: self.user_id.clone(),
            content: trimmed.to_string(),
            announcement: false,
            created_at: Utc::now(),
        };
        match self.backend.insert_message(row).await {
            Ok(confirmed) => {
                self.reconcile(confirmed).await;
                // Resorts the conversation to the top of the list.
                if let Err(e) = self
                    .backend
                    .touch_conversation(&conversation_id, Utc::now())
                    .await
                {
                    warn!(conversation_id, "failed to touch conversation: {e:#}");
                }
                Ok(SendOutcome::Sent)
            }
            Err(e) => {
                let mut state = self.state.lock().await;
                state.pending.remove(&correlation_id);
                state.messages.retain(|m| m.id != correlation_id);
                Err(e.into())
            }
        }
    }

    /// Replace the optimistic entry with the authoritative copy, or drop the
    /// update if the insert response already did. Whichever of the insert
    /// response and the realtime echo arrives first wins; the other is a
    /// no-op.
    async fn reconcile(&self, confirmed: MessageRow) {
        let mut state = self.state.lock().await;
        if state.pending.remove(&confirmed.id) {
            if let Some(view) = state.messages.iter_mut().find(|m| m.id == confirmed.id) {
                view.created_at = confirmed.created_at;
                view.pending = false;
            }
        }
    }

    /// Merge one change-feed event. The sender receives its own echo, so
    /// this path must deduplicate by message id: pending entries are
    /// reconciled, known ids are dropped, everything else is appended in
    /// arrival order.
    pub async fn apply_event(&self, event: ChangeEvent) {
        let ChangeEvent::MessageInserted { message } = event else {
            return;
        };

        {
            let state = self.state.lock().await;
            if state.conversation_id.as_deref() != Some(message.conversation_id.as_str()) {
                return;
            }
            if !state.pending.contains(&message.id)
                && state.messages.iter().any(|m| m.id == message.id)
            {
                debug!(message_id = %message.id, "dropping duplicate echo");
                return;
            }
        }

        let is_pending = {
            let state = self.state.lock().await;
            state.pending.contains(&message.id)
        };
        if is_pending {
            self.reconcile(message).await;
            return;
        }

        // Inbound message from another participant; resolve the sender name
        // per event (not batched).
        let sender_name = self
            .directory
            .name_for(&message.sender_id)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| message.sender_id.clone());

        let mut state = self.state.lock().await;
        // Re-check under the lock; the list may have changed across the
        // name lookup.
        if state.conversation_id.as_deref() != Some(message.conversation_id.as_str())
            || state.messages.iter().any(|m| m.id == message.id)
        {
            return;
        }
        let own = message.sender_id == self.user_id;
        state.messages.push(MessageView {
            id: message.id,
            sender_id: message.sender_id,
            sender_name,
            content: message.content,
            announcement: message.announcement,
            created_at: message.created_at,
            own,
            pending: false,
        });
    }

    /// Case-insensitive substring filter over the loaded list. Purely a
    /// derived view; the canonical list is untouched. An empty query
    /// returns everything.
    pub async fn search_messages(&self, query: &str) -> Vec<MessageView> {
        let state = self.state.lock().await;
        if query.is_empty() {
            return state.messages.clone();
        }
        let needle = query.to_lowercase();
        state
            .messages
            .iter()
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    /// Bulk delete of the active conversation's messages.
    pub async fn clear_messages(&self) -> Result<u64> {
        let conversation_id = {
            let state = self.state.lock().await;
            match &state.conversation_id {
                Some(id) => id.clone(),
                None => bail!("no active conversation"),
            }
        };
        let removed = self.backend.delete_messages(&conversation_id).await?;
        let mut state = self.state.lock().await;
        state.messages.clear();
        state.pending.clear();
        info!(conversation_id, removed, "conversation cleared");
        Ok(removed)
    }

    /// Snapshot of the visible list.
    pub async fn messages(&self) -> Vec<MessageView> {
        self.state.lock().await.messages.clone()
    }

    /// Active conversation id, if any.
    pub async fn active_conversation(&self) -> Option<String> {
        self.state.lock().await.conversation_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uniconsult_backend::{
        ConversationKind, ConversationRow, MemoryBackend, ParticipantRow, Profile, Role,
    };

    const TEACHER: &str = "teacher-1";
    const STUDENT: &str = "student-1";

    async fn seeded() -> (Arc<MemoryBackend>, MessageStore) {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .upsert_profile(Profile {
                id: TEACHER.to_string(),
                full_name: "Tina Teacher".to_string(),
                email: "tina@example.edu".to_string(),
                role: Role::Teacher,
                approved: true,
                teacher_id: None,
            })
            .await;
        backend
            .upsert_profile(Profile {
                id: STUDENT.to_string(),
                full_name: "Bob Baker".to_string(),
                email: "bob@example.edu".to_string(),
                role: Role::Student,
                approved: true,
                teacher_id: Some(TEACHER.to_string()),
            })
            .await;

        let now = Utc::now();
        backend
            .insert_conversation(ConversationRow {
                id: "c1".to_string(),
                kind: ConversationKind::Direct,
                name: None,
                teacher_id: TEACHER.to_string(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        for user in [TEACHER, STUDENT] {
            backend
                .insert_participant(ParticipantRow {
                    conversation_id: "c1".to_string(),
                    user_id: user.to_string(),
                })
                .await
                .unwrap();
        }

        let directory = Arc::new(ProfileDirectory::new(backend.clone()));
        let store = MessageStore::new(backend.clone(), TEACHER, directory);
        (backend, store)
    }

    fn row(id: &str, sender: &str, content: &str, at: DateTime<Utc>) -> MessageRow {
        MessageRow {
            id: id.to_string(),
            conversation_id: "c1".to_string(),
            sender_id: sender.to_string(),
            content: content.to_string(),
            announcement: false,
            created_at: at,
        }
    }

    #[tokio::test]
    async fn messages_load_in_creation_order_with_names() {
        let (backend, store) = seeded().await;
        let base = Utc::now();
        for (id, sender, offset) in [("m1", STUDENT, 1), ("m2", TEACHER, 2), ("m3", STUDENT, 3)] {
            backend
                .insert_message(row(id, sender, id, base + Duration::seconds(offset)))
                .await
                .unwrap();
        }

        let views = store.load_messages("c1").await;
        let ids: Vec<_> = views.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2", "m3"]);
        assert_eq!(views[0].sender_name, "Bob Baker");
        assert!(!views[0].own);
        assert!(views[1].own);
    }

    #[tokio::test]
    async fn optimistic_send_and_echo_leave_one_copy() {
        let (backend, store) = seeded().await;
        store.load_messages("c1").await;
        let mut echo = backend.subscribe_messages("c1").await.unwrap();

        let outcome = store.send_message("hello there").await.unwrap();
        assert_eq!(outcome, SendOutcome::Sent);

        // Feed the sender its own echo, as the backend would.
        let event = echo.recv().await.unwrap();
        store.apply_event(event).await;

        let views = store.messages().await;
        let copies: Vec<_> = views
            .iter()
            .filter(|m| m.content == "hello there")
            .collect();
        assert_eq!(copies.len(), 1);
        assert!(!copies[0].pending);
        assert!(copies[0].own);
    }

    #[tokio::test]
    async fn echo_arriving_before_insert_response_still_reconciles() {
        let (_, store) = seeded().await;
        store.load_messages("c1").await;

        // Simulate the echo racing ahead: apply the authoritative copy while
        // the optimistic entry is still pending.
        let correlation_id = Uuid::new_v4().to_string();
        {
            let mut state = store.state.lock().await;
            state.messages.push(MessageView {
                id: correlation_id.clone(),
                sender_id: TEACHER.to_string(),
                sender_name: "Tina Teacher".to_string(),
                content: "racing".to_string(),
                announcement: false,
                created_at: Utc::now(),
                own: true,
                pending: true,
            });
            state.pending.insert(correlation_id.clone());
        }

        store
            .apply_event(ChangeEvent::MessageInserted {
                message: row(&correlation_id, TEACHER, "racing", Utc::now()),
            })
            .await;

        let views = store.messages().await;
        assert_eq!(views.iter().filter(|m| m.content == "racing").count(), 1);
        assert!(!views.iter().any(|m| m.pending));
    }

    #[tokio::test]
    async fn whitespace_only_send_is_a_local_no_op() {
        let (backend, store) = seeded().await;
        store.load_messages("c1").await;

        let outcome = store.send_message("   ").await.unwrap();
        assert_eq!(outcome, SendOutcome::Rejected);

        assert!(store.messages().await.is_empty());
        assert!(backend.messages_of("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_is_non_destructive() {
        let (backend, store) = seeded().await;
        let base = Utc::now();
        for (id, content, offset) in [("m1", "foo bar", 1), ("m2", "baz", 2), ("m3", "FOO", 3)] {
            backend
                .insert_message(row(id, STUDENT, content, base + Duration::seconds(offset)))
                .await
                .unwrap();
        }
        let original = store.load_messages("c1").await;

        let hits = store.search_messages("foo").await;
        assert_eq!(hits.len(), 2);

        let restored = store.search_messages("").await;
        assert_eq!(restored.len(), original.len());
        let ids: Vec<_> = restored.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn events_for_other_conversations_are_ignored() {
        let (_, store) = seeded().await;
        store.load_messages("c1").await;

        store
            .apply_event(ChangeEvent::MessageInserted {
                message: MessageRow {
                    id: "m9".to_string(),
                    conversation_id: "elsewhere".to_string(),
                    sender_id: STUDENT.to_string(),
                    content: "wrong room".to_string(),
                    announcement: false,
                    created_at: Utc::now(),
                },
            })
            .await;

        assert!(store.messages().await.is_empty());
    }

    #[tokio::test]
    async fn clear_removes_rows_and_local_state() {
        let (backend, store) = seeded().await;
        backend
            .insert_message(row("m1", STUDENT, "to be purged", Utc::now()))
            .await
            .unwrap();
        store.load_messages("c1").await;

        let removed = store.clear_messages().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.messages().await.is_empty());
        assert!(backend.messages_of("c1").await.unwrap().is_empty());
    }
}
