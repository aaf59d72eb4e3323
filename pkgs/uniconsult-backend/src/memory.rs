//! In-memory backend - tables behind a mutex, broadcast channels as the
//! change feed. Backs the unit tests and local development mode.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::backend::Backend;
use crate::error::{BackendError, Result};
use crate::types::{ChangeEvent, ConversationRow, MessageRow, ParticipantRow, Profile, Role};
use crate::CHANGE_FEED_CAPACITY;

use async_trait::async_trait;

#[derive(Default)]
struct Tables {
    profiles: HashMap<String, Profile>,
    conversations: HashMap<String, ConversationRow>,
    participants: Vec<ParticipantRow>,
    messages: Vec<MessageRow>,
    message_feeds: HashMap<String, broadcast::Sender<ChangeEvent>>,
    user_feeds: HashMap<String, broadcast::Sender<ChangeEvent>>,
}

impl Tables {
    fn message_feed(&mut self, conversation_id: &str) -> &broadcast::Sender<ChangeEvent> {
        self.message_feeds
            .entry(conversation_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANGE_FEED_CAPACITY).0)
    }

    fn user_feed(&mut self, user_id: &str) -> &broadcast::Sender<ChangeEvent> {
        self.user_feeds
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANGE_FEED_CAPACITY).0)
    }

    fn participant_ids(&self, conversation_id: &str) -> Vec<String> {
        self.participants
            .iter()
            .filter(|p| p.conversation_id == conversation_id)
            .map(|p| p.user_id.clone())
            .collect()
    }

    /// Send an event on every participant's user feed.
    fn fan_out_to_participants(&mut self, conversation_id: &str, event: &ChangeEvent) {
        for user_id in self.participant_ids(conversation_id) {
            let _ = self.user_feed(&user_id).send(event.clone());
        }
    }
}

/// In-memory stand-in for the hosted backend.
pub struct MemoryBackend {
    tables: Mutex<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Insert or replace a profile, echoing `ProfileUpserted` on the
    /// profile's own feed and its teacher's feed.
    pub async fn upsert_profile(&self, profile: Profile) {
        let mut tables = self.tables.lock().await;
        let event = ChangeEvent::ProfileUpserted {
            profile: profile.clone(),
        };
        let _ = tables.user_feed(&profile.id).send(event.clone());
        if let Some(teacher_id) = profile.teacher_id.clone() {
            let _ = tables.user_feed(&teacher_id).send(event);
        }
        tables.profiles.insert(profile.id.clone(), profile);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn participant_conversation_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .participants
            .iter()
            .filter(|p| p.user_id == user_id)
            .map(|p| p.conversation_id.clone())
            .collect())
    }

    async fn conversations_by_ids(&self, ids: &[String]) -> Result<Vec<ConversationRow>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<ConversationRow> = ids
            .iter()
            .filter_map(|id| tables.conversations.get(id).cloned())
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows)
    }

    async fn participants_of(&self, conversation_id: &str) -> Result<Vec<ParticipantRow>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .participants
            .iter()
            .filter(|p| p.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn insert_conversation(&self, row: ConversationRow) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.conversations.contains_key(&row.id) {
            return Err(BackendError::Conflict(format!(
                "conversation {} already exists",
                row.id
            )));
        }
        debug!(conversation_id = %row.id, "inserting conversation");
        tables.conversations.insert(row.id.clone(), row);
        Ok(())
    }

    async fn touch_conversation(&self, id: &str, updated_at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let row = tables
            .conversations
            .get_mut(id)
            .ok_or_else(|| BackendError::NotFound(format!("conversation {id}")))?;
        row.updated_at = updated_at;
        let event = ChangeEvent::ConversationTouched {
            conversation_id: id.to_string(),
            updated_at,
        };
        tables.fan_out_to_participants(id, &event);
        Ok(())
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.conversations.remove(id);
        tables.message_feeds.remove(id);
        Ok(())
    }

    async fn insert_participant(&self, row: ParticipantRow) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let duplicate = tables
            .participants
            .iter()
            .any(|p| p.conversation_id == row.conversation_id && p.user_id == row.user_id);
        if !duplicate {
            tables.participants.push(row);
        }
        Ok(())
    }

    async fn remove_participant(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables
            .participants
            .retain(|p| !(p.conversation_id == conversation_id && p.user_id == user_id));
        Ok(())
    }

    async fn messages_of(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<MessageRow> = tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn latest_message(&self, conversation_id: &str) -> Result<Option<MessageRow>> {
        let rows = self.messages_of(conversation_id).await?;
        Ok(rows.into_iter().next_back())
    }

    async fn insert_message(&self, row: MessageRow) -> Result<MessageRow> {
        let mut tables = self.tables.lock().await;
        if !tables.conversations.contains_key(&row.conversation_id) {
            return Err(BackendError::NotFound(format!(
                "conversation {}",
                row.conversation_id
            )));
        }
        tables.messages.push(row.clone());

        let event = ChangeEvent::MessageInserted {
            message: row.clone(),
        };
        let _ = tables.message_feed(&row.conversation_id).send(event.clone());
        tables.fan_out_to_participants(&row.conversation_id, &event);

        debug!(message_id = %row.id, conversation_id = %row.conversation_id, "message inserted");
        Ok(row)
    }

    async fn delete_messages(&self, conversation_id: &str) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.messages.len();
        tables
            .messages
            .retain(|m| m.conversation_id != conversation_id);
        Ok((before - tables.messages.len()) as u64)
    }

    async fn profiles_by_ids(&self, ids: &[String]) -> Result<Vec<Profile>> {
        let tables = self.tables.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.profiles.get(id).cloned())
            .collect())
    }

    async fn approved_students_of(&self, teacher_id: &str) -> Result<Vec<Profile>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .profiles
            .values()
            .filter(|p| {
                p.role == Role::Student
                    && p.approved
                    && p.teacher_id.as_deref() == Some(teacher_id)
            })
            .cloned()
            .collect())
    }

    async fn subscribe_messages(
        &self,
        conversation_id: &str,
    ) -> Result<broadcast::Receiver<ChangeEvent>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.message_feed(conversation_id).subscribe())
    }

    async fn subscribe_user_feed(&self, user_id: &str) -> Result<broadcast::Receiver<ChangeEvent>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.user_feed(user_id).subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn message(id: &str, conversation_id: &str, sender: &str, at: DateTime<Utc>) -> MessageRow {
        MessageRow {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender.to_string(),
            content: format!("message {id}"),
            announcement: false,
            created_at: at,
        }
    }

    async fn conversation(backend: &MemoryBackend, id: &str, members: &[&str]) {
        let now = Utc::now();
        backend
            .insert_conversation(ConversationRow {
                id: id.to_string(),
                kind: crate::types::ConversationKind::Direct,
                name: None,
                teacher_id: members[0].to_string(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        for member in members {
            backend
                .insert_participant(ParticipantRow {
                    conversation_id: id.to_string(),
                    user_id: member.to_string(),
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn messages_are_returned_ascending() {
        let backend = MemoryBackend::new();
        conversation(&backend, "c1", &["alice", "bob"]).await;

        let base = Utc::now();
        // Inserted out of order on purpose.
        for (id, offset) in [("m2", 2), ("m1", 1), ("m3", 3)] {
            backend
                .insert_message(message(id, "c1", "alice", base + Duration::seconds(offset)))
                .await
                .unwrap();
        }

        let rows = backend.messages_of("c1").await.unwrap();
        let ids: Vec<_> = rows.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2", "m3"]);

        let latest = backend.latest_message("c1").await.unwrap().unwrap();
        assert_eq!(latest.id, "m3");
    }

    #[tokio::test]
    async fn insert_echoes_to_sender_and_counterpart() {
        let backend = MemoryBackend::new();
        conversation(&backend, "c1", &["alice", "bob"]).await;

        let mut alice_feed = backend.subscribe_user_feed("alice").await.unwrap();
        let mut conv_feed = backend.subscribe_messages("c1").await.unwrap();

        backend
            .insert_message(message("m1", "c1", "alice", Utc::now()))
            .await
            .unwrap();

        match conv_feed.recv().await.unwrap() {
            ChangeEvent::MessageInserted { message } => assert_eq!(message.id, "m1"),
            other => panic!("unexpected event: {other:?}"),
        }
        // The sender receives its own echo on the user feed as well.
        match alice_feed.recv().await.unwrap() {
            ChangeEvent::MessageInserted { message } => assert_eq!(message.sender_id, "alice"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn insert_into_missing_conversation_fails() {
        let backend = MemoryBackend::new();
        let err = backend
            .insert_message(message("m1", "nope", "alice", Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)));
    }
}
