//! Conversation store - the deduplicated conversation list for one user

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use uniconsult_backend::{
    Backend, ChangeEvent, ConversationKind, ConversationRow, ParticipantRow, Profile,
};

use crate::profiles::ProfileDirectory;
use crate::ChatConfig;

/// Display identity of a conversation. Direct chats derive their name from
/// the counterpart; groups carry a literal one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ConversationName {
    Direct {
        counterpart_id: String,
        counterpart_name: String,
    },
    Group {
        name: String,
    },
}

/// Denormalized last-message preview for list display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// One entry of the conversation list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationView {
    pub id: String,
    pub name: ConversationName,
    pub last_message: Option<LastMessage>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationView {
    /// Human-readable name regardless of kind.
    pub fn display_name(&self) -> &str {
        match &self.name {
            ConversationName::Direct {
                counterpart_name, ..
            } => counterpart_name,
            ConversationName::Group { name } => name,
        }
    }
}

/// Produces the authoritative, deduplicated list of conversations visible to
/// the current user. Load failures degrade to an empty or partial list so
/// the shell always renders.
pub struct ConversationStore {
    backend: Arc<dyn Backend>,
    user_id: String,
    directory: Arc<ProfileDirectory>,
    config: ChatConfig,
    state: Mutex<Vec<ConversationView>>,
    // Serializes find-then-insert for direct conversations within this
    // client. The backend enforces no uniqueness on the participant pair;
    // duplicates created by another client are dropped again at load time.
    create_guard: Mutex<()>,
}

impl ConversationStore {
    pub fn new(
        backend: Arc<dyn Backend>,
        user_id: &str,
        directory: Arc<ProfileDirectory>,
        config: ChatConfig,
    ) -> Self {
        Self {
            backend,
            user_id: user_id.to_string(),
            directory,
            config,
            state: Mutex::new(Vec::new()),
            create_guard: Mutex::new(()),
        }
    }

    /// Reload the conversation list from the backend. At most one direct
    /// conversation survives per counterpart, the most-recently-updated one.
    pub async fn load_conversations(&self) -> Vec<ConversationView> {
        match self.try_load().await {
            Ok(views) => {
                *self.state.lock().await = views.clone();
                views
            }
            Err(e) => {
                warn!("failed to load conversations: {e:#}");
                Vec::new()
            }
        }
    }

    async fn try_load(&self) -> Result<Vec<ConversationView>> {
        let ids = self
            .backend
            .participant_conversation_ids(&self.user_id)
            .await?;
        let rows = self.backend.conversations_by_ids(&ids).await?;

        let mut views = Vec::new();
        let mut seen_counterparts = HashSet::new();
        for row in rows {
            // A bad row degrades to a partial list, never a failed load.
            match self.resolve_view(&row, &mut seen_counterparts).await {
                Ok(Some(view)) => views.push(view),
                Ok(None) => {}
                Err(e) => warn!(conversation_id = %row.id, "skipping conversation: {e:#}"),
            }
        }
        Ok(views)
    }

    /// Build the view model of one row. Returns `None` for a direct
    /// conversation whose counterpart was already seen; rows arrive
    /// newest-updated first, so first-seen wins.
    async fn resolve_view(
        &self,
        row: &ConversationRow,
        seen_counterparts: &mut HashSet<String>,
    ) -> Result<Option<ConversationView>> {
        let name = match row.kind {
            ConversationKind::Group => ConversationName::Group {
                name: row.name.clone().unwrap_or_else(|| "Group".to_string()),
            },
            ConversationKind::Direct => {
                let participants = self.backend.participants_of(&row.id).await?;
                let counterpart = participants
                    .iter()
                    .map(|p| p.user_id.clone())
                    .find(|id| id != &self.user_id)
                    .ok_or_else(|| anyhow!("direct conversation {} has no counterpart", row.id))?;
                if !seen_counterparts.insert(counterpart.clone()) {
                    debug!(
                        conversation_id = %row.id,
                        counterpart = %counterpart,
                        "dropping duplicate direct conversation"
                    );
                    return Ok(None);
                }
                let counterpart_name = self
                    .directory
                    .name_for(&counterpart)
                    .await?
                    .unwrap_or_else(|| counterpart.clone());
                ConversationName::Direct {
                    counterpart_id: counterpart,
                    counterpart_name,
                }
            }
        };

        let last_message = self
            .backend
            .latest_message(&row.id)
            .await?
            .map(|m| LastMessage {
                content: truncate(&m.content, self.config.preview_length),
                timestamp: m.created_at,
            });

        Ok(Some(ConversationView {
            id: row.id.clone(),
            name,
            last_message,
            updated_at: row.updated_at,
        }))
    }

    /// Find-or-create a direct conversation with the counterpart. Reuses an
    /// existing participation when one resolves to the same counterpart.
    pub async fn create_direct_conversation(&self, counterpart_id: &str) -> Result<String> {
        let _guard = self.create_guard.lock().await;

        let ids = self
            .backend
            .participant_conversation_ids(&self.user_id)
            .await?;
        let rows = self.backend.conversations_by_ids(&ids).await?;
        for row in rows.iter().filter(|r| r.kind == ConversationKind::Direct) {
            let participants = self.backend.participants_of(&row.id).await?;
            if participants.iter().any(|p| p.user_id == counterpart_id) {
                debug!(conversation_id = %row.id, "reusing existing direct conversation");
                return Ok(row.id.clone());
            }
        }

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        self.backend
            .insert_conversation(ConversationRow {
                id: id.clone(),
                kind: ConversationKind::Direct,
                name: None,
                teacher_id: self.user_id.clone(),
                created_at: now,
                updated_at: now,
            })
            .await?;
        for user_id in [self.user_id.as_str(), counterpart_id] {
            self.backend
                .insert_participant(ParticipantRow {
                    conversation_id: id.clone(),
                    user_id: user_id.to_string(),
                })
                .await?;
        }

        info!(conversation_id = %id, counterpart = %counterpart_id, "direct conversation created");
        Ok(id)
    }

    /// Create a named group with the given members plus the creator.
    pub async fn create_group_conversation(
        &self,
        name: &str,
        member_ids: &[String],
    ) -> Result<String> {
        ensure!(!name.trim().is_empty(), "group name must not be empty");
        ensure!(!member_ids.is_empty(), "group needs at least one member");

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        self.backend
            .insert_conversation(ConversationRow {
                id: id.clone(),
                kind: ConversationKind::Group,
                name: Some(name.trim().to_string()),
                teacher_id: self.user_id.clone(),
                created_at: now,
                updated_at: now,
            })
            .await?;

        let mut members: Vec<&str> = vec![self.user_id.as_str()];
        for member in member_ids {
            if member != &self.user_id {
                members.push(member);
            }
        }
        for user_id in members {
            self.backend
                .insert_participant(ParticipantRow {
                    conversation_id: id.clone(),
                    user_id: user_id.to_string(),
                })
                .await?;
        }

        info!(conversation_id = %id, name = %name, "group conversation created");
        Ok(id)
    }

    /// Delete a conversation and everything under it: messages, then
    /// participants, then the conversation row itself.
    pub async fn delete_conversation(&self, id: &str) -> Result<()> {
        self.backend.delete_messages(id).await?;
        for participant in self.backend.participants_of(id).await? {
            self.backend
                .remove_participant(id, &participant.user_id)
                .await?;
        }
        self.backend.delete_conversation(id).await?;

        self.state.lock().await.retain(|v| v.id != id);
        info!(conversation_id = %id, "conversation deleted");
        Ok(())
    }

    /// Remove only the caller's own membership.
    pub async fn leave_group(&self, id: &str) -> Result<()> {
        self.backend.remove_participant(id, &self.user_id).await?;
        self.state.lock().await.retain(|v| v.id != id);
        info!(conversation_id = %id, "left group");
        Ok(())
    }

    /// Approved students of the current user, for the new-conversation
    /// picker. Fails open to an empty list.
    pub async fn available_students(&self) -> Vec<Profile> {
        match self.directory.approved_students(&self.user_id).await {
            Ok(students) => students,
            Err(e) => {
                warn!("failed to load student picker: {e:#}");
                Vec::new()
            }
        }
    }

    /// Merge one change-feed event into the loaded list. Unknown
    /// conversations are resolved with a per-event backend lookup.
    pub async fn apply_event(&self, event: ChangeEvent) {
        match event {
            ChangeEvent::ConversationTouched {
                conversation_id,
                updated_at,
            } => {
                let mut state = self.state.lock().await;
                if let Some(view) = state.iter_mut().find(|v| v.id == conversation_id) {
                    view.updated_at = updated_at;
                    state.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                }
            }
            ChangeEvent::MessageInserted { message } => {
                let preview = LastMessage {
                    content: truncate(&message.content, self.config.preview_length),
                    timestamp: message.created_at,
                };
                let mut state = self.state.lock().await;
                if let Some(view) = state.iter_mut().find(|v| v.id == message.conversation_id) {
                    view.last_message = Some(preview);
                    view.updated_at = message.created_at;
                    state.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                    return;
                }
                drop(state);

                // First contact: the conversation is not in the list yet.
                match self.lookup_new_conversation(&message.conversation_id).await {
                    Ok(Some(mut view)) => {
                        view.last_message = Some(preview);
                        view.updated_at = message.created_at;
                        let mut state = self.state.lock().await;
                        // The list must hold at most one direct entry per
                        // counterpart; an event for a conversation that
                        // load-time dedup dropped must not resurrect it.
                        if let ConversationName::Direct { counterpart_id, .. } = &view.name {
                            let duplicate = state.iter().any(|v| {
                                matches!(
                                    &v.name,
                                    ConversationName::Direct { counterpart_id: existing, .. }
                                        if existing == counterpart_id
                                )
                            });
                            if duplicate {
                                debug!(
                                    conversation_id = %view.id,
                                    counterpart = %counterpart_id,
                                    "dropping duplicate direct conversation from event"
                                );
                                return;
                            }
                        }
                        state.push(view);
                        state.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                    }
                    Ok(None) => {}
                    Err(e) => warn!(
                        conversation_id = %message.conversation_id,
                        "failed to resolve new conversation: {e:#}"
                    ),
                }
            }
            ChangeEvent::ProfileUpserted { profile } => {
                let profile_id = profile.id.clone();
                let full_name = profile.full_name.clone();
                self.directory.note(profile).await;
                let mut state = self.state.lock().await;
                for view in state.iter_mut() {
                    if let ConversationName::Direct {
                        counterpart_id,
                        counterpart_name,
                    } = &mut view.name
                    {
                        if *counterpart_id == profile_id {
                            *counterpart_name = full_name.clone();
                        }
                    }
                }
            }
        }
    }

    async fn lookup_new_conversation(&self, id: &str) -> Result<Option<ConversationView>> {
        let rows = self.backend.conversations_by_ids(&[id.to_string()]).await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let mut seen = HashSet::new();
        self.resolve_view(&row, &mut seen).await
    }

    /// Snapshot of the loaded list.
    pub async fn conversations(&self) -> Vec<ConversationView> {
        self.state.lock().await.clone()
    }
}

fn truncate(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}
