//! Row types and change-feed events shared across the stores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

/// User profile, consumed read-only by the stores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub role: Role,
    pub approved: bool,
    /// Owning teacher, set for student profiles
    pub teacher_id: Option<String>,
}

/// Conversation type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

/// Conversation row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRow {
    pub id: String,
    pub kind: ConversationKind,
    /// Literal name for groups; direct chats derive theirs from the counterpart
    pub name: Option<String>,
    pub teacher_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Conversation membership row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantRow {
    pub conversation_id: String,
    pub user_id: String,
}

/// Message row, append-only from the client's perspective
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub announcement: bool,
    pub created_at: DateTime<Utc>,
}

/// Change-feed event delivered on a subscription channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChangeEvent {
    MessageInserted {
        message: MessageRow,
    },
    ConversationTouched {
        conversation_id: String,
        updated_at: DateTime<Utc>,
    },
    ProfileUpserted {
        profile: Profile,
    },
}
