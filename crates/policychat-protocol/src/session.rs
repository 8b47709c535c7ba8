//! Session (chat) summary types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned session identifier. Never changes once assigned.
pub type ChatId = i64;

/// A session as listed by `GET /chat` and returned from every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: ChatId,

    /// `None` until the user renames the chat or the server derives a title
    /// from the first turn.
    pub title: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Advances on every effective mutation. Used as the last-writer-wins stamp.
    pub updated_at: DateTime<Utc>,

    pub is_archived: bool,

    /// Persisted messages (user and assistant) in this chat.
    #[serde(default)]
    pub message_count: i64,
}

/// Body of `POST /chat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Body of `PATCH /chat/{id}/rename`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameRequest {
    pub new_title: String,
}

/// Response of `POST /chat/archive-all`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveAllResponse {
    pub message: String,
    /// Sessions newly archived by this call. Already archived ones are not counted.
    pub count: u64,
}
