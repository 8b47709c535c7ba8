//! Row types for the chat store and their conversions to wire types.

use chrono::{DateTime, Utc};
use policychat_protocol::{ChatId, ChatMessage, ChatSummary, Role};
use serde::Deserialize;
use sqlx::FromRow;

use super::error::StoreError;

/// A `chats` row.
#[derive(Debug, Clone, FromRow)]
pub struct ChatRow {
    pub id: ChatId,
    pub owner_id: String,
    pub title: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_archived: bool,
    pub message_count: i64,
}

impl From<ChatRow> for ChatSummary {
    fn from(row: ChatRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            created_at: from_micros(row.created_at),
            updated_at: from_micros(row.updated_at),
            is_archived: row.is_archived,
            message_count: row.message_count,
        }
    }
}

/// A `messages` row.
#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: i64,
    pub chat_id: ChatId,
    pub role: String,
    pub content: String,
    pub created_at: i64,
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let role: Role = row
            .role
            .parse()
            .map_err(|e: String| StoreError::Corrupt(format!("message {}: {e}", row.id)))?;
        Ok(Self {
            id: row.id,
            role,
            content: row.content,
            created_at: from_micros(row.created_at),
        })
    }
}

/// Offset pagination. `limit` is clamped to `1..=MAX_LIMIT`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub skip: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl Page {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 100;

    pub fn new(skip: Option<i64>, limit: Option<i64>) -> Self {
        Self { skip, limit }
    }

    pub fn offset(&self) -> i64 {
        self.skip.unwrap_or(0).max(0)
    }

    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }
}

/// Result of resolving the session a turn belongs to.
#[derive(Debug, Clone)]
pub struct ResolvedChat {
    pub chat: ChatSummary,
    /// `true` when this call minted the session.
    pub created: bool,
}

/// Current time in the store's timestamp unit.
pub(crate) fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_clamps_limit() {
        assert_eq!(Page::default().limit(), Page::DEFAULT_LIMIT);
        assert_eq!(Page::new(None, Some(0)).limit(), 1);
        assert_eq!(Page::new(None, Some(500)).limit(), Page::MAX_LIMIT);
        assert_eq!(Page::new(Some(-4), None).offset(), 0);
    }

    #[test]
    fn test_row_to_summary_keeps_microseconds() {
        let row = ChatRow {
            id: 3,
            owner_id: "usr_a".to_string(),
            title: None,
            created_at: 1_738_764_000_000_001,
            updated_at: 1_738_764_000_000_002,
            is_archived: false,
            message_count: 0,
        };
        let summary = ChatSummary::from(row);
        assert_eq!(summary.created_at.timestamp_micros(), 1_738_764_000_000_001);
        assert!(summary.updated_at > summary.created_at);
    }

    #[test]
    fn test_message_row_with_unknown_role_is_corrupt() {
        let row = MessageRow {
            id: 9,
            chat_id: 1,
            role: "system".to_string(),
            content: String::new(),
            created_at: 0,
        };
        assert!(matches!(
            ChatMessage::try_from(row),
            Err(StoreError::Corrupt(_))
        ));
    }
}
