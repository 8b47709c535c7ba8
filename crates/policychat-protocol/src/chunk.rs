//! Stream chunk types.
//!
//! Each SSE event on `POST /chat/stream` carries one chunk as JSON:
//! `{"type": "<kind>", "data": <payload>}`. Chunks are ephemeral; they drive the
//! client view and are never stored.
//!
//! Ordering within one turn:
//! - `chat_info` comes first.
//! - `text_delta`, `tool_call`, `tool_output` follow in production order.
//! - `error` may precede the final chunk on failure.
//! - `status` is always last and appears exactly once.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::{ChatId, ChatSummary};

/// One typed unit of a streamed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamChunk {
    /// The session this turn resolved to. Authoritative for new conversations.
    ChatInfo(ChatInfo),

    /// A fragment of the assistant reply. Fragments concatenated in arrival
    /// order equal the stored assistant message.
    TextDelta(String),

    /// The assistant invoked a tool.
    ToolCall(ToolCall),

    /// A tool returned.
    ToolOutput(ToolOutput),

    /// The turn failed. Always followed by `status{error}`.
    Error(ErrorInfo),

    /// Terminal chunk.
    Status(StatusInfo),
}

impl StreamChunk {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChatInfo(_) => "chat_info",
            Self::TextDelta(_) => "text_delta",
            Self::ToolCall(_) => "tool_call",
            Self::ToolOutput(_) => "tool_output",
            Self::Error(_) => "error",
            Self::Status(_) => "status",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Status(_))
    }

    pub fn text(fragment: impl Into<String>) -> Self {
        Self::TextDelta(fragment.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorInfo {
            message: message.into(),
        })
    }

    pub fn complete(chat_id: ChatId, chat: Option<ChatSummary>) -> Self {
        Self::Status(StatusInfo {
            status: TurnStatus::Complete,
            chat_id: Some(chat_id),
            chat,
        })
    }

    pub fn failed(chat_id: Option<ChatId>) -> Self {
        Self::Status(StatusInfo {
            status: TurnStatus::Error,
            chat_id,
            chat: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInfo {
    pub chat_id: ChatId,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    #[serde(default)]
    pub output: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
}

/// Terminal outcome of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub status: TurnStatus,

    /// `None` only when the turn failed before a session was resolved.
    pub chat_id: Option<ChatId>,

    /// Session snapshot taken after the turn's post-completion update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<ChatSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_delta_wire_shape() {
        let json = serde_json::to_value(StreamChunk::text("Contrast ")).unwrap();
        assert_eq!(json, json!({"type": "text_delta", "data": "Contrast "}));
    }

    #[test]
    fn test_chat_info_wire_shape() {
        let chunk = StreamChunk::ChatInfo(ChatInfo {
            chat_id: 501,
            title: None,
        });
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(
            json,
            json!({"type": "chat_info", "data": {"chat_id": 501, "title": null}})
        );
    }

    #[test]
    fn test_status_parses_without_snapshot() {
        let chunk: StreamChunk = serde_json::from_value(
            json!({"type": "status", "data": {"status": "complete", "chat_id": 501}}),
        )
        .unwrap();
        assert!(chunk.is_terminal());
        match chunk {
            StreamChunk::Status(info) => {
                assert_eq!(info.status, TurnStatus::Complete);
                assert_eq!(info.chat_id, Some(501));
                assert!(info.chat.is_none());
            }
            other => panic!("unexpected chunk: {other:?}"),
        }
    }

    #[test]
    fn test_tool_chunks_parse() {
        let call: StreamChunk = serde_json::from_value(json!({
            "type": "tool_call",
            "data": {"id": "call_1", "name": "search_policies", "input": {"query": "contrast"}}
        }))
        .unwrap();
        assert_eq!(call.kind(), "tool_call");

        let output: StreamChunk = serde_json::from_value(json!({
            "type": "tool_output",
            "data": {"tool_call_id": "call_1", "output": ["RAD-014"]}
        }))
        .unwrap();
        assert_eq!(output.kind(), "tool_output");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result: Result<StreamChunk, _> =
            serde_json::from_value(json!({"type": "thinking", "data": "..."}));
        assert!(result.is_err());
    }
}
