//! The answer engine seam.
//!
//! The server does not generate answers itself. An [`Assistant`] receives the
//! conversation so far plus the new user message and yields reply fragments,
//! tool activity, or an error. The stream emitter relays whatever it yields.
//!
//! ```text
//!   StreamEmitter ──respond()──▶ dyn Assistant
//!                                  ├─ ScriptedAssistant  (canned replies, dev/test)
//!                                  └─ RemoteAssistant    (SSE relay from a retrieval service)
//! ```

mod remote;
mod scripted;

pub use remote::{RemoteAssistant, RemoteConfig};
pub use scripted::{ScriptedAssistant, ScriptedConfig};

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use policychat_protocol::{ChatId, ChatMessage, ToolCall, ToolOutput};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;

/// One unit of assistant output.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantEvent {
    TextDelta(String),
    ToolCall(ToolCall),
    ToolOutput(ToolOutput),
}

/// Assistant output. Normal termination is the end of the stream; an `Err`
/// item fails the turn.
pub type AssistantStream = Pin<Box<dyn Stream<Item = Result<AssistantEvent>> + Send>>;

/// What the assistant is asked to answer.
#[derive(Debug, Clone, Serialize)]
pub struct AssistantRequest {
    /// Owner of the conversation. Not sent to remote services.
    #[serde(skip)]
    pub owner: String,
    pub chat_id: ChatId,
    /// Earlier messages of the conversation, oldest first.
    pub history: Vec<ChatMessage>,
    pub message: String,
}

#[async_trait]
pub trait Assistant: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Start answering. Errors here fail the turn before any output.
    async fn respond(&self, request: AssistantRequest) -> Result<AssistantStream>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantKind {
    #[default]
    Scripted,
    Remote,
    /// No assistant. Every turn fails after the user message is stored.
    Disabled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub kind: AssistantKind,
    pub scripted: ScriptedConfig,
    pub remote: RemoteConfig,
}

/// Build the configured assistant. `None` when disabled.
pub fn build_assistant(config: &AssistantConfig) -> Result<Option<Arc<dyn Assistant>>> {
    let assistant: Arc<dyn Assistant> = match config.kind {
        AssistantKind::Scripted => Arc::new(ScriptedAssistant::from_config(&config.scripted)),
        AssistantKind::Remote => Arc::new(RemoteAssistant::from_config(&config.remote)?),
        AssistantKind::Disabled => return Ok(None),
    };
    Ok(Some(assistant))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_assistant_by_kind() {
        let scripted = build_assistant(&AssistantConfig::default()).unwrap();
        assert_eq!(scripted.map(|a| a.name().to_string()).as_deref(), Some("scripted"));

        let disabled = build_assistant(&AssistantConfig {
            kind: AssistantKind::Disabled,
            ..Default::default()
        })
        .unwrap();
        assert!(disabled.is_none());

        let remote_without_url = build_assistant(&AssistantConfig {
            kind: AssistantKind::Remote,
            ..Default::default()
        });
        assert!(remote_without_url.is_err());
    }

    #[test]
    fn test_request_serialization_omits_owner() {
        let request = AssistantRequest {
            owner: "usr_a".to_string(),
            chat_id: 4,
            history: Vec::new(),
            message: "leave carry-over?".to_string(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("owner").is_none());
        assert_eq!(json["chat_id"], 4);
    }
}
