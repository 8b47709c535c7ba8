//! Turn request and token types.

use serde::{Deserialize, Serialize};

use crate::session::ChatId;

/// Body of `POST /chat/stream`.
///
/// `chat_id: None` asks the server to mint a new session. The id the server
/// settles on arrives in the first `chat_info` chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    /// Must match the authenticated caller when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    pub message: String,

    #[serde(default)]
    pub chat_id: Option<ChatId>,

    /// Idempotency key for new-conversation turns. A retry that reuses the key
    /// lands in the session minted by the first attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>, chat_id: Option<ChatId>) -> Self {
        Self {
            user_id: None,
            message: message.into(),
            chat_id,
            request_id: None,
        }
    }
}

/// Response of `POST /auth/token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}
