//! Client error types.

use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur talking to the chat server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Missing, expired or rejected credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The session does not exist or belongs to someone else.
    #[error("not found: {0}")]
    NotFound(String),

    /// Input rejected locally or by the server.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The server already has a reply streaming in this session.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other non-success response.
    #[error("server error ({status}): {detail}")]
    Server { status: u16, detail: String },

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The event stream broke or carried something unreadable.
    #[error("stream error: {0}")]
    Stream(String),

    /// No chunk arrived within the inactivity timeout.
    #[error("no chunk received for {0:?}")]
    Timeout(Duration),

    /// A turn is already streaming in this view.
    #[error("a reply is still streaming")]
    TurnInFlight,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
}

impl ClientError {
    /// Short text fit to show the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthorized(_) => "Your session has expired. Please sign in again.".to_string(),
            Self::NotFound(_) => "That conversation no longer exists.".to_string(),
            Self::Validation(detail) => detail.clone(),
            Self::Conflict(_) => "An answer is still being written in this conversation.".to_string(),
            Self::Server { .. } => {
                "The server could not complete the request. Please try again.".to_string()
            }
            Self::Transport(_) => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
            Self::Stream(_) => "The connection was lost before the answer finished.".to_string(),
            Self::Timeout(_) => "The assistant stopped responding. Please try again.".to_string(),
            Self::TurnInFlight => "Please wait for the current answer to finish.".to_string(),
        }
    }

    /// The credential is unusable and the user has to sign in again.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Map a status and response body to an error.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = serde_json::from_str::<ErrorBody>(body)
            .map(|b| b.detail)
            .unwrap_or_else(|_| body.trim().to_string());

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Unauthorized(detail),
            StatusCode::NOT_FOUND => Self::NotFound(detail),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Self::Validation(detail),
            StatusCode::CONFLICT => Self::Conflict(detail),
            _ => Self::Server {
                status: status.as_u16(),
                detail,
            },
        }
    }

    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        match response.text().await {
            Ok(body) => Self::from_status(status, &body),
            Err(e) => Self::Transport(e),
        }
    }
}
