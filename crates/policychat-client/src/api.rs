//! REST and SSE transport.

use futures::StreamExt;
use policychat_protocol::{
    ArchiveAllResponse, ChatId, ChatMessage, ChatSummary, CreateChatRequest, RenameRequest,
    StreamChunk, TokenResponse, TurnRequest,
};
use reqwest::{Client, RequestBuilder, Response};
use reqwest_eventsource::{Event, EventSource, retry::Never};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Client for the chat server's HTTP API.
#[derive(Debug, Clone)]
pub struct ChatApi {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    token: Option<String>,
}

impl ChatApi {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        // No overall timeout on the client: it would cut long streams short.
        let client = Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout,
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// `POST /auth/token`. Does not store the token; see [`ChatApi::set_token`].
    pub async fn issue_token(&self, username: &str, password: &str) -> ClientResult<TokenResponse> {
        let response = self
            .client
            .post(self.url("/auth/token"))
            .timeout(self.request_timeout)
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;

        handle_response(response).await
    }

    pub async fn list_chats(
        &self,
        archived: bool,
        skip: Option<i64>,
        limit: Option<i64>,
    ) -> ClientResult<Vec<ChatSummary>> {
        let mut query = vec![("archived", archived.to_string())];
        if let Some(skip) = skip {
            query.push(("skip", skip.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        let response = self
            .authorized(self.client.get(self.url("/chat")))
            .timeout(self.request_timeout)
            .query(&query)
            .send()
            .await?;

        handle_response(response).await
    }

    pub async fn create_chat(&self, title: Option<&str>) -> ClientResult<ChatSummary> {
        let body = CreateChatRequest {
            title: title.map(str::to_string),
        };
        let response = self
            .authorized(self.client.post(self.url("/chat")))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await?;

        handle_response(response).await
    }

    /// Messages of a session, oldest first.
    pub async fn list_messages(
        &self,
        chat_id: ChatId,
        skip: Option<i64>,
        limit: Option<i64>,
    ) -> ClientResult<Vec<ChatMessage>> {
        let mut query = Vec::new();
        if let Some(skip) = skip {
            query.push(("skip", skip.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        let response = self
            .authorized(self.client.get(self.url(&format!("/chat/{chat_id}/messages"))))
            .timeout(self.request_timeout)
            .query(&query)
            .send()
            .await?;

        handle_response(response).await
    }

    pub async fn rename_chat(&self, chat_id: ChatId, new_title: &str) -> ClientResult<ChatSummary> {
        let body = RenameRequest {
            new_title: new_title.to_string(),
        };
        let response = self
            .authorized(self.client.patch(self.url(&format!("/chat/{chat_id}/rename"))))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await?;

        handle_response(response).await
    }

    pub async fn archive_chat(&self, chat_id: ChatId) -> ClientResult<ChatSummary> {
        self.patch_empty(&format!("/chat/{chat_id}/archive")).await
    }

    pub async fn unarchive_chat(&self, chat_id: ChatId) -> ClientResult<ChatSummary> {
        self.patch_empty(&format!("/chat/{chat_id}/unarchive")).await
    }

    pub async fn archive_all(&self) -> ClientResult<ArchiveAllResponse> {
        let response = self
            .authorized(self.client.post(self.url("/chat/archive-all")))
            .timeout(self.request_timeout)
            .send()
            .await?;

        handle_response(response).await
    }

    async fn patch_empty<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let response = self
            .authorized(self.client.patch(self.url(path)))
            .timeout(self.request_timeout)
            .send()
            .await?;

        handle_response(response).await
    }

    /// `POST /chat/stream`. The request is sent on the first poll of the returned stream.
    pub fn open_turn_stream(&self, request: &TurnRequest) -> ClientResult<TurnStream> {
        let builder = self
            .authorized(self.client.post(self.url("/chat/stream")))
            .header("Accept", "text/event-stream")
            .json(request);

        let mut source = EventSource::new(builder)
            .map_err(|e| ClientError::Stream(format!("cannot open stream: {e}")))?;
        source.set_retry_policy(Box::new(Never));

        Ok(TurnStream {
            source: Some(source),
        })
    }
}

/// Chunks of one turn, in arrival order.
pub struct TurnStream {
    source: Option<EventSource>,
}

impl TurnStream {
    /// Next chunk. `None` once the server has closed the stream.
    pub async fn next_chunk(&mut self) -> Option<ClientResult<StreamChunk>> {
        loop {
            let source = self.source.as_mut()?;
            let item = match source.next().await {
                None | Some(Err(reqwest_eventsource::Error::StreamEnded)) => None,
                Some(Ok(Event::Open)) => continue,
                Some(Ok(Event::Message(message))) => {
                    match serde_json::from_str::<StreamChunk>(&message.data) {
                        Ok(chunk) => return Some(Ok(chunk)),
                        Err(e) => Some(ClientError::Stream(format!("unreadable chunk: {e}"))),
                    }
                }
                Some(Err(reqwest_eventsource::Error::InvalidStatusCode(status, response))) => {
                    debug!(%status, "stream refused");
                    let body = response.text().await.unwrap_or_default();
                    Some(ClientError::from_status(status, &body))
                }
                Some(Err(reqwest_eventsource::Error::Transport(e))) => {
                    Some(ClientError::Transport(e))
                }
                Some(Err(e)) => {
                    warn!("turn stream failed: {e}");
                    Some(ClientError::Stream(e.to_string()))
                }
            };

            self.close();
            return item.map(Err);
        }
    }

    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        self.close();
    }
}

async fn handle_response<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status();

    if status.is_success() {
        response.json().await.map_err(|e| ClientError::Server {
            status: status.as_u16(),
            detail: format!("Failed to parse response: {e}"),
        })
    } else {
        Err(ClientError::from_response(response).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let api = ChatApi::new(&ClientConfig::new("http://localhost:8000/")).unwrap();
        assert_eq!(api.url("/chat"), "http://localhost:8000/chat");
        assert!(!api.has_token());
        assert!(api.with_token("abc").has_token());
    }
}
