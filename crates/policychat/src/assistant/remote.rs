//! Relay answers from a retrieval service that speaks the chunk protocol over SSE.
//!
//! The service receives the [`AssistantRequest`] as JSON and answers with
//! `text_delta`, `tool_call` and `tool_output` chunks, finishing with
//! `status{complete}`. An `error` chunk, a `status{error}`, a transport failure
//! or a stream that ends without `status` fails the turn.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use futures::StreamExt;
use policychat_protocol::{StreamChunk, TurnStatus};
use reqwest_eventsource::{Event as SseEvent, EventSource, retry::Never};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{Assistant, AssistantEvent, AssistantRequest, AssistantStream};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Endpoint that accepts the request and streams chunks back.
    pub url: Option<String>,
    /// Bearer token for the service. Accepts `env:VAR_NAME`.
    pub api_key: Option<String>,
    pub connect_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            connect_timeout_secs: 10,
        }
    }
}

pub struct RemoteAssistant {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl RemoteAssistant {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::from_config(&RemoteConfig {
            url: Some(url.into()),
            ..Default::default()
        })
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .context("assistant.remote.url is required for the remote assistant")?;

        let api_key = match config.api_key.as_deref() {
            Some(value) => match value.strip_prefix("env:") {
                Some(var) => Some(
                    std::env::var(var)
                        .with_context(|| format!("reading assistant api key from {var}"))?,
                ),
                None => Some(value.to_string()),
            },
            None => None,
        };

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url,
            api_key,
        })
    }
}

#[async_trait]
impl Assistant for RemoteAssistant {
    fn name(&self) -> &str {
        "remote"
    }

    async fn respond(&self, request: AssistantRequest) -> Result<AssistantStream> {
        let mut builder = self
            .client
            .post(&self.url)
            .header("Accept", "text/event-stream")
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let mut es = EventSource::new(builder).context("building assistant request")?;
        es.set_retry_policy(Box::new(Never));
        debug!(chat_id = request.chat_id, url = %self.url, "relaying remote assistant");

        let stream = futures::stream::unfold(Some(es), |state| async move {
            let mut es = state?;
            loop {
                let item = match es.next().await {
                    None | Some(Err(reqwest_eventsource::Error::StreamEnded)) => {
                        Err(anyhow!("assistant stream ended before completion"))
                    }
                    Some(Ok(SseEvent::Open)) => continue,
                    Some(Ok(SseEvent::Message(msg))) => match interpret(&msg.data) {
                        Ok(Relay::Event(event)) => return Some((Ok(event), Some(es))),
                        Ok(Relay::Skip) => continue,
                        Ok(Relay::Done) => {
                            es.close();
                            return None;
                        }
                        Err(e) => Err(e),
                    },
                    Some(Err(e)) => {
                        warn!("remote assistant stream error: {:?}", e);
                        Err(anyhow!("assistant stream failed: {e}"))
                    }
                };
                es.close();
                return Some((item, None));
            }
        });

        Ok(Box::pin(stream))
    }
}

enum Relay {
    Event(AssistantEvent),
    Skip,
    Done,
}

fn interpret(data: &str) -> Result<Relay> {
    let chunk: StreamChunk =
        serde_json::from_str(data).with_context(|| format!("unreadable assistant chunk: {data}"))?;

    Ok(match chunk {
        StreamChunk::TextDelta(text) => Relay::Event(AssistantEvent::TextDelta(text)),
        StreamChunk::ToolCall(call) => Relay::Event(AssistantEvent::ToolCall(call)),
        StreamChunk::ToolOutput(output) => Relay::Event(AssistantEvent::ToolOutput(output)),
        StreamChunk::ChatInfo(_) => Relay::Skip,
        StreamChunk::Error(info) => bail!("{}", info.message),
        StreamChunk::Status(info) => match info.status {
            TurnStatus::Complete => Relay::Done,
            TurnStatus::Error => bail!("assistant reported an error"),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        response::sse::{Event, Sse},
        routing::post,
    };
    use std::convert::Infallible;

    async fn serve(chunks: Vec<StreamChunk>) -> String {
        let app = Router::new().route(
            "/answer",
            post(move || {
                let chunks = chunks.clone();
                async move {
                    let events = chunks.into_iter().map(|chunk| {
                        Ok::<_, Infallible>(
                            Event::default().data(serde_json::to_string(&chunk).unwrap()),
                        )
                    });
                    Sse::new(futures::stream::iter(events))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/answer")
    }

    fn request() -> AssistantRequest {
        AssistantRequest {
            owner: "usr_a".to_string(),
            chat_id: 7,
            history: Vec::new(),
            message: "contrast?".to_string(),
        }
    }

    #[test]
    fn test_interpret_chunks() {
        assert!(matches!(
            interpret(r#"{"type":"text_delta","data":"Hi"}"#).unwrap(),
            Relay::Event(AssistantEvent::TextDelta(_))
        ));
        assert!(matches!(
            interpret(r#"{"type":"status","data":{"status":"complete","chat_id":null}}"#).unwrap(),
            Relay::Done
        ));
        assert!(interpret(r#"{"type":"error","data":{"message":"index offline"}}"#).is_err());
        assert!(interpret("not json").is_err());
    }

    #[tokio::test]
    async fn test_relays_until_complete() {
        let url = serve(vec![
            StreamChunk::text("Contrast "),
            StreamChunk::text("policy."),
            StreamChunk::complete(7, None),
        ])
        .await;

        let assistant = RemoteAssistant::new(url).unwrap();
        let events: Vec<_> = assistant.respond(request()).await.unwrap().collect().await;

        let text: String = events
            .into_iter()
            .map(|e| match e.unwrap() {
                AssistantEvent::TextDelta(t) => t,
                other => panic!("unexpected event: {other:?}"),
            })
            .collect();
        assert_eq!(text, "Contrast policy.");
    }

    #[tokio::test]
    async fn test_stream_without_status_fails() {
        let url = serve(vec![StreamChunk::text("partial")]).await;

        let assistant = RemoteAssistant::new(url).unwrap();
        let events: Vec<_> = assistant.respond(request()).await.unwrap().collect().await;

        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(events[1].is_err());
    }

    #[tokio::test]
    async fn test_error_chunk_fails() {
        let url = serve(vec![
            StreamChunk::error("index offline"),
            StreamChunk::failed(None),
        ])
        .await;

        let assistant = RemoteAssistant::new(url).unwrap();
        let events: Vec<_> = assistant.respond(request()).await.unwrap().collect().await;

        assert_eq!(events.len(), 1);
        assert!(
            events[0]
                .as_ref()
                .unwrap_err()
                .to_string()
                .contains("index offline")
        );
    }
}
