//! Per-turn state machine.
//!
//! ```text
//! prepare:  validate ─▶ resolve chat ─▶ claim chat in TurnRegistry
//! run:      store user message ─▶ chat_info ─▶ relay assistant output
//!             ├─ ok:  store reply ─▶ derive title ─▶ status{complete, chat}
//!             └─ err: error{message} ─▶ status{error}
//! ```
//!
//! Everything that can be refused with an HTTP status happens in `prepare`, so
//! a `409` or `404` never opens a stream. Once `run` starts, the only way out
//! is through a `status` chunk.
//!
//! If the reader goes away (closed channel, or a send that outlives
//! `send_timeout`) the turn keeps draining the assistant and stores the reply
//! without emitting anything further.

use futures::StreamExt;
use policychat_protocol::{
    ChatId, ChatInfo, ChatMessage, ChatSummary, Role, StreamChunk, TurnRequest,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::StreamConfig;
use super::registry::{TurnGuard, TurnRegistry};
use crate::assistant::{Assistant, AssistantEvent, AssistantRequest, AssistantStream};
use crate::chat::{ChatRepository, Page, StoreError};

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("message must not be empty")]
    EmptyMessage,

    #[error("a reply is already streaming in chat {0}")]
    Busy(ChatId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Failed,
}

/// A turn that passed every check and holds its chat.
#[derive(Debug)]
pub struct PreparedTurn {
    owner: String,
    chat: ChatSummary,
    created: bool,
    message: String,
    guard: TurnGuard,
}

impl PreparedTurn {
    pub fn chat_id(&self) -> ChatId {
        self.chat.id
    }

    /// `true` when this turn minted its chat.
    pub fn created(&self) -> bool {
        self.created
    }
}

#[derive(Clone)]
pub struct StreamEmitter {
    store: ChatRepository,
    assistant: Option<Arc<dyn Assistant>>,
    registry: TurnRegistry,
    config: StreamConfig,
}

impl StreamEmitter {
    pub fn new(
        store: ChatRepository,
        assistant: Option<Arc<dyn Assistant>>,
        config: StreamConfig,
    ) -> Self {
        Self {
            store,
            assistant,
            registry: TurnRegistry::new(),
            config,
        }
    }

    pub fn registry(&self) -> &TurnRegistry {
        &self.registry
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Validate the request, resolve its chat and claim the chat for this turn.
    pub async fn prepare(&self, owner: &str, request: &TurnRequest) -> Result<PreparedTurn, TurnError> {
        if request.message.trim().is_empty() {
            return Err(TurnError::EmptyMessage);
        }

        let resolved = self
            .store
            .resolve_for_turn(owner, request.chat_id, request.request_id.as_deref())
            .await?;

        let guard = self
            .registry
            .try_acquire(resolved.chat.id)
            .ok_or(TurnError::Busy(resolved.chat.id))?;

        Ok(PreparedTurn {
            owner: owner.to_string(),
            chat: resolved.chat,
            created: resolved.created,
            message: request.message.clone(),
            guard,
        })
    }

    /// Run `turn` on its own task. Chunks arrive on the returned receiver.
    pub fn start(&self, turn: PreparedTurn) -> (mpsc::Receiver<StreamChunk>, JoinHandle<TurnOutcome>) {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let span = info_span!("turn", chat_id = turn.chat.id, owner = %turn.owner);
        let emitter = self.clone();
        let handle = tokio::spawn(async move { emitter.run(turn, tx).await }.instrument(span));
        (rx, handle)
    }

    /// Drive one turn to its terminal `status`.
    pub async fn run(&self, turn: PreparedTurn, tx: mpsc::Sender<StreamChunk>) -> TurnOutcome {
        let PreparedTurn {
            owner,
            chat,
            created,
            message,
            guard,
        } = turn;
        let chat_id = chat.id;
        let mut sink = ChunkSink::new(tx, self.config.send_timeout());

        info!(created, "turn started");

        let history = self.history(&owner, &chat).await;

        let outcome = match self
            .store
            .append_message(&owner, chat_id, Role::User, &message)
            .await
        {
            Ok(_) => {
                sink.emit(chat_info(&chat)).await;
                self.answer(&owner, chat_id, history, message, &mut sink).await
            }
            Err(e) => {
                error!("storing user message failed: {e}");
                sink.emit(chat_info(&chat)).await;
                sink.emit(StreamChunk::error("Your message could not be saved."))
                    .await;
                sink.emit(StreamChunk::failed(Some(chat_id))).await;
                TurnOutcome::Failed
            }
        };

        info!(
            outcome = ?outcome,
            chunks = sink.sent,
            abandoned = sink.abandoned(),
            "turn finished"
        );
        drop(guard);
        outcome
    }

    async fn answer(
        &self,
        owner: &str,
        chat_id: ChatId,
        history: Vec<ChatMessage>,
        message: String,
        sink: &mut ChunkSink,
    ) -> TurnOutcome {
        let reply = match &self.assistant {
            None => Err("No assistant is configured.".to_string()),
            Some(assistant) => {
                let request = AssistantRequest {
                    owner: owner.to_string(),
                    chat_id,
                    history,
                    message,
                };
                debug!(assistant = assistant.name(), "invoking assistant");
                match assistant.respond(request).await {
                    Ok(stream) => self.relay(stream, sink).await,
                    Err(e) => {
                        warn!("assistant refused the turn: {e:#}");
                        Err(format!("The assistant could not answer: {e}"))
                    }
                }
            }
        };

        let text = match reply {
            Ok(text) => text,
            Err(message) => {
                sink.emit(StreamChunk::error(message)).await;
                sink.emit(StreamChunk::failed(Some(chat_id))).await;
                return TurnOutcome::Failed;
            }
        };

        if !text.is_empty()
            && let Err(e) = self
                .store
                .append_message(owner, chat_id, Role::Assistant, &text)
                .await
        {
            error!("storing assistant reply failed: {e}");
            sink.emit(StreamChunk::error("The answer could not be saved."))
                .await;
            sink.emit(StreamChunk::failed(Some(chat_id))).await;
            return TurnOutcome::Failed;
        }

        if let Err(e) = self.store.derive_title_if_unset(owner, chat_id).await {
            warn!("deriving chat title failed: {e}");
        }

        let snapshot = match self.store.get_session(owner, chat_id).await {
            Ok(chat) => Some(chat),
            Err(e) => {
                warn!("reading chat snapshot failed: {e}");
                None
            }
        };

        sink.emit(StreamChunk::complete(chat_id, snapshot)).await;
        TurnOutcome::Completed
    }

    /// Forward assistant output and collect the reply text.
    async fn relay(&self, mut stream: AssistantStream, sink: &mut ChunkSink) -> Result<String, String> {
        let idle = self.config.assistant_idle_timeout();
        let mut text = String::new();

        loop {
            let next = match tokio::time::timeout(idle, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(idle_ms = idle.as_millis() as u64, "assistant went quiet");
                    return Err("The assistant stopped responding.".to_string());
                }
            };

            match next {
                None => return Ok(text),
                Some(Ok(AssistantEvent::TextDelta(fragment))) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    text.push_str(&fragment);
                    sink.emit(StreamChunk::TextDelta(fragment)).await;
                }
                Some(Ok(AssistantEvent::ToolCall(call))) => {
                    sink.emit(StreamChunk::ToolCall(call)).await;
                }
                Some(Ok(AssistantEvent::ToolOutput(output))) => {
                    sink.emit(StreamChunk::ToolOutput(output)).await;
                }
                Some(Err(e)) => {
                    warn!("assistant failed mid-answer: {e:#}");
                    return Err(format!("The assistant could not finish this answer: {e}"));
                }
            }
        }
    }

    /// The most recent stored messages, oldest first.
    async fn history(&self, owner: &str, chat: &ChatSummary) -> Vec<ChatMessage> {
        if chat.message_count == 0 {
            return Vec::new();
        }
        let skip = (chat.message_count - Page::MAX_LIMIT).max(0);
        match self
            .store
            .list_messages(owner, chat.id, Page::new(Some(skip), Some(Page::MAX_LIMIT)))
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!("loading chat history failed: {e}");
                Vec::new()
            }
        }
    }
}

fn chat_info(chat: &ChatSummary) -> StreamChunk {
    StreamChunk::ChatInfo(ChatInfo {
        chat_id: chat.id,
        title: chat.title.clone(),
    })
}

/// The reader end of a turn. Once the reader is gone every emit is a no-op.
struct ChunkSink {
    tx: Option<mpsc::Sender<StreamChunk>>,
    send_timeout: Duration,
    sent: usize,
}

impl ChunkSink {
    fn new(tx: mpsc::Sender<StreamChunk>, send_timeout: Duration) -> Self {
        Self {
            tx: Some(tx),
            send_timeout,
            sent: 0,
        }
    }

    async fn emit(&mut self, chunk: StreamChunk) {
        let Some(tx) = self.tx.clone() else {
            return;
        };

        match tokio::time::timeout(self.send_timeout, tx.send(chunk)).await {
            Ok(Ok(())) => self.sent += 1,
            Ok(Err(_)) => {
                debug!("reader went away; finishing turn silently");
                self.tx = None;
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "reader stalled; finishing turn silently"
                );
                self.tx = None;
            }
        }
    }

    fn abandoned(&self) -> bool {
        self.tx.is_none()
    }
}
