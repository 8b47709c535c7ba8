//! Drives the view against a live server.

use policychat_protocol::{ChatId, ChatSummary};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::api::ChatApi;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::reconciler::MutationId;
use crate::turn::ChunkOutcome;
use crate::view::ChatView;

/// A signed-in chat client.
///
/// The view lock is only taken between awaits, so a UI can read the view
/// while a turn streams.
pub struct ChatClient {
    api: ChatApi,
    view: Arc<Mutex<ChatView>>,
    config: ClientConfig,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        Ok(Self {
            api: ChatApi::new(&config)?,
            view: Arc::new(Mutex::new(ChatView::new())),
            config,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api.set_token(token);
        self
    }

    pub fn api(&self) -> &ChatApi {
        &self.api
    }

    /// Shared handle to the view.
    pub fn view(&self) -> Arc<Mutex<ChatView>> {
        Arc::clone(&self.view)
    }

    /// Exchange credentials for a token and use it from now on.
    #[instrument(skip(self, password))]
    pub async fn login(&mut self, username: &str, password: &str) -> ClientResult<()> {
        match self.api.issue_token(username, password).await {
            Ok(token) => {
                self.api.set_token(token.access_token);
                self.view.lock().await.clear_reauth();
                info!("signed in");
                Ok(())
            }
            Err(e) => Err(self.surface(e).await),
        }
    }

    /// Merge the server's list of active (or archived) sessions.
    pub async fn refresh(&self, archived: bool) -> ClientResult<()> {
        match self.api.list_chats(archived, None, None).await {
            Ok(page) => {
                debug!(count = page.len(), archived, "session list refreshed");
                self.view.lock().await.apply_listing(&page);
                Ok(())
            }
            Err(e) => Err(self.surface(e).await),
        }
    }

    /// Show a stored session, or a blank conversation for `None`.
    pub async fn open_session(&self, chat_id: Option<ChatId>) -> ClientResult<()> {
        let Some(chat_id) = chat_id else {
            self.view.lock().await.switch_session(None, Vec::new());
            return Ok(());
        };

        match self.api.list_messages(chat_id, None, None).await {
            Ok(history) => {
                self.view
                    .lock()
                    .await
                    .switch_session(Some(chat_id), history);
                Ok(())
            }
            Err(e) => {
                let mut view = self.view.lock().await;
                if e.is_not_found() {
                    view.discard_session(chat_id);
                }
                view.report(&e);
                Err(e)
            }
        }
    }

    /// Send `text` in the active session and stream the reply into the view.
    ///
    /// Returns once the turn ends. A dropped connection or a stream that
    /// stays silent past the inactivity timeout fails the turn, so
    /// submission is always re-enabled.
    #[instrument(skip(self, text))]
    pub async fn send_turn(&self, text: &str) -> ClientResult<ChunkOutcome> {
        let ticket = {
            let mut view = self.view.lock().await;
            view.begin_turn(text).inspect_err(|e| view.report(e))?
        };
        debug!(chat_id = ?ticket.chat_id, request_id = %ticket.request_id, "turn submitted");

        let mut stream = match self.api.open_turn_stream(&ticket.request()) {
            Ok(stream) => stream,
            Err(e) => {
                self.view.lock().await.fail_turn(ticket.turn_id, &e);
                return Err(e);
            }
        };

        let timeout = self.config.inactivity_timeout;
        let error = loop {
            let next = match tokio::time::timeout(timeout, stream.next_chunk()).await {
                Ok(next) => next,
                Err(_) => break ClientError::Timeout(timeout),
            };
            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => break e,
                None => {
                    break ClientError::Stream("stream closed before the turn finished".into());
                }
            };

            let outcome = self.view.lock().await.apply_chunk(ticket.turn_id, chunk);
            if outcome.is_done() {
                debug!(?outcome, "turn finished");
                return Ok(outcome);
            }
        };

        stream.close();
        warn!("turn failed: {error}");
        self.view.lock().await.fail_turn(ticket.turn_id, &error);
        Err(error)
    }

    pub async fn rename(&self, chat_id: ChatId, new_title: &str) -> ClientResult<ChatSummary> {
        let (mutation, title) = self.view.lock().await.rename(chat_id, new_title)?;
        let result = self.api.rename_chat(chat_id, &title).await;
        self.settle(mutation, result).await
    }

    pub async fn archive(&self, chat_id: ChatId) -> ClientResult<ChatSummary> {
        let mutation = self.view.lock().await.set_archived(chat_id, true)?;
        let result = self.api.archive_chat(chat_id).await;
        self.settle(mutation, result).await
    }

    pub async fn unarchive(&self, chat_id: ChatId) -> ClientResult<ChatSummary> {
        let mutation = self.view.lock().await.set_archived(chat_id, false)?;
        let result = self.api.unarchive_chat(chat_id).await;
        self.settle(mutation, result).await
    }

    /// Archive every active session. Returns the server's count.
    pub async fn archive_all(&self) -> ClientResult<u64> {
        let mutation = self.view.lock().await.archive_all();
        match self.api.archive_all().await {
            Ok(response) => {
                self.view.lock().await.confirm_batch(mutation);
                info!(count = response.count, "archived all sessions");
                // The response carries no stamps; pull them from the archived listing.
                match self.api.list_chats(true, None, None).await {
                    Ok(page) => self.view.lock().await.apply_listing(&page),
                    Err(e) => warn!("reading archived sessions failed: {e}"),
                }
                Ok(response.count)
            }
            Err(e) => {
                self.view.lock().await.reject(mutation, &e);
                Err(e)
            }
        }
    }

    async fn settle(
        &self,
        mutation: MutationId,
        result: ClientResult<ChatSummary>,
    ) -> ClientResult<ChatSummary> {
        let mut view = self.view.lock().await;
        match result {
            Ok(summary) => {
                view.confirm(mutation, &summary);
                Ok(summary)
            }
            Err(e) => {
                view.reject(mutation, &e);
                Err(e)
            }
        }
    }

    async fn surface(&self, error: ClientError) -> ClientError {
        self.view.lock().await.report(&error);
        error
    }
}
