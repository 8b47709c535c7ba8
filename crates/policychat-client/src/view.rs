//! What the user sees: the session list, the active conversation and the
//! reply being written.

use chrono::{DateTime, Utc};
use policychat_protocol::{ChatId, ChatMessage, ChatSummary, Role, ToolCall};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ClientError;
use crate::reconciler::{MutationId, SessionList};

/// Identity of a message in the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// Loaded from the server.
    Stored(i64),
    /// Created locally during a turn.
    Local(Uuid),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalMessage {
    pub key: MessageKey,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub tools: Vec<ToolActivity>,
}

impl LocalMessage {
    pub(crate) fn local(role: Role, content: String) -> Self {
        Self {
            key: MessageKey::Local(Uuid::new_v4()),
            role,
            content,
            created_at: Utc::now(),
            tools: Vec::new(),
        }
    }
}

impl From<ChatMessage> for LocalMessage {
    fn from(message: ChatMessage) -> Self {
        Self {
            key: MessageKey::Stored(message.id),
            role: message.role,
            content: message.content,
            created_at: message.created_at,
            tools: Vec::new(),
        }
    }
}

/// A tool the assistant invoked, and its result once known.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolActivity {
    pub call: ToolCall,
    pub output: Option<Value>,
}

/// The assistant reply while it is still streaming.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyBuffer {
    pub text: String,
    pub tools: Vec<ToolActivity>,
}

/// Identifies one submitted turn within a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnId(pub(crate) u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TurnState {
    Idle,
    Streaming {
        turn: TurnId,
        chat_id: Option<ChatId>,
        request_id: String,
    },
}

/// A message for the user about something that went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Client-local view state. Mutated only through the turn reducer and the
/// session list operations below.
#[derive(Debug)]
pub struct ChatView {
    pub(crate) sessions: SessionList,
    pub(crate) active: Option<ChatId>,
    pub(crate) messages: Vec<LocalMessage>,
    pub(crate) reply: Option<ReplyBuffer>,
    pub(crate) turn: TurnState,
    pub(crate) next_turn: u64,
    /// Key of a new-conversation turn that failed before the server named its chat.
    pub(crate) retry_request: Option<String>,
    notices: Vec<Notice>,
    reauth_required: bool,
}

impl Default for ChatView {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatView {
    pub fn new() -> Self {
        Self {
            sessions: SessionList::new(),
            active: None,
            messages: Vec::new(),
            reply: None,
            turn: TurnState::Idle,
            next_turn: 0,
            retry_request: None,
            notices: Vec::new(),
            reauth_required: false,
        }
    }

    pub fn sessions(&self) -> &SessionList {
        &self.sessions
    }

    pub fn active_chat(&self) -> Option<ChatId> {
        self.active
    }

    /// Finalized messages of the active session, oldest first.
    pub fn messages(&self) -> &[LocalMessage] {
        &self.messages
    }

    /// The reply still being written, if any.
    pub fn reply(&self) -> Option<&ReplyBuffer> {
        self.reply.as_ref()
    }

    pub fn can_submit(&self) -> bool {
        self.turn == TurnState::Idle
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn reauth_required(&self) -> bool {
        self.reauth_required
    }

    /// Cleared after the user signs in again.
    pub fn clear_reauth(&mut self) {
        self.reauth_required = false;
    }

    pub(crate) fn notify(&mut self, message: impl Into<String>) {
        self.notices.push(Notice {
            message: message.into(),
            at: Utc::now(),
        });
    }

    /// Surface `error` to the user.
    pub fn report(&mut self, error: &ClientError) {
        if error.requires_reauth() {
            self.reauth_required = true;
        }
        self.notify(error.user_message());
    }

    /// Show `id` (or a fresh conversation for `None`) with its stored history.
    ///
    /// Any reply still streaming belongs to the previous session and is
    /// dropped from view.
    pub fn switch_session(&mut self, id: Option<ChatId>, history: Vec<ChatMessage>) {
        self.turn = TurnState::Idle;
        self.reply = None;
        if id.is_some() {
            self.retry_request = None;
        }
        self.active = id;
        self.messages = history.into_iter().map(LocalMessage::from).collect();
    }

    pub fn apply_listing(&mut self, page: &[ChatSummary]) {
        self.sessions.apply_listing(page);
    }

    /// Forget a session the server no longer knows.
    pub fn discard_session(&mut self, id: ChatId) {
        self.sessions.remove(id);
        if self.active == Some(id) {
            self.switch_session(None, Vec::new());
        }
    }

    pub fn rename(&mut self, id: ChatId, new_title: &str) -> Result<(MutationId, String), ClientError> {
        self.sessions.rename(id, new_title).inspect_err(|e| self.report(e))
    }

    pub fn set_archived(&mut self, id: ChatId, archived: bool) -> Result<MutationId, ClientError> {
        self.sessions
            .set_archived(id, archived)
            .inspect_err(|e| self.report(e))
    }

    pub fn archive_all(&mut self) -> MutationId {
        self.sessions.archive_all().0
    }

    pub fn confirm(&mut self, mutation: MutationId, summary: &ChatSummary) {
        self.sessions.confirm(mutation, summary);
    }

    pub fn confirm_batch(&mut self, mutation: MutationId) {
        self.sessions.confirm_batch(mutation);
    }

    /// Roll back `mutation` and tell the user why.
    pub fn reject(&mut self, mutation: MutationId, error: &ClientError) {
        let dropped = self.sessions.reject(mutation, error);
        self.report(error);
        if let Some(active) = self.active
            && dropped.contains(&active)
        {
            self.switch_session(None, Vec::new());
        }
    }
}
