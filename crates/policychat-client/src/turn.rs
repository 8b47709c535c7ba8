//! Turn reducer: folds stream chunks into the view.
//!
//! A turn is identified by a [`TurnId`]. Once the view moves on (another
//! session was opened, or the turn ended), chunks still arriving for that id
//! are ignored.

use policychat_protocol::{ChatId, Role, StreamChunk, TurnRequest, TurnStatus};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};
use crate::view::{ChatView, LocalMessage, ToolActivity, TurnId, TurnState};

/// A submitted turn, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnTicket {
    pub turn_id: TurnId,
    /// `None` asks the server for a new session.
    pub chat_id: Option<ChatId>,
    pub message: String,
    pub request_id: String,
}

impl TurnTicket {
    pub fn request(&self) -> TurnRequest {
        TurnRequest {
            user_id: None,
            message: self.message.clone(),
            chat_id: self.chat_id,
            request_id: Some(self.request_id.clone()),
        }
    }
}

/// What applying one chunk did to the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The chunk belongs to a turn the view no longer follows.
    Ignored,
    /// The turn is still streaming.
    Continue,
    /// The reply was finalized.
    Completed,
    /// The turn ended without a reply.
    Failed,
}

impl ChunkOutcome {
    pub fn is_done(self) -> bool {
        self != Self::Continue
    }
}

impl ChatView {
    /// Show the user's message and lock submission until the turn ends.
    pub fn begin_turn(&mut self, text: &str) -> ClientResult<TurnTicket> {
        if !self.can_submit() {
            return Err(ClientError::TurnInFlight);
        }
        if text.trim().is_empty() {
            return Err(ClientError::Validation("Message must not be empty".to_string()));
        }

        self.messages
            .push(LocalMessage::local(Role::User, text.to_string()));

        // A new conversation reuses the key of an attempt that never learned
        // its chat, so the server lands the retry in the chat it already minted.
        let retry = self.retry_request.take();
        let request_id = match self.active {
            None => retry.unwrap_or_else(|| Uuid::new_v4().to_string()),
            Some(_) => Uuid::new_v4().to_string(),
        };

        let turn_id = TurnId(self.next_turn);
        self.next_turn += 1;
        self.reply = None;
        self.turn = TurnState::Streaming {
            turn: turn_id,
            chat_id: self.active,
            request_id: request_id.clone(),
        };

        Ok(TurnTicket {
            turn_id,
            chat_id: self.active,
            message: text.to_string(),
            request_id,
        })
    }

    fn is_current(&self, turn_id: TurnId) -> bool {
        matches!(self.turn, TurnState::Streaming { turn, .. } if turn == turn_id)
    }

    pub fn apply_chunk(&mut self, turn_id: TurnId, chunk: StreamChunk) -> ChunkOutcome {
        if !self.is_current(turn_id) {
            debug!(kind = chunk.kind(), "ignoring chunk for an abandoned turn");
            return ChunkOutcome::Ignored;
        }

        match chunk {
            StreamChunk::ChatInfo(info) => {
                self.adopt(info.chat_id, info.title);
                ChunkOutcome::Continue
            }
            StreamChunk::TextDelta(fragment) => {
                self.reply.get_or_insert_default().text.push_str(&fragment);
                ChunkOutcome::Continue
            }
            StreamChunk::ToolCall(call) => {
                self.reply
                    .get_or_insert_default()
                    .tools
                    .push(ToolActivity { call, output: None });
                ChunkOutcome::Continue
            }
            StreamChunk::ToolOutput(output) => {
                let activity = self.reply.as_mut().and_then(|reply| {
                    reply
                        .tools
                        .iter_mut()
                        .rev()
                        .find(|a| a.call.id == output.tool_call_id)
                });
                match activity {
                    Some(activity) => activity.output = Some(output.output),
                    None => debug!(tool_call_id = %output.tool_call_id, "output for unknown tool call"),
                }
                ChunkOutcome::Continue
            }
            StreamChunk::Error(info) => {
                self.notify(info.message);
                self.end_turn();
                ChunkOutcome::Failed
            }
            StreamChunk::Status(info) => match info.status {
                TurnStatus::Complete => {
                    if let Some(chat_id) = info.chat_id {
                        self.adopt(chat_id, info.chat.as_ref().and_then(|c| c.title.clone()));
                    }
                    let finalized = self.finalize_reply();
                    match (&info.chat, info.chat_id) {
                        (Some(chat), _) => self.sessions.apply_snapshot(chat),
                        (None, Some(chat_id)) => {
                            self.sessions.note_activity(chat_id, 1 + i64::from(finalized))
                        }
                        (None, None) => {}
                    }
                    self.end_turn();
                    ChunkOutcome::Completed
                }
                TurnStatus::Error => {
                    self.notify("The answer could not be completed. Please try again.");
                    self.end_turn();
                    ChunkOutcome::Failed
                }
            },
        }
    }

    /// End `turn_id` locally after the connection dropped or went quiet.
    /// Returns `false` when the view no longer follows that turn.
    pub fn fail_turn(&mut self, turn_id: TurnId, reason: &ClientError) -> bool {
        if !self.is_current(turn_id) {
            return false;
        }
        self.report(reason);
        self.end_turn();
        true
    }

    /// First id wins; later announcements are ignored.
    fn adopt(&mut self, id: ChatId, title: Option<String>) {
        let TurnState::Streaming { chat_id, .. } = &mut self.turn else {
            return;
        };
        if chat_id.is_some() {
            return;
        }
        *chat_id = Some(id);
        if self.active.is_none() {
            self.active = Some(id);
            self.sessions.insert_new(id, title);
        }
    }

    fn finalize_reply(&mut self) -> bool {
        let Some(reply) = self.reply.take() else {
            return false;
        };
        if reply.text.is_empty() {
            return false;
        }
        let mut message = LocalMessage::local(Role::Assistant, reply.text);
        message.tools = reply.tools;
        self.messages.push(message);
        true
    }

    fn end_turn(&mut self) {
        if let TurnState::Streaming {
            chat_id: None,
            request_id,
            ..
        } = std::mem::replace(&mut self.turn, TurnState::Idle)
        {
            debug!(%request_id, "turn ended before its chat was known; keeping key for retry");
            self.retry_request = Some(request_id);
        }
        self.reply = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use policychat_protocol::{
        ChatInfo, ChatMessage, ChatSummary, StatusInfo, ToolCall, ToolOutput,
    };
    use serde_json::json;

    use crate::view::MessageKey;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_738_764_000 + secs, 0).unwrap()
    }

    fn info(chat_id: ChatId, title: Option<&str>) -> StreamChunk {
        StreamChunk::ChatInfo(ChatInfo {
            chat_id,
            title: title.map(str::to_string),
        })
    }

    fn summary(id: ChatId, title: Option<&str>, updated: i64, count: i64) -> ChatSummary {
        ChatSummary {
            id,
            title: title.map(str::to_string),
            created_at: at(0),
            updated_at: at(updated),
            is_archived: false,
            message_count: count,
        }
    }

    #[test]
    fn test_new_conversation_turn() {
        let mut view = ChatView::new();
        let ticket = view.begin_turn("What is the contrast policy?").unwrap();
        assert_eq!(ticket.chat_id, None);
        assert!(!view.can_submit());
        assert_eq!(view.messages().len(), 1);
        assert_eq!(ticket.request().request_id.as_deref(), Some(ticket.request_id.as_str()));

        let turn = ticket.turn_id;
        assert_eq!(view.apply_chunk(turn, info(501, None)), ChunkOutcome::Continue);
        assert_eq!(view.active_chat(), Some(501));
        assert_eq!(view.sessions().entries()[0].id, 501);

        view.apply_chunk(turn, StreamChunk::text("Pre-medicate "));
        view.apply_chunk(turn, StreamChunk::text("patients."));
        assert_eq!(view.reply().unwrap().text, "Pre-medicate patients.");

        let done = view.apply_chunk(
            turn,
            StreamChunk::complete(501, Some(summary(501, Some("What is the contrast policy?"), 10, 2))),
        );
        assert_eq!(done, ChunkOutcome::Completed);
        assert!(view.can_submit());
        assert!(view.reply().is_none());

        let messages = view.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Pre-medicate patients.");
        assert!(matches!(messages[1].key, MessageKey::Local(_)));

        let entry = view.sessions().get(501).unwrap();
        assert_eq!(entry.title(), Some("What is the contrast policy?"));
        assert_eq!(entry.message_count, 2);
    }

    #[test]
    fn test_chat_info_adopted_once() {
        let mut view = ChatView::new();
        let turn = view.begin_turn("hello").unwrap().turn_id;

        view.apply_chunk(turn, info(7, None));
        view.apply_chunk(turn, info(8, Some("other")));
        assert_eq!(view.active_chat(), Some(7));
        assert!(view.sessions().get(8).is_none());
    }

    #[test]
    fn test_follow_up_keeps_active_session() {
        let mut view = ChatView::new();
        view.apply_listing(&[summary(3, Some("Leave"), 5, 2)]);
        view.switch_session(Some(3), Vec::new());

        let ticket = view.begin_turn("And part-time?").unwrap();
        assert_eq!(ticket.chat_id, Some(3));
        view.apply_chunk(ticket.turn_id, info(3, Some("Leave")));
        view.apply_chunk(ticket.turn_id, StreamChunk::text("Pro rata."));
        view.apply_chunk(ticket.turn_id, StreamChunk::complete(3, None));

        assert_eq!(view.active_chat(), Some(3));
        assert_eq!(view.sessions().entries().len(), 1);
        assert_eq!(view.sessions().get(3).unwrap().message_count, 4);
    }

    #[test]
    fn test_second_submit_is_refused() {
        let mut view = ChatView::new();
        view.begin_turn("first").unwrap();
        assert!(matches!(view.begin_turn("second"), Err(ClientError::TurnInFlight)));
        assert_eq!(view.messages().len(), 1);
    }

    #[test]
    fn test_blank_message_is_refused() {
        let mut view = ChatView::new();
        assert!(matches!(view.begin_turn("  \n"), Err(ClientError::Validation(_))));
        assert!(view.can_submit());
        assert!(view.messages().is_empty());
    }

    #[test]
    fn test_empty_reply_is_not_finalized() {
        let mut view = ChatView::new();
        let turn = view.begin_turn("hi").unwrap().turn_id;
        view.apply_chunk(turn, info(1, None));
        view.apply_chunk(turn, StreamChunk::complete(1, None));
        assert_eq!(view.messages().len(), 1);
        assert_eq!(view.sessions().get(1).unwrap().message_count, 1);
    }

    #[test]
    fn test_tool_activity_stays_out_of_content() {
        let mut view = ChatView::new();
        let turn = view.begin_turn("contrast?").unwrap().turn_id;
        view.apply_chunk(turn, info(1, None));
        view.apply_chunk(
            turn,
            StreamChunk::ToolCall(ToolCall {
                id: "call_1".into(),
                name: "search_policies".into(),
                input: json!({"query": "contrast"}),
            }),
        );
        view.apply_chunk(
            turn,
            StreamChunk::ToolOutput(ToolOutput {
                tool_call_id: "call_1".into(),
                output: json!(["RAD-014"]),
            }),
        );
        view.apply_chunk(turn, StreamChunk::text("See RAD-014."));
        view.apply_chunk(turn, StreamChunk::complete(1, None));

        let reply = &view.messages()[1];
        assert_eq!(reply.content, "See RAD-014.");
        assert_eq!(reply.tools.len(), 1);
        assert_eq!(reply.tools[0].call.name, "search_policies");
        assert_eq!(reply.tools[0].output, Some(json!(["RAD-014"])));
    }

    #[test]
    fn test_error_chunk_drops_partial_reply() {
        let mut view = ChatView::new();
        let turn = view.begin_turn("badge?").unwrap().turn_id;
        view.apply_chunk(turn, info(1, None));
        view.apply_chunk(turn, StreamChunk::text("Badges are "));

        let outcome = view.apply_chunk(turn, StreamChunk::error("assistant unavailable"));
        assert_eq!(outcome, ChunkOutcome::Failed);
        assert!(view.can_submit());
        assert!(view.reply().is_none());
        assert_eq!(view.messages().len(), 1);
        assert_eq!(view.notices()[0].message, "assistant unavailable");

        // The trailing status belongs to a turn that already ended.
        assert_eq!(
            view.apply_chunk(turn, StreamChunk::failed(Some(1))),
            ChunkOutcome::Ignored
        );
        assert_eq!(view.notices().len(), 1);
    }

    #[test]
    fn test_status_error_fails_turn() {
        let mut view = ChatView::new();
        let turn = view.begin_turn("badge?").unwrap().turn_id;
        view.apply_chunk(turn, StreamChunk::text("partial"));
        let outcome = view.apply_chunk(
            turn,
            StreamChunk::Status(StatusInfo {
                status: TurnStatus::Error,
                chat_id: None,
                chat: None,
            }),
        );
        assert_eq!(outcome, ChunkOutcome::Failed);
        assert!(view.can_submit());
        assert!(view.reply().is_none());
        assert_eq!(view.notices().len(), 1);
    }

    #[test]
    fn test_fail_turn_reenables_submission() {
        let mut view = ChatView::new();
        let turn = view.begin_turn("hello").unwrap().turn_id;
        view.apply_chunk(turn, StreamChunk::text("Hel"));

        assert!(view.fail_turn(turn, &ClientError::Stream("closed".into())));
        assert!(view.can_submit());
        assert!(view.reply().is_none());
        assert_eq!(view.messages().len(), 1);
        assert!(!view.fail_turn(turn, &ClientError::Stream("closed".into())));
        assert_eq!(view.notices().len(), 1);
    }

    #[test]
    fn test_retry_after_early_failure_reuses_request_id() {
        let mut view = ChatView::new();
        let first = view.begin_turn("Leave carry-over?").unwrap();
        view.fail_turn(first.turn_id, &ClientError::Stream("closed".into()));

        let retry = view.begin_turn("Leave carry-over?").unwrap();
        assert_eq!(retry.chat_id, None);
        assert_eq!(retry.request_id, first.request_id);

        view.apply_chunk(retry.turn_id, info(9, None));
        view.apply_chunk(retry.turn_id, StreamChunk::complete(9, None));
        view.switch_session(None, Vec::new());
        let next = view.begin_turn("Another topic").unwrap();
        assert_ne!(next.request_id, first.request_id);
    }

    #[test]
    fn test_failure_after_chat_known_mints_fresh_key() {
        let mut view = ChatView::new();
        let first = view.begin_turn("hello").unwrap();
        view.apply_chunk(first.turn_id, info(3, None));
        view.fail_turn(first.turn_id, &ClientError::Timeout(std::time::Duration::from_secs(1)));

        let retry = view.begin_turn("hello").unwrap();
        assert_eq!(retry.chat_id, Some(3));
        assert_ne!(retry.request_id, first.request_id);
    }

    #[test]
    fn test_opening_a_session_forgets_retry_key() {
        let mut view = ChatView::new();
        let first = view.begin_turn("hello").unwrap();
        view.fail_turn(first.turn_id, &ClientError::Stream("closed".into()));

        view.switch_session(Some(4), Vec::new());
        view.switch_session(None, Vec::new());
        let next = view.begin_turn("hello").unwrap();
        assert_ne!(next.request_id, first.request_id);
    }

    #[test]
    fn test_unauthorized_failure_requests_sign_in() {
        let mut view = ChatView::new();
        let turn = view.begin_turn("hello").unwrap().turn_id;
        view.fail_turn(turn, &ClientError::Unauthorized("expired".into()));
        assert!(view.reauth_required());
        view.clear_reauth();
        assert!(!view.reauth_required());
    }

    #[test]
    fn test_switching_session_abandons_turn() {
        let mut view = ChatView::new();
        let turn = view.begin_turn("first question").unwrap().turn_id;
        view.apply_chunk(turn, info(1, None));
        view.apply_chunk(turn, StreamChunk::text("Partial"));

        let history = vec![ChatMessage {
            id: 11,
            role: Role::User,
            content: "older".into(),
            created_at: at(0),
        }];
        view.switch_session(Some(2), history);
        assert!(view.can_submit());
        assert!(view.reply().is_none());
        assert_eq!(view.active_chat(), Some(2));
        assert_eq!(view.messages()[0].key, MessageKey::Stored(11));

        assert_eq!(
            view.apply_chunk(turn, StreamChunk::text(" more")),
            ChunkOutcome::Ignored
        );
        assert_eq!(
            view.apply_chunk(turn, StreamChunk::complete(1, None)),
            ChunkOutcome::Ignored
        );
        assert_eq!(view.messages().len(), 1);
    }

    #[test]
    fn test_snapshot_keeps_pending_local_title() {
        let mut view = ChatView::new();
        view.apply_listing(&[summary(4, Some("Old"), 5, 2)]);
        view.switch_session(Some(4), Vec::new());
        view.rename(4, "Renamed").unwrap();

        let turn = view.begin_turn("more").unwrap().turn_id;
        view.apply_chunk(turn, StreamChunk::text("ok"));
        view.apply_chunk(turn, StreamChunk::complete(4, Some(summary(4, Some("Old"), 20, 4))));

        let entry = view.sessions().get(4).unwrap();
        assert_eq!(entry.title(), Some("Renamed"));
        assert_eq!(entry.message_count, 4);
    }
}
