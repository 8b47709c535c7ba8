//! Session list with optimistic mutations.
//!
//! Every mutable field carries the server `updated_at` it was last confirmed
//! at. A server snapshot replaces a field only when it is not older than the
//! field and no local mutation of that field is still waiting on the server.
//! Call order between the REST path and the streaming path does not matter.
//!
//! ```text
//!   rename/set_archived/archive_all ──▶ value applied now, MutationId returned
//!        ├─ confirm(id, summary)  ──▶ server value wins unless a newer local edit is pending
//!        └─ reject(id, err)       ──▶ restore the pre-mutation value (or hand it to the newer edit)
//! ```

use chrono::{DateTime, Utc};
use policychat_protocol::{ChatId, ChatSummary, validate_title};
use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// A field value and the server time it was last confirmed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamped<T> {
    pub value: T,
    pub updated_at: DateTime<Utc>,
}

impl<T> Stamped<T> {
    pub fn new(value: T, updated_at: DateTime<Utc>) -> Self {
        Self { value, updated_at }
    }

    /// Not yet confirmed by the server; any snapshot replaces it.
    fn unconfirmed(value: T) -> Self {
        Self::new(value, DateTime::<Utc>::MIN_UTC)
    }

    fn accepts(&self, updated_at: DateTime<Utc>) -> bool {
        updated_at >= self.updated_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub id: ChatId,
    pub title: Stamped<Option<String>>,
    pub archived: Stamped<bool>,
    pub created_at: DateTime<Utc>,
    /// Latest activity seen for the session. Orders the list.
    pub updated_at: DateTime<Utc>,
    pub message_count: i64,
}

impl SessionEntry {
    fn from_summary(summary: &ChatSummary) -> Self {
        Self {
            id: summary.id,
            title: Stamped::new(summary.title.clone(), summary.updated_at),
            archived: Stamped::new(summary.is_archived, summary.updated_at),
            created_at: summary.created_at,
            updated_at: summary.updated_at,
            message_count: summary.message_count,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.title.value.as_deref()
    }

    pub fn is_archived(&self) -> bool {
        self.archived.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Archived,
}

#[derive(Debug, Clone)]
enum Previous {
    Title(Stamped<Option<String>>),
    Archived(Stamped<bool>),
}

impl Previous {
    fn field(&self) -> Field {
        match self {
            Self::Title(_) => Field::Title,
            Self::Archived(_) => Field::Archived,
        }
    }
}

/// One field of one session changed locally and not yet settled.
#[derive(Debug, Clone)]
struct Pending {
    id: MutationId,
    chat_id: ChatId,
    previous: Previous,
    /// Accepted by a response that carried no stamp. The field now waits for
    /// a snapshot showing the confirmed value.
    awaiting: bool,
}

impl Pending {
    fn new(id: MutationId, chat_id: ChatId, previous: Previous) -> Self {
        Self {
            id,
            chat_id,
            previous,
            awaiting: false,
        }
    }

    fn touches(&self, chat_id: ChatId, field: Field) -> bool {
        self.chat_id == chat_id && self.previous.field() == field
    }
}

/// The local list of sessions.
#[derive(Debug, Default)]
pub struct SessionList {
    entries: Vec<SessionEntry>,
    pending: Vec<Pending>,
    next_mutation: u64,
}

impl SessionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// All known sessions, most recently updated first.
    pub fn entries(&self) -> &[SessionEntry] {
        &self.entries
    }

    /// Sessions with the given archive flag, most recently updated first.
    pub fn filtered(&self, archived: bool) -> impl Iterator<Item = &SessionEntry> {
        self.entries.iter().filter(move |e| e.archived.value == archived)
    }

    pub fn get(&self, id: ChatId) -> Option<&SessionEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    fn get_mut(&mut self, id: ChatId) -> Option<&mut SessionEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// Mutations still waiting on a server answer.
    pub fn has_pending(&self) -> bool {
        self.pending.iter().any(|p| !p.awaiting)
    }

    fn is_pending(&self, chat_id: ChatId, field: Field) -> bool {
        self.pending
            .iter()
            .any(|p| !p.awaiting && p.touches(chat_id, field))
    }

    fn is_awaiting(&self, chat_id: ChatId, field: Field) -> bool {
        self.pending
            .iter()
            .any(|p| p.awaiting && p.touches(chat_id, field))
    }

    fn clear_awaiting(&mut self, chat_id: ChatId, field: Field) {
        self.pending
            .retain(|p| !(p.awaiting && p.touches(chat_id, field)));
    }

    /// Merge a page from the server.
    pub fn apply_listing(&mut self, page: &[ChatSummary]) {
        for summary in page {
            self.merge(summary);
        }
        self.sort();
    }

    /// Merge one server snapshot of a session.
    pub fn apply_snapshot(&mut self, summary: &ChatSummary) {
        self.merge(summary);
        self.sort();
    }

    /// Add a session the server just minted, at the head of the list.
    pub fn insert_new(&mut self, id: ChatId, title: Option<String>) {
        if self.get(id).is_some() {
            return;
        }
        let now = Utc::now();
        let head = self
            .entries
            .first()
            .map_or(now, |e| e.updated_at.max(now));
        self.entries.insert(
            0,
            SessionEntry {
                id,
                title: Stamped::unconfirmed(title),
                archived: Stamped::unconfirmed(false),
                created_at: now,
                updated_at: head,
                message_count: 0,
            },
        );
    }

    /// Record local progress on a session when no snapshot came back.
    pub fn note_activity(&mut self, id: ChatId, new_messages: i64) {
        if let Some(entry) = self.get_mut(id) {
            entry.message_count += new_messages;
            entry.updated_at = entry.updated_at.max(Utc::now());
        }
        self.sort();
    }

    pub fn remove(&mut self, id: ChatId) {
        self.entries.retain(|e| e.id != id);
        self.pending.retain(|p| p.chat_id != id);
    }

    /// Rename optimistically. Returns the mutation and the validated title to send.
    pub fn rename(&mut self, id: ChatId, new_title: &str) -> ClientResult<(MutationId, String)> {
        let title = validate_title(new_title).map_err(|e| ClientError::Validation(e.to_string()))?;
        let mutation = self.next_id();

        let entry = self
            .get_mut(id)
            .ok_or_else(|| ClientError::NotFound(format!("chat {id}")))?;
        let previous = Previous::Title(entry.title.clone());
        entry.title.value = Some(title.clone());

        self.pending.push(Pending::new(mutation, id, previous));
        Ok((mutation, title))
    }

    /// Archive or unarchive optimistically.
    pub fn set_archived(&mut self, id: ChatId, archived: bool) -> ClientResult<MutationId> {
        let mutation = self.next_id();

        let entry = self
            .get_mut(id)
            .ok_or_else(|| ClientError::NotFound(format!("chat {id}")))?;
        let previous = Previous::Archived(entry.archived.clone());
        entry.archived.value = archived;

        self.clear_awaiting(id, Field::Archived);
        self.pending.push(Pending::new(mutation, id, previous));
        Ok(mutation)
    }

    /// Archive every active session optimistically. Returns how many changed locally.
    pub fn archive_all(&mut self) -> (MutationId, usize) {
        let mutation = self.next_id();
        let mut changed = 0;

        for entry in self.entries.iter_mut().filter(|e| !e.archived.value) {
            self.pending.push(Pending::new(
                mutation,
                entry.id,
                Previous::Archived(entry.archived.clone()),
            ));
            entry.archived.value = true;
            changed += 1;
        }

        (mutation, changed)
    }

    /// The server accepted `mutation` and answered with `summary`.
    pub fn confirm(&mut self, mutation: MutationId, summary: &ChatSummary) {
        self.pending.retain(|p| p.id != mutation);
        self.apply_snapshot(summary);
    }

    /// The server accepted a mutation that returns no snapshot (archive-all).
    ///
    /// Its fields keep their old stamps, so they hold the confirmed value
    /// until a snapshot agrees with it. An older snapshot still in flight
    /// cannot revert them.
    pub fn confirm_batch(&mut self, mutation: MutationId) {
        for pending in self.pending.iter_mut().filter(|p| p.id == mutation) {
            pending.awaiting = true;
        }
    }

    /// The server refused `mutation`. Restores what the user saw before it.
    ///
    /// If a newer edit of the same field is still pending, that edit inherits
    /// the restore target instead, and the visible value is left alone.
    /// A `NotFound` refusal drops the session; the dropped ids are returned.
    pub fn reject(&mut self, mutation: MutationId, error: &ClientError) -> Vec<ChatId> {
        let (rejected, rest): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|p| p.id == mutation && !p.awaiting);
        self.pending = rest;
        let mut dropped = Vec::new();

        for pending in rejected {
            if error.is_not_found() {
                debug!(chat_id = pending.chat_id, "dropping session the server does not know");
                self.remove(pending.chat_id);
                dropped.push(pending.chat_id);
                continue;
            }

            let field = pending.previous.field();
            if let Some(newer) = self
                .pending
                .iter_mut()
                .find(|p| !p.awaiting && p.id > mutation && p.touches(pending.chat_id, field))
            {
                newer.previous = pending.previous;
                continue;
            }

            if let Some(entry) = self.get_mut(pending.chat_id) {
                match pending.previous {
                    Previous::Title(previous) => entry.title = previous,
                    Previous::Archived(previous) => entry.archived = previous,
                }
            }
        }

        dropped
    }

    fn merge(&mut self, summary: &ChatSummary) {
        let title_pending = self.is_pending(summary.id, Field::Title);
        let mut archived_pending = self.is_pending(summary.id, Field::Archived);
        if !archived_pending && self.is_awaiting(summary.id, Field::Archived) {
            if summary.is_archived {
                self.clear_awaiting(summary.id, Field::Archived);
            } else {
                debug!(chat_id = summary.id, "snapshot predates archive-all; keeping archived");
                archived_pending = true;
            }
        }

        let Some(entry) = self.get_mut(summary.id) else {
            self.entries.push(SessionEntry::from_summary(summary));
            return;
        };

        if !title_pending && entry.title.accepts(summary.updated_at) {
            entry.title = Stamped::new(summary.title.clone(), summary.updated_at);
        }
        if !archived_pending && entry.archived.accepts(summary.updated_at) {
            entry.archived = Stamped::new(summary.is_archived, summary.updated_at);
        }
        if summary.updated_at >= entry.updated_at || entry.message_count < summary.message_count {
            entry.message_count = summary.message_count;
        }
        entry.created_at = summary.created_at;
        entry.updated_at = entry.updated_at.max(summary.updated_at);
    }

    fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
    }

    fn next_id(&mut self) -> MutationId {
        self.next_mutation += 1;
        MutationId(self.next_mutation)
    }
}
