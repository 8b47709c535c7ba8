//! Chat store: sessions and their messages, scoped by owner.
//!
//! Every mutation is a targeted `UPDATE` of the fields it changes plus
//! `updated_at`, never a whole-record write, so concurrent mutations of
//! different fields (rename during a streaming turn, say) cannot clobber each
//! other. `updated_at` is bumped with `MAX(now, updated_at + 1)` which keeps it
//! strictly increasing per row even when two writes land in the same microsecond.

use policychat_protocol::{ChatId, ChatMessage, ChatSummary, Role, derive_title, validate_title};
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use super::error::{StoreError, StoreResult};
use super::models::{ChatRow, MessageRow, Page, ResolvedChat, now_micros};
use crate::db::Database;

const CHAT_COLUMNS: &str =
    "id, owner_id, title, created_at, updated_at, is_archived, message_count";

#[derive(Debug, Clone)]
pub struct ChatRepository {
    pool: SqlitePool,
}

impl ChatRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Sessions with the given archive flag, most recently updated first.
    #[instrument(skip(self))]
    pub async fn list_sessions(
        &self,
        owner: &str,
        archived: bool,
        page: Page,
    ) -> StoreResult<Vec<ChatSummary>> {
        let sql = format!(
            "SELECT {CHAT_COLUMNS} FROM chats
             WHERE owner_id = ? AND is_archived = ?
             ORDER BY updated_at DESC, id DESC
             LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query_as::<_, ChatRow>(&sql)
            .bind(owner)
            .bind(archived)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(ChatSummary::from).collect())
    }

    #[instrument(skip(self))]
    pub async fn get_session(&self, owner: &str, id: ChatId) -> StoreResult<ChatSummary> {
        self.fetch_row(owner, id)
            .await?
            .map(ChatSummary::from)
            .ok_or(StoreError::NotFound)
    }

    /// Create an empty session. A blank or missing hint leaves the title unset.
    #[instrument(skip(self))]
    pub async fn create_session(
        &self,
        owner: &str,
        title_hint: Option<&str>,
    ) -> StoreResult<ChatSummary> {
        let title = match title_hint {
            Some(hint) if !hint.trim().is_empty() => Some(validate_title(hint)?),
            _ => None,
        };
        let id = self.insert_chat(owner, title.as_deref(), None).await?;
        debug!(chat_id = id, "created chat");
        self.get_session(owner, id).await
    }

    /// Find the session a turn belongs to, minting one if needed.
    ///
    /// With `chat_id` the session must exist and belong to `owner`. Without it,
    /// a `request_id` already used by this owner resolves to the session that
    /// request minted; anything else mints a new session.
    #[instrument(skip(self))]
    pub async fn resolve_for_turn(
        &self,
        owner: &str,
        chat_id: Option<ChatId>,
        request_id: Option<&str>,
    ) -> StoreResult<ResolvedChat> {
        if let Some(id) = chat_id {
            let chat = self.get_session(owner, id).await?;
            return Ok(ResolvedChat {
                chat,
                created: false,
            });
        }

        let Some(request_id) = request_id else {
            let id = self.insert_chat(owner, None, None).await?;
            return Ok(ResolvedChat {
                chat: self.get_session(owner, id).await?,
                created: true,
            });
        };

        if let Some(id) = self.insert_chat_once(owner, request_id).await? {
            return Ok(ResolvedChat {
                chat: self.get_session(owner, id).await?,
                created: true,
            });
        }

        let sql = format!(
            "SELECT {CHAT_COLUMNS} FROM chats WHERE owner_id = ? AND origin_request_id = ?"
        );
        let row = sqlx::query_as::<_, ChatRow>(&sql)
            .bind(owner)
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        debug!(chat_id = row.id, request_id, "request id already minted a chat");

        Ok(ResolvedChat {
            chat: row.into(),
            created: false,
        })
    }

    /// Rename a session. Renaming to the current title changes nothing.
    #[instrument(skip(self))]
    pub async fn rename_session(
        &self,
        owner: &str,
        id: ChatId,
        new_title: &str,
    ) -> StoreResult<ChatSummary> {
        let title = validate_title(new_title)?;

        sqlx::query(
            r#"
            UPDATE chats
            SET title = ?, updated_at = MAX(?, updated_at + 1)
            WHERE id = ? AND owner_id = ? AND title IS NOT ?
            "#,
        )
        .bind(&title)
        .bind(now_micros())
        .bind(id)
        .bind(owner)
        .bind(&title)
        .execute(&self.pool)
        .await?;

        self.get_session(owner, id).await
    }

    /// Set the archive flag. Setting the current value changes nothing.
    #[instrument(skip(self))]
    pub async fn set_archived(
        &self,
        owner: &str,
        id: ChatId,
        archived: bool,
    ) -> StoreResult<ChatSummary> {
        sqlx::query(
            r#"
            UPDATE chats
            SET is_archived = ?, updated_at = MAX(?, updated_at + 1)
            WHERE id = ? AND owner_id = ? AND is_archived <> ?
            "#,
        )
        .bind(archived)
        .bind(now_micros())
        .bind(id)
        .bind(owner)
        .bind(archived)
        .execute(&self.pool)
        .await?;

        self.get_session(owner, id).await
    }

    /// Archive every active session of `owner`. Returns how many changed.
    #[instrument(skip(self))]
    pub async fn archive_all(&self, owner: &str) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE chats
            SET is_archived = 1, updated_at = MAX(?, updated_at + 1)
            WHERE owner_id = ? AND is_archived = 0
            "#,
        )
        .bind(now_micros())
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Messages of a session, oldest first.
    #[instrument(skip(self))]
    pub async fn list_messages(
        &self,
        owner: &str,
        id: ChatId,
        page: Page,
    ) -> StoreResult<Vec<ChatMessage>> {
        if self.fetch_row(owner, id).await?.is_none() {
            return Err(StoreError::NotFound);
        }

        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, chat_id, role, content, created_at
            FROM messages
            WHERE chat_id = ?
            ORDER BY id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChatMessage::try_from).collect()
    }

    /// Store a message and bump the session's count and `updated_at` together.
    #[instrument(skip(self, content), fields(len = content.len()))]
    pub async fn append_message(
        &self,
        owner: &str,
        id: ChatId,
        role: Role,
        content: &str,
    ) -> StoreResult<ChatMessage> {
        let now = now_micros();
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query(
            r#"
            UPDATE chats
            SET message_count = message_count + 1, updated_at = MAX(?, updated_at + 1)
            WHERE id = ? AND owner_id = ?
            "#,
        )
        .bind(now)
        .bind(id)
        .bind(owner)
        .execute(&mut *tx)
        .await?;

        if touched.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        let message_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO messages (chat_id, role, content, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(role.as_str())
        .bind(content)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ChatMessage {
            id: message_id,
            role,
            content: content.to_string(),
            created_at: super::models::from_micros(now),
        })
    }

    /// Title an untitled session after its first user message.
    ///
    /// Returns `true` when a title was applied. A title set in the meantime,
    /// by a rename for instance, is left alone.
    #[instrument(skip(self))]
    pub async fn derive_title_if_unset(&self, owner: &str, id: ChatId) -> StoreResult<bool> {
        let first: Option<String> = sqlx::query_scalar(
            r#"
            SELECT m.content
            FROM messages m
            JOIN chats c ON c.id = m.chat_id
            WHERE m.chat_id = ? AND c.owner_id = ? AND c.title IS NULL AND m.role = 'user'
            ORDER BY m.id ASC
            LIMIT 1
            "#,
        )
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;

        let Some(title) = first.as_deref().and_then(derive_title) else {
            return Ok(false);
        };

        let result = sqlx::query(
            r#"
            UPDATE chats
            SET title = ?, updated_at = MAX(?, updated_at + 1)
            WHERE id = ? AND owner_id = ? AND title IS NULL
            "#,
        )
        .bind(&title)
        .bind(now_micros())
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn fetch_row(&self, owner: &str, id: ChatId) -> StoreResult<Option<ChatRow>> {
        let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ? AND owner_id = ?");
        let row = sqlx::query_as::<_, ChatRow>(&sql)
            .bind(id)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn insert_chat(
        &self,
        owner: &str,
        title: Option<&str>,
        request_id: Option<&str>,
    ) -> StoreResult<ChatId> {
        let now = now_micros();
        let id = sqlx::query_scalar::<_, ChatId>(
            r#"
            INSERT INTO chats (owner_id, title, created_at, updated_at, origin_request_id)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(owner)
        .bind(title)
        .bind(now)
        .bind(now)
        .bind(request_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Insert a chat keyed by `request_id`, or return `None` if the key was used.
    async fn insert_chat_once(&self, owner: &str, request_id: &str) -> StoreResult<Option<ChatId>> {
        let now = now_micros();
        let id = sqlx::query_scalar::<_, ChatId>(
            r#"
            INSERT INTO chats (owner_id, title, created_at, updated_at, origin_request_id)
            VALUES (?, NULL, ?, ?, ?)
            ON CONFLICT (owner_id, origin_request_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(owner)
        .bind(now)
        .bind(now)
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }
}
