//! Chat session handlers.

use axum::{
    Json,
    body::Bytes,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
};
use policychat_protocol::{
    ArchiveAllResponse, ChatId, ChatMessage, ChatSummary, CreateChatRequest, RenameRequest,
};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::auth::CurrentUser;
use crate::chat::Page;

#[derive(Debug, Default, Deserialize)]
pub struct ListChatsQuery {
    #[serde(default)]
    pub archived: bool,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

/// `GET /chat?archived=&skip=&limit=`
#[instrument(skip(state, user), fields(user_id = %user.id()))]
pub async fn list_chats(
    State(state): State<AppState>,
    user: CurrentUser,
    query: Result<Query<ListChatsQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ChatSummary>>> {
    let Query(query) = query?;
    let chats = state
        .chats
        .list_sessions(user.id(), query.archived, Page::new(query.skip, query.limit))
        .await?;
    Ok(Json(chats))
}

/// `POST /chat`. The body is optional.
#[instrument(skip(state, user, body), fields(user_id = %user.id()))]
pub async fn create_chat(
    State(state): State<AppState>,
    user: CurrentUser,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<ChatSummary>)> {
    let request: CreateChatRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateChatRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::unprocessable(e.to_string()))?
    };

    let chat = state
        .chats
        .create_session(user.id(), request.title.as_deref())
        .await?;
    info!(chat_id = chat.id, "created chat");
    Ok((StatusCode::CREATED, Json(chat)))
}

/// `GET /chat/{id}/messages`
#[instrument(skip(state, user, id), fields(user_id = %user.id()))]
pub async fn list_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    id: Result<Path<ChatId>, PathRejection>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    let Path(id) = id?;
    let Query(query) = query?;
    let messages = state
        .chats
        .list_messages(user.id(), id, Page::new(query.skip, query.limit))
        .await?;
    Ok(Json(messages))
}

/// `PATCH /chat/{id}/rename`
#[instrument(skip(state, user, id, payload), fields(user_id = %user.id()))]
pub async fn rename_chat(
    State(state): State<AppState>,
    user: CurrentUser,
    id: Result<Path<ChatId>, PathRejection>,
    payload: Result<Json<RenameRequest>, JsonRejection>,
) -> ApiResult<Json<ChatSummary>> {
    let Path(id) = id?;
    let Json(request) = payload?;
    let chat = state
        .chats
        .rename_session(user.id(), id, &request.new_title)
        .await?;
    Ok(Json(chat))
}

/// `PATCH /chat/{id}/archive`
pub async fn archive_chat(
    State(state): State<AppState>,
    user: CurrentUser,
    id: Result<Path<ChatId>, PathRejection>,
) -> ApiResult<Json<ChatSummary>> {
    let Path(id) = id?;
    Ok(Json(state.chats.set_archived(user.id(), id, true).await?))
}

/// `PATCH /chat/{id}/unarchive`
pub async fn unarchive_chat(
    State(state): State<AppState>,
    user: CurrentUser,
    id: Result<Path<ChatId>, PathRejection>,
) -> ApiResult<Json<ChatSummary>> {
    let Path(id) = id?;
    Ok(Json(state.chats.set_archived(user.id(), id, false).await?))
}

/// `POST /chat/archive-all`
#[instrument(skip(state, user), fields(user_id = %user.id()))]
pub async fn archive_all(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<ArchiveAllResponse>> {
    let count = state.chats.archive_all(user.id()).await?;
    info!(count, "archived all chats");
    Ok(Json(ArchiveAllResponse {
        message: format!("Archived {count} chats"),
        count,
    }))
}
