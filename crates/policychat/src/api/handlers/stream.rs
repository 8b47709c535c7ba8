//! `POST /chat/stream`: one turn as Server-Sent Events.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use policychat_protocol::{StreamChunk, TurnRequest};
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::auth::CurrentUser;

/// Each chunk is one unnamed SSE event whose data is the chunk JSON.
///
/// Refusals (404, 409, 422, 403) are plain JSON errors and never open a
/// stream. Once the stream is open every failure is reported in-band.
pub async fn stream_turn(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: Result<Json<TurnRequest>, JsonRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let Json(request) = payload?;

    if let Some(claimed) = request.user_id.as_deref()
        && claimed != user.id()
    {
        warn!(user_id = %user.id(), claimed, "turn request names another user");
        return Err(ApiError::forbidden("user_id does not match the authenticated user"));
    }

    let turn = state.emitter.prepare(user.id(), &request).await?;
    info!(
        user_id = %user.id(),
        chat_id = turn.chat_id(),
        created = turn.created(),
        "streaming turn"
    );

    let keep_alive = state.emitter.config().keep_alive();
    let (rx, _task) = state.emitter.start(turn);
    let events = ReceiverStream::new(rx).map(|chunk| Ok(chunk_event(&chunk)));

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(keep_alive)))
}

fn chunk_event(chunk: &StreamChunk) -> Event {
    match serde_json::to_string(chunk) {
        Ok(json) => Event::default().data(json),
        Err(e) => {
            warn!("failed to encode {} chunk: {}", chunk.kind(), e);
            Event::default().comment("unencodable chunk")
        }
    }
}
