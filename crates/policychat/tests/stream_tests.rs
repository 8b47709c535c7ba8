//! Streaming turn tests over HTTP.

use axum::http::{Method, StatusCode};
use axum_test::TestServer;
use policychat::assistant::ScriptedAssistant;
use policychat_protocol::ChatSummary;
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::{
    ALICE, BOB, REPLY, app, body_json, body_text, get, send_json, sse_chunks, test_app,
    test_state_with,
};

fn text_of(chunks: &[Value]) -> String {
    chunks
        .iter()
        .filter(|c| c["type"] == "text_delta")
        .filter_map(|c| c["data"].as_str())
        .collect()
}

async fn stream(router: &axum::Router, user: &str, body: Value) -> Vec<Value> {
    let response = router
        .clone()
        .oneshot(send_json(Method::POST, "/chat/stream", user, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    sse_chunks(&body_text(response).await)
}

#[tokio::test]
async fn test_new_conversation_streams_and_persists() {
    let server = TestServer::new(test_app().await).unwrap();

    let response = server
        .post("/chat/stream")
        .authorization_bearer("dev:alice")
        .json(&json!({ "message": "What is the contrast pre-medication policy?" }))
        .await;
    response.assert_status_ok();
    let chunks = sse_chunks(&response.text());

    assert_eq!(chunks[0]["type"], "chat_info");
    assert!(chunks[0]["data"]["title"].is_null());
    let chat_id = chunks[0]["data"]["chat_id"].as_i64().unwrap();

    assert_eq!(text_of(&chunks), REPLY);

    let last = chunks.last().unwrap();
    assert_eq!(last["type"], "status");
    assert_eq!(last["data"]["status"], "complete");
    assert_eq!(last["data"]["chat_id"], chat_id);
    let chat: ChatSummary = serde_json::from_value(last["data"]["chat"].clone()).unwrap();
    assert_eq!(
        chat.title.as_deref(),
        Some("What is the contrast pre-medication policy?")
    );
    assert_eq!(chat.message_count, 2);
    assert_eq!(chunks.iter().filter(|c| c["type"] == "status").count(), 1);

    let response = server
        .get(&format!("/chat/{chat_id}/messages"))
        .authorization_bearer("dev:alice")
        .await;
    response.assert_status_ok();
    let messages: Vec<Value> = response.json();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"], REPLY);
}

#[tokio::test]
async fn test_follow_up_keeps_chat() {
    let router = test_app().await;

    let first = stream(&router, ALICE, json!({ "message": "Leave carry-over rules?" })).await;
    let chat_id = first[0]["data"]["chat_id"].as_i64().unwrap();

    let second = stream(
        &router,
        ALICE,
        json!({ "message": "And for part-time staff?", "chat_id": chat_id }),
    )
    .await;
    assert_eq!(second[0]["data"]["chat_id"], chat_id);
    assert_eq!(second[0]["data"]["title"], "Leave carry-over rules?");

    let last = second.last().unwrap();
    assert_eq!(last["data"]["chat"]["message_count"], 4);
    assert_eq!(last["data"]["chat"]["title"], "Leave carry-over rules?");
}

#[tokio::test]
async fn test_user_title_survives_turn() {
    let router = test_app().await;
    let response = router
        .clone()
        .oneshot(send_json(Method::POST, "/chat", ALICE, json!({})))
        .await
        .unwrap();
    let chat: ChatSummary = serde_json::from_value(body_json(response).await).unwrap();

    router
        .clone()
        .oneshot(send_json(
            Method::PATCH,
            &format!("/chat/{}/rename", chat.id),
            ALICE,
            json!({ "new_title": "Radiology" }),
        ))
        .await
        .unwrap();

    let chunks = stream(
        &router,
        ALICE,
        json!({ "message": "Contrast policy?", "chat_id": chat.id }),
    )
    .await;
    assert_eq!(chunks[0]["data"]["title"], "Radiology");
    assert_eq!(chunks.last().unwrap()["data"]["chat"]["title"], "Radiology");
}

#[tokio::test]
async fn test_request_id_reuses_minted_chat() {
    let router = test_app().await;
    let body = json!({ "message": "Overtime approval?", "request_id": "req-7f3a" });

    let first = stream(&router, ALICE, body.clone()).await;
    let second = stream(&router, ALICE, body).await;
    assert_eq!(first[0]["data"]["chat_id"], second[0]["data"]["chat_id"]);

    let response = router.oneshot(get("/chat", ALICE)).await.unwrap();
    let chats: Vec<ChatSummary> = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(chats.len(), 1);
}

#[tokio::test]
async fn test_refusals_never_open_a_stream() {
    let router = test_app().await;

    let response = router
        .clone()
        .oneshot(send_json(
            Method::POST,
            "/chat/stream",
            ALICE,
            json!({ "message": "   " }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = router
        .clone()
        .oneshot(send_json(
            Method::POST,
            "/chat/stream",
            ALICE,
            json!({ "message": "hello", "chat_id": 987654 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router
        .clone()
        .oneshot(send_json(
            Method::POST,
            "/chat/stream",
            ALICE,
            json!({ "message": "hello", "user_id": BOB }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = router.oneshot(get("/chat", ALICE)).await.unwrap();
    let chats: Vec<ChatSummary> = serde_json::from_value(body_json(response).await).unwrap();
    assert!(chats.is_empty());
}

#[tokio::test]
async fn test_second_turn_in_same_chat_is_busy() {
    let state = test_state_with(Some(ScriptedAssistant::new(REPLY).stalling_after(1))).await;
    let router = app(state);

    let response = router
        .clone()
        .oneshot(send_json(Method::POST, "/chat", ALICE, json!({})))
        .await
        .unwrap();
    let chat: ChatSummary = serde_json::from_value(body_json(response).await).unwrap();

    let first = router
        .clone()
        .oneshot(send_json(
            Method::POST,
            "/chat/stream",
            ALICE,
            json!({ "message": "first", "chat_id": chat.id }),
        ))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = router
        .oneshot(send_json(
            Method::POST,
            "/chat/stream",
            ALICE,
            json!({ "message": "second", "chat_id": chat.id }),
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(second).await["code"], "CONFLICT");
    drop(first);
}

#[tokio::test]
async fn test_assistant_failure_is_reported_in_band() {
    let state = test_state_with(Some(ScriptedAssistant::new(REPLY).failing_after(2))).await;
    let router = app(state);

    let chunks = stream(&router, ALICE, json!({ "message": "Badge replacement?" })).await;
    let chat_id = chunks[0]["data"]["chat_id"].as_i64().unwrap();

    let kinds: Vec<_> = chunks.iter().map(|c| c["type"].as_str().unwrap()).collect();
    assert_eq!(
        kinds,
        vec!["chat_info", "text_delta", "text_delta", "error", "status"]
    );
    assert_eq!(chunks[4]["data"]["status"], "error");

    let response = router
        .oneshot(get(&format!("/chat/{chat_id}/messages"), ALICE))
        .await
        .unwrap();
    let messages: Vec<Value> = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");
}

#[tokio::test]
async fn test_disabled_assistant_fails_turn() {
    let router = app(test_state_with(None).await);

    let chunks = stream(&router, ALICE, json!({ "message": "anyone there?" })).await;
    let kinds: Vec<_> = chunks.iter().map(|c| c["type"].as_str().unwrap()).collect();
    assert_eq!(kinds, vec!["chat_info", "error", "status"]);
    assert!(chunks[1]["data"]["message"].is_string());
}

#[tokio::test]
async fn test_stream_requires_auth() {
    let server = TestServer::new(test_app().await).unwrap();

    let response = server
        .post("/chat/stream")
        .json(&json!({ "message": "hello" }))
        .expect_failure()
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}
