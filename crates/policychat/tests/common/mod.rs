//! Test utilities and common setup.
#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response, header},
};
use policychat::api::{self, AppState};
use policychat::assistant::{Assistant, ScriptedAssistant};
use policychat::auth::{AuthConfig, AuthState, DevUser};
use policychat::db::Database;
use policychat::settings;
use policychat::stream::StreamConfig;
use serde_json::Value;
use std::sync::Arc;

pub const REPLY: &str = "Pre-medicate patients with a prior contrast reaction.";
pub const ALICE: &str = "alice";
pub const BOB: &str = "bob";
pub const PASSWORD: &str = "correct-horse-battery";

fn make_dev_user(id: &str, name: &str, password: &str) -> DevUser {
    DevUser {
        id: id.to_string(),
        name: name.to_string(),
        password_hash: bcrypt::hash(password, 4).expect("Failed to hash password"),
    }
}

fn test_auth_config() -> AuthConfig {
    let mut config = AuthConfig::default();
    config.dev_mode = true;
    config.dev_users = vec![
        make_dev_user(ALICE, "Alice", PASSWORD),
        make_dev_user(BOB, "Bob", PASSWORD),
    ];
    config.jwt_secret = Some("test-secret-for-unit-tests-minimum-32-chars-long".to_string());
    config
}

/// State backed by a fresh in-memory database and the given assistant.
pub async fn test_state_with(assistant: Option<ScriptedAssistant>) -> AppState {
    let database = Database::in_memory().await.expect("in-memory database");
    let assistant = assistant.map(|a| Arc::new(a) as Arc<dyn Assistant>);
    settings::assemble(
        AuthState::new(test_auth_config()),
        &database,
        assistant,
        StreamConfig::default(),
    )
}

pub async fn test_state() -> AppState {
    test_state_with(Some(ScriptedAssistant::new(REPLY))).await
}

pub async fn test_app() -> Router {
    api::create_router(test_state().await)
}

pub fn app(state: AppState) -> Router {
    api::create_router(state)
}

/// `dev:<id>` bearer token accepted in dev mode.
pub fn bearer(user: &str) -> String {
    format!("Bearer dev:{user}")
}

pub fn get(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::GET)
        .header(header::AUTHORIZATION, bearer(user))
        .body(Body::empty())
        .unwrap()
}

pub fn send_json(method: Method, uri: &str, user: &str, body: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(method)
        .header(header::AUTHORIZATION, bearer(user))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

pub fn patch(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::PATCH)
        .header(header::AUTHORIZATION, bearer(user))
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

/// Parse an SSE body into the JSON of each `data:` line.
pub fn sse_chunks(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim_start()).unwrap())
        .collect()
}
