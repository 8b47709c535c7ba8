//! Server configuration and application assembly.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::api::AppState;
use crate::assistant::{self, Assistant, AssistantConfig};
use crate::auth::{AuthConfig, AuthState};
use crate::chat::ChatRepository;
use crate::db::Database;
use crate::stream::{StreamConfig, StreamEmitter};
use crate::user::UserRepository;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub stream: StreamConfig,
    pub assistant: AssistantConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file. Defaults to `policychat.db` in the data directory.
    pub path: Option<String>,
}

/// Wire repositories, auth and the stream emitter onto one database.
pub fn build_state(config: &AppConfig, database: &Database) -> Result<AppState> {
    config
        .auth
        .validate()
        .context("Invalid auth configuration")?;

    let assistant = assistant::build_assistant(&config.assistant)
        .context("building assistant")?;
    match &assistant {
        Some(a) => info!("Assistant: {}", a.name()),
        None => info!("Assistant: disabled"),
    }

    Ok(assemble(
        AuthState::new(config.auth.clone()),
        database,
        assistant,
        config.stream.clone(),
    ))
}

/// Build state from parts already in hand.
pub fn assemble(
    auth: AuthState,
    database: &Database,
    assistant: Option<Arc<dyn Assistant>>,
    stream: StreamConfig,
) -> AppState {
    let chats = ChatRepository::new(database);
    let users = UserRepository::new(database.pool().clone());
    let emitter = StreamEmitter::new(chats.clone(), assistant, stream);
    AppState::new(auth, chats, users, emitter)
}
