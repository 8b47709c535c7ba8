//! Request handlers.

mod auth;
mod chat;
mod health;
mod stream;

pub use auth::issue_token;
pub use chat::{
    archive_all, archive_chat, create_chat, list_chats, list_messages, rename_chat,
    unarchive_chat,
};
pub use health::health;
pub use stream::stream_turn;
