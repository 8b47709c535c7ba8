//! Application state shared across handlers.

use crate::auth::AuthState;
use crate::chat::ChatRepository;
use crate::stream::StreamEmitter;
use crate::user::UserRepository;

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthState,
    pub chats: ChatRepository,
    pub users: UserRepository,
    pub emitter: StreamEmitter,
}

impl AppState {
    pub fn new(
        auth: AuthState,
        chats: ChatRepository,
        users: UserRepository,
        emitter: StreamEmitter,
    ) -> Self {
        Self {
            auth,
            chats,
            users,
            emitter,
        }
    }
}
